use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single extracted contact.
///
/// Every field is optional on the wire: extraction output from an LLM is
/// noisy and records frequently arrive with only a subset of fields filled.
/// Absent fields deserialize to their empty defaults.
///
/// `other_emails`, `other_phones`, and `merged_from_count` are populated only
/// by deduplication, never by extraction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ContactRecord {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub organization: String,
    pub position: String,
    pub city: String,
    /// Extraction confidence in `[0, 1]`. A merged record carries the maximum
    /// confidence of its sources.
    pub confidence: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub other_emails: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub other_phones: BTreeSet<String>,
    /// Size of the deduplication group this record was merged from.
    /// Zero (and skipped in serialization) for records that were never merged.
    #[serde(skip_serializing_if = "is_zero")]
    pub merged_from_count: usize,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl ContactRecord {
    /// True when the record carries nothing a matcher could key on: no
    /// email, no phone, no name.
    #[must_use]
    pub fn is_unmatchable(&self) -> bool {
        self.email.trim().is_empty() && self.phone.trim().is_empty() && self.name.trim().is_empty()
    }
}
