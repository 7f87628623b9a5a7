//! Collapse redundant contact records into one canonical record per entity.
//!
//! The same sender routinely appears in an original email and in several
//! forwarded copies with slightly different formatting. Grouping runs in two
//! passes: a deterministic pass over normalized exact keys, then a fuzzy
//! similarity pass that only ever attaches records the first pass left
//! ungrouped.

use std::collections::BTreeSet;
use std::collections::HashMap;

use crate::normalize::{email_key, name_key, phone_key};
use crate::record::ContactRecord;

#[derive(Clone, Debug)]
pub struct DedupConfig {
    /// Minimum weighted similarity score for the fuzzy pass to declare a match.
    pub similarity_threshold: f64,
    pub name_weight: f64,
    pub organization_weight: f64,
    pub position_weight: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            name_weight: 0.40,
            organization_weight: 0.35,
            position_weight: 0.25,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Deduplicator {
    config: DedupConfig,
}

/// Union-find over record indices. Unions always keep the smaller root so the
/// representative of a group is its first-seen record.
struct Groups {
    parent: Vec<usize>,
}

impl Groups {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (keep, fold) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[fold] = keep;
        }
    }
}

impl Deduplicator {
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Collapse `records` into one canonical record per distinct contact.
    ///
    /// Empty input yields empty output. Records with no matchable key pass
    /// through untouched, as do all singleton groups.
    #[must_use]
    pub fn deduplicate(&self, records: Vec<ContactRecord>) -> Vec<ContactRecord> {
        if records.is_empty() {
            return records;
        }

        let mut groups = Groups::new(records.len());
        Self::exact_pass(&records, &mut groups);

        let singletons = singleton_indices(&records, &mut groups);
        self.fuzzy_pass(&records, &singletons, &mut groups);

        // Collect members per root, ordered by first appearance.
        let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut roots_in_order = Vec::new();
        for i in 0..records.len() {
            let root = groups.find(i);
            let entry = members.entry(root).or_default();
            if entry.is_empty() {
                roots_in_order.push(root);
            }
            entry.push(i);
        }

        let merged: Vec<ContactRecord> = roots_in_order
            .into_iter()
            .map(|root| merge_group(&records, &members[&root]))
            .collect();
        tracing::debug!(
            input = records.len(),
            output = merged.len(),
            "deduplication complete"
        );
        merged
    }

    /// OR-of-exact-keys matching: shared email, shared phone, or shared
    /// (name, organization) pair. Empty keys never match anything.
    fn exact_pass(records: &[ContactRecord], groups: &mut Groups) {
        let mut by_email: HashMap<String, usize> = HashMap::new();
        let mut by_phone: HashMap<String, usize> = HashMap::new();
        let mut by_name_org: HashMap<(String, String), usize> = HashMap::new();

        for (i, record) in records.iter().enumerate() {
            let email = email_key(&record.email);
            if !email.is_empty() {
                if let Some(&first) = by_email.get(&email) {
                    groups.union(i, first);
                } else {
                    by_email.insert(email, i);
                }
            }

            let phone = phone_key(&record.phone);
            if !phone.is_empty() {
                if let Some(&first) = by_phone.get(&phone) {
                    groups.union(i, first);
                } else {
                    by_phone.insert(phone, i);
                }
            }

            let name = name_key(&record.name);
            let org = name_key(&record.organization);
            if !name.is_empty() && !org.is_empty() {
                let key = (name, org);
                if let Some(&first) = by_name_org.get(&key) {
                    groups.union(i, first);
                } else {
                    by_name_org.insert(key, i);
                }
            }
        }
    }

    /// Attach records the exact pass left alone to whichever record they are
    /// textually closest to. Two exact groups never merge here: at least one
    /// side of every fuzzy union is a pass-one singleton.
    fn fuzzy_pass(&self, records: &[ContactRecord], singletons: &[usize], groups: &mut Groups) {
        for &i in singletons {
            if records[i].is_unmatchable() {
                continue;
            }
            for (j, other) in records.iter().enumerate() {
                if i == j || other.is_unmatchable() {
                    continue;
                }
                let score = self.similarity(&records[i], other);
                if score >= self.config.similarity_threshold {
                    tracing::debug!(a = i, b = j, score, "fuzzy match");
                    groups.union(i, j);
                }
            }
        }
    }

    /// Weighted textual closeness over name, organization, and position.
    ///
    /// Weights renormalize over the fields present on both sides, so a pair
    /// of name-only records is judged on names alone rather than being
    /// dragged down by fields neither record has.
    #[must_use]
    pub fn similarity(&self, a: &ContactRecord, b: &ContactRecord) -> f64 {
        let pairs = [
            (name_key(&a.name), name_key(&b.name), self.config.name_weight),
            (
                name_key(&a.organization),
                name_key(&b.organization),
                self.config.organization_weight,
            ),
            (
                name_key(&a.position),
                name_key(&b.position),
                self.config.position_weight,
            ),
        ];

        let mut score = 0.0;
        let mut weight = 0.0;
        for (left, right, w) in &pairs {
            if !left.is_empty() && !right.is_empty() {
                score += w * text_ratio(left, right);
                weight += w;
            }
        }
        if weight > 0.0 { score / weight } else { 0.0 }
    }
}

/// Indices of records the exact pass left in groups of size one.
fn singleton_indices(records: &[ContactRecord], groups: &mut Groups) -> Vec<usize> {
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for i in 0..records.len() {
        *sizes.entry(groups.find(i)).or_default() += 1;
    }
    (0..records.len())
        .filter(|&i| sizes[&groups.find(i)] == 1)
        .collect()
}

fn text_ratio(a: &str, b: &str) -> f64 {
    f64::from(similar::TextDiff::from_chars(a, b).ratio())
}

fn keep_longest(current: &mut String, candidate: &str) {
    if candidate.chars().count() > current.chars().count() {
        candidate.clone_into(current);
    }
}

/// Fold one group into its canonical record. Groups of size one pass through
/// unchanged.
fn merge_group(records: &[ContactRecord], group: &[usize]) -> ContactRecord {
    if let [only] = group {
        return records[*only].clone();
    }

    let mut merged = ContactRecord::default();

    for &i in group {
        let record = &records[i];
        keep_longest(&mut merged.name, &record.name);
        keep_longest(&mut merged.organization, &record.organization);
        keep_longest(&mut merged.position, &record.position);
        keep_longest(&mut merged.city, &record.city);
        if merged.email.is_empty() && !record.email.trim().is_empty() {
            merged.email = record.email.clone();
        }
        if merged.source.is_empty() && !record.source.is_empty() {
            merged.source = record.source.clone();
        }
        merged.confidence = merged.confidence.max(record.confidence);
    }

    // Secondary emails: distinct by normalized key, primary excluded.
    let primary_email = email_key(&merged.email);
    let mut seen_emails = BTreeSet::new();
    seen_emails.insert(primary_email);
    for &i in group {
        let raw = records[i].email.trim();
        if !raw.is_empty() && seen_emails.insert(email_key(raw)) {
            merged.other_emails.insert(raw.to_owned());
        }
        for extra in &records[i].other_emails {
            if seen_emails.insert(email_key(extra)) {
                merged.other_emails.insert(extra.clone());
            }
        }
    }

    // Phones keep every distinct raw spelling: first seen becomes the
    // primary, the rest land in other_phones.
    for &i in group {
        let raw = records[i].phone.trim();
        if !raw.is_empty() {
            if merged.phone.is_empty() {
                merged.phone = raw.to_owned();
            } else if raw != merged.phone {
                merged.other_phones.insert(raw.to_owned());
            }
        }
        for extra in &records[i].other_phones {
            if *extra != merged.phone {
                merged.other_phones.insert(extra.clone());
            }
        }
    }

    merged.merged_from_count = group.len();
    merged
}
