//! Comparison-key normalization.
//!
//! Matching never compares raw field values: emails are case-folded, phones
//! are reduced to a canonical digit string, names have their whitespace
//! collapsed. Raw values are preserved on the records themselves.

/// Lowercase and trim an email address.
#[must_use]
pub fn email_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Reduce a phone number to its canonical digit form.
///
/// Russian numbers normalize to a leading-`7`, 11-digit string: an 11-digit
/// number starting with `8` has the `8` replaced by `7`, and a bare 10-digit
/// number gets `7` prepended. Any other length passes through digits-only.
#[must_use]
pub fn phone_key(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 11 && digits.starts_with('8') {
        format!("7{}", &digits[1..])
    } else if digits.len() == 10 {
        format!("7{digits}")
    } else {
        digits
    }
}

/// Lowercase a name and collapse internal whitespace to single spaces.
#[must_use]
pub fn name_key(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
