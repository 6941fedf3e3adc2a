//! Key identifier allow-list for GPG operations
//!
//! Entries are full fingerprints or trailing long/short key ids. Matching
//! is suffix containment in either direction, so `90ABCD1234` and
//! `ABCD1234` match each other regardless of which side is stored.
//!
//! This rule is permissive: a short id also matches any unrelated longer
//! fingerprint that happens to share its suffix. Keep it that way unless
//! the callers that publish allow-lists are changed at the same time.

use std::fmt;

/// Normalize a key identifier for comparison (trimmed, uppercase)
pub fn normalize_key_id(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}

/// Immutable set of permitted key identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyAllowList {
    entries: Vec<String>,
}

impl KeyAllowList {
    /// Build an allow-list from raw identifiers
    ///
    /// Blank entries are dropped and duplicates are collapsed.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<String> = ids
            .into_iter()
            .map(|id| normalize_key_id(id.as_ref()))
            .filter(|id| !id.is_empty())
            .collect();
        entries.sort();
        entries.dedup();
        Self { entries }
    }

    /// An allow-list that permits every key
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether the list is empty (and therefore allows everything)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over the normalized entries
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Check whether a key identifier is permitted
    pub fn is_allowed(&self, id: &str) -> bool {
        if self.entries.is_empty() {
            return true;
        }

        let probe = normalize_key_id(id);
        self.entries.iter().any(|entry| {
            probe == *entry || probe.ends_with(entry.as_str()) || entry.ends_with(probe.as_str())
        })
    }
}

impl fmt::Display for KeyAllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "<all keys>");
        }
        write!(f, "{}", self.entries.join(","))
    }
}

impl<S: AsRef<str>> FromIterator<S> for KeyAllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allows_everything() {
        let list = KeyAllowList::allow_all();
        assert!(list.is_empty());
        assert!(list.is_allowed(""));
        assert!(list.is_allowed("DEADBEEF"));
        assert!(list.is_allowed("  anything at all "));
    }

    #[test]
    fn test_exact_match_is_reflexive() {
        let list = KeyAllowList::new(["0123456789ABCDEF0123456789ABCDEF01234567", "CAFEBABE"]);
        for entry in list.iter().map(str::to_string).collect::<Vec<_>>() {
            assert!(list.is_allowed(&entry), "{entry} should be allowed");
        }
    }

    #[test]
    fn test_short_probe_matches_longer_entry() {
        let list = KeyAllowList::new(["90ABCD1234"]);
        assert!(list.is_allowed("ABCD1234"));
    }

    #[test]
    fn test_long_probe_matches_shorter_entry() {
        let list = KeyAllowList::new(["ABCD1234"]);
        assert!(list.is_allowed("90ABCD1234"));
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let list = KeyAllowList::new(["  cafebabe\t"]);
        assert!(list.is_allowed("CAFEBABE"));
        assert!(list.is_allowed(" CafeBabe "));
        assert!(list.is_allowed("0000cafebabe"));
    }

    #[test]
    fn test_unrelated_key_denied() {
        let list = KeyAllowList::new(["CAFEBABE"]);
        assert!(!list.is_allowed("DEADBEEF"));
        assert!(!list.is_allowed("CAFEBABF"));
    }

    #[test]
    fn test_middle_substring_is_not_a_match() {
        let list = KeyAllowList::new(["11CAFEBABE22"]);
        assert!(!list.is_allowed("CAFEBABE"));
    }

    #[test]
    fn test_blank_entries_dropped_and_deduplicated() {
        let list = KeyAllowList::new(["", "  ", "abcd", "ABCD"]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.to_string(), "ABCD");
    }

    #[test]
    fn test_display_allow_all() {
        assert_eq!(KeyAllowList::allow_all().to_string(), "<all keys>");
    }

    #[test]
    fn test_collect() {
        let list: KeyAllowList = vec!["a1", "b2"].into_iter().collect();
        assert_eq!(list.len(), 2);
        assert!(list.is_allowed("B2"));
    }
}
