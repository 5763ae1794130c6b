//! In-text citation marker scanning and validation.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::registry::CitationId;

static MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\[(\d{1,9})\]").ok());

/// Collect every distinct `[n]` marker id in `text`.
pub fn scan_markers(text: &str) -> BTreeSet<CitationId> {
    let Some(re) = MARKER.as_ref() else {
        return BTreeSet::new();
    };
    re.captures_iter(text)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<CitationId>().ok())
        .collect()
}

/// Result of checking a document's markers against a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// `true` iff every marker resolves to a registered id.
    pub valid: bool,
    /// Marker ids with no registered citation.
    pub invalid_citations: BTreeSet<CitationId>,
    /// Registered ids never referenced by the text.
    pub missing_citations: BTreeSet<CitationId>,
    /// Every marker id found in the text.
    pub used_citations: BTreeSet<CitationId>,
    /// Invalid ids above the highest registered id.
    pub out_of_range_citations: BTreeSet<CitationId>,
    /// Highest registered id at validation time (`0` when empty).
    pub max_valid_id: CitationId,
}

impl ValidationReport {
    /// Build a report from the used marker set and a gap-free `1..=max_id` id set.
    pub fn from_sets(used: BTreeSet<CitationId>, max_id: CitationId) -> Self {
        let registered = |id: &CitationId| *id >= 1 && *id <= max_id;
        let invalid: BTreeSet<CitationId> = used.iter().copied().filter(|id| !registered(id)).collect();
        let missing: BTreeSet<CitationId> = (1..=max_id).filter(|id| !used.contains(id)).collect();
        let out_of_range: BTreeSet<CitationId> =
            invalid.iter().copied().filter(|id| *id > max_id).collect();

        Self {
            valid: invalid.is_empty(),
            invalid_citations: invalid,
            missing_citations: missing,
            used_citations: used,
            out_of_range_citations: out_of_range,
            max_valid_id: max_id,
        }
    }

    /// Marker ids that resolve to registered citations.
    pub fn resolved(&self) -> BTreeSet<CitationId> {
        self.used_citations
            .difference(&self.invalid_citations)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CitationRegistry;
    use rstest::rstest;

    fn set(ids: &[CitationId]) -> BTreeSet<CitationId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_validate_reports_invalid_and_missing() {
        let registry = CitationRegistry::new();
        registry.register("https://one.example", "");
        registry.register("https://two.example", "");

        let report = registry.validate("See [1] and [3].");
        assert!(!report.valid);
        assert_eq!(report.used_citations, set(&[1, 3]));
        assert_eq!(report.invalid_citations, set(&[3]));
        assert_eq!(report.missing_citations, set(&[2]));
        assert_eq!(report.out_of_range_citations, set(&[3]));
        assert_eq!(report.max_valid_id, 2);
        assert_eq!(report.resolved(), set(&[1]));
    }

    #[test]
    fn test_zero_marker_is_invalid_but_not_out_of_range() {
        let report = ValidationReport::from_sets(set(&[0, 1]), 1);
        assert!(!report.valid);
        assert_eq!(report.invalid_citations, set(&[0]));
        assert!(report.out_of_range_citations.is_empty());
    }

    #[test]
    fn test_empty_registry_and_text() {
        let report = CitationRegistry::new().validate("No citations here.");
        assert!(report.valid);
        assert!(report.used_citations.is_empty());
        assert!(report.missing_citations.is_empty());
        assert_eq!(report.max_valid_id, 0);
    }

    #[rstest]
    #[case("plain text", &[])]
    #[case("one [1] two [2][2]", &[1, 2])]
    #[case("[10], [7] and [ 3 ] or [x]", &[7, 10])]
    #[case("link [text](https://x) [4]", &[4])]
    fn test_scan_markers(#[case] text: &str, #[case] expected: &[CitationId]) {
        assert_eq!(scan_markers(text), set(expected));
    }
}
