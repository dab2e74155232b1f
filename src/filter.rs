//! Match filter: keeps only records that belong to the target performer.
//!
//! Fragment queries return many unrelated performers. A record is kept when
//! the target name and the reported performer name contain one another,
//! which covers both shortened stage names and extended credits
//! ("周杰倫&費玉清"). Matching is exact and case-sensitive.

use crate::models::RawMatch;

/// Performer-name containment test. Blank reported names never match.
pub fn performer_matches(reported: &str, target: &str) -> bool {
    let reported = reported.trim();
    let target = target.trim();
    if reported.is_empty() || target.is_empty() {
        return false;
    }
    reported.contains(target) || target.contains(reported)
}

/// Whether `record` should reach the reconciler for `target`.
/// Records with a blank title are also dropped here; the reconciler treats
/// one as a broken contract.
pub fn accepts(record: &RawMatch, target: &str) -> bool {
    !record.title.trim().is_empty() && performer_matches(&record.performer_name, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, performer: &str) -> RawMatch {
        RawMatch {
            title: title.into(),
            performer_name: performer.into(),
            partition_id: "P1".into(),
            source_code: "001".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_and_superset_accepted() {
        assert!(accepts(&record("A", "X"), "X"));
        assert!(accepts(&record("A", "XY"), "X"));
    }

    #[test]
    fn test_shortened_name_accepted() {
        assert!(accepts(&record("A", "五月"), "五月天"));
    }

    #[test]
    fn test_unrelated_and_empty_rejected() {
        assert!(!accepts(&record("A", "ABC"), "X"));
        assert!(!accepts(&record("A", ""), "X"));
        assert!(!accepts(&record("A", "   "), "X"));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!performer_matches("beyond", "Beyond"));
        assert!(performer_matches("Beyond樂隊", "Beyond"));
    }

    #[test]
    fn test_blank_title_rejected() {
        assert!(!accepts(&record("  ", "X"), "X"));
    }

    #[test]
    fn test_reported_name_is_trimmed() {
        assert!(accepts(&record("A", " X "), "X"));
    }
}
