//! Refresh analysis for performers already in the catalog.
//!
//! A stored performer is worth re-collecting when its catalog looks thin
//! (too few songs overall, or too few for a well-known performer) or when it
//! has not been collected for a while.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;

use crate::config::RefreshPolicy;
use crate::store::TargetSummary;

/// Why a stored performer should be collected again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RefreshReason {
    TooFewSongs { count: usize, min: usize },
    HeadlineUnderfilled { count: usize, min: usize },
    Stale { age_days: i64, max_age_days: i64 },
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshReason::TooFewSongs { count, min } => {
                write!(f, "only {} songs (< {})", count, min)
            }
            RefreshReason::HeadlineUnderfilled { count, min } => {
                write!(f, "headline performer with {} songs (< {})", count, min)
            }
            RefreshReason::Stale {
                age_days,
                max_age_days,
            } => write!(f, "last collected {} days ago (> {})", age_days, max_age_days),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSuggestion {
    pub name: String,
    pub song_count: usize,
    pub reasons: Vec<RefreshReason>,
}

/// Every reason `summary` needs a refresh under `policy`. Empty means fresh.
pub fn assess(
    summary: &TargetSummary,
    policy: &RefreshPolicy,
    now: DateTime<Utc>,
) -> Vec<RefreshReason> {
    let mut reasons = Vec::new();
    let count = summary.song_count;

    if count < policy.min_songs {
        reasons.push(RefreshReason::TooFewSongs {
            count,
            min: policy.min_songs,
        });
    }

    if count < policy.headline_min_songs
        && policy
            .headline_performers
            .iter()
            .any(|h| h.trim() == summary.name.trim())
    {
        reasons.push(RefreshReason::HeadlineUnderfilled {
            count,
            min: policy.headline_min_songs,
        });
    }

    if let Some(max_age_days) = policy.max_age_days {
        let age_days = (now - summary.updated_at).num_days();
        if age_days > max_age_days {
            reasons.push(RefreshReason::Stale {
                age_days,
                max_age_days,
            });
        }
    }

    reasons
}

/// Refresh suggestions for a whole catalog, thinnest performers first.
pub fn suggest(
    summaries: &[TargetSummary],
    policy: &RefreshPolicy,
    now: DateTime<Utc>,
) -> Vec<RefreshSuggestion> {
    let mut suggestions: Vec<RefreshSuggestion> = summaries
        .par_iter()
        .filter_map(|s| {
            let reasons = assess(s, policy, now);
            (!reasons.is_empty()).then(|| RefreshSuggestion {
                name: s.name.clone(),
                song_count: s.song_count,
                reasons,
            })
        })
        .collect();

    suggestions.sort_by(|a, b| {
        a.song_count
            .cmp(&b.song_count)
            .then_with(|| a.name.cmp(&b.name))
    });
    suggestions
}

// ============================================================================
// Count comparison
// ============================================================================

/// How a performer's stored song count moved across one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Grew { added: usize },
    Unchanged,
    Shrunk { lost: usize },
}

impl RefreshOutcome {
    pub fn compare(previous: usize, current: usize) -> Self {
        if current > previous {
            RefreshOutcome::Grew {
                added: current - previous,
            }
        } else if current < previous {
            RefreshOutcome::Shrunk {
                lost: previous - current,
            }
        } else {
            RefreshOutcome::Unchanged
        }
    }
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::Grew { added } => write!(f, "+{} songs", added),
            RefreshOutcome::Unchanged => f.write_str("unchanged"),
            RefreshOutcome::Shrunk { lost } => write!(f, "-{} songs", lost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn summary(name: &str, song_count: usize, age_days: i64, now: DateTime<Utc>) -> TargetSummary {
        TargetSummary {
            name: name.into(),
            song_count,
            updated_at: now - Duration::days(age_days),
            catalog_version: 1,
        }
    }

    #[test]
    fn test_fresh_performer_needs_nothing() {
        let now = Utc::now();
        let s = summary("某人", 45, 2, now);
        assert!(assess(&s, &RefreshPolicy::default(), now).is_empty());
    }

    #[test]
    fn test_too_few_songs() {
        let now = Utc::now();
        let s = summary("某人", 12, 0, now);
        assert_eq!(
            assess(&s, &RefreshPolicy::default(), now),
            vec![RefreshReason::TooFewSongs { count: 12, min: 30 }]
        );
    }

    #[test]
    fn test_headline_underfilled() {
        let now = Utc::now();
        let s = summary("周杰倫", 80, 0, now);
        assert_eq!(
            assess(&s, &RefreshPolicy::default(), now),
            vec![RefreshReason::HeadlineUnderfilled { count: 80, min: 100 }]
        );

        let full = summary("周杰倫", 150, 0, now);
        assert!(assess(&full, &RefreshPolicy::default(), now).is_empty());
    }

    #[test]
    fn test_stale_and_disabled_age_check() {
        let now = Utc::now();
        let s = summary("某人", 50, 45, now);
        assert_eq!(
            assess(&s, &RefreshPolicy::default(), now),
            vec![RefreshReason::Stale {
                age_days: 45,
                max_age_days: 30
            }]
        );

        let policy = RefreshPolicy {
            max_age_days: None,
            ..RefreshPolicy::default()
        };
        assert!(assess(&s, &policy, now).is_empty());
    }

    #[test]
    fn test_suggest_orders_thinnest_first() {
        let now = Utc::now();
        let summaries = vec![
            summary("B", 20, 0, now),
            summary("A", 5, 0, now),
            summary("C", 300, 0, now),
            summary("D", 20, 0, now),
        ];
        let names: Vec<_> = suggest(&summaries, &RefreshPolicy::default(), now)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["A", "B", "D"]);
    }

    #[test]
    fn test_refresh_outcome_compare() {
        assert_eq!(RefreshOutcome::compare(10, 14), RefreshOutcome::Grew { added: 4 });
        assert_eq!(RefreshOutcome::compare(10, 10), RefreshOutcome::Unchanged);
        assert_eq!(RefreshOutcome::compare(10, 3), RefreshOutcome::Shrunk { lost: 7 });
        assert_eq!(RefreshOutcome::compare(0, 2).to_string(), "+2 songs");
    }
}
