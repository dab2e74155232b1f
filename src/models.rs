//! Core data models for performer catalog collection.
//!
//! This module contains the record shapes that flow through a collection
//! pass: raw lookup matches, reconciled canonical songs, query variants and
//! the per-pass result with its observability counters.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Lookup Modes & Variants
// ============================================================================

/// Lookup mode understood by the remote search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMode {
    /// Plain keyword search
    Default,
    /// "New arrivals" listing filtered by keyword
    NewArrivals,
    /// "Popular" listing filtered by keyword
    Popular,
}

impl LookupMode {
    /// Parameter value the remote endpoint expects for this mode.
    pub fn wire_name(self) -> &'static str {
        match self {
            LookupMode::Default => "searchList",
            LookupMode::NewArrivals => "newSong",
            LookupMode::Popular => "hotSong",
        }
    }
}

impl fmt::Display for LookupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One concrete (query string, lookup mode) pair issued to the lookup client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    pub query: String,
    pub mode: LookupMode,
}

impl Variant {
    pub fn new(query: impl Into<String>, mode: LookupMode) -> Self {
        Self {
            query: query.into(),
            mode,
        }
    }
}

// ============================================================================
// Raw Matches
// ============================================================================

/// One record as returned by the lookup client for a single variant.
/// Ephemeral: consumed immediately by the match filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMatch {
    pub title: String,
    pub performer_name: String, // As reported by the source, may be noisy
    pub partition_id: String,   // Vendor the record belongs to (empty = unknown)
    pub source_code: String,    // Partition-local song code (empty = unknown)
    pub language: Option<String>,
    pub sex: Option<String>,
}

impl RawMatch {
    /// The (partition, code) pair this record contributes, if both are present.
    pub fn identifier(&self) -> Option<Identifier> {
        let partition = self.partition_id.trim();
        let code = self.source_code.trim();
        if partition.is_empty() || code.is_empty() {
            return None;
        }
        Some(Identifier::new(partition, code))
    }

    /// Trimmed language, `None` when absent or blank.
    pub fn language(&self) -> Option<&str> {
        self.language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

// ============================================================================
// Canonical Songs
// ============================================================================

/// Canonical key: (trimmed title, trimmed performer).
pub type SongKey = (String, String);

/// A partition-specific identifier for a song.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    pub partition: String,
    pub code: String,
}

impl Identifier {
    pub fn new(partition: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            code: code.into(),
        }
    }
}

/// The reconciled, de-duplicated unit of the catalog.
///
/// `identifiers` holds no duplicate pair and is ordered by partition
/// priority, then partition id, then code (see `reconcile`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSong {
    pub title: String,
    pub performer: String,
    pub language: Option<String>,
    pub identifiers: Vec<Identifier>,
}

impl CanonicalSong {
    pub fn key(&self) -> SongKey {
        (
            self.title.trim().to_string(),
            self.performer.trim().to_string(),
        )
    }
}

// ============================================================================
// Partition Reports
// ============================================================================

/// How a partition's variant sequence ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PartitionStatus {
    /// Every variant was attempted (some may have failed transiently)
    Completed,
    /// A permanent error stopped the remaining variants
    Failed { cause: String },
    /// The pass was cancelled before the sequence finished
    Cancelled,
}

/// Per-partition diagnostics for one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub partition: String,
    #[serde(flatten)]
    pub status: PartitionStatus,
    pub variants_planned: usize,
    pub variants_attempted: usize,
    pub variants_succeeded: usize,
    pub transient_failures: usize,
    pub raw_matches: usize,
    pub accepted_matches: usize,
}

impl PartitionReport {
    pub fn new(partition: &str, variants_planned: usize) -> Self {
        Self {
            partition: partition.to_string(),
            status: PartitionStatus::Completed,
            variants_planned,
            variants_attempted: 0,
            variants_succeeded: 0,
            transient_failures: 0,
            raw_matches: 0,
            accepted_matches: 0,
        }
    }

    /// Variants that were never issued (permanent failure or cancellation).
    pub fn variants_skipped(&self) -> usize {
        self.variants_planned - self.variants_attempted
    }

    /// True only when every planned variant was issued and succeeded.
    pub fn is_clean(&self) -> bool {
        self.status == PartitionStatus::Completed && self.transient_failures == 0
    }
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Counters for one collection pass.
#[derive(Default, Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub partitions_searched: usize,
    pub partitions_failed: usize,
    pub partitions_cancelled: usize,

    pub variants_issued: usize,
    pub variants_succeeded: usize,
    pub variants_failed: usize,
    pub variants_skipped: usize,

    pub raw_matches: usize,
    pub accepted_matches: usize,
    pub rejected_matches: usize,

    pub canonical_songs: usize,
    pub new_songs: usize,       // Keys absent from the persisted snapshot
    pub new_identifiers: usize, // Pairs absent from the persisted snapshot

    pub elapsed_seconds: f64,
}

impl CollectionStats {
    /// Fold one partition report into the pass totals.
    pub fn record_partition(&mut self, report: &PartitionReport) {
        self.partitions_searched += 1;
        match report.status {
            PartitionStatus::Completed => {}
            PartitionStatus::Failed { .. } => self.partitions_failed += 1,
            PartitionStatus::Cancelled => self.partitions_cancelled += 1,
        }
        self.variants_issued += report.variants_attempted;
        self.variants_succeeded += report.variants_succeeded;
        self.variants_failed += report.variants_attempted - report.variants_succeeded;
        self.variants_skipped += report.variants_skipped();
        self.raw_matches += report.raw_matches;
        self.accepted_matches += report.accepted_matches;
        self.rejected_matches += report.raw_matches - report.accepted_matches;
    }

    /// Percentage of issued variants that returned a usable response.
    pub fn success_rate(&self) -> f64 {
        if self.variants_issued == 0 {
            0.0
        } else {
            100.0 * self.variants_succeeded as f64 / self.variants_issued as f64
        }
    }

    /// Log stats to stderr in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            eprintln!("[STATS:{}]\n{}", phase, json);
        }
    }
}

// ============================================================================
// Output Models
// ============================================================================

/// Output of one full pass for one target performer.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub target: String,
    pub songs: Vec<CanonicalSong>,
    pub partitions: Vec<PartitionReport>,
    pub stats: CollectionStats,
    pub cancelled: bool,
}

impl CollectionResult {
    /// True when every partition ran every variant without any failure,
    /// as opposed to a best-effort result with tolerated failures.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.partitions.iter().all(PartitionReport::is_clean)
    }

    /// Partitions that were aborted by a permanent error.
    pub fn failed_partitions(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions
            .iter()
            .filter(|r| matches!(r.status, PartitionStatus::Failed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(partition: &str, code: &str) -> RawMatch {
        RawMatch {
            title: "A".into(),
            performer_name: "X".into(),
            partition_id: partition.into(),
            source_code: code.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_identifier_requires_partition_and_code() {
        assert_eq!(raw("P1", " 001 ").identifier(), Some(Identifier::new("P1", "001")));
        assert_eq!(raw("", "001").identifier(), None);
        assert_eq!(raw("P1", "  ").identifier(), None);
    }

    #[test]
    fn test_blank_language_is_none() {
        let mut m = raw("P1", "001");
        m.language = Some("  ".into());
        assert_eq!(m.language(), None);
        m.language = Some(" 國語 ".into());
        assert_eq!(m.language(), Some("國語"));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(LookupMode::Default.wire_name(), "searchList");
        assert_eq!(LookupMode::NewArrivals.wire_name(), "newSong");
        assert_eq!(LookupMode::Popular.wire_name(), "hotSong");
    }

    #[test]
    fn test_stats_record_partition() {
        let mut report = PartitionReport::new("P2", 5);
        report.status = PartitionStatus::Failed {
            cause: "gone".into(),
        };
        report.variants_attempted = 1;
        report.raw_matches = 0;

        let mut ok = PartitionReport::new("P1", 5);
        ok.variants_attempted = 5;
        ok.variants_succeeded = 4;
        ok.transient_failures = 1;
        ok.raw_matches = 10;
        ok.accepted_matches = 7;

        let mut stats = CollectionStats::default();
        stats.record_partition(&ok);
        stats.record_partition(&report);

        assert_eq!(stats.partitions_searched, 2);
        assert_eq!(stats.partitions_failed, 1);
        assert_eq!(stats.variants_issued, 6);
        assert_eq!(stats.variants_succeeded, 4);
        assert_eq!(stats.variants_failed, 2);
        assert_eq!(stats.variants_skipped, 4);
        assert_eq!(stats.rejected_matches, 3);
        assert!((stats.success_rate() - 100.0 * 4.0 / 6.0).abs() < 1e-9);
        assert_eq!(CollectionStats::default().success_rate(), 0.0);
    }

    #[test]
    fn test_partition_status_serializes_flat() {
        let mut report = PartitionReport::new("P2", 3);
        report.status = PartitionStatus::Failed {
            cause: "no such company".into(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["cause"], "no such company");
        assert_eq!(json["partition"], "P2");
    }
}
