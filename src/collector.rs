//! Partition iteration: drives one full collection pass for a performer.
//!
//! ## Pipeline
//!
//! ```text
//!   partition jobs ──► worker 1 ─┐
//!                 ──► worker 2 ─┼─► events ──► reconciler (calling thread)
//!                 ──► worker N ─┘
//! ```
//!
//! Each worker takes whole partitions and issues that partition's variants
//! strictly in order. Accepted records travel over a channel to the calling
//! thread, which is the only writer of the canonical mapping. Lookup
//! failures never escape a worker: transient ones count as an empty
//! response, permanent ones end that partition only.

use crossbeam_channel::{unbounded, Sender};
use indicatif::ProgressBar;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{FanoutConfig, HarvestConfig, PartitionCatalog};
use crate::error::{HarvestError, LookupError};
use crate::fanout::{self, PartitionPlan};
use crate::filter;
use crate::lookup::Lookup;
use crate::models::{
    CanonicalSong, CollectionResult, CollectionStats, PartitionReport, PartitionStatus, RawMatch,
};
use crate::progress::create_progress_bar;
use crate::reconcile::{Absorbed, Reconciler};
use crate::refresh::RefreshOutcome;
use crate::store::CatalogStore;

/// Cooperative cancellation, checked between variants (never mid-request).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

enum Event {
    Accepted(RawMatch),
    Done(usize, PartitionReport),
}

/// Runs collection passes against one lookup client.
pub struct Collector<L> {
    lookup: L,
    catalog: PartitionCatalog,
    fanout: FanoutConfig,
    workers: usize,
}

impl<L: Lookup> Collector<L> {
    pub fn new(lookup: L, config: &HarvestConfig) -> Self {
        Self::with_parts(
            lookup,
            config.catalog.clone(),
            config.fanout.clone(),
            config.pool.workers,
        )
    }

    pub fn with_parts(
        lookup: L,
        catalog: PartitionCatalog,
        fanout: FanoutConfig,
        workers: usize,
    ) -> Self {
        Self {
            lookup,
            catalog,
            fanout,
            workers: workers.max(1),
        }
    }

    pub fn catalog(&self) -> &PartitionCatalog {
        &self.catalog
    }

    /// Run one pass for `target`, unioning with `persisted`.
    ///
    /// Fails only on invalid input, before any query is issued. Every other
    /// problem is reported through the partition reports.
    pub fn collect(
        &self,
        target: &str,
        persisted: Vec<CanonicalSong>,
        cancel: &CancelFlag,
    ) -> Result<CollectionResult, HarvestError> {
        self.run(target, persisted, &[], cancel)
    }

    /// Run one pass whose result replaces `previous` instead of merging with
    /// it. `previous` only decides which songs and identifiers count as new.
    pub fn collect_replacing(
        &self,
        target: &str,
        previous: &[CanonicalSong],
        cancel: &CancelFlag,
    ) -> Result<CollectionResult, HarvestError> {
        self.run(target, Vec::new(), previous, cancel)
    }

    fn run(
        &self,
        target: &str,
        seed: Vec<CanonicalSong>,
        previous: &[CanonicalSong],
        cancel: &CancelFlag,
    ) -> Result<CollectionResult, HarvestError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(HarvestError::InvalidInput(
                "target performer name is empty".to_string(),
            ));
        }
        self.catalog.validate()?;

        let plans: Vec<PartitionPlan> = self
            .catalog
            .ids()
            .map(|id| fanout::plan(target, id, &self.fanout))
            .collect::<Result<_, _>>()?;
        let total_variants: usize = plans.iter().map(|p| p.len()).sum();

        info!(
            target = %target,
            partitions = plans.len(),
            variants = total_variants,
            "starting collection pass"
        );
        let start = Instant::now();
        let pb = create_progress_bar(total_variants as u64, &format!("Collecting {}", target));

        let mut reconciler = Reconciler::new(self.catalog.priority_table());
        reconciler.seed(seed);
        reconciler.remember(previous);
        if !reconciler.is_empty() {
            debug!(target = %target, songs = reconciler.len(), "seeded from stored catalog");
        }

        let partition_count = plans.len();
        let mut reports: Vec<Option<PartitionReport>> = vec![None; partition_count];

        thread::scope(|s| {
            let (job_tx, job_rx) = unbounded::<(usize, PartitionPlan)>();
            let (event_tx, event_rx) = unbounded::<Event>();

            for job in plans.into_iter().enumerate() {
                // Receiver is alive in this scope, so the send cannot fail.
                let _ = job_tx.send(job);
            }
            drop(job_tx);

            for _ in 0..self.workers.min(partition_count) {
                let job_rx = job_rx.clone();
                let event_tx = event_tx.clone();
                let pb = pb.clone();
                s.spawn(move || {
                    for (index, plan) in job_rx.iter() {
                        let report = self.search_partition(target, plan, cancel, &event_tx, &pb);
                        let _ = event_tx.send(Event::Done(index, report));
                    }
                });
            }
            drop(event_tx);

            for event in event_rx.iter() {
                match event {
                    Event::Accepted(record) => {
                        if reconciler.absorb(&record) == Absorbed::NewSong {
                            pb.set_message(format!(
                                "Collecting {} ({} songs)",
                                target,
                                reconciler.len()
                            ));
                        }
                    }
                    Event::Done(index, report) => {
                        reports[index] = Some(report);
                    }
                }
            }
        });

        let partitions: Vec<PartitionReport> = reports.into_iter().flatten().collect();
        let mut stats = CollectionStats::default();
        for report in &partitions {
            stats.record_partition(report);
        }

        let reconciled = reconciler.finish();
        stats.canonical_songs = reconciled.songs.len();
        stats.new_songs = reconciled.new_songs;
        stats.new_identifiers = reconciled.new_identifiers;
        stats.elapsed_seconds = start.elapsed().as_secs_f64();

        let cancelled = partitions
            .iter()
            .any(|r| r.status == PartitionStatus::Cancelled);

        pb.finish_with_message(format!(
            "{}: {} songs ({} new)",
            target, stats.canonical_songs, stats.new_songs
        ));
        info!(
            target = %target,
            songs = stats.canonical_songs,
            new_songs = stats.new_songs,
            new_identifiers = stats.new_identifiers,
            variants_issued = stats.variants_issued,
            variants_failed = stats.variants_failed,
            success_rate = stats.success_rate(),
            partitions_failed = stats.partitions_failed,
            cancelled,
            "collection pass finished"
        );

        Ok(CollectionResult {
            target: target.to_string(),
            songs: reconciled.songs,
            partitions,
            stats,
            cancelled,
        })
    }

    fn search_partition(
        &self,
        target: &str,
        plan: PartitionPlan,
        cancel: &CancelFlag,
        events: &Sender<Event>,
        pb: &ProgressBar,
    ) -> PartitionReport {
        let partition = plan.partition_id().to_string();
        let mut report = PartitionReport::new(&partition, plan.len());

        for variant in plan {
            if cancel.is_cancelled() {
                report.status = PartitionStatus::Cancelled;
                break;
            }

            report.variants_attempted += 1;
            match self.lookup.lookup(&partition, &variant.query, variant.mode) {
                Ok(records) => {
                    report.variants_succeeded += 1;
                    report.raw_matches += records.len();
                    for record in records {
                        if filter::accepts(&record, target) {
                            report.accepted_matches += 1;
                            let _ = events.send(Event::Accepted(record));
                        }
                    }
                }
                Err(LookupError::Transient { cause }) => {
                    report.transient_failures += 1;
                    warn!(
                        partition = %partition,
                        query = %variant.query,
                        mode = %variant.mode,
                        cause = %cause,
                        "lookup failed, treating as no matches"
                    );
                }
                Err(LookupError::Permanent { cause }) => {
                    warn!(
                        partition = %partition,
                        query = %variant.query,
                        mode = %variant.mode,
                        cause = %cause,
                        "partition rejected, skipping its remaining variants"
                    );
                    report.status = PartitionStatus::Failed { cause };
                    pb.inc(1);
                    break;
                }
            }
            pb.inc(1);
        }

        pb.inc(report.variants_skipped() as u64);
        report
    }
}

// ============================================================================
// Store-backed runs
// ============================================================================

/// Outcome of collecting one performer into a store.
#[derive(Debug)]
pub struct HarvestOutcome {
    pub result: CollectionResult,
    pub previous_count: usize,
    pub change: RefreshOutcome,
    pub saved: bool,
}

/// Snapshot the store, run one pass, then merge-and-save.
///
/// With `replace` the snapshot is not seeded, so the saved set is exactly
/// what this pass found. A cancelled pass is not saved.
pub fn harvest_into<L: Lookup, S: CatalogStore>(
    collector: &Collector<L>,
    store: &mut S,
    target: &str,
    replace: bool,
    cancel: &CancelFlag,
) -> Result<HarvestOutcome, HarvestError> {
    // Load and save under the same key the pass reports.
    let target = target.trim();
    if target.is_empty() {
        return Err(HarvestError::InvalidInput(
            "target performer name is empty".to_string(),
        ));
    }

    let snapshot = store.load(target)?;
    let previous_count = snapshot.len();

    let result = if replace {
        collector.collect_replacing(target, &snapshot, cancel)?
    } else {
        collector.collect(target, snapshot, cancel)?
    };
    let change = RefreshOutcome::compare(previous_count, result.songs.len());

    let saved = if result.cancelled {
        warn!(target = %result.target, "pass cancelled, catalog left unchanged");
        false
    } else {
        store.save(&result.target, &result.songs, collector.catalog().version)?;
        true
    };

    Ok(HarvestOutcome {
        result,
        previous_count,
        change,
        saved,
    })
}
