use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use rand::Rng;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songbook_harvest::collector::{harvest_into, CancelFlag, Collector};
use songbook_harvest::config::HarvestConfig;
use songbook_harvest::lookup::HttpLookup;
use songbook_harvest::models::{CollectionStats, PartitionReport};
use songbook_harvest::progress::{
    create_spinner, format_duration, is_log_only, log_progress, set_log_only,
};
use songbook_harvest::refresh::{self, RefreshOutcome};
use songbook_harvest::safety::validate_export_path;
use songbook_harvest::store::SqliteCatalogStore;

#[derive(Parser)]
#[command(name = "songbook-harvest")]
#[command(about = "Collect per-performer karaoke song catalogs across vendor partitions")]
struct Args {
    /// Performer names to collect
    performers: Vec<String>,

    /// File with one performer per line ('#' starts a comment)
    #[arg(long)]
    singers_file: Option<PathBuf>,

    /// Catalog database
    #[arg(long, default_value = "catalog.sqlite3")]
    db: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Partitions searched concurrently (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Replace stored songs instead of merging with them
    #[arg(long)]
    force: bool,

    /// Also re-collect every stored performer the refresh policy flags
    #[arg(long)]
    refresh: bool,

    /// Write the whole catalog to this JSON file when done
    #[arg(long)]
    export: Option<PathBuf>,

    /// Write per-performer run statistics to this JSON file
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Hide progress bars, log progress lines instead
    #[arg(long)]
    log_only: bool,
}

/// One performer's run, as written to `--stats-json`.
#[derive(Serialize)]
struct TargetRun {
    target: String,
    previous_count: usize,
    song_count: usize,
    change: RefreshOutcome,
    saved: bool,
    cancelled: bool,
    stats: CollectionStats,
    partitions: Vec<PartitionReport>,
}

fn read_singers_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read singers file {:?}", path))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Command-line names, then file names, then refresh suggestions; first
/// occurrence wins.
fn gather_targets(
    args: &Args,
    config: &HarvestConfig,
    store: &SqliteCatalogStore,
) -> Result<Vec<String>> {
    let mut names: Vec<String> = args.performers.clone();
    if let Some(path) = &args.singers_file {
        names.extend(read_singers_file(path)?);
    }
    if args.refresh {
        let summaries = store.summaries().context("Failed to list stored performers")?;
        let suggestions = refresh::suggest(&summaries, &config.refresh, Utc::now());
        info!(count = suggestions.len(), "performers flagged for refresh");
        names.extend(suggestions.into_iter().map(|s| s.name));
    }

    let mut seen = FxHashSet::default();
    Ok(names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && seen.insert(n.clone()))
        .collect())
}

fn pause_between_targets(config: &HarvestConfig) {
    let (lo, hi) = (config.pool.target_pause_min_ms, config.pool.target_pause_max_ms);
    if hi == 0 {
        return;
    }
    let ms = if lo >= hi { lo } else { rand::thread_rng().gen_range(lo..=hi) };
    thread::sleep(Duration::from_millis(ms));
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "songbook_harvest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    set_log_only(args.log_only);

    let mut config =
        HarvestConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(workers) = args.workers {
        config.pool.workers = workers;
        config.validate().context("Invalid --workers")?;
    }

    if let Some(export) = &args.export {
        validate_export_path(export, &args.db)?;
    }

    let start = Instant::now();

    println!("Opening catalog database: {:?}", args.db);
    let mut store = SqliteCatalogStore::open(&args.db).context("Failed to open catalog database")?;

    let targets = gather_targets(&args, &config, &store)?;
    if targets.is_empty() && args.export.is_none() {
        bail!("No performers given (pass names, --singers-file or --refresh)");
    }

    let lookup = HttpLookup::new(config.lookup.clone())?;
    let collector = Collector::new(lookup, &config);
    let cancel = CancelFlag::new();
    {
        // Ctrl-C stops the pass between variants; finished performers stay saved.
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, stopping after in-flight requests...");
            cancel.cancel();
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let mut runs: Vec<TargetRun> = Vec::with_capacity(targets.len());
    let mut failures: Vec<(String, String)> = Vec::new();

    for (i, target) in targets.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(remaining = targets.len() - i, "interrupted, skipping remaining performers");
            break;
        }
        info!(
            target = %target,
            index = i + 1,
            total = targets.len(),
            force = args.force,
            "collecting performer"
        );

        match harvest_into(&collector, &mut store, target, args.force, &cancel) {
            Ok(outcome) => {
                info!(
                    target = %target,
                    previous = outcome.previous_count,
                    current = outcome.result.songs.len(),
                    change = %outcome.change,
                    failed_partitions = outcome.result.failed_partitions().count(),
                    "performer done"
                );
                if is_log_only() {
                    outcome.result.stats.log_phase(target);
                }
                runs.push(TargetRun {
                    target: outcome.result.target.clone(),
                    previous_count: outcome.previous_count,
                    song_count: outcome.result.songs.len(),
                    change: outcome.change,
                    saved: outcome.saved,
                    cancelled: outcome.result.cancelled,
                    stats: outcome.result.stats,
                    partitions: outcome.result.partitions,
                });
            }
            Err(e) => {
                error!(target = %target, error = %e, "performer failed");
                failures.push((target.clone(), e.to_string()));
            }
        }

        log_progress("performers", (i + 1) as u64, targets.len() as u64, 10);
        if i + 1 < targets.len() && !cancel.is_cancelled() {
            pause_between_targets(&config);
        }
    }

    if let Some(path) = &args.stats_json {
        let json = serde_json::to_string_pretty(&runs)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write stats to {:?}", path))?;
    }

    if let Some(path) = &args.export {
        let spinner = create_spinner("Exporting catalog");
        let count = store
            .export_json(path)
            .with_context(|| format!("Failed to export catalog to {:?}", path))?;
        spinner.finish_with_message(format!("Exported {} performers to {:?}", count, path));
    }

    let new_songs: usize = runs.iter().map(|r| r.stats.new_songs).sum();
    let grew = runs
        .iter()
        .filter(|r| matches!(r.change, RefreshOutcome::Grew { .. }))
        .count();

    println!("\n{:=<60}", "");
    println!("Collection complete!");
    println!("  Performers: {} ({} failed)", targets.len(), failures.len());
    println!("  Grew: {}", grew);
    println!("  New songs: {}", new_songs);
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    for (target, cause) in &failures {
        warn!(target = %target, cause = %cause, "not collected");
    }

    Ok(())
}
