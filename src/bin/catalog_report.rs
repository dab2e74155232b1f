//! Summarise the persisted catalog and list performers worth re-collecting.
//!
//! Usage:
//!   catalog-report [--db catalog.sqlite3] [--config songbook.toml] [--json]
//!   catalog-report --performer 周杰倫 [--json]

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songbook_harvest::config::HarvestConfig;
use songbook_harvest::refresh::{self, RefreshReason, RefreshSuggestion};
use songbook_harvest::store::{CatalogReport, SqliteCatalogStore, TargetSummary};

#[derive(Parser)]
#[command(name = "catalog-report")]
#[command(about = "Summarise the collected song catalog and suggest refreshes")]
struct Args {
    #[arg(long, default_value = "catalog.sqlite3")]
    db: PathBuf,

    /// TOML configuration file (refresh policy)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Show a single stored performer instead of the whole catalog
    #[arg(long)]
    performer: Option<String>,
}

#[derive(Serialize)]
struct Output {
    report: CatalogReport,
    refresh: Vec<RefreshSuggestion>,
}

#[derive(Serialize)]
struct PerformerOutput {
    #[serde(flatten)]
    summary: TargetSummary,
    refresh: Vec<RefreshReason>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "songbook_harvest=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config =
        HarvestConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if !args.db.exists() {
        anyhow::bail!("Catalog database not found: {:?}", args.db);
    }
    let store = SqliteCatalogStore::open(&args.db).context("Failed to open catalog database")?;

    if let Some(name) = args.performer.as_deref() {
        let name = name.trim();
        let Some(summary) = store.summary(name)? else {
            anyhow::bail!("Performer not in catalog: {}", name);
        };
        let reasons = refresh::assess(&summary, &config.refresh, Utc::now());

        if args.json {
            let output = PerformerOutput {
                summary,
                refresh: reasons,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        println!("{}", summary.name);
        println!("  Songs:           {}", summary.song_count);
        println!("  Last collected:  {}", summary.updated_at.format("%Y-%m-%d %H:%M UTC"));
        println!("  Catalog version: {}", summary.catalog_version);
        if reasons.is_empty() {
            println!("  Refresh:         not needed");
        }
        for reason in &reasons {
            println!("  Refresh:         {}", reason);
        }
        return Ok(());
    }

    let report = store.report()?;
    let summaries = store.summaries()?;
    let suggestions = refresh::suggest(&summaries, &config.refresh, Utc::now());

    if args.json {
        let output = Output {
            report,
            refresh: suggestions,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{:=<60}", "");
    println!("CATALOG REPORT: {:?}", args.db);
    println!("{:=<60}", "");
    println!("  Performers:        {}", report.performers);
    println!("  Canonical songs:   {}", report.songs);
    println!("  Identifiers:       {}", report.identifiers);
    println!("  Duplicate titles:  {}", report.duplicate_titles);
    if report.performers > 0 {
        println!(
            "  Avg songs/performer: {:.1}",
            report.songs as f64 / report.performers as f64
        );
    }

    println!("\nIdentifiers by partition:");
    for (partition, count) in &report.top_partitions {
        println!("  {:<12} {:>8}", partition, count);
    }

    println!("\nLargest catalogs:");
    for (name, count) in &report.top_performers {
        println!("  {:<12} {:>8}", name, count);
    }

    println!("\nRefresh suggestions ({}):", suggestions.len());
    if suggestions.is_empty() {
        println!("  (none)");
    }
    for s in &suggestions {
        let reasons: Vec<String> = s.reasons.iter().map(|r| r.to_string()).collect();
        println!("  {:<12} {:>5}  {}", s.name, s.song_count, reasons.join("; "));
    }

    Ok(())
}
