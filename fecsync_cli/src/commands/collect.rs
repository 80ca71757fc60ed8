//! The `collect` subcommand: run the checkpointed collector over a seed list.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use fecsync_lib::{
    CheckpointSession, CheckpointStore, CheckpointedCollector, Db, FilingSink, ItemStatus,
    MemorySink, OpenFecClient, SyncConfig, WorkItem,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use crate::output::{self, OutputFormat};

/// Exit status after an interrupt (128 + SIGINT).
const INTERRUPTED: u8 = 130;

/// Exit status when the run finished with failed items.
const PARTIAL_FAILURE: u8 = 2;

#[derive(Args)]
pub struct CollectArgs {
    /// CSV seed list with a `committee_id,cycle` header
    #[arg(long)]
    pub seeds: PathBuf,

    /// Progress checkpoint (JSON), created if missing
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// SQLite database receiving roles and canonical filings
    #[arg(long, required_unless_present = "dry_run")]
    pub db: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Collect into memory and print what would be stored
    #[arg(long)]
    pub dry_run: bool,

    /// Override the OpenFEC API base URL
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    committee_id: String,
    cycle: i32,
}

/// Read and validate the seed list. Row numbers in errors count the header.
pub fn load_seeds(path: &Path) -> Result<Vec<WorkItem>> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open seed list {}", path.display()))?;
    parse_seeds(reader, &path.display().to_string())
}

fn parse_seeds<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    source: &str,
) -> Result<Vec<WorkItem>> {
    let mut seeds = Vec::new();
    for (i, row) in reader.deserialize::<SeedRow>().enumerate() {
        let line = i + 2;
        let row = row.with_context(|| format!("{}: malformed row {}", source, line))?;
        let item = WorkItem::new(&row.committee_id, row.cycle)
            .with_context(|| format!("{}: invalid seed on row {}", source, line))?;
        seeds.push(item);
    }

    if seeds.is_empty() {
        bail!("seed list {} has no rows", source);
    }
    Ok(seeds)
}

pub async fn run(args: &CollectArgs, format: &OutputFormat) -> Result<ExitCode> {
    let config = match &args.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SyncConfig::default(),
    };
    let seeds = load_seeds(&args.seeds)?;
    tracing::info!(
        seeds = seeds.len(),
        checkpoint = %args.checkpoint.display(),
        dry_run = args.dry_run,
        "loaded seed list"
    );

    let api_key = std::env::var("OPENFEC_API_KEY")
        .context("OPENFEC_API_KEY must be set (environment or .env file)")?;
    let client = match &args.base_url {
        Some(url) => OpenFecClient::with_base_url(url, api_key)?,
        None => OpenFecClient::new(api_key)?,
    }
    .with_rate_limiter(Arc::new(config.rate_limiter()))
    .with_retry_policy(config.retry_policy())
    .with_per_page(config.collector.per_page);
    let client = Arc::new(client);

    let session = CheckpointSession::open(
        CheckpointStore::new(&args.checkpoint),
        config.collector.save_interval,
    )
    .with_context(|| format!("failed to open checkpoint {}", args.checkpoint.display()))?;

    let distinct: HashSet<String> = seeds.iter().map(WorkItem::key).collect();
    let pb = ProgressBar::new(distinct.len() as u64);
    pb.set_style(ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
    )?);

    if args.dry_run {
        let mut collector =
            CheckpointedCollector::new(client, session, MemorySink::new(), config.collector)
                .with_observer(progress_observer(pb.clone()));
        let code = execute(&mut collector, &seeds, &pb, args, format).await?;
        if matches!(format, OutputFormat::Table) {
            output::print_entities_table(collector.sink().delivered());
        }
        return Ok(code);
    }

    let Some(db_path) = &args.db else {
        bail!("--db is required unless --dry-run is given");
    };
    let db = Db::open(db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    db.init()?;

    let mut collector = CheckpointedCollector::new(client, session, db, config.collector)
        .with_observer(progress_observer(pb.clone()));
    let code = execute(&mut collector, &seeds, &pb, args, format).await?;
    let stored = collector.sink().filing_count()?;
    eprintln!("{} filings stored in {}", stored, db_path.display());
    Ok(code)
}

/// Advance the bar once per distinct item and surface give-ups above it.
fn progress_observer(
    bar: ProgressBar,
) -> impl FnMut(&WorkItem, ItemStatus) + Send + 'static {
    let mut seen = HashSet::new();
    move |item, status| {
        if seen.insert(item.key()) {
            bar.inc(1);
        }
        if status == ItemStatus::PermanentFailed {
            bar.println(format!("gave up on {}", item));
        }
        bar.set_message(format!("{} {}", item, status));
    }
}

/// Drive one run, flushing the checkpoint and stopping cleanly on Ctrl-C.
async fn execute<S: FilingSink>(
    collector: &mut CheckpointedCollector<S>,
    seeds: &[WorkItem],
    pb: &ProgressBar,
    args: &CollectArgs,
    format: &OutputFormat,
) -> Result<ExitCode> {
    let outcome = tokio::select! {
        result = collector.run(seeds) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(result) = outcome else {
        pb.abandon_with_message("interrupted");
        collector
            .flush()
            .context("failed to save checkpoint after interrupt")?;
        eprintln!(
            "Interrupted. Progress saved to {}; rerun the same command to resume.",
            args.checkpoint.display()
        );
        return Ok(ExitCode::from(INTERRUPTED));
    };

    let summary = result.context("collection run aborted")?;
    pb.finish_with_message("done");

    match format {
        OutputFormat::Table => output::print_summary_table(&summary),
        OutputFormat::Json => output::print_json(&summary),
    }

    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "{} item(s) failed permanently; see {} for details.",
            summary.permanent_failed + summary.retryable_failed,
            args.checkpoint.display()
        );
        Ok(ExitCode::from(PARTIAL_FAILURE))
    }
}
