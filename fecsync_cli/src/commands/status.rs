//! The `status` subcommand: summarise a checkpoint file without touching it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use fecsync_lib::CheckpointStore;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct StatusArgs {
    /// Progress checkpoint (JSON) written by `collect`
    #[arg(long)]
    pub checkpoint: PathBuf,
}

pub fn run(args: &StatusArgs, format: &OutputFormat) -> Result<()> {
    let store = CheckpointStore::new(&args.checkpoint);
    if !store.path().exists() {
        bail!(
            "No checkpoint at {}. Run 'fecsync collect --checkpoint {}' first.",
            args.checkpoint.display(),
            args.checkpoint.display()
        );
    }

    let checkpoint = store
        .load()
        .with_context(|| format!("failed to read checkpoint {}", args.checkpoint.display()))?;

    match format {
        OutputFormat::Table => output::print_checkpoint_table(&checkpoint),
        OutputFormat::Json => output::print_json(&checkpoint),
    }
    Ok(())
}
