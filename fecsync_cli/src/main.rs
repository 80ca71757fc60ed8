mod commands;
mod output;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "fecsync")]
#[command(about = "Resumable, rate-limited collection of FEC committee filings")]
struct Cli {
    /// Output format: table or json
    #[arg(long, default_value = "table", global = true)]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect roles and deduplicated filings for every seed committee/cycle
    Collect(commands::collect::CollectArgs),
    /// Show the progress recorded in a checkpoint file
    Status(commands::status::StatusArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fecsync=info".parse()?)
                .add_directive("fecsync_lib=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let format = match cli.output.as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Table,
    };

    let code = match &cli.command {
        Commands::Collect(args) => commands::collect::run(args, &format).await?,
        Commands::Status(args) => {
            commands::status::run(args, &format)?;
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}
