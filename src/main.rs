use anyhow::Result;
use chrono::Local;
use clap::Parser;
use routereport::{config::Config, logging, report};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Route delay report: base metrics plus six derivative sheets in one workbook"
)]
struct Args {
    /// JSON configuration document.
    #[arg(short, long, default_value = routereport::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override `data_path` from the configuration.
    #[arg(long)]
    data: Option<PathBuf>,
    /// Override `report.output_dir` from the configuration.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Only discover and classify sources, print them as JSON and exit.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // ─── 1) configuration, before anything else ──────────────────────
    let mut config = Config::from_json(&args.config)?;
    if let Some(data) = args.data {
        config.data_path = data;
    }
    if let Some(output) = args.output {
        config.report.output_dir = output;
    }

    // ─── 2) logging ──────────────────────────────────────────────────
    logging::init(&config.log)?;
    info!(config = %args.config.display(), "startup");

    // ─── 3) run ──────────────────────────────────────────────────────
    if args.dry_run {
        let paths = report::categorize(&config)?;
        println!("{}", serde_json::to_string_pretty(&paths)?);
        return Ok(());
    }

    match report::run(&config, Local::now().date_naive()) {
        Ok(path) => {
            info!(path = %path.display(), "finished");
            Ok(())
        }
        Err(e) => {
            error!("report run failed: {:#}", e);
            Err(e)
        }
    }
}
