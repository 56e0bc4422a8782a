use anyhow::Result;
use clap::Parser;
use routereport::{
    config::{Config, DEFAULT_CONFIG_PATH},
    report,
    frame::{read_frame, ReadOptions},
};
use std::path::PathBuf;

/// Show which sources each stage would receive and the header row of each.
#[derive(Parser)]
#[command(author, version, about = "List classified source files and their columns")]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(long)]
    data: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let args = Args::parse();
    let mut config = Config::from_json(&args.config)?;
    if let Some(data) = args.data {
        config.data_path = data;
    }

    let paths = report::categorize(&config)?;
    for (category, list) in paths.iter() {
        println!("=== {} ({} file(s)) ===", category, list.len());
        for path in list {
            println!("- {}", path.display());
            match read_frame(path, &ReadOptions::default()) {
                Ok(df) => println!(
                    "    {} row(s): {}",
                    df.height(),
                    df.get_columns()
                        .iter()
                        .map(|c| format!("{} ({})", c.name(), c.dtype()))
                        .collect::<Vec<_>>()
                        .join(" | ")
                ),
                Err(e) => println!("    unreadable: {}", e),
            }
        }
        println!();
    }
    Ok(())
}
