use anyhow::{anyhow, Context, Result};
use std::{fs, sync::Mutex};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::MakeWriterExt},
    EnvFilter,
};

use crate::config::LogConfig;

/// Install the global subscriber: stderr plus an append-only log file.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(cfg: &LogConfig) -> Result<()> {
    if let Some(dir) = cfg.log_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.log_file)
        .with_context(|| format!("cannot open log file {}", cfg.log_file.display()))?;

    let env = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .with_writer(std::io::stderr.and(Mutex::new(file)))
        .try_init()
        .map_err(|e| anyhow!("logging already initialised: {}", e))
}
