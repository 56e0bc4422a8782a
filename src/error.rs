//! Error taxonomy for the report pipeline.

use polars::prelude::PolarsError;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a report run.
///
/// Stages return `anyhow::Result`; these variants travel inside it and can be
/// recovered with `downcast_ref::<ReportError>()`.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Missing, malformed or structurally invalid configuration document.
    #[error("configuration error: {0}")]
    Config(String),

    /// A stage could not find an expected source among its assigned paths.
    #[error("{stage}: no source matching `{substring}` among {candidates} assigned path(s)")]
    MissingSource {
        stage: String,
        substring: String,
        candidates: usize,
    },

    /// Configured columns are absent from a loaded or assembled table.
    #[error("{context}: missing columns {missing:?} (actual: {actual:?}, expected: {expected:?})")]
    Schema {
        context: String,
        missing: Vec<String>,
        actual: Vec<String>,
        expected: Vec<String>,
    },

    /// A source file could not be opened or decoded.
    #[error("failed to read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    /// A dataframe operation failed for a reason other than a missing column.
    #[error("table operation failed: {0}")]
    Frame(#[from] PolarsError),

    /// The output workbook could not be written.
    #[error("failed to write {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

impl ReportError {
    pub fn is_schema(&self) -> bool {
        matches!(self, ReportError::Schema { .. })
    }

    pub fn is_missing_source(&self) -> bool {
        matches!(self, ReportError::MissingSource { .. })
    }
}
