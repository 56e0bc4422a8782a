// src/stage/mod.rs
//! Report stages.
//!
//! [`BaseMetricsStage`] builds the per-route master table from its own sources.
//! Every other stage implements [`ReportStage`]: it receives that table plus its
//! category's paths and returns one report table.

pub mod base_metrics;
pub mod inventory;
pub mod line_delay;
pub mod rollup;

pub use base_metrics::BaseMetricsStage;
pub use inventory::InventoryStage;
pub use line_delay::LineDelayStage;
pub use rollup::RollupStage;

use anyhow::Result;
use polars::prelude::*;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use tracing::{error, warn};

use crate::error::ReportError;
use crate::frame::{self, read_frame, ReadOptions};

/// Text shown in place of a share whose route had no delay at all.
pub const UNDEFINED_RATIO: &str = "n/a";

/// A derivative report computed from the Base Metrics table and its own sources.
pub trait ReportStage {
    fn name(&self) -> &str;

    fn run(&self, base: &DataFrame, paths: &[PathBuf]) -> Result<DataFrame>;
}

/// Routes whose `ratio_column` value is strictly greater than `threshold`.
///
/// A null ratio is undefined: it never qualifies and each one is logged.
pub fn in_scope_routes(
    base: &DataFrame,
    route_column: &str,
    ratio_column: &str,
    threshold: f64,
) -> Result<BTreeSet<String>, ReportError> {
    frame::require(base, &[route_column, ratio_column], "scope filter").map_err(logged)?;
    let routes = frame::texts(base, route_column)?;
    let ratios = frame::numbers(base, ratio_column)?;

    let mut scope = BTreeSet::new();
    for (route, ratio) in routes.into_iter().zip(ratios) {
        match (route, ratio) {
            (Some(route), Some(x)) if x > threshold => {
                scope.insert(route);
            }
            (Some(route), None) => {
                warn!(%route, column = ratio_column, "undefined ratio, route out of scope")
            }
            _ => {}
        }
    }
    Ok(scope)
}

/// Render numeric `column` as two-decimal percent text after multiplying by
/// `scale`; nulls become `missing`. A text column is returned untouched.
///
/// Positive values carry no leading sign-space (`"95.50%"`), so cells differ
/// from legacy workbooks that wrote `" 95.50%"`.
pub fn percent_text(
    df: &DataFrame,
    column: &str,
    scale: f64,
    missing: Option<&str>,
) -> Result<DataFrame, ReportError> {
    frame::require(df, &[column], "percent formatting").map_err(logged)?;
    let dtype = df.column(column)?.dtype();
    if !(dtype.is_float() || dtype.is_integer()) {
        return Ok(df.clone());
    }
    let text: Vec<Option<String>> = frame::numbers(df, column)?
        .into_iter()
        .map(|v| match v {
            Some(x) => Some(format!("{:.2}%", x * scale)),
            None => missing.map(str::to_string),
        })
        .collect();
    let mut out = df.clone();
    out.with_column(Column::new(column.into(), text))?;
    Ok(out)
}

/// Sum `volume` per route into `total`, attach it to every detail row of that
/// route, sort by route and move `total` to `position`.
pub fn rollup_by_route(
    detail: &DataFrame,
    route: &str,
    volume: &str,
    total: &str,
    position: usize,
) -> Result<DataFrame, ReportError> {
    let renames = BTreeMap::from([(volume.to_string(), total.to_string())]);
    let totals = frame::rename(&frame::group_sum(detail, route, volume)?, &renames)?;
    let joined = frame::left_join(detail, &totals, route, route)?;
    frame::place_column(&frame::sort_by(&joined, route)?, total, position)
}

/// Read a source file.
pub(crate) fn load(path: &Path, options: &ReadOptions) -> Result<DataFrame> {
    Ok(read_frame(path, options)?)
}

/// Project `df` to `columns`, logging schema failures with both column sets.
pub(crate) fn project<S: AsRef<str>>(
    df: &DataFrame,
    columns: &[S],
    context: &str,
) -> Result<DataFrame, ReportError> {
    frame::select(df, columns, context).map_err(logged)
}

/// Log a schema error with the actual and expected column sets, then hand it back.
pub(crate) fn logged(err: ReportError) -> ReportError {
    if let ReportError::Schema {
        context,
        missing,
        actual,
        expected,
    } = &err
    {
        error!(%context, ?missing, ?actual, ?expected, "column mismatch");
    }
    err
}
