// src/report/mod.rs
//! Report assembler: runs every stage in dependency order and writes the
//! date-stamped workbook. Nothing is written unless all seven tables exist.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::catalog::{classify, discover, CategorizedPaths, Category};
use crate::config::Config;
use crate::frame::{self, write_workbook};
use crate::stage::{
    percent_text, BaseMetricsStage, InventoryStage, LineDelayStage, ReportStage, RollupStage,
    UNDEFINED_RATIO,
};

/// Sheet names, in workbook order.
pub const SHEET_BASE_METRICS: &str = "GPT";
pub const SHEET_ROUTING: &str = "路由";
pub const SHEET_TRANSPORTATION: &str = "运输";
pub const SHEET_SUBMISSION: &str = "交件";
pub const SHEET_DISPATCH: &str = "派签";
pub const SHEET_INVENTORY: &str = "中心库存";

/// Every table a run produces.
#[derive(Debug, Clone)]
pub struct ReportTables {
    pub base_metrics: DataFrame,
    pub routing: DataFrame,
    pub transportation: DataFrame,
    pub inbound: DataFrame,
    pub outbound: DataFrame,
    pub submission: DataFrame,
    pub dispatch: DataFrame,
}

/// Base Metrics first, then the six derivative stages against it.
#[tracing::instrument(level = "info", skip_all)]
pub fn run_stages(config: &Config, paths: &CategorizedPaths) -> Result<ReportTables> {
    let base = BaseMetricsStage::new(config);
    let base_metrics = base
        .run(paths.get(Category::BaseMetrics))
        .with_context(|| format!("stage {} failed", base.name()))?;

    let derive = |stage: &dyn ReportStage, category: Category| -> Result<DataFrame> {
        stage
            .run(&base_metrics, paths.get(category))
            .with_context(|| format!("stage {} failed", stage.name()))
    };

    Ok(ReportTables {
        routing: derive(&LineDelayStage::routing(config), Category::Routing)?,
        transportation: derive(&LineDelayStage::transportation(config), Category::Transportation)?,
        inbound: derive(&InventoryStage::inbound(config), Category::Inbound)?,
        outbound: derive(&InventoryStage::outbound(config), Category::Outbound)?,
        submission: derive(&RollupStage::submission(config), Category::Submission)?,
        dispatch: derive(&RollupStage::dispatch(config), Category::Dispatch)?,
        base_metrics,
    })
}

/// Sheets in workbook order: share columns of the base table rendered as
/// percentages (undefined shares as `n/a`), outbound rows stacked above
/// inbound rows.
pub fn assemble(
    config: &Config,
    tables: &ReportTables,
) -> Result<Vec<(&'static str, DataFrame)>> {
    let marker = config.base_metrics.share_suffix.as_str();
    let mut gpt = tables.base_metrics.clone();
    let shares: Vec<String> = frame::column_names(&gpt)
        .into_iter()
        .filter(|c| c.contains(marker))
        .collect();
    for col in &shares {
        gpt = percent_text(&gpt, col, 100.0, Some(UNDEFINED_RATIO))?;
    }
    let inventory = frame::stack(&[tables.outbound.clone(), tables.inbound.clone()])?;

    Ok(vec![
        (SHEET_BASE_METRICS, gpt),
        (SHEET_ROUTING, tables.routing.clone()),
        (SHEET_TRANSPORTATION, tables.transportation.clone()),
        (SHEET_SUBMISSION, tables.submission.clone()),
        (SHEET_DISPATCH, tables.dispatch.clone()),
        (SHEET_INVENTORY, inventory),
    ])
}

/// `<output_dir>/<MM-DD><file_stem>.xlsx`
pub fn output_path(config: &Config, date: NaiveDate) -> PathBuf {
    config.report.output_dir.join(format!(
        "{}{}.xlsx",
        date.format("%m-%d"),
        config.report.file_stem
    ))
}

/// Write the assembled sheets to `path`, creating its directory if needed.
pub fn write_report(path: &Path, sheets: &[(&str, DataFrame)]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create output directory {}", dir.display()))?;
    }
    let refs: Vec<(&str, &DataFrame)> = sheets.iter().map(|(n, t)| (*n, t)).collect();
    write_workbook(path, &refs)?;
    Ok(())
}

/// Discover, classify, run every stage and write the workbook stamped with `date`.
#[tracing::instrument(level = "info", skip(config), fields(data = %config.data_path.display()))]
pub fn run(config: &Config, date: NaiveDate) -> Result<PathBuf> {
    let paths = categorize(config)?;
    let tables = run_stages(config, &paths)?;
    let sheets = assemble(config, &tables)?;
    let path = output_path(config, date);
    write_report(&path, &sheets)?;
    info!(path = %path.display(), "report written");
    Ok(path)
}

/// Discovery plus classification with the configured patterns and rules.
pub fn categorize(config: &Config) -> Result<CategorizedPaths> {
    let found = discover(
        &config.data_path,
        &config.catalog.patterns,
        &config.catalog.reference_path,
    )?;
    Ok(classify(&found, &config.catalog.rules))
}
