use anyhow::Result;
use polars::prelude::*;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{load, logged, percent_text, project};
use crate::catalog::resolve_sources;
use crate::config::{BaseMetricsConfig, Config};
use crate::frame::{self, ReadOptions};

const NAME: &str = "base_metrics";
const DELAY_TOTAL: &str = "__delay_total";

/// Per-route master table ("GPT"): route attributes, per-stage delay volumes and
/// each volume's share of the route's total delay.
pub struct BaseMetricsStage<'a> {
    cfg: &'a BaseMetricsConfig,
}

impl<'a> BaseMetricsStage<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            cfg: &config.base_metrics,
        }
    }

    pub fn name(&self) -> &str {
        NAME
    }

    #[tracing::instrument(level = "info", skip_all, fields(stage = NAME))]
    pub fn run(&self, paths: &[PathBuf]) -> Result<DataFrame> {
        let c = self.cfg;
        info!("start");

        // ─── 1) load both extracts ───────────────────────────────────────
        let sources = resolve_sources(
            NAME,
            paths,
            &[c.delay_source.as_str(), c.route_source.as_str()],
        )?;
        let keyed = ReadOptions::default().with_text_columns(&[&c.route_key]);
        let delay_cols: Vec<&String> = c.delay_columns.iter().chain(&c.raw_delay_columns).collect();
        let delays = project(
            &load(sources[0], &keyed)?,
            &delay_cols,
            "base metrics: delay extract",
        )?;
        let routes = project(
            &load(sources[1], &keyed)?,
            &c.route_columns,
            "base metrics: route extract",
        )?;

        // ─── 2) every known route, with whatever delay was recorded ──────
        let mut renames = c.renames.clone();
        renames.insert(c.route_key.clone(), c.route_column.clone());
        let joined = frame::rename(
            &frame::left_join(&routes, &delays, &c.route_key, &c.route_key)?,
            &renames,
        )?;

        // ─── 3) shares ───────────────────────────────────────────────────
        let with_shares = self.add_shares(&joined)?;

        // ─── 4) explicit column order ────────────────────────────────────
        let order = self.column_order(&joined);
        let mut out = project(&with_shares, &order, "base metrics: output")?;

        for col in &c.percent_columns {
            out = percent_text(&out, col, 1.0, None)?;
        }

        info!(routes = out.height(), "done");
        Ok(out)
    }

    /// Append one share column per raw delay column. A route whose raw volumes
    /// sum to zero gets null shares and is logged.
    fn add_shares(&self, joined: &DataFrame) -> Result<DataFrame> {
        let c = self.cfg;
        let mut needed: Vec<&str> = c.raw_delay_columns.iter().map(String::as_str).collect();
        needed.push(&c.route_column);
        frame::require(joined, &needed, "base metrics: share inputs").map_err(logged)?;

        let total = c
            .raw_delay_columns
            .iter()
            .map(|raw| col(raw.as_str()).cast(DataType::Float64).fill_null(lit(0.0)))
            .reduce(|acc, e| acc + e)
            .unwrap_or_else(|| lit(0.0));
        let shares: Vec<Expr> = c
            .raw_delay_columns
            .iter()
            .map(|raw| {
                when(col(DELAY_TOTAL).eq(lit(0.0)))
                    .then(lit(NULL).cast(DataType::Float64))
                    .otherwise(
                        col(raw.as_str()).cast(DataType::Float64).fill_null(lit(0.0))
                            / col(DELAY_TOTAL),
                    )
                    .alias(c.share_column(raw))
            })
            .collect();

        let with_total = joined
            .clone()
            .lazy()
            .with_column(total.alias(DELAY_TOTAL))
            .collect()?;

        let flagged = with_total
            .clone()
            .lazy()
            .filter(col(DELAY_TOTAL).eq(lit(0.0)))
            .collect()?;
        for route in frame::texts(&flagged, &c.route_column)?.into_iter().flatten() {
            warn!(%route, "delay total is zero, shares undefined");
        }
        if flagged.height() > 0 {
            warn!(flagged = flagged.height(), "routes with undefined delay shares");
        }

        Ok(with_total.lazy().with_columns(shares).collect()?)
    }

    /// Non-delay columns (worst-stage column at its fixed position), then each raw
    /// delay column followed by its share.
    fn column_order(&self, joined: &DataFrame) -> Vec<String> {
        let c = self.cfg;
        let mut order: Vec<String> = frame::column_names(joined)
            .into_iter()
            .filter(|col| !c.raw_delay_columns.contains(col) && *col != c.worst_stages_column)
            .collect();
        order.insert(
            c.worst_stages_position.min(order.len()),
            c.worst_stages_column.clone(),
        );
        for raw in &c.raw_delay_columns {
            order.push(raw.clone());
            order.push(c.share_column(raw));
        }
        order
    }
}
