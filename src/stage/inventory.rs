use anyhow::Result;
use polars::prelude::*;
use std::{collections::BTreeMap, path::PathBuf};
use tracing::{debug, info};

use super::{in_scope_routes, load, logged, percent_text, project, ReportStage};
use crate::catalog::resolve_sources;
use crate::config::{Config, InventoryConfig};
use crate::frame::{self, ReadOptions};

/// Delay on significant routes attributed to the responsible sorting center,
/// next to that center's own overstay inventory.
pub struct InventoryStage<'a> {
    name: &'static str,
    cfg: &'a InventoryConfig,
    base_route: &'a str,
}

impl<'a> InventoryStage<'a> {
    pub fn inbound(config: &'a Config) -> Self {
        Self {
            name: "inbound",
            cfg: &config.inbound,
            base_route: &config.base_metrics.route_column,
        }
    }

    pub fn outbound(config: &'a Config) -> Self {
        Self {
            name: "outbound",
            cfg: &config.outbound,
            base_route: &config.base_metrics.route_column,
        }
    }
}

impl ReportStage for InventoryStage<'_> {
    fn name(&self) -> &str {
        self.name
    }

    #[tracing::instrument(level = "info", skip_all, fields(stage = self.name))]
    fn run(&self, base: &DataFrame, paths: &[PathBuf]) -> Result<DataFrame> {
        let c = self.cfg;
        info!("start");

        // ─── 1) sources ──────────────────────────────────────────────────
        let sources = resolve_sources(
            self.name,
            paths,
            &[
                c.detail_source.as_str(),
                c.inventory_source.as_str(),
                c.center_source.as_str(),
            ],
        )?;
        let read = |i: usize, columns: &[String], keys: &[&String], what: &str| -> Result<DataFrame> {
            let loaded = load(sources[i], &ReadOptions::default().with_text_columns(keys))?;
            Ok(project(&loaded, columns, &format!("{}: {}", self.name, what))?)
        };
        let inventory_key = c
            .inventory_renames
            .iter()
            .find(|(_, to)| **to == c.responsible_center_column)
            .map_or(&c.responsible_center_column, |(from, _)| from);
        let detail = read(0, &c.detail_columns, &[&c.detail_route_column], "detail extract")?;
        let inventory = frame::rename(
            &read(1, &c.inventory_columns, &[inventory_key], "inventory extract")?,
            &c.inventory_renames,
        )?;
        let centers = read(2, &c.center_columns, &[&c.city_column], "city to center lookup")?;

        // ─── 2) significant routes, attributed to a center ───────────────
        let scope = in_scope_routes(base, self.base_route, &c.ratio_column, c.threshold)?;
        info!(routes = scope.len(), ratio = %c.ratio_column, "routes in scope");
        let detail = frame::rename(
            &frame::filter_in(&detail, &c.detail_route_column, &scope)?,
            &c.detail_renames,
        )?;
        let attributed =
            frame::left_join(&detail, &centers, &c.city_column, &c.city_column).map_err(logged)?;
        debug!(rows = attributed.height(), "detail rows attributed");

        // ─── 3) per-center volume next to center inventory ───────────────
        let renames = BTreeMap::from([
            (c.center_column.clone(), c.responsible_center_column.clone()),
            (c.volume_column.clone(), c.line_volume_column.clone()),
        ]);
        let per_center = frame::rename(
            &frame::group_sum(&attributed, &c.center_column, &c.volume_column).map_err(logged)?,
            &renames,
        )?;
        let out = frame::left_join(
            &per_center,
            &inventory,
            &c.responsible_center_column,
            &c.responsible_center_column,
        )
        .map_err(logged)?;
        let out = frame::with_constant(&out, &c.kind_column, &c.kind_label)?;
        let out = frame::place_column(&out, &c.kind_column, 0)?;
        let out = percent_text(&out, &c.ratio_output_column, 1.0, None)?;

        // ─── 4) grand total row ──────────────────────────────────────────
        let total = frame::sum(&out, &c.line_volume_column)?;
        let out = frame::append_row(
            &out,
            &[
                (c.kind_column.as_str(), AnyValue::String(&c.summary_label)),
                (c.line_volume_column.as_str(), AnyValue::Float64(total)),
            ],
        )?;

        info!(centers = per_center.height(), total, "done");
        Ok(out)
    }
}
