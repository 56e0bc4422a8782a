use anyhow::Result;
use polars::prelude::DataFrame;
use std::path::PathBuf;
use tracing::info;

use super::{in_scope_routes, load, project, rollup_by_route, ReportStage};
use crate::catalog::resolve_sources;
use crate::config::{Config, RollupConfig};
use crate::frame::{self, ReadOptions};

/// Per-outlet delay records of significant routes, each carrying its route's total.
pub struct RollupStage<'a> {
    name: &'static str,
    cfg: &'a RollupConfig,
    base_route: &'a str,
}

impl<'a> RollupStage<'a> {
    pub fn submission(config: &'a Config) -> Self {
        Self {
            name: "submission",
            cfg: &config.submission,
            base_route: &config.base_metrics.route_column,
        }
    }

    pub fn dispatch(config: &'a Config) -> Self {
        Self {
            name: "dispatch",
            cfg: &config.dispatch,
            base_route: &config.base_metrics.route_column,
        }
    }
}

impl ReportStage for RollupStage<'_> {
    fn name(&self) -> &str {
        self.name
    }

    #[tracing::instrument(level = "info", skip_all, fields(stage = self.name))]
    fn run(&self, base: &DataFrame, paths: &[PathBuf]) -> Result<DataFrame> {
        let c = self.cfg;
        info!("start");

        let sources = resolve_sources(self.name, paths, &[c.source.as_str()])?;
        let options = ReadOptions::default().with_text_columns(&[&c.route_column]);
        let detail = frame::rename(
            &project(
                &load(sources[0], &options)?,
                &c.columns,
                &format!("{}: detail extract", self.name),
            )?,
            &c.renames,
        )?;

        let scope = match &c.ratio_column {
            Some(ratio) => in_scope_routes(base, self.base_route, ratio, c.threshold)?,
            None => frame::key_set(base, self.base_route)?,
        };
        info!(routes = scope.len(), "routes in scope");

        let detail = frame::filter_in(&detail, &c.route_column, &scope)?;
        let out = rollup_by_route(
            &detail,
            &c.route_column,
            &c.volume_column,
            &c.total_column,
            c.total_position,
        )?;
        info!(rows = out.height(), "done");
        Ok(out)
    }
}
