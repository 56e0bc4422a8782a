use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

use super::{in_scope_routes, load, logged, project, ReportStage};
use crate::catalog::resolve_sources;
use crate::config::{Config, LineDelayConfig};
use crate::error::ReportError;
use crate::frame::{self, ReadOptions};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Delayed vehicle tickets on significant routes, with penalties and a suggested
/// hand-over time. Routing and Transportation differ only in configuration.
pub struct LineDelayStage<'a> {
    name: &'static str,
    cfg: &'a LineDelayConfig,
    base_route: &'a str,
}

impl<'a> LineDelayStage<'a> {
    pub fn routing(config: &'a Config) -> Self {
        Self {
            name: "routing",
            cfg: &config.routing,
            base_route: &config.base_metrics.route_column,
        }
    }

    pub fn transportation(config: &'a Config) -> Self {
        Self {
            name: "transportation",
            cfg: &config.transportation,
            base_route: &config.base_metrics.route_column,
        }
    }

    /// Route column of the detail rows once renames are applied.
    fn route_column(&self) -> &str {
        self.cfg
            .detail_renames
            .get(&self.cfg.detail_route_column)
            .unwrap_or(&self.cfg.detail_route_column)
    }

    /// Ticket numbers are identifiers on both sides of the penalty join.
    fn detail_options(&self) -> ReadOptions {
        let c = self.cfg;
        ReadOptions::default().with_text_columns(&[
            &c.ticket_column,
            &c.detail_route_column,
            &c.flag_column,
        ])
    }

    fn penalty_options(&self) -> ReadOptions {
        ReadOptions::default()
            .with_skip_rows(self.cfg.penalty_skip_rows)
            .with_text_columns(&[&self.cfg.penalty_ticket_column])
    }
}

impl ReportStage for LineDelayStage<'_> {
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
            &[c.detail_source.as_str(), c.penalty_source.as_str()],
        )?;
        let flagged = frame::filter_eq(
            &load(sources[0], &self.detail_options())?,
            &c.flag_column,
            &c.flag_value,
        )
        .map_err(logged)?;
        let detail = project(
            &flagged,
            &c.detail_columns,
            &format!("{}: detail extract", self.name),
        )?;
        let penalty = frame::rename(
            &project(
                &load(sources[1], &self.penalty_options())?,
                &c.penalty_columns,
                &format!("{}: penalty extract", self.name),
            )?,
            &c.penalty_renames,
        )?;
        debug!(detail = detail.height(), penalty = penalty.height(), "sources loaded");

        // ─── 2) significant routes, heavy enough rows ────────────────────
        let scope = in_scope_routes(base, self.base_route, &c.ratio_column, c.threshold)?;
        info!(routes = scope.len(), ratio = %c.ratio_column, "routes in scope");
        let detail = frame::rename(
            &frame::filter_in(&detail, &c.detail_route_column, &scope)?,
            &c.detail_renames,
        )?;
        let detail = frame::filter_above(&detail, &c.volume_column, c.volume_floor).map_err(logged)?;

        // ─── 3) suggested hand-over time ─────────────────────────────────
        let detail = with_suggested_time(
            &detail,
            &c.departure_column,
            &c.suggested_time_column,
            Duration::hours(c.lead_hours),
        )
        .map_err(logged)?;

        // ─── 4) penalties, then the base metrics slice ───────────────────
        let base_slice = project(base, &c.base_columns, &format!("{}: base slice", self.name))?;
        let joined = frame::left_join(&detail, &penalty, &c.ticket_column, &c.penalty_ticket_column)
            .map_err(logged)?;
        let joined = frame::left_join(&joined, &base_slice, self.route_column(), self.base_route)
            .map_err(logged)?;
        let joined = if c.sort_by_route {
            frame::sort_by(&joined, self.route_column())?
        } else {
            joined
        };

        // ─── 5) fixed output layout ──────────────────────────────────────
        let out = project(&joined, &c.column_order, &format!("{}: output", self.name))?;
        info!(rows = out.height(), "done");
        Ok(out)
    }
}

/// Retype `departure` as a datetime column (unparseable values become null) and
/// add `suggested` holding `departure - lead` as `HH:MM:SS`.
fn with_suggested_time(
    df: &DataFrame,
    departure: &str,
    suggested: &str,
    lead: Duration,
) -> Result<DataFrame, ReportError> {
    frame::require(df, &[departure], "suggested time")?;
    let column = df.column(departure)?;
    let stamps: Vec<Option<NaiveDateTime>> = match column.dtype() {
        DataType::Datetime(_, _) => frame::datetime_values(column)?,
        _ => frame::texts(df, departure)?
            .iter()
            .map(|v| v.as_deref().and_then(parse_datetime))
            .collect(),
    };
    let times: Vec<Option<String>> = stamps
        .iter()
        .map(|v| v.map(|dt| (dt - lead).format("%H:%M:%S").to_string()))
        .collect();

    let mut out = df.clone();
    out.with_column(frame::datetime_column(departure, &stamps)?)?;
    out.with_column(Column::new(suggested.into(), times))?;
    Ok(out)
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s.trim(), f).ok())
}
