//! Configuration document for a report run.
//!
//! Loaded once from JSON at startup and passed by reference into every stage.
//! Column names are never hard-coded in the stages; every projection list and
//! every key/derived column name lives here.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::catalog::{default_rules, ClassifyRule};
use crate::error::ReportError;

pub const DEFAULT_CONFIG_PATH: &str = "./config/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory scanned for source extracts.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub report: ReportConfig,
    pub base_metrics: BaseMetricsConfig,
    pub routing: LineDelayConfig,
    pub transportation: LineDelayConfig,
    pub inbound: InventoryConfig,
    pub outbound: InventoryConfig,
    pub submission: RollupConfig,
    pub dispatch: RollupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            level: default_log_level(),
        }
    }
}

/// Discovery patterns, the fixed reference lookup and the classification rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Filename globs searched recursively under `data_path`.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
    /// City→center lookup, appended to the discovered paths unconditionally.
    #[serde(default = "default_reference_path")]
    pub reference_path: PathBuf,
    #[serde(default = "default_rules")]
    pub rules: Vec<ClassifyRule>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            reference_path: default_reference_path(),
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Workbook name after the `MM-DD` date prefix, without extension.
    #[serde(default = "default_file_stem")]
    pub file_stem: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_stem: default_file_stem(),
        }
    }
}

/// Base Metrics ("GPT") stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseMetricsConfig {
    /// Filename substring of the per-stage delay extract (source A).
    pub delay_source: String,
    /// Filename substring of the route master extract (source B).
    pub route_source: String,
    /// Non-ratio columns kept from source A, including the join key and worst-stage column.
    pub delay_columns: Vec<String>,
    /// Raw per-stage delay volumes; each yields a share column.
    pub raw_delay_columns: Vec<String>,
    /// Columns kept from source B, including the join key.
    pub route_columns: Vec<String>,
    /// Join key present in both sources.
    pub route_key: String,
    /// Name of the route column in the finished table.
    pub route_column: String,
    pub worst_stages_column: String,
    pub worst_stages_position: usize,
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    pub raw_suffix: String,
    pub share_suffix: String,
    /// Numeric percentage columns rendered as `"12.34%"` text.
    #[serde(default)]
    pub percent_columns: Vec<String>,
}

impl BaseMetricsConfig {
    /// Share column name for a raw delay column: `raw_suffix` swapped for `share_suffix`.
    pub fn share_column(&self, raw: &str) -> String {
        let stem = raw.strip_suffix(self.raw_suffix.as_str()).unwrap_or(raw);
        format!("{}{}", stem, self.share_suffix)
    }
}

/// Routing and Transportation delay stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineDelayConfig {
    pub detail_source: String,
    pub penalty_source: String,
    /// Banner rows above the penalty extract's header.
    #[serde(default)]
    pub penalty_skip_rows: usize,
    pub detail_columns: Vec<String>,
    pub penalty_columns: Vec<String>,
    /// Detail rows are kept only where this column equals `flag_value`.
    pub flag_column: String,
    pub flag_value: String,
    pub ratio_column: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Route column of the detail extract, before renames.
    pub detail_route_column: String,
    #[serde(default)]
    pub detail_renames: BTreeMap<String, String>,
    /// Delay volume column, after renames.
    pub volume_column: String,
    /// Rows need strictly more than this volume.
    pub volume_floor: f64,
    /// Latest departure column, after renames.
    pub departure_column: String,
    pub suggested_time_column: String,
    #[serde(default = "default_lead_hours")]
    pub lead_hours: i64,
    pub ticket_column: String,
    pub penalty_ticket_column: String,
    #[serde(default)]
    pub penalty_renames: BTreeMap<String, String>,
    /// Base Metrics columns joined back by route (the route column first).
    pub base_columns: Vec<String>,
    #[serde(default)]
    pub sort_by_route: bool,
    pub column_order: Vec<String>,
}

/// Inbound and Outbound inventory stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    pub detail_source: String,
    pub inventory_source: String,
    pub center_source: String,
    pub detail_columns: Vec<String>,
    pub inventory_columns: Vec<String>,
    pub center_columns: Vec<String>,
    pub ratio_column: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub detail_route_column: String,
    #[serde(default)]
    pub detail_renames: BTreeMap<String, String>,
    /// City column shared by the renamed detail rows and the city→center lookup.
    pub city_column: String,
    /// Center column of the lookup the volume is attributed to.
    pub center_column: String,
    pub volume_column: String,
    #[serde(default)]
    pub inventory_renames: BTreeMap<String, String>,
    pub responsible_center_column: String,
    pub line_volume_column: String,
    /// Inventory ratio column (after renames) rendered as percentage text.
    pub ratio_output_column: String,
    pub kind_column: String,
    pub kind_label: String,
    pub summary_label: String,
}

/// Submission and Dispatch top-contributor stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    pub source: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    /// Scope filter; `None` keeps every Base Metrics route.
    #[serde(default)]
    pub ratio_column: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub route_column: String,
    pub volume_column: String,
    pub total_column: String,
    #[serde(default = "default_total_position")]
    pub total_position: usize,
}

impl Config {
    /// Read and validate the JSON document at `path`.
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ReportError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
            .map_err(|e| ReportError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json_str(text: &str) -> Result<Self, ReportError> {
        let cfg: Config = serde_json::from_str(text)
            .map_err(|e| ReportError::Config(format!("malformed document: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Structural checks serde cannot express.
    pub fn validate(&self) -> Result<(), ReportError> {
        let bad = |m: String| Err(ReportError::Config(m));
        let b = &self.base_metrics;
        if b.raw_delay_columns.is_empty() {
            return bad("base_metrics.raw_delay_columns is empty".into());
        }
        if let Some(c) = b.raw_delay_columns.iter().find(|c| !c.ends_with(&b.raw_suffix)) {
            return bad(format!(
                "base_metrics.raw_delay_columns: `{}` does not end with `{}`",
                c, b.raw_suffix
            ));
        }
        if !b.delay_columns.contains(&b.route_key) || !b.route_columns.contains(&b.route_key) {
            return bad(format!(
                "base_metrics: route key `{}` must be projected from both sources",
                b.route_key
            ));
        }

        let thresholds = [
            ("routing", self.routing.threshold),
            ("transportation", self.transportation.threshold),
            ("inbound", self.inbound.threshold),
            ("outbound", self.outbound.threshold),
            ("submission", self.submission.threshold),
            ("dispatch", self.dispatch.threshold),
        ];
        for (name, t) in thresholds {
            if !(0.0..1.0).contains(&t) {
                return bad(format!("{}.threshold {} is outside [0, 1)", name, t));
            }
        }

        for (name, s) in [("routing", &self.routing), ("transportation", &self.transportation)] {
            if s.column_order.is_empty() {
                return bad(format!("{}.column_order is empty", name));
            }
            if s.base_columns.first() != Some(&b.route_column) {
                return bad(format!(
                    "{}.base_columns must start with `{}`",
                    name, b.route_column
                ));
            }
        }
        Ok(())
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("./logs/app.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_patterns() -> Vec<String> {
    [
        "*淘天平台线路时效分析*.xlsx",
        "*线路达成率*.xlsx",
        "*线路罚款*.csv",
        "*超时库存*.xlsx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_reference_path() -> PathBuf {
    PathBuf::from("./config/城市对应中心基础表1119.xlsx")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_file_stem() -> String {
    "淘天线路时效GTP数据".to_string()
}

fn default_threshold() -> f64 {
    0.05
}

fn default_lead_hours() -> i64 {
    1
}

fn default_total_position() -> usize {
    1
}

#[cfg(test)]
pub(crate) fn sample() -> Config {
    Config::from_json_str(include_str!("../../config/config.json")).unwrap()
}
