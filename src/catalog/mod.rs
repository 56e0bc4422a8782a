// src/catalog/mod.rs
//! Source discovery and filename-based classification.
//!
//! `discover` walks the data root for the configured filename globs, `classify`
//! buckets the hits into categories through an explicit rule table. Downstream
//! stages only see a [`CategorizedPaths`]; they re-match their own sources with
//! [`resolve_sources`].

pub mod source;

pub use source::resolve_sources;

use anyhow::{Context, Result};
use glob::{glob, Pattern};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BaseMetrics,
    Routing,
    Transportation,
    Inbound,
    Outbound,
    Submission,
    Dispatch,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::BaseMetrics,
        Category::Routing,
        Category::Transportation,
        Category::Inbound,
        Category::Outbound,
        Category::Submission,
        Category::Dispatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BaseMetrics => "base_metrics",
            Category::Routing => "routing",
            Category::Transportation => "transportation",
            Category::Inbound => "inbound",
            Category::Outbound => "outbound",
            Category::Submission => "submission",
            Category::Dispatch => "dispatch",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a matching rule does to its target categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Every matching path is added.
    #[default]
    Append,
    /// Latest match wins: the category holds only the last matching path.
    Overwrite,
}

/// A path whose file name contains any of `substrings` lands in every `categories` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyRule {
    pub substrings: Vec<String>,
    pub categories: Vec<Category>,
    #[serde(default)]
    pub policy: Policy,
}

impl ClassifyRule {
    fn new(substrings: &[&str], categories: &[Category], policy: Policy) -> Self {
        Self {
            substrings: substrings.iter().map(|s| s.to_string()).collect(),
            categories: categories.to_vec(),
            policy,
        }
    }

    fn matches(&self, file_name: &str) -> bool {
        self.substrings.iter().any(|s| file_name.contains(s.as_str()))
    }
}

/// The production rule table.
pub fn default_rules() -> Vec<ClassifyRule> {
    use Category::*;
    vec![
        ClassifyRule::new(&["各环节延误量"], &[BaseMetrics], Policy::Append),
        ClassifyRule::new(&["城市线路汇总-日"], &[BaseMetrics], Policy::Append),
        ClassifyRule::new(
            &["未达成车签明细", "线路罚款"],
            &[Routing, Transportation],
            Policy::Append,
        ),
        ClassifyRule::new(&["进港", "城市对应中心"], &[Inbound], Policy::Append),
        ClassifyRule::new(&["出港", "城市对应中心"], &[Outbound], Policy::Append),
        ClassifyRule::new(&["交件"], &[Submission], Policy::Overwrite),
        ClassifyRule::new(&["派签"], &[Dispatch], Policy::Overwrite),
    ]
}

/// Category → paths, every category present (possibly empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorizedPaths(BTreeMap<Category, Vec<PathBuf>>);

impl CategorizedPaths {
    pub fn get(&self, category: Category) -> &[PathBuf] {
        self.0.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, &Vec<PathBuf>)> {
        self.0.iter()
    }
}

/// Recursively collect every file under `root` matching one of `patterns`, in
/// pattern order, then append `reference` whether or not it exists.
///
/// A file matching several patterns is listed once per pattern.
#[tracing::instrument(level = "info", skip(patterns, reference), fields(root = %root.display()))]
pub fn discover(root: &Path, patterns: &[String], reference: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        warn!("data root {} is not a directory", root.display());
    }
    let escaped_root = Pattern::escape(&root.to_string_lossy());

    let mut paths = Vec::new();
    for pattern in patterns {
        let full = format!("{}/**/{}", escaped_root, pattern);
        for entry in glob(&full).with_context(|| format!("invalid glob pattern {}", full))? {
            match entry {
                Ok(p) if p.is_file() => paths.push(p),
                Ok(_) => {}
                Err(e) => warn!("cannot read glob entry: {}", e),
            }
        }
    }
    paths.push(reference.to_path_buf());

    info!("discovered {} path(s)", paths.len());
    Ok(paths)
}

/// Bucket `paths` by file name through `rules`.
pub fn classify(paths: &[PathBuf], rules: &[ClassifyRule]) -> CategorizedPaths {
    let mut out: BTreeMap<Category, Vec<PathBuf>> =
        Category::ALL.iter().map(|c| (*c, Vec::new())).collect();

    for p in paths {
        let Some(name) = p.file_name().map(|n| n.to_string_lossy()) else {
            continue;
        };
        for rule in rules.iter().filter(|r| r.matches(&name)) {
            for cat in &rule.categories {
                let slot = out.entry(*cat).or_default();
                match rule.policy {
                    Policy::Append => slot.push(p.clone()),
                    Policy::Overwrite => *slot = vec![p.clone()],
                }
            }
        }
    }

    for (cat, list) in &out {
        info!(category = %cat, count = list.len(), "classified");
    }
    CategorizedPaths(out)
}
