use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ReportError;

/// Match each expected filename substring to one of a stage's assigned paths.
///
/// Substrings are resolved in order; each takes the first path containing it that
/// an earlier substring has not already claimed. A substring with no candidate
/// aborts the stage.
///
/// Stricter than matching each substring independently: a path claimed by one
/// substring cannot serve a later one.
pub fn resolve_sources<'a>(
    stage: &str,
    paths: &'a [PathBuf],
    substrings: &[&str],
) -> Result<Vec<&'a Path>, ReportError> {
    let mut claimed: Vec<usize> = Vec::with_capacity(substrings.len());
    for sub in substrings {
        let hit = paths.iter().enumerate().position(|(i, p)| {
            !claimed.contains(&i)
                && p.file_name()
                    .map_or(false, |n| n.to_string_lossy().contains(*sub))
        });
        match hit {
            Some(i) => {
                debug!(stage, substring = *sub, path = %paths[i].display(), "source resolved");
                claimed.push(i);
            }
            None => {
                return Err(ReportError::MissingSource {
                    stage: stage.to_string(),
                    substring: sub.to_string(),
                    candidates: paths.len(),
                })
            }
        }
    }
    Ok(claimed.into_iter().map(|i| paths[i].as_path()).collect())
}
