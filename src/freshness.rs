//! Freshness of planned variants.
//!
//! A variant is fresh when its sink exists and was modified strictly after
//! its source, compared at millisecond resolution. Equal timestamps count as
//! stale so ambiguous cases rebuild.

use crate::plan::PlannedVariant;
use crate::variant::{VariantKind, VariantName};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FreshnessError {
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A planned variant with its on-disk status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputVariant {
    pub source: PathBuf,
    pub sink: PathBuf,
    pub name: VariantName,
    pub exists: bool,
    pub fresh: bool,
}

impl OutputVariant {
    pub fn kind(&self) -> VariantKind {
        self.name.kind()
    }
}

/// Milliseconds since the Unix epoch. Negative before it.
pub fn epoch_millis(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i128,
        Err(e) => -(e.duration().as_millis() as i128),
    }
}

fn modified_millis(path: &Path) -> io::Result<Option<i128>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(epoch_millis(meta.modified()?))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Populate `exists` and `fresh` for each planned variant of `source`.
pub fn resolve(
    source: &Path,
    planned: Vec<PlannedVariant>,
) -> Result<Vec<OutputVariant>, FreshnessError> {
    let source_mtime = modified_millis(source)?
        .ok_or_else(|| FreshnessError::SourceNotFound(source.to_path_buf()))?;

    planned
        .into_iter()
        .map(|variant| {
            let sink_mtime = modified_millis(&variant.sink)?;
            Ok(OutputVariant {
                source: source.to_path_buf(),
                exists: sink_mtime.is_some(),
                fresh: sink_mtime.is_some_and(|m| m > source_mtime),
                sink: variant.sink,
                name: variant.name,
            })
        })
        .collect()
}
