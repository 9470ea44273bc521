//! Source image discovery.
//!
//! Each rule's glob is resolved against the project root. Brace alternatives
//! (`*.{jpg,png}`) are expanded first since the `glob` crate does not support
//! them. Matches are de-duplicated, sorted and filtered to regular files.
//!
//! ## Directory offset
//!
//! Outputs mirror the source tree below the rule's *root*, the literal
//! directory prefix of its pattern:
//!
//! ```text
//! glob:    design-assets/**/*.{jpg,png}
//! root:    design-assets
//! source:  design-assets/team/alice.jpg
//! offset:  team          → optimized/team/alice-512.webp
//! ```

use crate::config::EffectiveConfig;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

const GLOB_META: &[char] = &['*', '?', '[', '{'];

/// A discovered source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    /// Path on disk (project root joined with the relative path).
    pub path: PathBuf,
    /// Path relative to the project root with `/` separators. Used as the
    /// change cache key and in reports.
    pub key: String,
    /// File name up to its first `.`.
    pub base_name: String,
    /// Parent directory relative to the rule root, `.` when they coincide.
    pub dir_offset: PathBuf,
}

impl SourceImage {
    /// Describe `path` (relative to `root`) as matched by a rule rooted at `rule_root`.
    pub fn new(root: &Path, path: PathBuf, rule_root: &Path) -> Self {
        let key = slash_path(path.strip_prefix(root).unwrap_or(&path));
        let base_name = base_name(&path);
        let dir_offset = path
            .parent()
            .and_then(|parent| parent.strip_prefix(root.join(rule_root)).ok())
            .filter(|offset| !offset.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            path,
            key,
            base_name,
            dir_offset,
        }
    }

    /// A source directly under the rule root.
    pub fn at_root(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            key: slash_path(&path),
            base_name: base_name(&path),
            dir_offset: PathBuf::from("."),
            path,
        }
    }
}

/// File name up to its first `.`.
pub fn base_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((base, _)) => base.to_string(),
        None => name.to_string(),
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Expand `{a,b}` alternatives into separate patterns. Nested braces are
/// supported; an unmatched `{` is left as is.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in pattern[open..].char_indices() {
        let i = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(i),
            _ => {}
        }
    }
    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(&splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| {
            let alt = &pattern[w[0] + 1..w[1]];
            expand_braces(&format!("{prefix}{alt}{suffix}"))
        })
        .collect()
}

/// Literal directory prefix of a glob pattern.
///
/// The last component is always treated as the file part, so a pattern with
/// no metacharacters roots at its parent directory.
pub fn rule_root(pattern: &str) -> PathBuf {
    let parts: Vec<&str> = pattern.split('/').collect();
    let dirs = &parts[..parts.len().saturating_sub(1)];
    dirs.iter()
        .take_while(|p| !p.contains(GLOB_META))
        .collect::<PathBuf>()
}

/// Groups of sources that share a directory offset and base name, and so
/// write the same output files. Each group lists keys in discovery order.
pub fn colliding_outputs(sources: &[SourceImage]) -> Vec<Vec<&str>> {
    let mut groups: BTreeMap<(&Path, &str), Vec<&str>> = BTreeMap::new();
    for source in sources {
        groups
            .entry((source.dir_offset.as_path(), source.base_name.as_str()))
            .or_default()
            .push(source.key.as_str());
    }
    groups.into_values().filter(|keys| keys.len() > 1).collect()
}

/// Find every source image matched by a rule.
///
/// Files inside the rule's output directory are skipped so outputs are never
/// picked up as sources. Unreadable entries are logged and skipped. Sources
/// that would overwrite each other's outputs are reported as warnings.
pub fn discover(root: &Path, config: &EffectiveConfig) -> Result<Vec<SourceImage>, glob::PatternError> {
    let rule_root = rule_root(&config.glob);
    let output_dir = root.join(&config.output_directory);
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());

    let mut paths = BTreeSet::new();
    for pattern in expand_braces(&config.glob) {
        let full = if Path::new(&pattern).is_absolute() {
            pattern
        } else {
            format!("{}/{}", escaped_root.trim_end_matches('/'), pattern)
        };
        for entry in glob::glob(&full)? {
            match entry {
                Ok(path) if path.is_file() => {
                    if path.starts_with(&output_dir) {
                        log::debug!("skipping output file {}", path.display());
                    } else {
                        paths.insert(path);
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("skipping unreadable path: {e}"),
            }
        }
    }

    log::debug!("{} matched {} source(s)", config.glob, paths.len());
    let sources: Vec<SourceImage> = paths
        .into_iter()
        .map(|path| SourceImage::new(root, path, &rule_root))
        .collect();
    for keys in colliding_outputs(&sources) {
        log::warn!(
            "{} share a base name and overwrite each other's outputs",
            keys.join(", ")
        );
    }
    Ok(sources)
}
