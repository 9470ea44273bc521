//! Source change detection for incremental builds.
//!
//! Before comparing modification times of every planned variant, the build
//! checks whether a source was touched at all since it was last processed.
//! Image bytes are never read; the signature hashes a stamp made of the
//! file's size, filesystem block size and last access time.
//!
//! # Signature
//!
//! ```text
//! xxh32("{size}-{blksize}-{atime_ms}", seed 0)
//! ```
//!
//! A touched-but-unchanged file reads as stale and gets rebuilt; a changed
//! file never reads as fresh unless all three values collide.
//!
//! # Storage
//!
//! The cache is a JSON file (`.img-cache.json` in the project root by
//! default), read once at startup and rewritten whole on every save:
//!
//! ```json
//! { "lastUpdated": 1718000000000, "items": { "design-assets/a.jpg": 3735928559 } }
//! ```
//!
//! Keys are source paths relative to the project root. Entries for deleted
//! sources are never removed; they are harmless.
//!
//! # Ownership
//!
//! A [`ChangeCache`] is a plain value. The build pipeline owns it, borrows it
//! mutably for each source and calls [`ChangeCache::save`] explicitly, so
//! writes are serialised without locking. Concurrent runs against the same
//! project are unsupported.

use crate::freshness::epoch_millis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Default name of the cache file in the project root.
pub const CACHE_FILE: &str = ".img-cache.json";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("change cache {} is corrupt ({reason}); delete it and run again", path.display())]
    CacheCorrupt { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum ChangeError {
    #[error("source file {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What the cache knows about a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Signature matches the recorded one.
    Fresh,
    /// Signature differs from the recorded one.
    Stale,
    /// Never recorded.
    Missing,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
            CacheState::Missing => "missing",
        })
    }
}

/// The file attributes a signature is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub blksize: u64,
    pub accessed_ms: i128,
}

impl FileStamp {
    /// Stat `path`. A missing file is [`ChangeError::NotFound`].
    pub fn read(path: &Path) -> Result<Self, ChangeError> {
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ChangeError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            size: meta.len(),
            blksize: blksize(&meta),
            accessed_ms: epoch_millis(meta.accessed()?),
        })
    }

    pub fn signature(&self) -> u32 {
        let content = format!("{}-{}-{}", self.size, self.blksize, self.accessed_ms);
        xxhash_rust::xxh32::xxh32(content.as_bytes(), 0)
    }
}

#[cfg(unix)]
fn blksize(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.blksize()
}

#[cfg(not(unix))]
fn blksize(_meta: &fs::Metadata) -> u64 {
    0
}

/// Compare a stamp against a recorded signature.
pub fn classify_stamp(recorded: Option<u32>, stamp: &FileStamp) -> CacheState {
    match recorded {
        None => CacheState::Missing,
        Some(sig) if sig == stamp.signature() => CacheState::Fresh,
        Some(_) => CacheState::Stale,
    }
}

fn now_millis() -> u64 {
    u64::try_from(epoch_millis(SystemTime::now())).unwrap_or(0)
}

/// Persistent map from source path to signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCache {
    pub last_updated: u64,
    pub items: BTreeMap<String, u32>,
    #[serde(skip)]
    path: PathBuf,
}

impl ChangeCache {
    /// An empty cache that saves to `path` (first run or `--clear`).
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            last_updated: now_millis(),
            items: BTreeMap::new(),
            path: path.into(),
        }
    }

    /// Load the cache at `path`. A missing file yields an empty cache; an
    /// unparsable one is [`CacheError::CacheCorrupt`].
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(e) => return Err(e.into()),
        };
        let mut cache: Self =
            serde_json::from_str(&content).map_err(|e| CacheError::CacheCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        cache.path = path;
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Recorded signature for `key`, if any.
    pub fn lookup(&self, key: &str) -> Option<u32> {
        self.items.get(key).copied()
    }

    /// Classify the file at `path`, recorded under `key`. No side effects.
    pub fn classify(&self, key: &str, path: &Path) -> Result<CacheState, ChangeError> {
        let stamp = FileStamp::read(path)?;
        Ok(classify_stamp(self.lookup(key), &stamp))
    }

    /// Store the current signature of `path` under `key`. Call [`save`](Self::save)
    /// to persist.
    pub fn record(&mut self, key: &str, path: &Path) -> Result<(), ChangeError> {
        let stamp = FileStamp::read(path)?;
        self.record_stamp(key, &stamp);
        Ok(())
    }

    pub fn record_stamp(&mut self, key: &str, stamp: &FileStamp) {
        self.items.insert(key.to_string(), stamp.signature());
        self.last_updated = now_millis();
    }

    /// Write the whole cache back to its file.
    pub fn save(&self) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}
