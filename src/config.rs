//! Configuration file model and the Configuration Resolver.
//!
//! A project is configured by a single file (`.img-config.json` by default,
//! or any `*.toml` file) with two parts:
//!
//! 1. **`defaults`**: the optimization parameters every source rule inherits.
//! 2. **`sources`**: one or more source rules. Each rule names a glob pattern
//!    and may override any default for the images it matches.
//!
//! ```json
//! {
//!   "defaults": {
//!     "formats": ["jpg", "webp", "avif"],
//!     "sizes": [512, 768, 1024, 1200, 1600],
//!     "useP3": false,
//!     "metaPolicy": "remove",
//!     "blurSize": 128,
//!     "blurAmount": 5.0,
//!     "outputDirectory": "optimized",
//!     "perFormatOptions": { "jpg": { "quality": 80 } }
//!   },
//!   "sources": [
//!     { "glob": "design-assets/**/*.{jpg,png,tiff}" },
//!     { "glob": "icons/*.png", "formats": ["webp"], "sizes": [] }
//!   ]
//! }
//! ```
//!
//! ## Override semantics
//!
//! A rule override is either absent (inherit the default) or present, and a
//! present empty list is honoured as empty. In the example above the `icons`
//! rule produces no resized variants at all, rather than falling back to the
//! default sizes.
//!
//! `perFormatOptions` merges per format: a rule entry for `webp` replaces the
//! default `webp` entry and leaves the other formats' defaults in place.
//!
//! Unknown keys in `defaults` are rejected.

use crate::imaging::{CodecOptions, Quality};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default name of the configuration file in the project root.
pub const CONFIG_FILE: &str = ".img-config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("No configuration file found at {}", .0.display())]
    NotFound(PathBuf),
}

/// Output image formats the planner can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[serde(alias = "jpeg")]
    Jpg,
    Png,
    Webp,
    Avif,
    Gif,
    Heif,
    Jxl,
}

impl Format {
    pub const ALL: [Format; 7] = [
        Format::Jpg,
        Format::Png,
        Format::Webp,
        Format::Avif,
        Format::Gif,
        Format::Heif,
        Format::Jxl,
    ];

    /// File extension used for sinks of this format.
    pub fn extension(self) -> &'static str {
        match self {
            Format::Jpg => "jpg",
            Format::Png => "png",
            Format::Webp => "webp",
            Format::Avif => "avif",
            Format::Gif => "gif",
            Format::Heif => "heif",
            Format::Jxl => "jxl",
        }
    }

    /// Inverse of [`extension`](Self::extension). Only canonical extensions match.
    pub fn from_extension(ext: &str) -> Option<Format> {
        Format::ALL.into_iter().find(|f| f.extension() == ext)
    }

    /// Encoding quality used when a rule does not set one.
    pub fn default_quality(self) -> Quality {
        match self {
            Format::Jpg => Quality::new(80),
            Format::Avif => Quality::new(50),
            _ => Quality::default(),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Whether source metadata (EXIF, IPTC, ICC) is carried into optimized images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaPolicy {
    Keep,
    #[default]
    Remove,
}

/// Per-format encoder settings.
///
/// `quality` is understood by the built-in codec; every other key is kept
/// verbatim and handed to the codec untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FormatOptions {
    pub fn with_quality(quality: u32) -> Self {
        Self {
            quality: Some(quality),
            extra: BTreeMap::new(),
        }
    }
}

/// Project-wide optimization defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Defaults {
    /// Formats every source is re-encoded to.
    pub formats: Vec<Format>,
    /// Target pixel widths for resized variants.
    pub sizes: Vec<u32>,
    /// Also produce a P3-colorspace variant per size.
    pub use_p3: bool,
    pub meta_policy: MetaPolicy,
    /// Pixel width of the blurred placeholder.
    pub blur_size: u32,
    /// Blur sigma for the placeholder (0.3 to 1000).
    pub blur_amount: f32,
    /// Prefer interlaced/progressive encodings where the codec supports them.
    pub use_interlaced: bool,
    /// DPI density written into formats that carry one.
    pub density: u32,
    /// Base directory all variants are written under.
    pub output_directory: PathBuf,
    pub per_format_options: BTreeMap<Format, FormatOptions>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            formats: vec![Format::Jpg, Format::Webp, Format::Avif],
            sizes: vec![512, 768, 1024, 1200, 1600],
            use_p3: false,
            meta_policy: MetaPolicy::Remove,
            blur_size: 128,
            blur_amount: 5.0,
            use_interlaced: true,
            density: 300,
            output_directory: PathBuf::from("optimized"),
            per_format_options: BTreeMap::from([
                (Format::Jpg, FormatOptions::with_quality(80)),
                (Format::Avif, FormatOptions::with_quality(50)),
                (Format::Webp, FormatOptions::with_quality(80)),
            ]),
        }
    }
}

/// Optional per-rule overrides. `None` means "inherit the default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<Format>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_p3: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_policy: Option<MetaPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur_amount: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_interlaced: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub density: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_format_options: Option<BTreeMap<Format, FormatOptions>>,
}

/// A glob pattern selecting source images, plus optional overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRule {
    pub glob: String,
    #[serde(flatten)]
    pub overrides: Overrides,
    /// Keys that are neither `glob` nor an override. Rejected by validation.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl SourceRule {
    pub fn new(glob: impl Into<String>) -> Self {
        Self {
            glob: glob.into(),
            overrides: Overrides::default(),
            unknown: BTreeMap::new(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ProcessingConfig {
    /// Maximum number of parallel encoding workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub defaults: Defaults,
    pub sources: Vec<SourceRule>,
    #[serde(default, skip_serializing_if = "is_default_processing")]
    pub processing: ProcessingConfig,
}

fn is_default_processing(p: &ProcessingConfig) -> bool {
    *p == ProcessingConfig::default()
}

impl ConfigFile {
    /// Stock configuration: stock defaults and a single catch-all rule.
    pub fn stock() -> Self {
        Self {
            defaults: Defaults::default(),
            sources: vec![SourceRule::new("design-assets/**/*.{jpg,png,tiff}")],
            processing: ProcessingConfig::default(),
        }
    }

    /// Validate the defaults and every rule after merging it with them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Validation(
                "at least one source rule is required".into(),
            ));
        }
        for (i, rule) in self.sources.iter().enumerate() {
            if rule.glob.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "sources[{i}].glob must not be empty"
                )));
            }
            if !rule.unknown.is_empty() {
                let keys: Vec<&str> = rule.unknown.keys().map(String::as_str).collect();
                return Err(ConfigError::Validation(format!(
                    "sources[{i}] ({}): unknown field(s) {}",
                    rule.glob,
                    keys.join(", ")
                )));
            }
            resolve_rule(&self.defaults, rule)
                .validate()
                .map_err(|e| match e {
                    ConfigError::Validation(msg) => {
                        ConfigError::Validation(format!("sources[{i}] ({}): {msg}", rule.glob))
                    }
                    other => other,
                })?;
        }
        Ok(())
    }

    /// Effective configuration for every rule, in file order.
    pub fn effective_rules(&self) -> Vec<EffectiveConfig> {
        self.sources
            .iter()
            .map(|rule| resolve_rule(&self.defaults, rule))
            .collect()
    }
}

/// Fully merged configuration for one source rule.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub glob: String,
    /// Deduplicated, first occurrence wins.
    pub formats: Vec<Format>,
    /// Deduplicated, first occurrence wins.
    pub sizes: Vec<u32>,
    pub use_p3: bool,
    pub meta_policy: MetaPolicy,
    pub blur_size: u32,
    pub blur_amount: f32,
    pub use_interlaced: bool,
    pub density: u32,
    pub output_directory: PathBuf,
    pub per_format_options: BTreeMap<Format, FormatOptions>,
}

impl EffectiveConfig {
    /// Effective config for `glob` with no overrides.
    pub fn from_defaults(glob: impl Into<String>, defaults: &Defaults) -> Self {
        resolve_rule(defaults, &SourceRule::new(glob))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sizes.contains(&0) {
            return Err(ConfigError::Validation("sizes must be positive".into()));
        }
        if self.blur_size == 0 {
            return Err(ConfigError::Validation("blurSize must be positive".into()));
        }
        if !(0.3..=1000.0).contains(&self.blur_amount) {
            return Err(ConfigError::Validation(
                "blurAmount must be between 0.3 and 1000".into(),
            ));
        }
        for (format, opts) in &self.per_format_options {
            if let Some(q) = opts.quality
                && !(1..=100).contains(&q)
            {
                return Err(ConfigError::Validation(format!(
                    "perFormatOptions.{format}.quality must be 1-100"
                )));
            }
        }
        Ok(())
    }

    /// Encoder options for one output format.
    pub fn codec_options(&self, format: Format) -> CodecOptions {
        let opts = self.per_format_options.get(&format);
        CodecOptions {
            quality: opts
                .and_then(|o| o.quality)
                .map(Quality::new)
                .unwrap_or_else(|| format.default_quality()),
            density: u16::try_from(self.density).unwrap_or(u16::MAX),
            interlaced: self.use_interlaced,
            meta_policy: self.meta_policy,
            extra: opts.map(|o| o.extra.clone()).unwrap_or_default(),
        }
    }
}

/// Merge one rule's overrides on top of the defaults.
pub fn resolve_rule(defaults: &Defaults, rule: &SourceRule) -> EffectiveConfig {
    let o = &rule.overrides;

    let mut per_format_options = defaults.per_format_options.clone();
    if let Some(overrides) = &o.per_format_options {
        for (format, opts) in overrides {
            per_format_options.insert(*format, opts.clone());
        }
    }

    EffectiveConfig {
        glob: rule.glob.clone(),
        formats: dedup(o.formats.as_ref().unwrap_or(&defaults.formats)),
        sizes: dedup(o.sizes.as_ref().unwrap_or(&defaults.sizes)),
        use_p3: o.use_p3.unwrap_or(defaults.use_p3),
        meta_policy: o.meta_policy.unwrap_or(defaults.meta_policy),
        blur_size: o.blur_size.unwrap_or(defaults.blur_size),
        blur_amount: o.blur_amount.unwrap_or(defaults.blur_amount),
        use_interlaced: o.use_interlaced.unwrap_or(defaults.use_interlaced),
        density: o.density.unwrap_or(defaults.density),
        output_directory: o
            .output_directory
            .clone()
            .unwrap_or_else(|| defaults.output_directory.clone()),
        per_format_options,
    }
}

fn dedup<T: PartialEq + Copy>(items: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(*item);
        }
    }
    out
}

/// Parse a configuration document. `.toml` paths are TOML, anything else JSON.
pub fn parse_config(content: &str, path: &Path) -> Result<ConfigFile, ConfigError> {
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    let config: ConfigFile = if is_toml {
        toml::from_str(content)?
    } else {
        serde_json::from_str(content)?
    };
    Ok(config)
}

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content, path)?;
    config.validate()?;
    Ok(config)
}

/// Stock configuration as pretty JSON, ready to save as [`CONFIG_FILE`].
pub fn stock_config_json() -> Result<String, ConfigError> {
    Ok(serde_json::to_string_pretty(&ConfigFile::stock())?)
}

/// Returns a fully-commented stock TOML configuration.
///
/// Used by `gen-config --toml`. Parses to exactly [`ConfigFile::stock`].
pub fn stock_config_toml() -> &'static str {
    r##"# image-opt configuration
# =======================
# Every key under [defaults] is optional; the values below are the defaults.
# Unknown keys under [defaults] cause an error.

[defaults]
# Formats each source image is re-encoded to.
# Supported: jpg, png, webp, avif, gif, heif, jxl
formats = ["jpg", "webp", "avif"]

# Pixel widths of the resized variants. An empty list produces only the
# original-size re-encode per format (plus blurred and fallback images).
sizes = [512, 768, 1024, 1200, 1600]

# Also produce a "-p3" variant for every size.
useP3 = false

# "keep" or "remove" source metadata in optimized images.
metaPolicy = "remove"

# Width in pixels and blur sigma (0.3 - 1000) of the blurred placeholder.
blurSize = 128
blurAmount = 5.0

# Prefer interlaced/progressive output where the encoder supports it.
useInterlaced = true

# DPI density written into formats that carry one.
density = 300

# Variants are written to <outputDirectory>/<directory offset>/.
outputDirectory = "optimized"

# Encoder settings per format. "quality" is 1-100.
[defaults.perFormatOptions.jpg]
quality = 80

[defaults.perFormatOptions.webp]
quality = 80

[defaults.perFormatOptions.avif]
quality = 50

# ---------------------------------------------------------------------------
# Source rules: a glob plus any overrides of the defaults above.
# An override that is present wins, even when it is an empty list.
# ---------------------------------------------------------------------------
[[sources]]
glob = "design-assets/**/*.{jpg,png,tiff}"

# [[sources]]
# glob = "icons/*.png"
# formats = ["webp"]
# sizes = []

# ---------------------------------------------------------------------------
# Parallel processing
# ---------------------------------------------------------------------------
# [processing]
# maxProcesses = 4    # Max parallel encoders (omit for auto = CPU cores)
"##
}
