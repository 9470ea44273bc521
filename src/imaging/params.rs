//! Parameter types for codec operations.
//!
//! These structs describe *what* to write, not *how*. The pipeline builds one
//! per planned variant and hands it to an [`ImageCodec`](super::ImageCodec),
//! so a mock codec can stand in for the real one without touching build logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`CodecOptions`]: Per-format encoder settings resolved from configuration.
//! - [`ColorProfile`]: sRGB or Display P3 output.
//! - [`BlurParams`], [`FallbackParams`], [`OriginalParams`], [`ResizeParams`]: one per variant kind.

use crate::config::{Format, MetaPolicy};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Encoder settings for one output format.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecOptions {
    pub quality: Quality,
    /// Pixel density in DPI, for formats that carry one.
    pub density: u16,
    pub interlaced: bool,
    pub meta_policy: MetaPolicy,
    /// Format-specific keys the built-in codec does not interpret.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            density: 300,
            interlaced: true,
            meta_policy: MetaPolicy::Remove,
            extra: BTreeMap::new(),
        }
    }
}

/// Color space of a resized variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorProfile {
    Srgb,
    DisplayP3,
}

/// Blurred placeholder: downscale to `width`, blur by `sigma`, write JPEG.
#[derive(Debug, Clone, PartialEq)]
pub struct BlurParams {
    pub output: PathBuf,
    pub width: u32,
    pub sigma: f32,
    pub options: CodecOptions,
}

/// Full-size JPEG re-encode for clients without modern format support.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackParams {
    pub output: PathBuf,
    pub options: CodecOptions,
}

/// Full-size re-encode into `format`.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalParams {
    pub output: PathBuf,
    pub format: Format,
    pub options: CodecOptions,
}

/// Resize to `width` (aspect preserved) and encode into `format`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub output: PathBuf,
    pub format: Format,
    pub width: u32,
    pub profile: ColorProfile,
    pub options: CodecOptions,
}
