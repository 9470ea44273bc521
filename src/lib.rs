//! # image-opt
//!
//! An incremental build engine for responsive image variants. Each source
//! image matched by a configured glob is turned into a fixed set of derived
//! files: a blurred placeholder, a JPEG fallback, an original-size re-encode
//! per format, and one resized file per format and width (plus Display P3
//! twins when enabled).
//!
//! # Architecture
//!
//! ```text
//! .img-config.json ─► config ─► EffectiveConfig per source rule
//!                                   │
//!                      sources ─────┤  glob → SourceImage
//!                                   ▼
//!   change (signature cache) ─► pipeline ◄─ plan (what should exist)
//!                                   │   ◄─ freshness (what is up to date)
//!                                   ▼
//!                         imaging (decode once, encode in parallel)
//! ```
//!
//! A rerun with nothing changed does no image work. Two signals decide what
//! to rebuild:
//!
//! - **Change cache**: a 32-bit signature of each source's size, block size
//!   and access time, stored in `.img-cache.json`. A changed signature
//!   rebuilds every variant of that source.
//! - **Freshness**: a variant whose file is missing, or not strictly newer
//!   than its source, is rebuilt on its own.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Config file model, JSON/TOML loading, validation, per-rule resolution |
//! | [`sources`] | Glob expansion into [`sources::SourceImage`]s, output dir exclusion |
//! | [`variant`] | Variant file naming and its inverse parser |
//! | [`plan`] | The full variant list for one source |
//! | [`freshness`] | Existence and mtime comparison per variant |
//! | [`change`] | Source signatures and the persistent change cache |
//! | [`imaging`] | [`imaging::ImageCodec`] boundary and the pure-Rust codec |
//! | [`pipeline`] | Orchestration: `run` builds, `inspect` reports |
//! | [`output`] | CLI output formatting |
//! | [`logging`] | `env_logger` setup from CLI verbosity |
//!
//! # Naming
//!
//! For a source `photo.png` with formats `[jpg, webp]` and sizes `[512]`:
//!
//! ```text
//! photo-blurred.jpg
//! photo.jpg
//! photo-original-size.jpg   photo-original-size.webp
//! photo-512.jpg             photo-512.webp
//! ```
//!
//! Outputs mirror the source tree below the glob's literal prefix, so
//! `design-assets/team/alice.jpg` matched by `design-assets/**/*.jpg` lands in
//! `optimized/team/`.

pub mod change;
pub mod config;
pub mod freshness;
pub mod imaging;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod sources;
pub mod variant;
