//! Image decoding and encoding.
//!
//! | Variant kind | Operation |
//! |---|---|
//! | **Blurred** | downscale to `blurSize` + Gaussian blur → JPEG |
//! | **Fallback** | full-size re-encode → JPEG |
//! | **Original size** | full-size re-encode → target format |
//! | **Resized / P3** | Lanczos3 downscale → target format |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing each encode
//! - **Backend**: [`ImageCodec`] trait + [`RustCodec`]

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{CodecError, ImageCodec};
pub use calculations::scaled_dimensions;
pub use params::{
    BlurParams, CodecOptions, ColorProfile, FallbackParams, OriginalParams, Quality, ResizeParams,
};
pub use rust_backend::RustCodec;
