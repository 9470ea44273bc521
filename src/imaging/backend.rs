//! Image codec trait and shared types.
//!
//! The [`ImageCodec`] trait is the seam between the build pipeline and pixel
//! work. A source is decoded once with [`open`](ImageCodec::open) and the
//! decoded handle is shared across parallel encodes, so the handle type must
//! be `Sync`.
//!
//! The production implementation is
//! [`RustCodec`](super::rust_backend::RustCodec), built on the `image` crate.

use super::params::{BlurParams, FallbackParams, OriginalParams, ResizeParams};
use crate::config::Format;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no encoder available for {0}")]
    UnsupportedFormat(Format),
    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("failed to encode {path}: {reason}")]
    Encode { path: String, reason: String },
}

/// Decoder/encoder for every variant kind.
pub trait ImageCodec: Sync {
    /// A decoded source image.
    type Source: Sync;

    /// Decode the source image at `path`.
    fn open(&self, path: &Path) -> Result<Self::Source, CodecError>;

    fn encode_blurred(&self, source: &Self::Source, params: &BlurParams)
    -> Result<(), CodecError>;

    fn encode_fallback(
        &self,
        source: &Self::Source,
        params: &FallbackParams,
    ) -> Result<(), CodecError>;

    fn encode_original(
        &self,
        source: &Self::Source,
        params: &OriginalParams,
    ) -> Result<(), CodecError>;

    fn encode_resized(&self, source: &Self::Source, params: &ResizeParams)
    -> Result<(), CodecError>;
}
