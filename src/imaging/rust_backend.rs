//! Pure Rust codec built on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP, GIF) | `image::ImageReader` (pure Rust decoders) |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Blur | `image::DynamicImage::blur` (Gaussian) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (quality + DPI density) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Encode → PNG, WebP (lossless), GIF | `image::DynamicImage::write_to` |
//!
//! HEIF and JPEG XL have no pure Rust encoder; those variants fail with
//! [`CodecError::UnsupportedFormat`]. None of the encoders copy EXIF, IPTC or
//! ICC data, so output is always metadata-free. Display P3 variants carry the
//! source pixels unconverted.

use super::backend::{CodecError, ImageCodec};
use super::calculations::scaled_dimensions;
use super::params::{
    BlurParams, CodecOptions, ColorProfile, FallbackParams, OriginalParams, ResizeParams,
};
use crate::config::{Format, MetaPolicy};
use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// AVIF encoder speed (1 = slowest/best, 10 = fastest).
const AVIF_SPEED: u8 = 6;

/// Pure Rust codec using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustCodec;

impl RustCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

fn encode_err(path: &Path, e: impl std::fmt::Display) -> CodecError {
    CodecError::Encode {
        path: path_str(path),
        reason: e.to_string(),
    }
}

fn create(path: &Path) -> Result<BufWriter<File>, CodecError> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Resize to `width` with the height following the aspect ratio. Never upscales.
fn resize_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    let (w, h) = scaled_dimensions((img.width(), img.height()), width);
    if (w, h) == (img.width(), img.height()) {
        return img.clone();
    }
    img.resize_exact(w, h, FilterType::Lanczos3)
}

/// Drop to 8 bits per channel, keeping alpha only if the source has it.
fn to_8bit(img: &DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

fn save_jpeg(img: &DynamicImage, path: &Path, options: &CodecOptions) -> Result<(), CodecError> {
    let mut encoder =
        JpegEncoder::new_with_quality(create(path)?, options.quality.value() as u8);
    encoder.set_pixel_density(PixelDensity::dpi(options.density));
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| encode_err(path, e))
}

fn save_avif(img: &DynamicImage, path: &Path, options: &CodecOptions) -> Result<(), CodecError> {
    let encoder = image::codecs::avif::AvifEncoder::new_with_speed_quality(
        create(path)?,
        AVIF_SPEED,
        options.quality.value() as u8,
    );
    to_8bit(img)
        .write_with_encoder(encoder)
        .map_err(|e| encode_err(path, e))
}

fn save_with(img: &DynamicImage, path: &Path, format: ImageFormat) -> Result<(), CodecError> {
    let mut writer = create(path)?;
    let img = match format {
        ImageFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => to_8bit(img),
    };
    img.write_to(&mut writer, format)
        .map_err(|e| encode_err(path, e))
}

/// Encode `img` into `format` at `path`.
fn save_image(
    img: &DynamicImage,
    path: &Path,
    format: Format,
    options: &CodecOptions,
) -> Result<(), CodecError> {
    if options.meta_policy == MetaPolicy::Keep {
        log::debug!("{}: metadata is not carried over", path.display());
    }
    match format {
        Format::Jpg => save_jpeg(img, path, options),
        Format::Avif => save_avif(img, path, options),
        Format::Png => save_with(img, path, ImageFormat::Png),
        Format::Webp => save_with(img, path, ImageFormat::WebP),
        Format::Gif => save_with(img, path, ImageFormat::Gif),
        Format::Heif | Format::Jxl => Err(CodecError::UnsupportedFormat(format)),
    }
}

impl ImageCodec for RustCodec {
    type Source = DynamicImage;

    fn open(&self, path: &Path) -> Result<DynamicImage, CodecError> {
        ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| CodecError::Decode {
                path: path_str(path),
                reason: e.to_string(),
            })
    }

    fn encode_blurred(&self, source: &DynamicImage, params: &BlurParams) -> Result<(), CodecError> {
        let small = resize_to_width(source, params.width);
        let blurred = small.blur(params.sigma);
        save_jpeg(&blurred, &params.output, &params.options)
    }

    fn encode_fallback(
        &self,
        source: &DynamicImage,
        params: &FallbackParams,
    ) -> Result<(), CodecError> {
        save_jpeg(source, &params.output, &params.options)
    }

    fn encode_original(
        &self,
        source: &DynamicImage,
        params: &OriginalParams,
    ) -> Result<(), CodecError> {
        save_image(source, &params.output, params.format, &params.options)
    }

    fn encode_resized(&self, source: &DynamicImage, params: &ResizeParams) -> Result<(), CodecError> {
        if matches!(params.format, Format::Heif | Format::Jxl) {
            return Err(CodecError::UnsupportedFormat(params.format));
        }
        if params.profile == ColorProfile::DisplayP3 {
            log::debug!("{}: encoding without gamut conversion", params.output.display());
        }
        let resized = resize_to_width(source, params.width);
        save_image(&resized, &params.output, params.format, &params.options)
    }
}
