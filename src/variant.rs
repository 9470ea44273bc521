//! Variant file naming.
//!
//! Every output file's name encodes what it is. For a source `photo.png`:
//!
//! | Variant | File name |
//! |---|---|
//! | Blurred placeholder | `photo-blurred.jpg` |
//! | JPEG fallback | `photo.jpg` |
//! | Original size | `photo-original-size.webp` |
//! | Resized | `photo-512.webp` |
//! | Resized, Display P3 | `photo-512-p3.webp` |
//!
//! [`VariantName::file_name`] builds a name and [`VariantName::parse`] is its
//! inverse. Parsing looks at the shape of the name only, so a base name that
//! itself ends in a variant suffix (e.g. `logo-2024`) does not round-trip.
//! The build pipeline checks every planned name before dispatching anything.

use crate::config::Format;
use std::fmt;
use thiserror::Error;

const BLURRED_SUFFIX: &str = "-blurred";
const ORIGINAL_SUFFIX: &str = "-original-size";
const P3_SUFFIX: &str = "-p3";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariantNameError {
    #[error("invalid variant name {file_name:?}: {reason}")]
    InvalidVariantName { file_name: String, reason: String },
}

fn invalid(file_name: &str, reason: impl Into<String>) -> VariantNameError {
    VariantNameError::InvalidVariantName {
        file_name: file_name.to_string(),
        reason: reason.into(),
    }
}

/// Category of an output variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Blurred,
    Fallback,
    Original,
    Resized,
    P3,
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VariantKind::Blurred => "blurred",
            VariantKind::Fallback => "fallback",
            VariantKind::Original => "original",
            VariantKind::Resized => "resized",
            VariantKind::P3 => "p3",
        })
    }
}

/// A variant with everything its file name carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantName {
    Blurred,
    Fallback,
    Original { format: Format },
    Resized { format: Format, size: u32 },
    P3 { format: Format, size: u32 },
}

impl VariantName {
    pub fn kind(&self) -> VariantKind {
        match self {
            VariantName::Blurred => VariantKind::Blurred,
            VariantName::Fallback => VariantKind::Fallback,
            VariantName::Original { .. } => VariantKind::Original,
            VariantName::Resized { .. } => VariantKind::Resized,
            VariantName::P3 { .. } => VariantKind::P3,
        }
    }

    /// Output format. Blurred and fallback variants are always JPEG.
    pub fn format(&self) -> Format {
        match self {
            VariantName::Blurred | VariantName::Fallback => Format::Jpg,
            VariantName::Original { format }
            | VariantName::Resized { format, .. }
            | VariantName::P3 { format, .. } => *format,
        }
    }

    /// Target width, for resized and P3 variants.
    pub fn size(&self) -> Option<u32> {
        match self {
            VariantName::Resized { size, .. } | VariantName::P3 { size, .. } => Some(*size),
            _ => None,
        }
    }

    /// File name of this variant for a source with base name `base`.
    pub fn file_name(&self, base: &str) -> String {
        let ext = self.format().extension();
        match self {
            VariantName::Blurred => format!("{base}{BLURRED_SUFFIX}.{ext}"),
            VariantName::Fallback => format!("{base}.{ext}"),
            VariantName::Original { .. } => format!("{base}{ORIGINAL_SUFFIX}.{ext}"),
            VariantName::Resized { size, .. } => format!("{base}-{size}.{ext}"),
            VariantName::P3 { size, .. } => format!("{base}-{size}{P3_SUFFIX}.{ext}"),
        }
    }

    /// Recover `(base, variant)` from a file name.
    ///
    /// Suffixes are matched in order: `-blurred`, `-original-size`,
    /// `-<digits>-p3`, `-<digits>`. Anything else is a fallback.
    pub fn parse(file_name: &str) -> Result<(String, VariantName), VariantNameError> {
        let (stem, ext) = file_name
            .rsplit_once('.')
            .ok_or_else(|| invalid(file_name, "missing extension"))?;
        let format = Format::from_extension(ext)
            .ok_or_else(|| invalid(file_name, format!("unknown extension {ext:?}")))?;

        let require_jpg = |kind: &str| {
            if format == Format::Jpg {
                Ok(())
            } else {
                Err(invalid(file_name, format!("{kind} variants must be jpg")))
            }
        };

        let (base, name) = if let Some(base) = stem.strip_suffix(BLURRED_SUFFIX) {
            require_jpg("blurred")?;
            (base, VariantName::Blurred)
        } else if let Some(base) = stem.strip_suffix(ORIGINAL_SUFFIX) {
            (base, VariantName::Original { format })
        } else if let Some((base, size)) = stem
            .strip_suffix(P3_SUFFIX)
            .and_then(split_size_suffix)
        {
            (base, VariantName::P3 { format, size: parse_size(file_name, size)? })
        } else if let Some((base, size)) = split_size_suffix(stem) {
            (base, VariantName::Resized { format, size: parse_size(file_name, size)? })
        } else {
            require_jpg("fallback")?;
            (stem, VariantName::Fallback)
        };

        if base.is_empty() {
            return Err(invalid(file_name, "empty base name"));
        }
        Ok((base.to_string(), name))
    }
}

/// Split `name-123` into `("name", "123")`. `None` without a trailing digit run.
fn split_size_suffix(stem: &str) -> Option<(&str, &str)> {
    let (base, digits) = stem.rsplit_once('-')?;
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some((base, digits))
    } else {
        None
    }
}

fn parse_size(file_name: &str, digits: &str) -> Result<u32, VariantNameError> {
    digits
        .parse::<u32>()
        .map_err(|e| invalid(file_name, format!("size segment {digits:?}: {e}")))
}

/// Kind of a variant from its file name alone.
pub fn classify(file_name: &str) -> Result<VariantKind, VariantNameError> {
    VariantName::parse(file_name).map(|(_, name)| name.kind())
}
