//! Variant planning.
//!
//! [`plan`] lists every output a source must produce, in a fixed order:
//!
//! 1. the blurred placeholder,
//! 2. the JPEG fallback,
//! 3. for each format: its original-size re-encode, then each size (and its
//!    P3 twin right after it when enabled).
//!
//! The result depends only on the source's base name, its directory offset
//! and the effective config, so two runs over unchanged inputs plan the same
//! sinks.

use crate::config::EffectiveConfig;
use crate::sources::SourceImage;
use crate::variant::{VariantKind, VariantName};
use std::path::{Path, PathBuf};

/// One output file a source must produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedVariant {
    pub sink: PathBuf,
    pub name: VariantName,
}

impl PlannedVariant {
    pub fn kind(&self) -> VariantKind {
        self.name.kind()
    }
}

/// Directory all of a source's variants are written to.
pub fn sink_dir(source: &SourceImage, config: &EffectiveConfig) -> PathBuf {
    if source.dir_offset == Path::new(".") {
        config.output_directory.clone()
    } else {
        config.output_directory.join(&source.dir_offset)
    }
}

/// Enumerate the variants of `source` under `config`.
pub fn plan(source: &SourceImage, config: &EffectiveConfig) -> Vec<PlannedVariant> {
    let dir = sink_dir(source, config);
    let per_format = 1 + config.sizes.len() * if config.use_p3 { 2 } else { 1 };
    let mut names = Vec::with_capacity(2 + config.formats.len() * per_format);

    names.push(VariantName::Blurred);
    names.push(VariantName::Fallback);
    for &format in &config.formats {
        names.push(VariantName::Original { format });
        for &size in &config.sizes {
            names.push(VariantName::Resized { format, size });
            if config.use_p3 {
                names.push(VariantName::P3 { format, size });
            }
        }
    }

    names
        .into_iter()
        .map(|name| PlannedVariant {
            sink: dir.join(name.file_name(&source.base_name)),
            name,
        })
        .collect()
}
