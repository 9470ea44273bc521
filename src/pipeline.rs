//! Build orchestration.
//!
//! [`run`] drives an incremental build over every source rule:
//!
//! ```text
//! rule ─► discover sources ─► per source:
//!            change cache ─► plan ─► resolve freshness ─► work list
//!            decode once ─► encode work list in parallel (rayon)
//!            all ok? ─► record signature, save cache
//! ```
//!
//! ## Deciding what to rebuild
//!
//! The change cache is consulted first. A source that is `stale` or
//! `missing` from the cache rebuilds every variant. A `fresh` source only
//! rebuilds variants whose sink is missing or not newer than the source.
//! Without a cache (`--no-cache`) the mtime check alone decides.
//!
//! ## Failure isolation
//!
//! A failure inside one source (unreadable source, bad variant name, codec
//! error) marks that source failed and the build moves on. Only cache and
//! configuration errors abort the run.
//!
//! Sources are processed one at a time by the calling thread, which holds
//! the only `&mut` to the cache. The variants of a source are encoded
//! concurrently on the rayon pool, all from the same decoded image.

use crate::change::{CacheError, CacheState, ChangeCache, ChangeError};
use crate::config::{ConfigError, ConfigFile, EffectiveConfig, Format};
use crate::freshness::{self, FreshnessError, OutputVariant};
use crate::imaging::{
    BlurParams, CodecError, ColorProfile, FallbackParams, ImageCodec, OriginalParams, ResizeParams,
};
use crate::plan::{self, PlannedVariant};
use crate::sources::{self, SourceImage};
use crate::variant::{VariantName, VariantNameError};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Errors that abort the whole run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that fail a single source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("{}: cannot plan {}: {reason}", source_path.display(), sink.display())]
    InvalidVariantName {
        source_path: PathBuf,
        sink: PathBuf,
        reason: String,
    },
    #[error("{}: failed to write {}: {cause}", source_path.display(), sink.display())]
    RegenerationFailed {
        source_path: PathBuf,
        sink: PathBuf,
        cause: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChangeError> for SourceError {
    fn from(e: ChangeError) -> Self {
        match e {
            ChangeError::NotFound(p) => SourceError::NotFound(p),
            ChangeError::Io(e) => SourceError::Io(e),
        }
    }
}

impl From<FreshnessError> for SourceError {
    fn from(e: FreshnessError) -> Self {
        match e {
            FreshnessError::SourceNotFound(p) => SourceError::NotFound(p),
            FreshnessError::Io(e) => SourceError::Io(e),
        }
    }
}

/// Outcome for one source image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    /// Source path relative to the project root.
    pub source: String,
    pub skipped: usize,
    pub regenerated: usize,
    pub failed: usize,
    /// First error for a failed source, rendered for display.
    pub error: Option<String>,
}

impl SourceReport {
    fn new(source: &SourceImage) -> Self {
        Self {
            source: source.key.clone(),
            ..Self::default()
        }
    }

    /// Mark the source failed. A failed source counts at least one failure.
    fn fail(mut self, failed: usize, error: &SourceError) -> Self {
        self.failed = failed.max(1);
        self.error = Some(error.to_string());
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub sources: Vec<SourceReport>,
}

impl BuildReport {
    pub fn skipped(&self) -> usize {
        self.sources.iter().map(|s| s.skipped).sum()
    }

    pub fn regenerated(&self) -> usize {
        self.sources.iter().map(|s| s.regenerated).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.iter().map(|s| s.failed).sum()
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| s.is_failed())
    }

    pub fn has_failures(&self) -> bool {
        self.sources.iter().any(SourceReport::is_failed)
    }
}

/// Progress events sent while building.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    RuleStarted { glob: String, sources: usize },
    SourceStarted { source: String, needed: usize },
    SourceFinished(SourceReport),
}

/// How the change cache takes part in a run.
pub enum CacheMode<'a> {
    /// Consult and update this cache.
    Use(&'a mut ChangeCache),
    /// Ignore change detection; freshness alone decides.
    Disabled,
}

fn send(events: Option<&Sender<BuildEvent>>, event: BuildEvent) {
    if let Some(tx) = events {
        tx.send(event).ok();
    }
}

/// Rule configs with output directories resolved against `root`.
fn rooted_rules(config: &ConfigFile, root: &Path) -> Vec<EffectiveConfig> {
    config
        .effective_rules()
        .into_iter()
        .map(|mut rule| {
            rule.output_directory = root.join(&rule.output_directory);
            rule
        })
        .collect()
}

/// Build every source matched by `config`'s rules under `root`.
pub fn run<C: ImageCodec>(
    config: &ConfigFile,
    root: &Path,
    codec: &C,
    mut cache: CacheMode<'_>,
    events: Option<Sender<BuildEvent>>,
) -> Result<BuildReport, PipelineError> {
    config.validate()?;
    let mut report = BuildReport::default();

    for rule in rooted_rules(config, root) {
        let sources = sources::discover(root, &rule)?;
        send(
            events.as_ref(),
            BuildEvent::RuleStarted {
                glob: rule.glob.clone(),
                sources: sources.len(),
            },
        );

        for source in &sources {
            let cache = match &mut cache {
                CacheMode::Use(c) => Some(&mut **c),
                CacheMode::Disabled => None,
            };
            let source_report = build_source(codec, source, &rule, cache, events.as_ref())?;
            send(
                events.as_ref(),
                BuildEvent::SourceFinished(source_report.clone()),
            );
            report.sources.push(source_report);
        }
    }

    Ok(report)
}

/// Check every planned sink reads back as the variant it was planned as.
fn check_names(source: &SourceImage, planned: &[PlannedVariant]) -> Result<(), SourceError> {
    for variant in planned {
        let file_name = variant
            .sink
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let invalid = |reason: String| SourceError::InvalidVariantName {
            source_path: source.path.clone(),
            sink: variant.sink.clone(),
            reason,
        };
        match VariantName::parse(&file_name) {
            Ok((base, name)) if base == source.base_name && name == variant.name => {}
            Ok((base, name)) => {
                return Err(invalid(format!(
                    "reads back as {} of {base:?}; rename the source",
                    name.kind()
                )));
            }
            Err(VariantNameError::InvalidVariantName { reason, .. }) => return Err(invalid(reason)),
        }
    }
    Ok(())
}

/// Build one source. Only cache write failures escape as errors.
fn build_source<C: ImageCodec>(
    codec: &C,
    source: &SourceImage,
    config: &EffectiveConfig,
    cache: Option<&mut ChangeCache>,
    events: Option<&Sender<BuildEvent>>,
) -> Result<SourceReport, CacheError> {
    let report = SourceReport::new(source);
    let planned = plan::plan(source, config);
    let total = planned.len();

    let state = match &cache {
        Some(c) => match c.classify(&source.key, &source.path) {
            Ok(state) => Some(state),
            Err(e) => return Ok(report.fail(total, &e.into())),
        },
        None => None,
    };

    if let Err(e) = check_names(source, &planned) {
        log::error!("{e}");
        return Ok(report.fail(total, &e));
    }

    let resolved = match freshness::resolve(&source.path, planned) {
        Ok(r) => r,
        Err(e) => return Ok(report.fail(total, &e.into())),
    };

    let needed: Vec<OutputVariant> = match state {
        Some(CacheState::Stale | CacheState::Missing) => resolved,
        Some(CacheState::Fresh) | None => resolved.into_iter().filter(|v| !v.fresh).collect(),
    };
    log::debug!(
        "{}: cache {}, {} of {} variant(s) need work",
        source.key,
        state.map_or("disabled".to_string(), |s| s.to_string()),
        needed.len(),
        total
    );

    send(
        events,
        BuildEvent::SourceStarted {
            source: source.key.clone(),
            needed: needed.len(),
        },
    );

    let mut report = SourceReport {
        skipped: total - needed.len(),
        ..report
    };

    if !needed.is_empty() {
        match regenerate(codec, source, config, &needed) {
            Ok(()) => report.regenerated = needed.len(),
            Err(failures) => {
                report.regenerated = needed.len() - failures.len();
                let failed = failures.len();
                return Ok(report.fail(failed, &failures[0]));
            }
        }
    }

    // Decoding may have moved the source's atime, so any rebuild re-records
    if let Some(cache) = cache
        && (state != Some(CacheState::Fresh) || !needed.is_empty())
    {
        match cache.record(&source.key, &source.path) {
            Ok(()) => cache.save()?,
            Err(e) => return Ok(report.fail(1, &e.into())),
        }
    }

    Ok(report)
}

/// Decode `source` once and write every needed variant. Returns every
/// failure, in work list order. Sinks of failed variants are removed.
fn regenerate<C: ImageCodec>(
    codec: &C,
    source: &SourceImage,
    config: &EffectiveConfig,
    needed: &[OutputVariant],
) -> Result<(), Vec<SourceError>> {
    let failed = |variant: &OutputVariant, cause: String| SourceError::RegenerationFailed {
        source_path: source.path.clone(),
        sink: variant.sink.clone(),
        cause,
    };

    for variant in needed {
        if let Some(dir) = variant.sink.parent()
            && let Err(e) = std::fs::create_dir_all(dir)
        {
            return Err(needed.iter().map(|v| failed(v, e.to_string())).collect());
        }
    }

    let decoded = match codec.open(&source.path) {
        Ok(d) => d,
        Err(e) => {
            log::warn!("{}: {e}", source.key);
            return Err(needed.iter().map(|v| failed(v, e.to_string())).collect());
        }
    };

    let failures: Vec<SourceError> = needed
        .par_iter()
        .filter_map(|variant| {
            encode(codec, &decoded, config, variant).err().map(|e| {
                discard(&variant.sink);
                failed(variant, e.to_string())
            })
        })
        .collect();

    for f in &failures {
        log::warn!("{f}");
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

/// Remove whatever a failed encode left at `sink`, so a truncated file is
/// never taken for a fresh one.
fn discard(sink: &Path) {
    match std::fs::remove_file(sink) {
        Ok(()) => log::debug!("removed partial output {}", sink.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("cannot remove partial output {}: {e}", sink.display()),
    }
}

/// Dispatch one variant to the codec by kind.
fn encode<C: ImageCodec>(
    codec: &C,
    decoded: &C::Source,
    config: &EffectiveConfig,
    variant: &OutputVariant,
) -> Result<(), CodecError> {
    let output = variant.sink.clone();
    match variant.name {
        VariantName::Blurred => codec.encode_blurred(
            decoded,
            &BlurParams {
                output,
                width: config.blur_size,
                sigma: config.blur_amount,
                options: config.codec_options(Format::Jpg),
            },
        ),
        VariantName::Fallback => codec.encode_fallback(
            decoded,
            &FallbackParams {
                output,
                options: config.codec_options(Format::Jpg),
            },
        ),
        VariantName::Original { format } => codec.encode_original(
            decoded,
            &OriginalParams {
                output,
                format,
                options: config.codec_options(format),
            },
        ),
        VariantName::Resized { format, size } | VariantName::P3 { format, size } => {
            let profile = if matches!(variant.name, VariantName::P3 { .. }) {
                ColorProfile::DisplayP3
            } else {
                ColorProfile::Srgb
            };
            codec.encode_resized(
                decoded,
                &ResizeParams {
                    output,
                    format,
                    width: size,
                    profile,
                    options: config.codec_options(format),
                },
            )
        }
    }
}

// ============================================================================
// Inspection (report-only)
// ============================================================================

/// Status of one source without building anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSurvey {
    pub source: String,
    /// `None` when the cache is not consulted.
    pub cache_state: Option<CacheState>,
    pub planned: usize,
    pub existing: usize,
    pub fresh: usize,
}

impl SourceSurvey {
    pub fn stale(&self) -> usize {
        self.existing - self.fresh
    }

    pub fn missing(&self) -> usize {
        self.planned - self.existing
    }
}

/// Status of one rule and its sources.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSurvey {
    pub glob: String,
    pub formats: Vec<Format>,
    pub sizes: Vec<u32>,
    pub use_p3: bool,
    pub output_directory: PathBuf,
    pub sources: Vec<SourceSurvey>,
}

/// Survey every rule without touching any file. Sources whose path does not
/// contain one of `filters` are left out (no filters keeps all).
pub fn inspect(
    config: &ConfigFile,
    root: &Path,
    cache: Option<&ChangeCache>,
    filters: &[String],
) -> Result<Vec<RuleSurvey>, PipelineError> {
    let mut surveys = Vec::new();

    for rule in rooted_rules(config, root) {
        let mut sources = Vec::new();
        for source in sources::discover(root, &rule)? {
            if !filters.is_empty() && !filters.iter().any(|f| source.key.contains(f.as_str())) {
                continue;
            }
            match survey_source(&source, &rule, cache) {
                Ok(s) => sources.push(s),
                Err(e) => log::warn!("{}: {e}", source.key),
            }
        }
        surveys.push(RuleSurvey {
            glob: rule.glob.clone(),
            formats: rule.formats.clone(),
            sizes: rule.sizes.clone(),
            use_p3: rule.use_p3,
            output_directory: rule.output_directory.clone(),
            sources,
        });
    }

    Ok(surveys)
}

fn survey_source(
    source: &SourceImage,
    config: &EffectiveConfig,
    cache: Option<&ChangeCache>,
) -> Result<SourceSurvey, SourceError> {
    let cache_state = cache
        .map(|c| c.classify(&source.key, &source.path))
        .transpose()?;
    let resolved = freshness::resolve(&source.path, plan::plan(source, config))?;
    Ok(SourceSurvey {
        source: source.key.clone(),
        cache_state,
        planned: resolved.len(),
        existing: resolved.iter().filter(|v| v.exists).count(),
        fresh: resolved.iter().filter(|v| v.fresh).count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::CACHE_FILE;
    use crate::config::{Defaults, ProcessingConfig, SourceRule};
    use crate::imaging::backend::tests::{MockCodec, RecordedOp};
    use filetime::{FileTime, set_file_atime, set_file_mtime};
    use std::fs;
    use tempfile::TempDir;

    /// Write a source file with an mtime well in the past so freshly
    /// written sinks are strictly newer.
    fn write_source(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"source pixels").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
        path
    }

    fn small_config(globs: &[&str]) -> ConfigFile {
        ConfigFile {
            defaults: Defaults {
                formats: vec![Format::Jpg, Format::Webp],
                sizes: vec![512, 1024],
                ..Defaults::default()
            },
            sources: globs.iter().map(|g| SourceRule::new(*g)).collect(),
            processing: ProcessingConfig::default(),
        }
    }

    fn run_with_cache(
        config: &ConfigFile,
        root: &Path,
        codec: &MockCodec,
        cache: &mut ChangeCache,
    ) -> BuildReport {
        run(config, root, codec, CacheMode::Use(cache), None).unwrap()
    }

    fn encodes(codec: &MockCodec) -> usize {
        codec.encoded_outputs().len()
    }

    // =========================================================================
    // Planning + dispatch
    // =========================================================================

    #[test]
    fn first_run_generates_every_variant() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "photos/photo.png");
        let config = small_config(&["photos/*.png"]);
        let codec = MockCodec::new();
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));

        let report = run_with_cache(&config, tmp.path(), &codec, &mut cache);

        assert_eq!(report.regenerated(), 8);
        assert_eq!(report.skipped(), 0);
        assert!(!report.has_failures());

        let out = tmp.path().join("optimized");
        let expected: Vec<String> = [
            "photo-1024.jpg",
            "photo-1024.webp",
            "photo-512.jpg",
            "photo-512.webp",
            "photo-blurred.jpg",
            "photo-original-size.jpg",
            "photo-original-size.webp",
            "photo.jpg",
        ]
        .iter()
        .map(|f| out.join(f).to_string_lossy().to_string())
        .collect();
        assert_eq!(codec.encoded_outputs(), expected);
    }

    #[test]
    fn source_decoded_once_per_run() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "photos/photo.png");
        let codec = MockCodec::new();
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));

        run_with_cache(&small_config(&["photos/*.png"]), tmp.path(), &codec, &mut cache);

        let opens = codec
            .get_operations()
            .iter()
            .filter(|op| matches!(op, RecordedOp::Open(_)))
            .count();
        assert_eq!(opens, 1);
    }

    #[test]
    fn dispatch_carries_kind_parameters() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "a.png");
        let mut config = small_config(&["*.png"]);
        config.defaults.formats = vec![Format::Avif];
        config.defaults.sizes = vec![300];
        config.defaults.use_p3 = true;
        config.defaults.blur_size = 64;
        let codec = MockCodec::new();

        run(&config, tmp.path(), &codec, CacheMode::Disabled, None).unwrap();

        let ops = codec.get_operations();
        assert!(ops.iter().any(|op| matches!(op, RecordedOp::Blurred { width: 64, .. })));
        assert!(ops.iter().any(|op| matches!(op, RecordedOp::Fallback { .. })));
        assert!(ops.iter().any(
            |op| matches!(op, RecordedOp::Original { format: Format::Avif, .. })
        ));
        assert!(ops.iter().any(|op| matches!(
            op,
            RecordedOp::Resized { format: Format::Avif, width: 300, p3: false, .. }
        )));
        assert!(ops.iter().any(|op| matches!(
            op,
            RecordedOp::Resized { format: Format::Avif, width: 300, p3: true, .. }
        )));
    }

    #[test]
    fn outputs_mirror_source_tree() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "design-assets/team/alice.jpg");
        let mut config = small_config(&["design-assets/**/*.jpg"]);
        config.defaults.formats = vec![];
        let codec = MockCodec::new();

        run(&config, tmp.path(), &codec, CacheMode::Disabled, None).unwrap();

        assert!(tmp.path().join("optimized/team/alice-blurred.jpg").exists());
        assert!(tmp.path().join("optimized/team/alice.jpg").exists());
    }

    // =========================================================================
    // Incremental behavior
    // =========================================================================

    #[test]
    fn second_run_regenerates_nothing() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "photos/photo.png");
        let config = small_config(&["photos/*.png"]);
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));

        run_with_cache(&config, tmp.path(), &MockCodec::new(), &mut cache);

        let codec = MockCodec::new();
        let report = run_with_cache(&config, tmp.path(), &codec, &mut cache);
        assert_eq!(report.regenerated(), 0);
        assert_eq!(report.skipped(), 8);
        assert_eq!(encodes(&codec), 0);
    }

    #[test]
    fn second_run_with_reloaded_cache_regenerates_nothing() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "photos/photo.png");
        let config = small_config(&["photos/*.png"]);
        let cache_path = tmp.path().join(CACHE_FILE);

        let mut cache = ChangeCache::load(&cache_path).unwrap();
        run_with_cache(&config, tmp.path(), &MockCodec::new(), &mut cache);
        assert!(cache_path.exists());

        let mut reloaded = ChangeCache::load(&cache_path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let codec = MockCodec::new();
        let report = run_with_cache(&config, tmp.path(), &codec, &mut reloaded);
        assert_eq!(report.regenerated(), 0);
    }

    #[test]
    fn deleted_variant_is_regenerated_alone() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "photos/photo.png");
        let config = small_config(&["photos/*.png"]);
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));
        run_with_cache(&config, tmp.path(), &MockCodec::new(), &mut cache);

        let victim = tmp.path().join("optimized/photo-512.webp");
        fs::remove_file(&victim).unwrap();

        let codec = MockCodec::new();
        let report = run_with_cache(&config, tmp.path(), &codec, &mut cache);
        assert_eq!(report.regenerated(), 1);
        assert_eq!(report.skipped(), 7);
        assert_eq!(codec.encoded_outputs(), vec![victim.to_string_lossy().to_string()]);
    }

    #[test]
    fn changed_source_regenerates_everything() {
        let tmp = TempDir::new().unwrap();
        let src = write_source(tmp.path(), "photos/photo.png");
        let config = small_config(&["photos/*.png"]);
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));
        run_with_cache(&config, tmp.path(), &MockCodec::new(), &mut cache);

        // Different size, same old mtime: only the change cache notices
        fs::write(&src, b"a much longer replacement source image").unwrap();
        set_file_mtime(&src, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();

        let codec = MockCodec::new();
        let report = run_with_cache(&config, tmp.path(), &codec, &mut cache);
        assert_eq!(report.regenerated(), 8);
        assert_eq!(encodes(&codec), 8);
    }

    #[test]
    fn touched_source_mtime_regenerates_without_cache() {
        let tmp = TempDir::new().unwrap();
        let src = write_source(tmp.path(), "photos/photo.png");
        let config = small_config(&["photos/*.png"]);
        run(&config, tmp.path(), &MockCodec::new(), CacheMode::Disabled, None).unwrap();

        set_file_mtime(&src, FileTime::from_unix_time(4_000_000_000, 0)).unwrap();

        let codec = MockCodec::new();
        let report = run(&config, tmp.path(), &codec, CacheMode::Disabled, None).unwrap();
        assert_eq!(report.regenerated(), 8);
    }

    #[test]
    fn disabled_cache_writes_no_cache_file() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "a.png");
        run(
            &small_config(&["*.png"]),
            tmp.path(),
            &MockCodec::new(),
            CacheMode::Disabled,
            None,
        )
        .unwrap();
        assert!(!tmp.path().join(CACHE_FILE).exists());
    }

    #[test]
    fn up_to_date_but_unrecorded_source_is_recorded() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "a.png");
        let config = small_config(&["*.png"]);
        run(&config, tmp.path(), &MockCodec::new(), CacheMode::Disabled, None).unwrap();

        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));
        let codec = MockCodec::new();
        let report = run_with_cache(&config, tmp.path(), &codec, &mut cache);

        // Missing from cache: everything is rebuilt, then recorded
        assert_eq!(report.regenerated(), 8);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn partial_rebuild_rerecords_source() {
        let tmp = TempDir::new().unwrap();
        let src = write_source(tmp.path(), "photos/photo.png");
        let config = small_config(&["photos/*.png"]);
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));
        run_with_cache(&config, tmp.path(), &MockCodec::new(), &mut cache);

        // Old atime on record; decoding on the next rebuild moves it to now
        set_file_atime(&src, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
        cache.record("photos/photo.png", &src).unwrap();
        fs::remove_file(tmp.path().join("optimized/photo-512.jpg")).unwrap();

        let report = run_with_cache(&config, tmp.path(), &MockCodec::touching_source(), &mut cache);
        assert_eq!(report.regenerated(), 1);

        let codec = MockCodec::touching_source();
        let report = run_with_cache(&config, tmp.path(), &codec, &mut cache);
        assert_eq!(report.regenerated(), 0);
        assert_eq!(report.skipped(), 8);
        assert_eq!(encodes(&codec), 0);
    }

    // =========================================================================
    // Failure isolation
    // =========================================================================

    #[test]
    fn truncated_output_is_removed_and_rebuilt() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "photo.png");
        let config = small_config(&["*.png"]);
        let victim = tmp.path().join("optimized/photo-512.webp");

        let report = run(
            &config,
            tmp.path(),
            &MockCodec::truncating_on(&["photo-512.webp"]),
            CacheMode::Disabled,
            None,
        )
        .unwrap();
        assert_eq!(report.failed(), 1);
        assert!(!victim.exists());

        let codec = MockCodec::new();
        let report = run(&config, tmp.path(), &codec, CacheMode::Disabled, None).unwrap();
        assert_eq!(report.regenerated(), 1);
        assert_eq!(codec.encoded_outputs(), vec![victim.to_string_lossy().to_string()]);
    }

    #[test]
    fn unreadable_source_counts_every_planned_variant() {
        let tmp = TempDir::new().unwrap();
        let config = small_config(&["*.png"]);
        let rule = &rooted_rules(&config, tmp.path())[0];
        let gone = SourceImage::at_root(tmp.path().join("gone.png"));
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));

        let report = build_source(&MockCodec::new(), &gone, rule, Some(&mut cache), None).unwrap();

        assert!(report.is_failed());
        assert_eq!(report.failed, 8);
        assert!(report.error.as_deref().unwrap().contains("gone.png"));
    }

    #[test]
    fn failed_source_never_counts_zero_failures() {
        let error = SourceError::NotFound(PathBuf::from("a.png"));
        let report = SourceReport::default().fail(0, &error);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn codec_failure_fails_only_its_source() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "imgs/bad.png");
        write_source(tmp.path(), "imgs/good.png");
        let config = small_config(&["imgs/*.png"]);
        let codec = MockCodec::failing_on(&["bad-512.webp"]);
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));

        let report = run_with_cache(&config, tmp.path(), &codec, &mut cache);

        assert!(report.has_failures());
        let bad = &report.sources[0];
        assert_eq!(bad.source, "imgs/bad.png");
        assert_eq!(bad.failed, 1);
        assert_eq!(bad.regenerated, 7);
        let error = bad.error.as_deref().unwrap();
        assert!(error.contains("bad-512.webp"));
        assert!(error.contains("mock failure"));

        let good = &report.sources[1];
        assert_eq!(good.regenerated, 8);
        assert!(good.error.is_none());

        // Only the successful source is recorded
        assert!(cache.lookup("imgs/good.png").is_some());
        assert!(cache.lookup("imgs/bad.png").is_none());
    }

    #[test]
    fn failed_source_is_retried_next_run() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "bad.png");
        let config = small_config(&["*.png"]);
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));
        run_with_cache(&config, tmp.path(), &MockCodec::failing_on(&["bad.jpg"]), &mut cache);

        let codec = MockCodec::new();
        let report = run_with_cache(&config, tmp.path(), &codec, &mut cache);
        assert_eq!(report.regenerated(), 8);
        assert!(!report.has_failures());
    }

    #[test]
    fn decode_failure_fails_every_needed_variant() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "broken.png");
        write_source(tmp.path(), "fine.png");
        let codec = MockCodec::undecodable("broken");

        let report = run(
            &small_config(&["*.png"]),
            tmp.path(),
            &codec,
            CacheMode::Disabled,
            None,
        )
        .unwrap();

        assert_eq!(report.sources[0].failed, 8);
        assert_eq!(report.sources[0].regenerated, 0);
        assert_eq!(report.sources[1].regenerated, 8);
        assert_eq!(report.failed(), 8);
    }

    #[test]
    fn ambiguous_base_name_fails_before_dispatch() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "logo-2024.png");
        write_source(tmp.path(), "logo.png");
        let codec = MockCodec::new();

        let report = run(
            &small_config(&["*.png"]),
            tmp.path(),
            &codec,
            CacheMode::Disabled,
            None,
        )
        .unwrap();

        let bad = &report.sources[0];
        assert_eq!(bad.source, "logo-2024.png");
        assert!(bad.error.as_deref().unwrap().contains("logo-2024"));
        assert_eq!(bad.regenerated, 0);
        assert!(
            codec
                .get_operations()
                .iter()
                .all(|op| !matches!(op, RecordedOp::Open(p) if p.contains("logo-2024")))
        );
        assert_eq!(report.sources[1].regenerated, 8);
    }

    #[test]
    fn invalid_config_aborts_run() {
        let tmp = TempDir::new().unwrap();
        let mut config = small_config(&["*.png"]);
        config.defaults.sizes = vec![0];
        let result = run(&config, tmp.path(), &MockCodec::new(), CacheMode::Disabled, None);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    // =========================================================================
    // Events
    // =========================================================================

    #[test]
    fn events_cover_every_source() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "a.png");
        write_source(tmp.path(), "b.png");
        let (tx, rx) = std::sync::mpsc::channel();

        run(
            &small_config(&["*.png"]),
            tmp.path(),
            &MockCodec::new(),
            CacheMode::Disabled,
            Some(tx),
        )
        .unwrap();

        let events: Vec<BuildEvent> = rx.iter().collect();
        assert!(matches!(&events[0], BuildEvent::RuleStarted { sources: 2, .. }));
        let finished: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                BuildEvent::SourceFinished(r) => Some(r.source.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec!["a.png", "b.png"]);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    #[test]
    fn inspect_reports_without_writing() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "photos/photo.png");
        let config = small_config(&["photos/*.png"]);
        let cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));

        let surveys = inspect(&config, tmp.path(), Some(&cache), &[]).unwrap();
        assert_eq!(surveys.len(), 1);
        let s = &surveys[0].sources[0];
        assert_eq!(s.source, "photos/photo.png");
        assert_eq!(s.cache_state, Some(CacheState::Missing));
        assert_eq!((s.planned, s.existing, s.fresh), (8, 0, 0));
        assert!(!tmp.path().join("optimized").exists());
        assert!(!tmp.path().join(CACHE_FILE).exists());
    }

    #[test]
    fn inspect_after_build_is_all_fresh() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "photos/photo.png");
        let config = small_config(&["photos/*.png"]);
        let mut cache = ChangeCache::empty(tmp.path().join(CACHE_FILE));
        run_with_cache(&config, tmp.path(), &MockCodec::new(), &mut cache);

        let surveys = inspect(&config, tmp.path(), Some(&cache), &[]).unwrap();
        let s = &surveys[0].sources[0];
        assert_eq!(s.cache_state, Some(CacheState::Fresh));
        assert_eq!((s.planned, s.existing, s.fresh), (8, 8, 8));
        assert_eq!((s.stale(), s.missing()), (0, 0));
    }

    #[test]
    fn inspect_filters_by_substring() {
        let tmp = TempDir::new().unwrap();
        write_source(tmp.path(), "a/hero.png");
        write_source(tmp.path(), "a/icon.png");
        let surveys = inspect(
            &small_config(&["a/*.png"]),
            tmp.path(),
            None,
            &["hero".to_string()],
        )
        .unwrap();
        let keys: Vec<&str> = surveys[0].sources.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(keys, vec!["a/hero.png"]);
        assert_eq!(surveys[0].sources[0].cache_state, None);
    }
}
