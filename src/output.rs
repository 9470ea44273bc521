//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Info
//!
//! ```text
//! Image Optimization: INFO
//! ------------------------
//! - 2 source rules configured
//! - together they identify 3 source images
//!
//! - design-assets/hero.png: [jpg, webp] x [512, 1024]
//!     - produces 8 optimized image variants
//!     - all optimized images exist and are fresh
//! - design-assets/team/alice.jpg: [jpg, webp] x [512, 1024], P3 included
//!     - produces 14 optimized image variants
//!     - 10 are fresh
//!     - 2 are stale and will be regenerated
//!     - 2 do not exist yet
//! ```
//!
//! ## Optimize
//!
//! ```text
//! design-assets/*.png (2 sources)
//!     hero.png: 8 regenerated
//!     logo.png: up to date (8 fresh)
//!
//! Regenerated 8, skipped 8, failed 0
//! ```
//!
//! Failures are listed after the summary with the source, sink and cause.
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure and do no I/O.

use crate::change::CacheState;
use crate::pipeline::{BuildEvent, BuildReport, RuleSurvey, SourceReport, SourceSurvey};

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

/// Last path segment of a `/`-separated source key.
fn file_part(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

// ============================================================================
// Info
// ============================================================================

/// Format the `info` report.
pub fn format_info(surveys: &[RuleSurvey]) -> Vec<String> {
    let total: usize = surveys.iter().map(|r| r.sources.len()).sum();
    let mut lines = vec![
        "Image Optimization: INFO".to_string(),
        "------------------------".to_string(),
        format!("- {} configured", plural(surveys.len(), "source rule", "source rules")),
        format!(
            "- together they identify {}",
            plural(total, "source image", "source images")
        ),
    ];

    for rule in surveys {
        let formats: Vec<String> = rule.formats.iter().map(|f| f.to_string()).collect();
        let sizes: Vec<String> = rule.sizes.iter().map(|s| s.to_string()).collect();
        let p3 = if rule.use_p3 { ", P3 included" } else { "" };
        for source in &rule.sources {
            lines.push(String::new());
            lines.push(format!(
                "- {}: [{}] x [{}]{p3}",
                source.source,
                formats.join(", "),
                sizes.join(", ")
            ));
            lines.extend(survey_lines(source));
        }
    }

    lines
}

fn survey_lines(s: &SourceSurvey) -> Vec<String> {
    let pad = indent(1);
    let mut lines = vec![format!(
        "{pad}- produces {}",
        plural(s.planned, "optimized image variant", "optimized image variants")
    )];

    if s.existing == 0 {
        lines.push(format!("{pad}- none of the optimized images exist yet"));
    } else if s.fresh == 0 {
        lines.push(format!("{pad}- {} exist but none are fresh", s.existing));
    } else if s.fresh == s.planned {
        lines.push(format!("{pad}- all optimized images exist and are fresh"));
    } else {
        lines.push(format!("{pad}- {} fresh", plural(s.fresh, "is", "are")));
        lines.push(format!(
            "{pad}- {} stale and will be regenerated",
            plural(s.stale(), "is", "are")
        ));
        lines.push(format!("{pad}- {} not exist yet", plural(s.missing(), "does", "do")));
    }

    match s.cache_state {
        Some(CacheState::Stale) => {
            lines.push(format!("{pad}- source changed since last run; all variants will be regenerated"))
        }
        Some(CacheState::Missing) if s.existing > 0 => {
            lines.push(format!("{pad}- source not yet recorded; all variants will be regenerated"))
        }
        _ => {}
    }

    lines
}

pub fn print_info(surveys: &[RuleSurvey]) {
    for line in format_info(surveys) {
        println!("{}", line);
    }
}

// ============================================================================
// Optimize
// ============================================================================

fn source_line(report: &SourceReport) -> String {
    let name = file_part(&report.source);
    if report.is_failed() {
        format!(
            "{name}: FAILED ({} failed, {} regenerated)",
            report.failed, report.regenerated
        )
    } else if report.regenerated == 0 {
        format!("{name}: up to date ({} fresh)", report.skipped)
    } else if report.skipped == 0 {
        format!("{name}: {} regenerated", report.regenerated)
    } else {
        format!(
            "{name}: {} regenerated, {} fresh",
            report.regenerated, report.skipped
        )
    }
}

/// Format a single progress event.
pub fn format_build_event(event: &BuildEvent) -> Vec<String> {
    match event {
        BuildEvent::RuleStarted { glob, sources } => {
            vec![format!("{glob} ({})", plural(*sources, "source", "sources"))]
        }
        BuildEvent::SourceStarted { .. } => Vec::new(),
        BuildEvent::SourceFinished(report) => {
            vec![format!("{}{}", indent(1), source_line(report))]
        }
    }
}

/// Format the end-of-run summary, followed by one block per failed source.
pub fn format_build_summary(report: &BuildReport) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        format!(
            "Regenerated {}, skipped {}, failed {}",
            report.regenerated(),
            report.skipped(),
            report.failed()
        ),
    ];

    let failed: Vec<&SourceReport> = report.failed_sources().collect();
    if !failed.is_empty() {
        lines.push(String::new());
        lines.push(format!(
            "{} with errors:",
            plural(failed.len(), "source", "sources")
        ));
        for source in failed {
            lines.push(format!("{}{}", indent(1), source.source));
            if let Some(error) = &source.error {
                lines.push(format!("{}{}", indent(2), error));
            }
        }
    }

    lines
}

pub fn print_build_summary(report: &BuildReport) {
    for line in format_build_summary(report) {
        println!("{}", line);
    }
}
