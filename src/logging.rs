//! Diagnostic logging via the `log` facade and `env_logger`.
//!
//! Normal command output (reports, progress) goes to stdout through
//! [`output`](crate::output). Logging carries diagnostics on stderr:
//! skipped files, per-variant failures, cache activity.
//!
//! Level, in priority order:
//!
//! 1. `RUST_LOG`, if set
//! 2. `-q` → errors only
//! 3. `-v` → info, `-vv` → debug, `-vvv` → trace
//! 4. default → warnings

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Initialize the global logger. Call once, before any logging.
pub fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = Builder::new();
    if std::env::var_os("RUST_LOG").is_some() {
        builder.parse_default_env();
    } else {
        builder.filter_level(determine_level(verbose, quiet));
    }

    builder.format(move |buf, record| {
        let style = buf.default_level_style(record.level());
        if verbose >= 2 {
            writeln!(
                buf,
                "{style}{:<5}{style:#} [{}] {}",
                record.level(),
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        } else {
            writeln!(buf, "{style}{:<5}{style:#} {}", record.level(), record.args())
        }
    });

    // A logger may already be installed (e.g. by a test harness)
    let _ = builder.try_init();
}

fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
