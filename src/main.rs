use clap::{Parser, Subcommand};
use image_opt::change::{CACHE_FILE, ChangeCache};
use image_opt::config::{self, CONFIG_FILE, ConfigError};
use image_opt::imaging::RustCodec;
use image_opt::pipeline::{self, CacheMode};
use image_opt::{logging, output};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn version_string() -> &'static str {
    let on_tag = env!("IMAGE_OPT_ON_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("IMAGE_OPT_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "image-opt")]
#[command(about = "Incremental builder for responsive image variants")]
#[command(long_about = "\
Incremental builder for responsive image variants

Every source image matched by a rule in .img-config.json becomes a set of
optimized files in the rule's output directory:

  photo.png ─┬─ photo-blurred.jpg           blurred placeholder
             ├─ photo.jpg                   JPEG fallback
             ├─ photo-original-size.webp    one per format
             ├─ photo-512.webp              one per format and size
             └─ photo-512-p3.webp           with useP3 enabled

Only variants that are missing or older than their source are rebuilt. A
source whose size or access stamp changed since the last run (tracked in
.img-cache.json) has every variant rebuilt.

Run 'image-opt gen-config --write' to create a starter configuration.")]
#[command(version = version_string())]
struct Cli {
    /// Project root; globs and output directories are relative to it
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Config file [default: <root>/.img-config.json]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Change cache file [default: <root>/.img-cache.json]
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// More diagnostics on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors on stderr
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report what each source produces and what is out of date
    Info {
        /// Only show sources whose path contains this text (repeatable)
        #[arg(long)]
        filter: Vec<String>,
    },
    /// Build every missing or out-of-date variant
    Optimize {
        /// Forget recorded source signatures and rebuild everything
        #[arg(long)]
        clear: bool,
        /// Ignore the change cache; compare modification times only
        #[arg(long)]
        no_cache: bool,
    },
    /// Print a stock configuration
    GenConfig {
        /// Emit commented TOML instead of JSON
        #[arg(long)]
        toml: bool,
        /// Save to the config path instead of printing (never overwrites)
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);

    let root = std::fs::canonicalize(&cli.root)?;
    let config_path = cli.config.clone().unwrap_or_else(|| root.join(CONFIG_FILE));
    let cache_path = cli.cache.clone().unwrap_or_else(|| root.join(CACHE_FILE));

    match cli.command {
        Command::Info { filter } => {
            let config = load_config(&config_path)?;
            let cache = match ChangeCache::load(&cache_path) {
                Ok(c) => Some(c),
                Err(e) => {
                    log::warn!("{e}");
                    None
                }
            };
            let surveys = pipeline::inspect(&config, &root, cache.as_ref(), &filter)?;
            output::print_info(&surveys);
        }
        Command::Optimize { clear, no_cache } => {
            let config = load_config(&config_path)?;
            init_thread_pool(&config.processing);

            let mut cache = if clear || no_cache {
                ChangeCache::empty(&cache_path)
            } else {
                ChangeCache::load(&cache_path)?
            };
            if clear && !no_cache {
                log::info!("clearing {}", cache_path.display());
                cache.save()?;
            }
            let mode = if no_cache {
                CacheMode::Disabled
            } else {
                CacheMode::Use(&mut cache)
            };

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_build_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let report = pipeline::run(&config, &root, &RustCodec::new(), mode, Some(tx));
            if printer.join().is_err() {
                log::error!("output thread panicked");
            }
            let report = report?;
            output::print_build_summary(&report);
            if report.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::GenConfig { toml, write } => {
            let content = if toml {
                config::stock_config_toml().to_string()
            } else {
                config::stock_config_json()?
            };
            if write {
                let target = if toml && cli.config.is_none() {
                    config_path.with_extension("toml")
                } else {
                    config_path
                };
                if target.exists() {
                    return Err(format!("{} already exists", target.display()).into());
                }
                std::fs::write(&target, content)?;
                println!("Wrote {}", target.display());
            } else {
                println!("{}", content.trim_end());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Load the config, pointing at `gen-config` when there is none.
fn load_config(path: &Path) -> Result<config::ConfigFile, ConfigError> {
    config::load_config(path).inspect_err(|e| {
        if matches!(e, ConfigError::NotFound(_)) {
            eprintln!("No configuration found. Run 'image-opt gen-config --write' to create one.");
        }
    })
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
