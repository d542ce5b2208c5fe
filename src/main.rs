// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use subloom::app_config::{self, Config};
use subloom::batch::grouping::{batch_count, group_range, group_selected_batches, parse_selection};
use subloom::pipeline::response::extract_json_array;
use subloom::pipeline::segmentation::plan_fixed_chunks;
use subloom::timestamp_utils::{TimestampNormalizer, format_seconds};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print canonical HH:MM:SS,mmm forms of loose timestamps
    Normalize {
        /// Timestamps as written by a model
        #[arg(value_name = "TIMESTAMP", required = true)]
        timestamps: Vec<String>,

        /// Media duration in seconds, enables the unit-shift correction
        #[arg(long)]
        media_duration: Option<f64>,
    },

    /// Extract and pretty-print the JSON array from a raw model response
    Repair {
        /// File holding the raw response text
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the fixed chunk plan for a media duration
    Plan {
        /// Media duration in seconds
        #[arg(long)]
        duration: f64,

        /// Chunk duration in seconds (defaults to the config value)
        #[arg(long)]
        chunk: Option<f64>,
    },

    /// Print the request groups of a batch edit
    Batches {
        /// Number of subtitles in the list
        #[arg(long)]
        total: usize,

        /// Selected batch indices, e.g. "0,1,5" or "0-2,5"
        #[arg(long)]
        select: String,

        /// Subtitles per batch (defaults to the config value)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Destination path
        #[arg(value_name = "PATH", default_value = "subloom.json")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Generate shell completions for subloom
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// subloom - bilingual subtitle pipeline toolkit
///
/// Diagnostic front-end over the deterministic layers of the pipeline:
/// timestamp repair, JSON recovery, chunk planning and batch grouping.
#[derive(Parser, Debug)]
#[command(name = "subloom")]
#[command(version)]
#[command(about = "Bilingual subtitle pipeline toolkit")]
#[command(long_about = "subloom repairs model output and plans pipeline work for bilingual subtitle generation.

EXAMPLES:
    subloom normalize 1:02:03.5 00:01:75,000       # Canonical timestamps
    subloom normalize 01:30:15,000 --media-duration 120
    subloom repair response.txt                     # Recover the JSON array from a model reply
    subloom plan --duration 720 --chunk 300         # Chunk plan for a 12 minute file
    subloom batches --total 120 --select 0-2,5      # Request groups for a batch edit
    subloom init-config                             # Write subloom.json with defaults
    subloom completions bash > subloom.bash         # Generate bash completions")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "subloom.json")]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,
}

// Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // ANSI colour and tag per level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("1;31", "ERROR"),
            Level::Warn => ("1;33", "WARN "),
            Level::Info => ("1;32", "INFO "),
            Level::Debug => ("1;36", "DEBUG"),
            Level::Trace => ("1;35", "TRACE"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (colour, tag) = Self::style_for_level(record.level());
            let _ = writeln!(std::io::stderr(), "\x1B[{}m{} {} {}\x1B[0m", colour, now, tag, record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Load the config file when present, defaults otherwise
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path)
    } else {
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // The logger accepts everything; the max level is the real filter
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();
    let config = load_config(&cli.config_path)?;
    let level: app_config::LogLevel = match cli.log_level.clone() {
        Some(level) => level.into(),
        None => config.log_level.clone(),
    };
    log::set_max_level(level.to_level_filter());

    match cli.command {
        Commands::Normalize { timestamps, media_duration } => {
            let normalizer = match media_duration {
                Some(duration) => TimestampNormalizer::with_media_duration(duration),
                None => TimestampNormalizer::new(),
            };
            for raw in timestamps {
                println!("{} -> {}", raw, normalizer.normalize(&raw));
            }
        }
        Commands::Repair { file } => {
            let text = fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let values = extract_json_array(&text)
                .ok_or_else(|| anyhow!("No complete JSON array found in {}", file.display()))?;
            info!("Recovered {} records from {}", values.len(), file.display());
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        Commands::Plan { duration, chunk } => {
            let chunk = chunk.unwrap_or(config.generation.chunk_duration_secs);
            if !(duration > 0.0 && chunk > 0.0) {
                return Err(anyhow!("Duration and chunk length must be positive"));
            }
            for planned in plan_fixed_chunks(duration, chunk) {
                println!(
                    "chunk {:>3}: {} -> {} ({:.1}s)",
                    planned.index,
                    format_seconds(planned.start),
                    format_seconds(planned.end),
                    planned.duration()
                );
            }
        }
        Commands::Batches { total, select, batch_size } => {
            let batch_size = batch_size.unwrap_or(config.batch.batch_size).max(1);
            let selected = parse_selection(&select)?;
            let total_batches = batch_count(total, batch_size);
            let groups = group_selected_batches(&selected, total_batches);
            if groups.is_empty() {
                warn!("No selected batch lies within {} batches", total_batches);
            }
            for group in groups {
                let range = group_range(&group, batch_size, total);
                println!("batches {:?}: lines {}..={}", group, range.start + 1, range.end);
            }
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                return Err(anyhow!("{} already exists (use --force to overwrite)", path.display()));
            }
            Config::default().save(&path)?;
            info!("Wrote default configuration to {}", path.display());
        }
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "subloom", &mut std::io::stdout());
        }
    }

    Ok(())
}
