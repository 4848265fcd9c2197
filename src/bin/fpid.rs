use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use fpid::config::FingerprintConfig;
use fpid::error::AudioError;
use fpid::ingest::{default_worker_count, ingest_directory};
use fpid::matcher::identify;
use fpid::store::IndexStore;

#[derive(Parser, Debug)]
#[command(name = "fpid", about = "Landmark-based audio fingerprint indexer")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Raise log verbosity (-v for info, -vv for debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a TOML file overriding the default fingerprint parameters.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a directory tree of audio files into an index.
    Build {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short = 'j', long)]
        workers: Option<usize>,
    },
    /// Identify one sample against an existing index.
    Identify {
        #[arg(short, long)]
        database: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn load_config(path: &Option<PathBuf>) -> anyhow::Result<FingerprintConfig> {
    match path {
        Some(p) => {
            let s = std::fs::read_to_string(p)?;
            Ok(FingerprintConfig::from_toml_str(&s)?)
        }
        None => Ok(FingerprintConfig::default()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: invalid config: {e}");
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Command::Build {
            input,
            output,
            workers,
        } => run_build(&input, &output, &cfg, workers.unwrap_or_else(default_worker_count)),
        Command::Identify { database, input } => run_identify(&database, &input, &cfg),
    }
}

fn run_build(input: &PathBuf, output: &PathBuf, cfg: &FingerprintConfig, workers: usize) -> ExitCode {
    if !input.is_dir() {
        eprintln!("error: input directory not found: {}", input.display());
        return ExitCode::from(2);
    }

    match ingest_directory(input, output, cfg, workers) {
        Ok(stats) => {
            println!(
                "ingested {} track(s), {} skipped",
                stats.processed,
                stats.skipped
            );
            for e in &stats.errors {
                log::warn!("{e}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run_identify(database: &PathBuf, input: &PathBuf, cfg: &FingerprintConfig) -> ExitCode {
    if !input.is_file() {
        eprintln!("error: input file not found: {}", input.display());
        return ExitCode::from(2);
    }

    let store = match IndexStore::open_read_only(database) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = store.check_config(cfg) {
        eprintln!("error: {e}");
        return ExitCode::from(2);
    }

    match identify(input, &store, cfg) {
        Ok(Some(result)) if result.is_confident() => {
            println!("{}", result.track_id);
            log::info!(
                "label={} delta={} votes={} confidence_ratio={:?}",
                result.label,
                result.delta,
                result.votes,
                result.confidence_ratio
            );
            ExitCode::SUCCESS
        }
        Ok(Some(result)) => {
            log::info!(
                "rejected weak match: label={} delta={} votes={} confidence_ratio={:?}",
                result.label,
                result.delta,
                result.votes,
                result.confidence_ratio
            );
            eprintln!("no match");
            ExitCode::from(1)
        }
        Ok(None) => {
            eprintln!("no match");
            ExitCode::from(1)
        }
        // A too-short or non-finite query can't be fingerprinted at all, but
        // it isn't an input error like a missing file or a bad format either:
        // treat it the same as finding nothing in the index.
        Err(AudioError::ShortInput { .. }) | Err(AudioError::InvalidAudio) => {
            eprintln!("no match");
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}
