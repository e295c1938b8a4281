//! honeypot-analyzer: snowshoe and longtail threat analysis for honeypot
//! session telemetry.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Loaders   │────>│  Analyzers  │────>│   Export    │
//! │ (JSON/JSONL)│     │ (batch)     │     │ text / json │
//! └─────────────┘     └──────┬──────┘     └─────────────┘
//!                            │
//!                     ┌──────▼──────┐
//!                     │ SQLite store│
//!                     │ checkpoints │
//!                     └─────────────┘
//! ```
//!
//! Exit codes: 0 = ran, nothing detected; 2 = ran, detection found;
//! 1 = failed to run.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

use honeypot_analyzer::config::Config;
use honeypot_analyzer::export::{
    export_checkpoint, export_features, export_longtail, export_snowshoe, OutputFormat,
};
use honeypot_analyzer::features::aggregate_features;
use honeypot_analyzer::pipeline::{run_daily, DailyOutcome, DailyRun};
use honeypot_analyzer::session::{load_events, load_sessions};
use honeypot_analyzer::{
    LongtailAnalyzer, ProviderClassifier, RunStatus, SnowshoeDetector, SqliteStore, EXIT_FAILURE,
};

/// honeypot-analyzer: detect distributed and long-tail attack activity.
#[derive(Parser, Debug)]
#[command(name = "honeypot-analyzer")]
#[command(version)]
#[command(about = "Snowshoe and longtail threat analysis for honeypot sessions")]
#[command(long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format: text, json, jsonl (overrides the config file).
    #[arg(short, long, global = true)]
    output: Option<OutputFormat>,

    /// Enable verbose logging (writes to stderr).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect snowshoe campaigns in a session population.
    Snowshoe {
        /// Sessions file (JSON array or JSON lines).
        #[arg(short, long)]
        sessions: PathBuf,

        /// Analysis window in hours (recorded with the result).
        #[arg(short, long, default_value = "24")]
        window_hours: u32,

        /// Persist the verdict to this SQLite database.
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Find rare commands, anomalous sequences and outlier sessions.
    Longtail {
        /// Sessions file (JSON array or JSON lines).
        #[arg(short, long)]
        sessions: PathBuf,

        /// Events file (JSON array or JSON lines).
        #[arg(short, long)]
        events: PathBuf,

        /// Lookback recorded with the analysis.
        #[arg(short, long, default_value = "7")]
        lookback_days: u32,

        /// Day to analyze (YYYY-MM-DD, UTC); requires --store.
        #[arg(short, long, requires = "store")]
        date: Option<NaiveDate>,

        /// SQLite database for results and checkpoints; requires --date.
        #[arg(long, requires = "date")]
        store: Option<PathBuf>,

        /// Re-analyze even if the day's checkpoint is current.
        #[arg(long, requires = "store")]
        force: bool,
    },

    /// Print aggregated population features.
    Features {
        /// Sessions file (JSON array or JSON lines).
        #[arg(short, long)]
        sessions: PathBuf,
    },

    /// Show the checkpoint recorded for a day.
    Checkpoint {
        /// SQLite database (default: store.database_path from the config).
        #[arg(long)]
        store: Option<PathBuf>,

        /// Day (YYYY-MM-DD).
        #[arg(short, long)]
        date: NaiveDate,
    },

    /// Print a default configuration file.
    GenerateConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The config may turn on verbose logging, so read it before the subscriber
    // is installed and report any failure afterwards.
    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    };
    let verbose = cli.verbose || config.as_ref().map(|c| c.output.verbose).unwrap_or(false);
    if let Err(e) = init_tracing(verbose) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    let result = config.and_then(|config| {
        config.validate().context("Invalid configuration")?;
        run(cli, config)
    });

    match result {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn run(cli: Cli, config: Config) -> Result<RunStatus> {
    let format = cli.output.unwrap_or(config.output.format);

    match cli.command {
        Commands::Snowshoe {
            sessions,
            window_hours,
            store,
        } => run_snowshoe(&config, &sessions, window_hours, store.as_deref(), format),

        Commands::Longtail {
            sessions,
            events,
            lookback_days,
            date,
            store,
            force,
        } => run_longtail(
            &config,
            &sessions,
            &events,
            lookback_days,
            store.as_deref(),
            date,
            force,
            format,
        ),

        Commands::Features { sessions } => {
            let sessions = load_sessions(&sessions)?;
            let classifier = ProviderClassifier::new(&config.classifier);
            let features = aggregate_features(&sessions, &classifier);
            println!("{}", export_features(&features, format));
            Ok(RunStatus::Clean)
        }

        Commands::Checkpoint { store, date } => {
            let path = store.unwrap_or_else(|| config.store.database_path.clone());
            let store = open_store(&path, &config)?;
            let checkpoint = store.get_checkpoint(date)?;
            println!("{}", export_checkpoint(checkpoint.as_ref(), format));
            Ok(RunStatus::Clean)
        }

        Commands::GenerateConfig => {
            println!("{}", Config::generate_default());
            Ok(RunStatus::Clean)
        }
    }
}

fn run_snowshoe(
    config: &Config,
    sessions_path: &Path,
    window_hours: u32,
    store: Option<&Path>,
    format: OutputFormat,
) -> Result<RunStatus> {
    let sessions = load_sessions(sessions_path)?;
    info!("Loaded {} sessions from {}", sessions.len(), sessions_path.display());

    let detector = SnowshoeDetector::new(config.snowshoe.clone());
    let result = detector.detect(&sessions, window_hours);

    if let Some(reason) = &result.error {
        println!("{}", export_snowshoe(&result, format));
        anyhow::bail!("Snowshoe analysis failed: {}", reason);
    }

    if let Some(path) = store {
        let window_end = sessions
            .iter()
            .filter_map(|s| s.timestamp())
            .max()
            .unwrap_or_else(Utc::now);
        let window_start = window_end - Duration::hours(i64::from(window_hours));
        let store = open_store(path, config)?;
        let id = store.store_snowshoe_result(&result, window_start, window_end)?;
        debug!("Stored snowshoe result {}", id);
    }

    println!("{}", export_snowshoe(&result, format));
    Ok(RunStatus::from_snowshoe(&result)?)
}

#[allow(clippy::too_many_arguments)]
fn run_longtail(
    config: &Config,
    sessions_path: &Path,
    events_path: &Path,
    lookback_days: u32,
    store: Option<&Path>,
    date: Option<NaiveDate>,
    force: bool,
    format: OutputFormat,
) -> Result<RunStatus> {
    let sessions = load_sessions(sessions_path)?;
    let events = load_events(events_path)?;
    info!("Loaded {} sessions and {} events", sessions.len(), events.len());

    let analyzer = LongtailAnalyzer::new(config.longtail.clone());
    let mut vectorizer = analyzer.new_vectorizer();

    let Some(path) = store else {
        let result = analyzer.analyze(&sessions, &events, lookback_days, &mut vectorizer);
        println!("{}", export_longtail(&result, format));
        return Ok(RunStatus::from_detection(result.has_detections()));
    };

    let date = date.context("--store requires --date")?;
    let store = open_store(path, config)?;
    let run = DailyRun {
        date,
        lookback_days,
        force,
    };

    match run_daily(&store, &analyzer, &mut vectorizer, &sessions, &events, run)? {
        DailyOutcome::Skipped { checkpoint } => {
            println!("{}", export_checkpoint(Some(&checkpoint), format));
            Ok(RunStatus::Clean)
        }
        DailyOutcome::Analyzed {
            analysis_id,
            vectors_persisted,
            result,
        } => {
            info!(
                "Stored analysis {} (vectors persisted: {})",
                analysis_id, vectors_persisted
            );
            println!("{}", export_longtail(&result, format));
            Ok(RunStatus::from_detection(result.has_detections()))
        }
    }
}

fn open_store(path: &Path, config: &Config) -> Result<SqliteStore> {
    let store = SqliteStore::open(path)
        .with_context(|| format!("Failed to open result store: {}", path.display()))?;
    Ok(store.with_vector_persistence(config.store.persist_vectors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longtail_store_requires_date() {
        let base = [
            "honeypot-analyzer",
            "longtail",
            "--sessions",
            "s.json",
            "--events",
            "e.json",
            "--store",
            "db.sqlite",
        ];
        assert!(Cli::try_parse_from(base).is_err());

        let cli = Cli::try_parse_from(base.iter().chain(&["--date", "2024-06-01"])).unwrap();
        assert!(matches!(cli.command, Commands::Longtail { date: Some(_), .. }));
    }

    #[test]
    fn test_output_override_parses() {
        let cli = Cli::try_parse_from(["honeypot-analyzer", "-o", "jsonl", "generate-config"])
            .unwrap();
        assert_eq!(cli.output, Some(OutputFormat::JsonLines));
    }
}
