// src/main.rs

/*
 * Replays a host session from an event script. This stands in for the library
 * manager: it loads and validates the companion configuration, feeds every
 * recorded event to the adapter, ends the session and prints the diagnostics.
 */
use clap::Parser;
use companion_files::core::{
    CategoryTable, ConfigError, ConfigManagerOperations, CoreConfigManager, DispatchOutcome,
    EventAdapter, FlushReport, HostEvent,
};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const APP_NAME: &str = "CompanionFiles";

#[derive(Debug)]
enum ReplayError {
    Logging(String),
    Config(ConfigError),
    Events { path: PathBuf, reason: String },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Logging(msg) => write!(f, "Could not initialize logging: {msg}"),
            ReplayError::Config(e) => write!(f, "{e}"),
            ReplayError::Events { path, reason } => {
                write!(f, "Could not read event script {path:?}: {reason}")
            }
        }
    }
}

impl From<ConfigError> for ReplayError {
    fn from(err: ConfigError) -> Self {
        ReplayError::Config(err)
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "companion_files",
    version,
    about = "Replay a host session and relocate companion files"
)]
struct ReplayArgs {
    /// Event script: a JSON array of item_moved, item_copied and session_end events
    events: PathBuf,

    /// Companion configuration (defaults to the per-user companions.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write a full trace log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log debug messages to the terminal
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(log_file: Option<&Path>, verbose: bool) -> Result<(), ReplayError> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let config = ConfigBuilder::new()
        .set_time_offset(time::UtcOffset::UTC)
        .set_time_format_rfc3339()
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        let file = File::create(path).map_err(|e| ReplayError::Logging(e.to_string()))?;
        loggers.push(WriteLogger::new(LevelFilter::Trace, config, file));
    }
    CombinedLogger::init(loggers).map_err(|e| ReplayError::Logging(e.to_string()))
}

fn load_categories(config_path: Option<&Path>) -> Result<CategoryTable, ReplayError> {
    let manager = CoreConfigManager::new();
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => manager.default_config_path(APP_NAME)?,
    };
    log::debug!("Replay: Using configuration {path:?}.");
    Ok(manager.load_categories(&path)?)
}

fn load_events(path: &Path) -> Result<Vec<HostEvent>, ReplayError> {
    let to_error = |reason: String| ReplayError::Events {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| to_error(e.to_string()))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| to_error(e.to_string()))
}

fn replay(args: &ReplayArgs) -> Result<FlushReport, ReplayError> {
    let categories = load_categories(args.config.as_deref())?;
    let events = load_events(&args.events)?;
    log::info!(
        "Replay: {} categories, {} events from {:?}.",
        categories.len(),
        events.len(),
        args.events
    );

    let adapter = EventAdapter::with_defaults(Arc::new(categories));
    let mut report = FlushReport::default();
    for event in &events {
        match adapter.dispatch(event) {
            DispatchOutcome::Recorded => {}
            DispatchOutcome::Rejected(e) => log::warn!("Replay: Event rejected: {e}"),
            DispatchOutcome::Flushed(flushed) => merge(&mut report, flushed),
        }
    }
    // The script may omit the final session end; the host always sends one.
    merge(&mut report, adapter.on_session_end());
    Ok(report)
}

fn merge(total: &mut FlushReport, part: FlushReport) {
    total.directories_scanned += part.directories_scanned;
    total.relocated.extend(part.relocated);
    total.failures.extend(part.failures);
    total.conflicts.extend(part.conflicts);
    total.removed_directories.extend(part.removed_directories);
}

fn main() -> ExitCode {
    let args = ReplayArgs::parse();
    if let Err(e) = init_logging(args.log_file.as_deref(), args.verbose) {
        eprintln!("{e}");
        return ExitCode::from(2);
    }

    match replay(&args) {
        Ok(report) => {
            print!("{report}");
            if report.failures.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            log::error!("Replay: {e}");
            ExitCode::from(2)
        }
    }
}
