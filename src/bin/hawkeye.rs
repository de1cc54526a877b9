//! HawkEye CLI - Command-line interface for HawkEye
//!
//! Commands:
//! - detect: Run frustration detection over completed sessions (batch mode)
//! - replay: Feed raw events through the session window manager and detection worker
//! - validate: Check raw events for resolvable timestamps and report categories
//! - config: Print or check engine configuration
//! - doctor: Diagnose environment and configuration

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use hawkeye::detection::classifier::{categorize, resolve_timestamp};
use hawkeye::recorder::InMemoryRecorder;
use hawkeye::types::{Event, Incident, Session};
use hawkeye::{
    CollectingSink, DetectionWorker, FrustrationDetector, HawkeyeConfig, HawkeyeError,
    SessionWindowManager, HAWKEYE_VERSION, PRODUCER_NAME,
};

/// HawkEye - Frustration incident detection for UI interaction telemetry
#[derive(Parser)]
#[command(name = "hawkeye")]
#[command(version = HAWKEYE_VERSION)]
#[command(about = "Detect user frustration incidents in session telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect incidents in completed sessions (batch mode)
    Detect {
        /// Input file of sessions (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print pipeline counters to stderr
        #[arg(long)]
        summary: bool,
    },

    /// Replay raw events through session windowing and detection
    Replay {
        /// Input file of raw events (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Project the events belong to
        #[arg(long, default_value = "default")]
        project: String,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate raw events
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration, or check a configuration file
    Config {
        /// Configuration file to check
        #[arg(long)]
        check: Option<PathBuf>,
    },

    /// Diagnose environment and configuration
    Doctor {
        /// Configuration file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one incident per line)
    Ndjson,
    /// JSON array of incidents
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), HawkeyeCliError> {
    match cli.command {
        Commands::Detect {
            input,
            output,
            input_format,
            output_format,
            config,
            summary,
        } => cmd_detect(
            &input,
            &output,
            input_format,
            output_format,
            config.as_deref(),
            summary,
        ),

        Commands::Replay {
            input,
            output,
            project,
            input_format,
            output_format,
            config,
        } => cmd_replay(
            &input,
            &output,
            &project,
            input_format,
            output_format,
            config.as_deref(),
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Config { check } => cmd_config(check.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_detect(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
    summary: bool,
) -> Result<(), HawkeyeCliError> {
    let config = load_config(config)?;
    let sessions: Vec<Session> = parse_records(&read_input(input)?, &input_format)?;
    if sessions.is_empty() {
        return Err(HawkeyeCliError::NoInput("sessions"));
    }

    let recorder = Arc::new(InMemoryRecorder::new());
    let detector = FrustrationDetector::new(config.detection).with_recorder(recorder.clone());

    let incidents: Vec<Incident> = sessions
        .iter()
        .flat_map(|session| detector.detect(session))
        .collect();

    write_output(output, &format_output(&incidents, &output_format)?)?;

    if summary {
        for (series, value) in recorder.snapshot() {
            eprintln!("{series} {value}");
        }
    }
    Ok(())
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    project: &str,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
) -> Result<(), HawkeyeCliError> {
    let config = load_config(config)?;
    let events: Vec<Event> = parse_records(&read_input(input)?, &input_format)?;
    if events.is_empty() {
        return Err(HawkeyeCliError::NoInput("events"));
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let incidents = runtime.block_on(async {
        let manager = SessionWindowManager::new(config.session.clone());
        let receiver = manager
            .take_emission_channel()
            .ok_or_else(|| HawkeyeError::ChannelClosed("emission channel already taken".to_string()))?;

        let sink = Arc::new(CollectingSink::new());
        let worker = DetectionWorker::spawn(
            receiver,
            Arc::new(FrustrationDetector::new(config.detection.clone())),
            sink.clone(),
            None,
            CancellationToken::new(),
        );

        // Replay one batch per run of consecutive events sharing a session
        let mut batch: Vec<Event> = Vec::new();
        for event in events {
            if batch.last().map(|last| last.session_id != event.session_id).unwrap_or(false) {
                let session_id = batch[0].session_id.clone();
                manager.add_events(project, &session_id, std::mem::take(&mut batch));
            }
            batch.push(event);
        }
        if let Some(first) = batch.first() {
            let session_id = first.session_id.clone();
            manager.add_events(project, &session_id, batch);
        }

        for key in manager.live_keys() {
            manager.end_session(&key.project_id, &key.session_id).await?;
        }
        drop(manager);

        let stats = worker.join().await;
        log::info!(
            "replayed {} session(s), {} incident(s)",
            stats.sessions,
            stats.incidents
        );
        Ok::<_, HawkeyeError>(sink.incidents())
    })?;

    write_output(output, &format_output(&incidents, &output_format)?)
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), HawkeyeCliError> {
    let events: Vec<Event> = parse_records(&read_input(input)?, &input_format)?;

    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    let mut errors: Vec<ValidationErrorDetail> = Vec::new();
    for (index, event) in events.iter().enumerate() {
        if resolve_timestamp(&event.timestamp).is_none() {
            errors.push(ValidationErrorDetail {
                index,
                event_type: event.event_type.clone(),
                error: format!("unresolvable timestamp '{}'", event.timestamp),
            });
            continue;
        }
        let category = categorize(&event.event_type, &event.metadata);
        *categories.entry(category.as_str().to_string()).or_insert(0) += 1;
    }

    let report = ValidationReport {
        total_events: events.len(),
        valid_events: events.len() - errors.len(),
        invalid_events: errors.len(),
        categories,
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.categories.is_empty() {
            println!("\nCategories:");
            for (category, count) in &report.categories {
                println!("  {category}: {count}");
            }
        }

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - {} (index {}): {}", err.event_type, err.index, err.error);
            }
        }
    }

    if report.invalid_events > 0 {
        Err(HawkeyeCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_config(check: Option<&Path>) -> Result<(), HawkeyeCliError> {
    match check {
        Some(path) => {
            HawkeyeConfig::from_file(path)?;
            println!("{}: valid", path.display());
        }
        None => println!("{}", HawkeyeConfig::default().to_json()?),
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), HawkeyeCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "hawkeye_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("HawkEye version {}", HAWKEYE_VERSION),
    });

    if let Some(config_path) = config {
        if config_path.exists() {
            match HawkeyeConfig::from_file(config_path) {
                Ok(loaded) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Config valid (idle timeout {}ms, min confidence {:?})",
                        loaded.session.idle_timeout_ms, loaded.detection.min_confidence
                    ),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist; defaults will be used".to_string(),
            });
        }
    }

    let log_filter = std::env::var("RUST_LOG").ok();
    checks.push(DoctorCheck {
        name: "logging".to_string(),
        status: CheckStatus::Ok,
        message: match log_filter {
            Some(filter) => format!("RUST_LOG={filter}"),
            None => "RUST_LOG unset (warnings only)".to_string(),
        },
    });

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: HAWKEYE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("HawkEye Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(HawkeyeCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> Result<HawkeyeConfig, HawkeyeCliError> {
    match path {
        Some(path) => Ok(HawkeyeConfig::from_file(path)?),
        None => Ok(HawkeyeConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, HawkeyeCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_records<T: serde::de::DeserializeOwned>(
    data: &str,
    format: &InputFormat,
) -> Result<Vec<T>, HawkeyeCliError> {
    match format {
        InputFormat::Json => Ok(serde_json::from_str(data)?),
        InputFormat::Ndjson => data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str(line.trim()).map_err(|e| {
                    HawkeyeCliError::ParseError(format!("line {}: {}", number + 1, e))
                })
            })
            .collect(),
    }
}

fn format_output(incidents: &[Incident], format: &OutputFormat) -> Result<String, HawkeyeCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for incident in incidents {
                lines.push(serde_json::to_string(incident)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(incidents)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(incidents)?),
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), HawkeyeCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug)]
enum HawkeyeCliError {
    Io(io::Error),
    Engine(HawkeyeError),
    Json(serde_json::Error),
    NoInput(&'static str),
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for HawkeyeCliError {
    fn from(e: io::Error) -> Self {
        HawkeyeCliError::Io(e)
    }
}

impl From<HawkeyeError> for HawkeyeCliError {
    fn from(e: HawkeyeError) -> Self {
        HawkeyeCliError::Engine(e)
    }
}

impl From<serde_json::Error> for HawkeyeCliError {
    fn from(e: serde_json::Error) -> Self {
        HawkeyeCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HawkeyeCliError> for CliError {
    fn from(e: HawkeyeCliError) -> Self {
        match e {
            HawkeyeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HawkeyeCliError::Engine(HawkeyeError::InvalidConfig(message)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message,
                hint: Some("Run 'hawkeye config' to see the default configuration".to_string()),
            },
            HawkeyeCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            HawkeyeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            HawkeyeCliError::NoInput(kind) => CliError {
                code: "NO_INPUT".to_string(),
                message: format!("No {kind} found in input"),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            HawkeyeCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Timestamps must be RFC3339 or epoch milliseconds".to_string()),
            },
            HawkeyeCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report above".to_string()),
            },
            HawkeyeCliError::ParseError(message) => CliError {
                code: "PARSE_ERROR".to_string(),
                message,
                hint: Some("Each line must be one JSON record".to_string()),
            },
        }
    }
}

#[derive(Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    categories: BTreeMap<String, usize>,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    index: usize,
    event_type: String,
    error: String,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
