//! Engage CLI - Command-line interface for Synheart Engage
//!
//! Commands:
//! - replay: Replay a recorded signal stream into conversion events
//! - validate: Validate signal schema
//! - doctor: Diagnose configuration and environment
//! - schema: Print input/output schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use synheart_engage::dispatcher::EventLog;
use synheart_engage::schema::{Signal, SignalAdapter, SCHEMA_VERSION};
use synheart_engage::{replay_session, ConversionEvent, EngageConfig, EngageError};
use synheart_engage::{ENGAGE_VERSION, PRODUCER_NAME};

/// Engage - On-device engagement tracking for page views
#[derive(Parser)]
#[command(name = "engage")]
#[command(author = "Synheart AI Inc")]
#[command(version = ENGAGE_VERSION)]
#[command(about = "Turn page interaction signals into conversion events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded signal stream into conversion events
    Replay {
        /// Input file path (use - for stdin)
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

        /// Route of the page view
        #[arg(long, default_value = "/")]
        route: String,

        /// Tracker configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host of the page, overrides the configuration
        #[arg(long)]
        page_host: Option<String>,

        /// Write the bounded event log to a file
        #[arg(long)]
        save_log: Option<PathBuf>,
    },

    /// Validate signal schema
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

    /// Diagnose configuration and environment
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one signal per line)
    Ndjson,
    /// JSON array of signals
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (engage.signal.v1)
    Input,
    /// Output schema (conversion events)
    Output,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("synheart_engage=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), EngageCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            input_format,
            output_format,
            route,
            config,
            page_host,
            save_log,
        } => cmd_replay(
            &input,
            &output,
            input_format,
            output_format,
            &route,
            config.as_deref(),
            page_host,
            save_log.as_deref(),
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_replay(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    route: &str,
    config_path: Option<&Path>,
    page_host: Option<String>,
    save_log: Option<&Path>,
) -> Result<(), EngageCliError> {
    let mut config = match config_path {
        Some(path) => EngageConfig::from_json(&fs::read_to_string(path)?)?,
        None => EngageConfig::default(),
    };
    if page_host.is_some() {
        config.page_host = page_host;
    }
    let log_capacity = config.log_capacity;

    let input_data = read_input(input)?;
    let signals = parse_signals(&input_data, &input_format)?;
    if signals.is_empty() {
        return Err(EngageCliError::NoSignals);
    }
    let signal_count = signals.len();

    let events = replay_session(signals, route, config)?;
    info!(signals = signal_count, events = events.len(), route, "replay complete");

    let rendered = format_output(&events, &output_format)?;
    if output.to_string_lossy() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(rendered.as_bytes())?;
        handle.flush()?;
    } else {
        fs::write(output, rendered)?;
    }

    if let Some(path) = save_log {
        let mut log = EventLog::new(log_capacity);
        for event in events {
            log.push(event);
        }
        fs::write(path, log.to_json()?)?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), EngageCliError> {
    let input_data = read_input(input)?;
    let signals = parse_signals(&input_data, &input_format)?;
    let results = SignalAdapter::validate_signals(&signals);

    let report = ValidationReport {
        total_signals: signals.len(),
        valid_signals: signals.len() - results.len(),
        invalid_signals: results.len(),
        errors: results
            .iter()
            .map(|(index, error)| ValidationErrorDetail {
                index: *index,
                signal: signals[*index].kind.name().to_string(),
                error: error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total signals:   {}", report.total_signals);
        println!("Valid signals:   {}", report.valid_signals);
        println!("Invalid signals: {}", report.invalid_signals);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Signal {} (index {}): {}", err.signal, err.index, err.error);
            }
        }
    }

    if report.invalid_signals > 0 {
        Err(EngageCliError::ValidationFailed(report.invalid_signals))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), EngageCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck::new(
            "engage_version",
            CheckStatus::Ok,
            format!("Engage version {}", ENGAGE_VERSION),
        ),
        DoctorCheck::new(
            "schema_version",
            CheckStatus::Ok,
            format!("Input schema: {}", SCHEMA_VERSION),
        ),
    ];

    if let Some(path) = config {
        checks.push(check_config(path));
    }

    let stdin_message = if atty::is(atty::Stream::Stdin) {
        "stdin is a TTY (interactive mode)"
    } else {
        "stdin is a pipe (replay from stdin ready)"
    };
    checks.push(DoctorCheck::new("stdin", CheckStatus::Ok, stdin_message.to_string()));

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGAGE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Engage Doctor Report");
        println!("====================");
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

    if report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error))
    {
        Err(EngageCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// Report which configured fields would fall back to defaults
fn check_config(path: &Path) -> DoctorCheck {
    if !path.exists() {
        return DoctorCheck::new(
            "config",
            CheckStatus::Warning,
            "Configuration file does not exist".to_string(),
        );
    }
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return DoctorCheck::new(
                "config",
                CheckStatus::Error,
                format!("Cannot read configuration file: {}", e),
            )
        }
    };
    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            return DoctorCheck::new(
                "config",
                CheckStatus::Error,
                format!("Invalid configuration JSON: {}", e),
            )
        }
    };

    let loaded = EngageConfig::from_value(&value);
    let fallbacks = EngageConfig::fallbacks(&value);

    if fallbacks.is_empty() {
        DoctorCheck::new(
            "config",
            CheckStatus::Ok,
            format!(
                "Configuration valid ({} scroll depths, {} time thresholds)",
                loaded.scroll_depths.len(),
                loaded.time_thresholds.len()
            ),
        )
    } else {
        DoctorCheck::new(
            "config",
            CheckStatus::Warning,
            format!("Using defaults for: {}", fallbacks.join(", ")),
        )
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), EngageCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("One JSON object per signal, tagged by \"signal\":");
                println!();
                println!("- scroll          {{ percent, offset? }}");
                println!("- click           {{ target: {{ href?, download?, tag_name?, role?, text? }} }}");
                println!("- focus_in        {{ form_id }}");
                println!("- pointer_top_exit");
                println!("- pointer_reenter");
                println!("- before_unload");
                println!("- route_change    {{ route }}");
                println!("- offer_dismissed");
                println!("- tick            (advances the clock only)");
                println!();
                println!("Every signal carries an RFC 3339 \"timestamp\".");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: conversion events");
                println!();
                println!("- event_type: page_view, scroll_depth, time_on_page, file_download,");
                println!("  contact_click, external_link_click, button_click, form_start,");
                println!("  form_submit, exit_intent_shown, exit_intent_dismissed,");
                println!("  exit_intent_converted, page_exit");
                println!("- label: threshold, filename, contact kind, URL or button text");
                println!("- value: optional numeric value");
                println!("- timestamp, session_id, route");
                println!("- payload: event-specific details");
            }
        }
    }

    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, EngageCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_signals(data: &str, format: &InputFormat) -> Result<Vec<Signal>, EngageCliError> {
    Ok(match format {
        InputFormat::Ndjson => SignalAdapter::parse_ndjson(data)?,
        InputFormat::Json => SignalAdapter::parse_array(data)?,
    })
}

fn format_output(events: &[ConversionEvent], format: &OutputFormat) -> Result<String, EngageCliError> {
    Ok(match format {
        OutputFormat::Ndjson => {
            let mut lines = String::new();
            for event in events {
                lines.push_str(&serde_json::to_string(event)?);
                lines.push('\n');
            }
            lines
        }
        OutputFormat::Json => serde_json::to_string(events)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(events)?,
    })
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$id": SCHEMA_VERSION,
        "type": "object",
        "required": ["timestamp", "signal"],
        "properties": {
            "schema_version": { "type": "string", "const": SCHEMA_VERSION },
            "timestamp": { "type": "string", "format": "date-time" },
            "signal": {
                "type": "string",
                "enum": [
                    "scroll", "click", "focus_in", "pointer_top_exit", "pointer_reenter",
                    "before_unload", "route_change", "offer_dismissed", "tick"
                ]
            },
            "percent": { "type": "number" },
            "offset": { "type": "number" },
            "target": {
                "type": "object",
                "properties": {
                    "href": { "type": "string" },
                    "download": { "type": "string" },
                    "tag_name": { "type": "string" },
                    "role": { "type": "string" },
                    "text": { "type": "string" }
                }
            },
            "form_id": { "type": "string", "minLength": 1 },
            "route": { "type": "string", "minLength": 1 }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["event_type", "label", "timestamp", "session_id", "route"],
        "properties": {
            "event_type": { "type": "string" },
            "label": { "type": "string" },
            "value": { "type": "number" },
            "timestamp": { "type": "string", "format": "date-time" },
            "session_id": { "type": "string" },
            "route": { "type": "string" },
            "payload": { "type": "object" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum EngageCliError {
    Io(io::Error),
    Engage(EngageError),
    Json(serde_json::Error),
    NoSignals,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for EngageCliError {
    fn from(e: io::Error) -> Self {
        EngageCliError::Io(e)
    }
}

impl From<EngageError> for EngageCliError {
    fn from(e: EngageError) -> Self {
        match e {
            EngageError::NoSignals => EngageCliError::NoSignals,
            other => EngageCliError::Engage(other),
        }
    }
}

impl From<serde_json::Error> for EngageCliError {
    fn from(e: serde_json::Error) -> Self {
        EngageCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: &str) -> Self {
        Self {
            code: code.to_string(),
            message,
            hint: Some(hint.to_string()),
        }
    }
}

impl From<EngageCliError> for CliError {
    fn from(e: EngageCliError) -> Self {
        match e {
            EngageCliError::Io(e) => {
                CliError::new("IO_ERROR", e.to_string(), "Check file paths and permissions")
            }
            EngageCliError::Engage(EngageError::InvalidSignal(msg)) => CliError::new(
                "VALIDATION_ERROR",
                msg,
                "Run 'engage validate' for details",
            ),
            EngageCliError::Engage(e) => CliError::new(
                "PARSE_ERROR",
                e.to_string(),
                "Ensure input matches engage.signal.v1 schema",
            ),
            EngageCliError::Json(e) => CliError::new("JSON_ERROR", e.to_string(), "Check JSON syntax"),
            EngageCliError::NoSignals => CliError::new(
                "NO_SIGNALS",
                "No signals found in input".to_string(),
                "Ensure input file is not empty",
            ),
            EngageCliError::ValidationFailed(count) => CliError::new(
                "VALIDATION_FAILED",
                format!("{} signals failed validation", count),
                "Fix validation errors and retry",
            ),
            EngageCliError::DoctorFailed => CliError::new(
                "DOCTOR_FAILED",
                "One or more health checks failed".to_string(),
                "Review the doctor report for details",
            ),
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_signals: usize,
    valid_signals: usize,
    invalid_signals: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    signal: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
