//! Labwatch CLI - Command-line interface for the Labwatch engine
//!
//! Commands:
//! - alerts: Derive alerts from a lab-result snapshot
//! - trend: Trend and pattern report for one biomarker
//! - validate: Validate a lab-result snapshot

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use labwatch::config::EngineConfig;
use labwatch::pipeline::load_lookup;
use labwatch::snapshot::SnapshotAdapter;
use labwatch::store::AlertStore;
use labwatch::types::{BiomarkerId, LabResult};
use labwatch::{AnalysisError, LABWATCH_VERSION};

/// Labwatch - Biomarker trend and alert engine for personal lab results
#[derive(Parser)]
#[command(name = "labwatch")]
#[command(version = LABWATCH_VERSION)]
#[command(about = "Derive biomarker trends and alerts from lab results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive alerts from a lab-result snapshot
    Alerts {
        /// Snapshot file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Biomarker dictionary (JSON array of entries)
        #[arg(long)]
        dictionary: Option<PathBuf>,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Alert ids to dismiss
        #[arg(long)]
        dismiss: Vec<String>,

        /// Alert ids to acknowledge
        #[arg(long)]
        acknowledge: Vec<String>,

        /// Only alerts in this category
        #[arg(long)]
        category: Option<String>,

        /// Only alerts for this biomarker
        #[arg(long)]
        biomarker: Option<BiomarkerId>,

        /// Emit grouped alerts instead of the flat list
        #[arg(long)]
        grouped: bool,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Trend and pattern report for one biomarker
    Trend {
        /// Snapshot file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Biomarker id
        #[arg(short, long)]
        biomarker: BiomarkerId,

        /// Biomarker dictionary (JSON array of entries)
        #[arg(long)]
        dictionary: Option<PathBuf>,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a lab-result snapshot
    Validate {
        /// Snapshot file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let envelope = serde_json::to_string(&CliError::from(e))
                .unwrap_or_else(|_| "Unknown error".to_string());
            eprintln!("{}", envelope);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LABWATCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), LabwatchCliError> {
    match cli.command {
        Commands::Alerts {
            input,
            output,
            dictionary,
            config,
            dismiss,
            acknowledge,
            category,
            biomarker,
            grouped,
            output_format,
        } => {
            let filters = AlertFilters {
                category,
                biomarker,
                grouped,
            };
            cmd_alerts(
                &input,
                &output,
                dictionary.as_deref(),
                config.as_deref(),
                &dismiss,
                &acknowledge,
                &filters,
                &output_format,
            )
        }

        Commands::Trend {
            input,
            biomarker,
            dictionary,
            config,
            pretty,
        } => cmd_trend(&input, biomarker, dictionary.as_deref(), config.as_deref(), pretty),

        Commands::Validate { input, json } => cmd_validate(&input, json),
    }
}

struct AlertFilters {
    category: Option<String>,
    biomarker: Option<BiomarkerId>,
    grouped: bool,
}

#[allow(clippy::too_many_arguments)]
fn cmd_alerts(
    input: &Path,
    output: &Path,
    dictionary: Option<&Path>,
    config: Option<&Path>,
    dismiss: &[String],
    acknowledge: &[String],
    filters: &AlertFilters,
    output_format: &OutputFormat,
) -> Result<(), LabwatchCliError> {
    let lab_results = read_snapshot(input)?;
    let mut store = build_store(dictionary, config)?;
    store.load_snapshot(lab_results);

    for id in dismiss {
        store.dismiss_alert(id);
    }
    for id in acknowledge {
        store.acknowledge_alert(id);
    }

    let alerts: Vec<_> = store
        .filter_by_category(filters.category.as_deref())
        .into_iter()
        .filter(|a| filters.biomarker.map_or(true, |id| a.biomarker_id == id))
        .cloned()
        .collect();

    let output_data = if filters.grouped {
        format_output(&labwatch::alerts::group_alerts(&alerts), output_format)?
    } else {
        format_output(&alerts, output_format)?
    };

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_trend(
    input: &Path,
    biomarker: BiomarkerId,
    dictionary: Option<&Path>,
    config: Option<&Path>,
    pretty: bool,
) -> Result<(), LabwatchCliError> {
    let lab_results = read_snapshot(input)?;
    let mut store = build_store(dictionary, config)?;
    store.load_snapshot(lab_results);

    let report = store.trend_report(biomarker)?;
    if pretty {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), LabwatchCliError> {
    let lab_results = read_snapshot(input)?;
    let results = SnapshotAdapter::validate(&lab_results);

    let report = ValidationReport {
        total_lab_results: lab_results.len(),
        valid_lab_results: lab_results.len() - results.len(),
        invalid_lab_results: results.len(),
        errors: results
            .iter()
            .flat_map(|r| {
                r.errors.iter().map(move |e| ValidationErrorDetail {
                    index: r.index,
                    lab_result_id: r.lab_result_id.clone(),
                    error: e.to_string(),
                })
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total lab results:   {}", report.total_lab_results);
        println!("Valid lab results:   {}", report.valid_lab_results);
        println!("Invalid lab results: {}", report.invalid_lab_results);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                let id = if err.lab_result_id.is_empty() {
                    "unknown"
                } else {
                    err.lab_result_id.as_str()
                };
                println!("  - Lab result {} (index {}): {}", id, err.index, err.error);
            }
        }
    }

    if report.invalid_lab_results > 0 {
        Err(LabwatchCliError::ValidationFailed(report.invalid_lab_results))
    } else {
        Ok(())
    }
}

// Helper functions

fn read_snapshot(input: &Path) -> Result<Vec<LabResult>, LabwatchCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(LabwatchCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    Ok(SnapshotAdapter::parse(&input_data)?)
}

fn build_store(
    dictionary: Option<&Path>,
    config: Option<&Path>,
) -> Result<AlertStore, LabwatchCliError> {
    let dictionary_json = dictionary.map(fs::read_to_string).transpose()?;
    let lookup = load_lookup(dictionary_json.as_deref())?;

    let config = match config {
        Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };

    Ok(AlertStore::with_config(lookup, config))
}

fn format_output<T: Serialize>(
    records: &[T],
    format: &OutputFormat,
) -> Result<String, LabwatchCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            if lines.is_empty() {
                Ok(String::new())
            } else {
                Ok(lines.join("\n") + "\n")
            }
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum LabwatchCliError {
    Io(io::Error),
    Analysis(AnalysisError),
    Json(serde_json::Error),
    NoInput,
    ValidationFailed(usize),
}

impl From<io::Error> for LabwatchCliError {
    fn from(e: io::Error) -> Self {
        LabwatchCliError::Io(e)
    }
}

impl From<AnalysisError> for LabwatchCliError {
    fn from(e: AnalysisError) -> Self {
        LabwatchCliError::Analysis(e)
    }
}

impl From<serde_json::Error> for LabwatchCliError {
    fn from(e: serde_json::Error) -> Self {
        LabwatchCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<LabwatchCliError> for CliError {
    fn from(e: LabwatchCliError) -> Self {
        match e {
            LabwatchCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            LabwatchCliError::Analysis(e) => {
                let (code, hint) = match &e {
                    AnalysisError::UnknownBiomarker(_) => (
                        "UNKNOWN_BIOMARKER",
                        "Use a biomarker id that has numeric results in the snapshot",
                    ),
                    AnalysisError::InvalidConfig(_) => {
                        ("INVALID_CONFIG", "Check threshold values in the config file")
                    }
                    AnalysisError::DateParseError(_) => {
                        ("PARSE_ERROR", "Dates must be RFC 3339 or YYYY-MM-DD")
                    }
                    _ => ("PARSE_ERROR", "Ensure input is a JSON array or NDJSON of lab results"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            LabwatchCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            LabwatchCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a terminal, expected a piped snapshot".to_string(),
                hint: Some("Pipe a snapshot into stdin or pass --input <file>".to_string()),
            },
            LabwatchCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} lab results failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct ValidationReport {
    total_lab_results: usize,
    valid_lab_results: usize,
    invalid_lab_results: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    index: usize,
    lab_result_id: String,
    error: String,
}
