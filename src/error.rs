//! Error types for Labwatch

use thiserror::Error;

/// Errors that can occur during trend analysis and alert derivation
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Cannot compute statistics over an empty data set")]
    EmptyDataSet,

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse lab-result snapshot: {0}")]
    ParseError(String),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("No numeric values recorded for biomarker {0}")]
    UnknownBiomarker(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
