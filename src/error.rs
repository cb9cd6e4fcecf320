//! Error types for Synheart Engage

use thiserror::Error;

/// Errors surfaced to hosts that parse wire input or submit offers.
///
/// Tracking itself never fails: sink failures, missing signal channels,
/// malformed click targets and invalid configuration are absorbed inside the
/// tracker and only show up in logs.
#[derive(Debug, Error)]
pub enum EngageError {
    #[error("Failed to parse signal payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("No signals to replay")]
    NoSignals,

    #[error("Exit-intent offer is not active (state: {0})")]
    OfferNotActive(String),

    #[error("Offer submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// Errors a sink may report from `record`.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink rejected event: {0}")]
    Rejected(String),

    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink panicked: {0}")]
    Panicked(String),
}
