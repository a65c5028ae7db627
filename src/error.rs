// src/error.rs
//! Error types for the RTK surveyor

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SurveyorError>;

/// Top-level error for the library and the service binary
#[derive(Debug, Error)]
pub enum SurveyorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Command error: {0}")]
    Command(#[from] CommandError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Error: {0}")]
    Other(String),
}

/// Why a single NMEA line could not be decoded.
///
/// Every variant is recoverable: the line is dropped and the read loop keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("checksum mismatch: sentence says {found:?}, computed {computed:02X}")]
    ChecksumMismatch { found: String, computed: u8 },
    #[error("malformed field count for {sentence}: got {found} fields, expected {expected}")]
    MalformedFieldCount {
        sentence: String,
        expected: String,
        found: usize,
    },
    #[error("unknown talker: {0:?}")]
    UnknownTalker(String),
    #[error("empty line")]
    EmptyLine,
}

impl DecodeError {
    /// Short machine-readable name, as reported in statistics
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::ChecksumMismatch { .. } => "checksum_mismatch",
            DecodeError::MalformedFieldCount { .. } => "malformed_field_count",
            DecodeError::UnknownTalker(_) => "unknown_talker",
            DecodeError::EmptyLine => "empty_line",
        }
    }
}

/// Failures of the GPS session's connection to its line source
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {device}: {reason}")]
    ConnectFailed { device: String, reason: String },
    #[error("no data from GPS within {0:?}")]
    ReadTimeout(Duration),
    #[error("GPS device not found: {0}")]
    DeviceNotFound(String),
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),
    #[error("GPS stream ended")]
    EndOfStream,
    #[error("too many consecutive decode failures ({0})")]
    TooManyDecodeFailures(u32),
    #[error("GPS session gave up after {attempts} connection attempts")]
    RetryBudgetExhausted { attempts: u32 },
}

/// A push to one web client could not be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("subscriber disconnected")]
    Disconnected,
    #[error("subscriber is not keeping up")]
    Lagging,
}

/// A control action was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Invalid state for {action}: {reason}")]
    InvalidState { action: String, reason: String },
}

impl From<anyhow::Error> for SurveyorError {
    fn from(error: anyhow::Error) -> Self {
        SurveyorError::Other(error.to_string())
    }
}
