use std::fmt;

use crate::monitor::CycleStage;

/// Errors that cross the loop boundary. Anything in here stops the process.
#[derive(Debug)]
pub enum DDoSError {
    SetupError(String),
    ModelError(String),
    ConfigError(String),
    IoError(String),
    ParseError(String),
}

impl fmt::Display for DDoSError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DDoSError::SetupError(msg) => write!(f, "Setup error: {}", msg),
            DDoSError::ModelError(msg) => write!(f, "Model error: {}", msg),
            DDoSError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            DDoSError::IoError(msg) => write!(f, "IO error: {}", msg),
            DDoSError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for DDoSError {}

impl From<std::io::Error> for DDoSError {
    fn from(err: std::io::Error) -> Self {
        DDoSError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for DDoSError {
    fn from(err: serde_json::Error) -> Self {
        DDoSError::ParseError(err.to_string())
    }
}

impl From<pyo3::PyErr> for DDoSError {
    fn from(err: pyo3::PyErr) -> Self {
        DDoSError::ModelError(err.to_string())
    }
}

impl From<ctrlc::Error> for DDoSError {
    fn from(err: ctrlc::Error) -> Self {
        DDoSError::SetupError(err.to_string())
    }
}

impl From<&str> for DDoSError {
    fn from(msg: &str) -> Self {
        DDoSError::ConfigError(msg.to_string())
    }
}

impl From<String> for DDoSError {
    fn from(msg: String) -> Self {
        DDoSError::ConfigError(msg)
    }
}

pub type Result<T> = std::result::Result<T, DDoSError>;

/// Recoverable per-cycle failure. The cycle is abandoned, cleanup runs and
/// the loop carries on after the sleep interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFailure {
    CaptureFailed(String),
    ExtractionFailed(String),
    FlowsFileMissing,
    FlowsFileEmpty,
    CsvUnreadable(String),
    NoFlows,
}

impl StageFailure {
    pub fn stage(&self) -> CycleStage {
        match self {
            StageFailure::CaptureFailed(_) => CycleStage::Capturing,
            _ => CycleStage::Extracting,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageFailure::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            StageFailure::ExtractionFailed(msg) => write!(f, "Failed to extract features: {}", msg),
            // a zero-length file is as useless as a missing one
            StageFailure::FlowsFileMissing | StageFailure::FlowsFileEmpty => {
                write!(f, "Flows file not found.")
            }
            StageFailure::CsvUnreadable(msg) => write!(f, "Error reading CSV: {}", msg),
            StageFailure::NoFlows => write!(f, "CSV empty."),
        }
    }
}

impl std::error::Error for StageFailure {}
