//! Error types for the delivery path.

use thiserror::Error;

/// Errors from talking to the backend.
#[derive(Debug, Error)]
pub enum ReportError {
    /// No usable response: timeout, connection refused, DNS failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-2xx status.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Spool(#[from] SpoolError),
}

impl ReportError {
    /// Status code, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ReportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from the offline spool file.
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("spool io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("spool serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
