use std::time::Duration;
use thiserror::Error;

/// Failure of a single data source (external tool, sysfs file, kernel table).
///
/// None of these are fatal. Callers treat every variant as "source
/// unavailable" and move on to the next source in their fallback chain.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} failed: {status}")]
    Failed { program: String, status: String },

    #[error("malformed output from {source_name}: {reason}")]
    Malformed { source_name: String, reason: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    pub fn malformed(source_name: &str, reason: impl Into<String>) -> Self {
        ProbeError::Malformed {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the source simply does not exist on this host.
    pub fn is_missing(&self) -> bool {
        match self {
            ProbeError::NotFound(_) => true,
            ProbeError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
