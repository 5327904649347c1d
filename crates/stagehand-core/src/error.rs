use std::time::Duration;
use thiserror::Error;

/// A convenience `Result` alias using [`StagehandError`].
pub type StagehandResult<T> = Result<T, StagehandError>;

/// Top-level error type for the Stagehand orchestration core.
///
/// The first group of variants is the failure taxonomy the scheduler reasons
/// about; the rest are ambient errors from configuration, I/O and the
/// collaborators.
#[derive(Error, Debug)]
pub enum StagehandError {
    /// An external worker process could not be started.
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// A worker or an await on it exceeded its time bound.
    #[error("Timeout after {elapsed:?}: {context}")]
    Timeout {
        /// What timed out.
        context: String,
        /// The bound that was exceeded.
        elapsed: Duration,
    },

    /// A worker process exited unsuccessfully.
    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    /// A structured routing decision could not be parsed or validated.
    #[error("Routing parse error: {0}")]
    RoutingParse(String),

    /// A direct generation call failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// An auxiliary tool invocation failed.
    #[error("Tool invocation error: {0}")]
    ToolInvocation(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// The persistent event store rejected an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// The memory/context service rejected an operation.
    #[error("Memory error: {0}")]
    Memory(String),

    /// A referenced entity does not exist (or was already cleaned up).
    #[error("Not found: {0}")]
    NotFound(String),

    /// An event id is already being processed.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StagehandError {
    /// Shorthand for building a [`StagehandError::Timeout`].
    pub fn timeout(context: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            context: context.into(),
            elapsed,
        }
    }

    /// Whether this failure came from the worker process layer.
    pub fn is_worker_failure(&self) -> bool {
        matches!(
            self,
            Self::Spawn(_) | Self::Timeout { .. } | Self::WorkerFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = StagehandError::timeout("worker abc", Duration::from_secs(10));
        let msg = err.to_string();
        assert!(msg.contains("10s"));
        assert!(msg.contains("worker abc"));
    }

    #[test]
    fn test_worker_failure_classification() {
        assert!(StagehandError::Spawn("no binary".into()).is_worker_failure());
        assert!(StagehandError::WorkerFailed("exit 1".into()).is_worker_failure());
        assert!(!StagehandError::Backend("500".into()).is_worker_failure());
        assert!(!StagehandError::RoutingParse("bad".into()).is_worker_failure());
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: StagehandError = parse.unwrap_err().into();
        assert!(matches!(err, StagehandError::Json(_)));
    }
}
