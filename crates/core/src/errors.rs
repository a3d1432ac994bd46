use thiserror::Error;

/// Error taxonomy shared by every orchestration component
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("no worker nodes available for test execution")]
    NoWorkersAvailable,

    #[error("circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("test timeout after {timeout_secs}s: {path}")]
    UnitExecutionTimeout { path: String, timeout_secs: u64 },

    #[error("task {task_id} failed: {message}")]
    GroupExecutionFailure { task_id: String, message: String },

    #[error("test execution error: {0}")]
    TestExecution(String),

    #[error("metrics collection error: {0}")]
    MetricsCollection(String),

    #[error("alert sink '{sink}' failed: {message}")]
    AlertSinkFailure { sink: String, message: String },

    #[error("report generation failed: {0}")]
    ReportGenerationFailure(String),

    #[error("unsupported report format: {0}")]
    UnsupportedReportFormat(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SwarmError {
    /// Transient errors are retried by the long-running loops instead of
    /// ending them.
    pub fn is_transient(&self) -> bool {
        matches!(self, SwarmError::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        SwarmError::Serialization(err.to_string())
    }
}

/// Unified result type
pub type SwarmResult<T> = std::result::Result<T, SwarmError>;
