//! Error types for the scanner engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the scanner error type.
pub type Result<T> = std::result::Result<T, ScannerError>;

/// Unified error type for scanner analysis and execution.
#[derive(Error, Debug)]
pub enum ScannerError {
    /// The submission is not valid Python; nothing was executed.
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Executing the submission would re-enter an event loop that is already running.
    #[error("Event loop conflict: {0}")]
    LoopConflict(String),

    /// The wall-clock ceiling was reached.
    #[error("Scanner timed out after {0:?}")]
    Timeout(Duration),

    /// The scanner's own market-data call failed.
    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(String),

    /// The scanner raised an exception that is not a fetch failure.
    #[error("Scanner raised {type_name}: {message}")]
    ScannerException { type_name: String, message: String },

    /// The worker process could not be started or returned no snapshot.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A boundary detector returned unusable line ranges.
    #[error("Invalid partition boundaries: {0}")]
    InvalidBoundaries(String),

    /// Two partitions ended up sharing a parameter name.
    #[error("Parameter `{name}` is shared by partitions `{first}` and `{second}`")]
    Contamination {
        name: String,
        first: String,
        second: String,
    },

    /// No job with this id is known.
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// The job has not finished yet.
    #[error("Job {0} has not finished")]
    NotReady(String),

    /// Tree-sitter could not be initialized.
    #[error("Syntax engine error: {0}")]
    Syntax(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScannerError {
    /// Fatal errors stop the submission before or during execution with no
    /// partial data to recover.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::LoopConflict(_) | Self::InvalidRequest(_) | Self::Syntax(_)
        )
    }

    /// Stable short code used in diagnostics.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse_error",
            Self::LoopConflict(_) => "loop_conflict",
            Self::Timeout(_) => "timeout",
            Self::UpstreamFetch(_) => "upstream_fetch_error",
            Self::ScannerException { .. } => "scanner_exception",
            Self::Worker(_) => "worker_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidBoundaries(_) => "invalid_boundaries",
            Self::Contamination { .. } => "parameter_contamination",
            Self::UnknownJob(_) => "unknown_job",
            Self::NotReady(_) => "not_ready",
            Self::Syntax(_) => "syntax_engine",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}
