//! Core data model shared by every stage of the scanner pipeline.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::classifier::EntryPointShape;
use crate::error::{Result, ScannerError};
use crate::execution::ExecutionStrategy;

/// One row produced by a scanner: field name to scalar value.
pub type ResultRecord = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Submission & Request
// ============================================================================

/// A scanner program as submitted. Never modified after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerSubmission {
    source: String,
    filename: String,
}

impl ScannerSubmission {
    /// Create a submission from source text and its original filename.
    pub fn new(source: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filename: filename.into(),
        }
    }

    /// Read a submission from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scanner.py".to_string());
        Ok(Self::new(source, filename))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Filename without its `.py` extension.
    pub fn stem(&self) -> &str {
        self.filename
            .rsplit('/')
            .next()
            .unwrap_or(&self.filename)
            .trim_end_matches(".py")
    }
}

/// How much of the submission's own configuration is honored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run the scanner's embedded universe and date constants untouched.
    #[default]
    Pure,
    /// Substitute a larger symbol universe and pass the requested window.
    Enhanced,
}

/// Caller's parameters for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// First day of the requested window (inclusive)
    pub start_date: NaiveDate,
    /// Last day of the requested window (inclusive)
    pub end_date: NaiveDate,
    /// Execution mode
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Symbols to use instead of the scanner's own list (Enhanced only)
    #[serde(default)]
    pub universe_override: Option<Vec<String>>,
    /// Per-request wall-clock ceiling; falls back to the configured default
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ExecutionRequest {
    /// Create a Pure-mode request for the given window.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self> {
        let request = Self {
            start_date,
            end_date,
            mode: ExecutionMode::Pure,
            universe_override: None,
            timeout_secs: None,
        };
        request.validate()?;
        Ok(request)
    }

    /// Switch to Enhanced mode.
    pub fn enhanced(mut self) -> Self {
        self.mode = ExecutionMode::Enhanced;
        self
    }

    /// Provide an explicit universe (implies Enhanced mode).
    pub fn with_universe(mut self, symbols: Vec<String>) -> Self {
        self.mode = ExecutionMode::Enhanced;
        self.universe_override = Some(symbols);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Wall-clock ceiling for this request, given the configured default.
    pub fn ceiling(&self, default: Duration) -> Duration {
        self.timeout_secs
            .map_or(default, |secs| Duration::from_secs(secs.max(1)))
    }

    /// Check the request for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.start_date > self.end_date {
            return Err(ScannerError::InvalidRequest(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            )));
        }
        if self.mode == ExecutionMode::Pure && self.universe_override.is_some() {
            return Err(ScannerError::InvalidRequest(
                "universe_override requires enhanced mode".to_string(),
            ));
        }
        if matches!(&self.universe_override, Some(symbols) if symbols.is_empty()) {
            return Err(ScannerError::InvalidRequest(
                "universe_override must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Result
// ============================================================================

/// Overall outcome of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failed,
}

/// Category of a recorded problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    LoopConflict,
    Timeout,
    DateParseError,
    UpstreamFetchError,
    ScannerException,
    WorkerError,
    InvalidRequest,
}

impl ErrorKind {
    /// Map an engine error onto its diagnostic category.
    pub fn from_error(err: &ScannerError) -> Self {
        match err {
            ScannerError::Parse { .. } | ScannerError::Syntax(_) => Self::ParseError,
            ScannerError::LoopConflict(_) => Self::LoopConflict,
            ScannerError::Timeout(_) => Self::Timeout,
            ScannerError::UpstreamFetch(_) => Self::UpstreamFetchError,
            ScannerError::ScannerException { .. } => Self::ScannerException,
            ScannerError::InvalidRequest(_) => Self::InvalidRequest,
            _ => Self::WorkerError,
        }
    }
}

/// A problem recorded while processing a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticError {
    pub kind: ErrorKind,
    pub message: String,
    /// Verbatim detail such as a Python traceback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything a caller needs to understand what happened. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Detected entry-point shape
    pub shape: EntryPointShape,
    /// Strategy the adapter used, if execution started
    pub strategy: Option<ExecutionStrategy>,
    /// Execution mode requested
    pub mode: ExecutionMode,
    /// Variable (or `<return>`) the records were harvested from
    pub harvested_from: Option<String>,
    /// Records harvested before date reconciliation
    pub harvested_records: usize,
    /// Records dropped because their date could not be parsed
    pub dropped_unparseable_dates: usize,
    /// Records dropped because their date fell outside the window
    pub dropped_out_of_range: usize,
    /// Size of the substituted universe (Enhanced mode)
    pub universe_size: Option<usize>,
    /// Lines where `asyncio.run` was neutralized
    pub neutralized_lines: Vec<usize>,
    /// Problems encountered
    pub errors: Vec<DiagnosticError>,
    /// Informational notes
    pub notes: Vec<String>,
    /// Last lines the scanner wrote to stdout/stderr
    pub stderr_tail: Vec<String>,
    /// Wall-clock time spent
    pub elapsed_ms: u64,
}

impl Diagnostics {
    pub fn new(shape: EntryPointShape, mode: ExecutionMode) -> Self {
        Self {
            shape,
            strategy: None,
            mode,
            harvested_from: None,
            harvested_records: 0,
            dropped_unparseable_dates: 0,
            dropped_out_of_range: 0,
            universe_size: None,
            neutralized_lines: Vec::new(),
            errors: Vec::new(),
            notes: Vec::new(),
            stderr_tail: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn error(&mut self, kind: ErrorKind, message: impl Into<String>, detail: Option<String>) {
        self.errors.push(DiagnosticError {
            kind,
            message: message.into(),
            detail,
        });
    }

    /// Record an engine error.
    pub fn record(&mut self, err: &ScannerError) {
        self.error(ErrorKind::from_error(err), err.to_string(), None);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// True when neither notes nor errors were recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.notes.is_empty()
    }
}

/// Final output of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Records in the harvested structure's native order, filtered to the window
    pub records: Vec<ResultRecord>,
    pub diagnostics: Diagnostics,
}

impl ExecutionResult {
    /// A failed result that carries the reason.
    pub fn failed(mut diagnostics: Diagnostics, err: &ScannerError) -> Self {
        diagnostics.record(err);
        Self {
            status: ExecutionStatus::Failed,
            records: Vec::new(),
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_request_rejects_inverted_window() {
        let err = ExecutionRequest::new(date("2025-11-01"), date("2025-01-01")).unwrap_err();
        assert!(matches!(err, ScannerError::InvalidRequest(_)));
    }

    #[test]
    fn test_universe_override_switches_mode() {
        let request = ExecutionRequest::new(date("2025-01-01"), date("2025-02-01"))
            .unwrap()
            .with_universe(vec!["AAPL".into(), "MSFT".into()]);
        assert_eq!(request.mode, ExecutionMode::Enhanced);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_pure_request_with_override_is_invalid() {
        let mut request = ExecutionRequest::new(date("2025-01-01"), date("2025-02-01")).unwrap();
        request.universe_override = Some(vec!["SPY".into()]);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: ExecutionRequest =
            serde_json::from_str(r#"{"start_date":"2025-01-01","end_date":"2025-11-01"}"#).unwrap();
        assert_eq!(request.mode, ExecutionMode::Pure);
        assert!(request.universe_override.is_none());
        assert!(request.timeout_secs.is_none());
    }

    #[test]
    fn test_submission_stem() {
        let submission = ScannerSubmission::new("x = 1", "gap_scanner.py");
        assert_eq!(submission.stem(), "gap_scanner");
        assert_eq!(submission.filename(), "gap_scanner.py");
    }

    #[test]
    fn test_failed_result_has_diagnostics() {
        let diagnostics = Diagnostics::new(EntryPointShape::Unknown, ExecutionMode::Pure);
        let result = ExecutionResult::failed(
            diagnostics,
            &ScannerError::LoopConflict("loop already running".into()),
        );
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(!result.diagnostics.is_empty());
        assert_eq!(result.diagnostics.errors[0].kind, ErrorKind::LoopConflict);
    }
}
