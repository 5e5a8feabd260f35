//! Worker processes.
//!
//! Every execution runs in its own Python process driven by the embedded
//! harness. The process owns the execution namespace and, when the scanner
//! needs one, a private event loop; killing it can never disturb another
//! execution.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::classifier::EntryPointShape;
use crate::error::{Result, ScannerError};
use crate::namespace::{CapturedValue, SnapshotBinding};

/// Prefix of the snapshot line the harness prints on stdout.
pub const SNAPSHOT_MARKER: &str = "__ZERO_SCANNER_SNAPSHOT__";

/// Python driver executed by every worker.
pub const HARNESS_SOURCE: &str = include_str!("harness.py");

/// Everything a worker needs to run one submission.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerJob {
    pub source: String,
    pub filename: String,
    /// `__name__` the module runs under
    pub module_name: String,
    pub shape: EntryPointShape,
    pub runs_main_on_import: bool,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub enhanced: bool,
    pub universe: Option<Vec<String>>,
    /// Names the harness captures from the namespace
    pub candidates: Vec<String>,
    /// Harness watchdog ceiling
    pub timeout_secs: f64,
}

impl WorkerJob {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.001))
    }
}

/// How the harness run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    Error,
    Timeout,
}

/// Category of an exception raised by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UpstreamFetch,
    LoopConflict,
    #[serde(other)]
    Exception,
}

/// An exception raised by the scanner, as reported by the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerFailure {
    pub kind: FailureKind,
    pub type_name: String,
    pub message: String,
    #[serde(default)]
    pub traceback: Option<String>,
}

impl ScannerFailure {
    pub fn to_error(&self) -> ScannerError {
        match self.kind {
            FailureKind::UpstreamFetch => {
                ScannerError::UpstreamFetch(format!("{}: {}", self.type_name, self.message))
            }
            FailureKind::LoopConflict => ScannerError::LoopConflict(self.message.clone()),
            FailureKind::Exception => ScannerError::ScannerException {
                type_name: self.type_name.clone(),
                message: self.message.clone(),
            },
        }
    }
}

/// Namespace snapshot returned by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub status: ReportStatus,
    #[serde(default)]
    pub bindings: Vec<SnapshotBinding>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub return_value: Option<CapturedValue>,
    #[serde(default)]
    pub error: Option<ScannerFailure>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Last lines the scanner printed; filled in by the runner
    #[serde(default)]
    pub stderr_tail: Vec<String>,
}

impl WorkerReport {
    /// Report for a worker that had to be killed before it produced a snapshot.
    pub fn killed(after: Duration) -> Self {
        Self {
            status: ReportStatus::Timeout,
            bindings: Vec::new(),
            names: Vec::new(),
            return_value: None,
            error: None,
            warnings: vec![format!(
                "worker killed after {:.1}s without a snapshot",
                after.as_secs_f64()
            )],
            stderr_tail: Vec::new(),
        }
    }
}

/// Runs one worker job to completion.
#[async_trait]
pub trait ScannerRunner: Send + Sync {
    async fn run(&self, job: WorkerJob) -> Result<WorkerReport>;
}

/// Runs jobs in a Python subprocess.
#[derive(Debug, Clone)]
pub struct PythonRunner {
    python_bin: String,
    abort_grace: Duration,
    stderr_tail_lines: usize,
}

impl PythonRunner {
    pub fn new(python_bin: impl Into<String>) -> Self {
        Self {
            python_bin: python_bin.into(),
            abort_grace: Duration::from_secs(5),
            stderr_tail_lines: 40,
        }
    }

    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    pub fn with_stderr_tail(mut self, lines: usize) -> Self {
        self.stderr_tail_lines = lines;
        self
    }

    /// Whether the interpreter can be started.
    pub async fn probe(&self) -> bool {
        Command::new(&self.python_bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success())
    }
}

#[async_trait]
impl ScannerRunner for PythonRunner {
    async fn run(&self, job: WorkerJob) -> Result<WorkerReport> {
        let payload = serde_json::to_vec(&job)?;
        let ceiling = job.timeout() + self.abort_grace;

        let mut child = Command::new(&self.python_bin)
            .arg("-u")
            .arg("-c")
            .arg(HARNESS_SOURCE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScannerError::Worker(format!("failed to start {}: {e}", self.python_bin)))?;

        debug!(
            pid = child.id(),
            filename = %job.filename,
            shape = %job.shape,
            "Started scanner worker"
        );

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScannerError::Worker("worker stdin unavailable".to_string()))?;
        stdin.write_all(&payload).await?;
        stdin.shutdown().await?;
        drop(stdin);

        // dropping the child on timeout kills it
        let output = match tokio::time::timeout(ceiling, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(
                    filename = %job.filename,
                    ceiling_secs = ceiling.as_secs_f64(),
                    "Scanner worker killed"
                );
                return Ok(WorkerReport::killed(ceiling));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr_tail = tail(&stderr, self.stderr_tail_lines);

        let Some(mut report) = parse_snapshot(&stdout)? else {
            return Err(ScannerError::Worker(format!(
                "worker exited ({}) without a snapshot: {}",
                output.status,
                stderr_tail.join("\n")
            )));
        };
        report.stderr_tail = stderr_tail;
        Ok(report)
    }
}

/// The last snapshot line in worker stdout, if any.
pub fn parse_snapshot(stdout: &str) -> Result<Option<WorkerReport>> {
    let Some(line) = stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(SNAPSHOT_MARKER))
    else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(line)?))
}

fn tail(text: &str, lines: usize) -> Vec<String> {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].iter().map(|l| (*l).to_string()).collect()
}
