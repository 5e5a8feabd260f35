//! Job registry for asynchronous executions.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, ScannerError};
use crate::types::{Diagnostics, ExecutionResult, ExecutionStatus, ResultRecord};

/// Progress reported at each pipeline stage.
pub mod progress {
    pub const QUEUED: f64 = 0.0;
    pub const RUNNING: f64 = 0.2;
    pub const HARVESTING: f64 = 0.8;
    pub const RECONCILING: f64 = 0.9;
    pub const DONE: f64 = 1.0;
}

/// Ten years; longer retention is treated as forever.
const MAX_RETENTION_SECS: i64 = 10 * 365 * 24 * 3600;

/// Identifier returned by `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ScannerError::UnknownJob(s.to_string()))
    }
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Partial | Self::Failed)
    }
}

impl From<ExecutionStatus> for JobStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => Self::Success,
            ExecutionStatus::Partial => Self::Partial,
            ExecutionStatus::Failed => Self::Failed,
        }
    }
}

/// Answer to `poll`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    /// In `[0, 1]`
    pub progress: f64,
    pub diagnostics: Diagnostics,
}

#[derive(Debug)]
struct JobEntry {
    status: JobStatus,
    progress: f64,
    diagnostics: Diagnostics,
    records: Vec<ResultRecord>,
    finished_at: Option<DateTime<Utc>>,
}

/// Shared table of jobs. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queued job.
    pub async fn insert(&self, diagnostics: Diagnostics) -> JobId {
        let id = JobId::new();
        self.jobs.write().await.insert(
            id,
            JobEntry {
                status: JobStatus::Queued,
                progress: progress::QUEUED,
                diagnostics,
                records: Vec::new(),
                finished_at: None,
            },
        );
        id
    }

    /// Move a job forward. Progress never goes backwards and finished jobs
    /// are left alone.
    pub async fn progress(&self, id: JobId, value: f64) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&id) {
            if entry.status.is_finished() {
                return;
            }
            entry.status = JobStatus::Running;
            entry.progress = entry.progress.max(value.clamp(0.0, 1.0));
        }
    }

    /// Store the final result of a job.
    pub async fn finish(&self, id: JobId, result: ExecutionResult) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&id) {
            entry.status = result.status.into();
            entry.progress = progress::DONE;
            entry.diagnostics = result.diagnostics;
            entry.records = result.records;
            entry.finished_at = Some(Utc::now());
        }
    }

    pub async fn snapshot(&self, id: JobId) -> Result<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(&id)
            .ok_or_else(|| ScannerError::UnknownJob(id.to_string()))?;
        Ok(JobSnapshot {
            job_id: id,
            status: entry.status,
            progress: entry.progress,
            diagnostics: entry.diagnostics.clone(),
        })
    }

    /// Records of a finished job.
    pub async fn results(&self, id: JobId) -> Result<Vec<ResultRecord>> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(&id)
            .ok_or_else(|| ScannerError::UnknownJob(id.to_string()))?;
        if !entry.status.is_finished() {
            return Err(ScannerError::NotReady(id.to_string()));
        }
        Ok(entry.records.clone())
    }

    /// Drop finished jobs older than `retention_secs`. Returns how many were removed.
    pub async fn prune(&self, retention_secs: u64) -> usize {
        let retention = i64::try_from(retention_secs).unwrap_or(i64::MAX).min(MAX_RETENTION_SECS);
        let cutoff = Utc::now() - Duration::seconds(retention);
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| entry.finished_at.map_or(true, |at| at > cutoff));
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
