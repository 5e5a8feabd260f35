//! Zero Scanner Library
//!
//! Ingestion engine for third-party market scanner scripts. Scanners arrive
//! as Python source in whatever shape their authors wrote them; the engine
//! works out how to run each one, runs it in an isolated worker, recovers
//! its result set and re-filters it to the caller's date window.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       zero-scanner (library)                         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐   │
//! │  │ Classifier │──▶│ Execution  │──▶│ Harvester  │──▶│ Reconciler │   │
//! │  │            │   │ Adapter    │   │            │   │            │   │
//! │  └────────────┘   └─────┬──────┘   └────────────┘   └────────────┘   │
//! │                         │ worker process per execution               │
//! │  ┌────────────┐   ┌─────▼──────┐                                     │
//! │  │ Parameter  │   │ Universe   │ (rate limited, shared)              │
//! │  │ Extractor  │   │ Provider   │                                     │
//! │  └─────┬──────┘   └────────────┘                                     │
//! │  ┌─────▼──────┐                                                      │
//! │  │ Partitioner│                                                      │
//! │  └────────────┘                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Operations
//!
//! - [`ScanService::format`]: entry-point shape and tunable parameters, no execution
//! - [`ScanService::execute`] / [`ScanService::poll`] / [`ScanService::fetch_results`]:
//!   asynchronous execution through the job registry
//! - [`ScanService::split`]: parameter-disjoint partitions of a multi-scanner file
//! - [`ScanService::run`]: inline execution, used by the CLI

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod harvest;
pub mod jobs;
pub mod logging;
pub mod namespace;
pub mod params;
pub mod pipeline;
pub mod rate_limiter;
pub mod reconcile;
pub mod syntax;
pub mod types;
pub mod universe;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

pub use classifier::{classify, Classification, EntryPointShape};
pub use config::ScannerConfig;
pub use error::{Result, ScannerError};
pub use execution::{ExecutionAdapter, ExecutionStrategy, PythonRunner, ScannerRunner};
pub use jobs::{JobId, JobSnapshot, JobStatus};
pub use params::{BoundaryDetector, ParameterDescriptor, ParameterExtractor, Partitioner, ScannerPartition};
pub use types::{
    Diagnostics, ExecutionMode, ExecutionRequest, ExecutionResult, ExecutionStatus, ResultRecord,
    ScannerSubmission,
};
pub use universe::{RateLimitedUniverse, StaticUniverse, UniverseProvider};

use crate::jobs::JobRegistry;
use crate::pipeline::JobTracker;
use crate::rate_limiter::shared_limiter;

/// Answer to `format`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatReport {
    pub shape: EntryPointShape,
    pub runs_main_on_import: bool,
    /// Descriptors at or above the configured confidence threshold
    pub parameters: Vec<ParameterDescriptor>,
}

/// Scanner engine facade.
#[derive(Clone)]
pub struct ScanService {
    config: Arc<ScannerConfig>,
    adapter: ExecutionAdapter,
    extractor: ParameterExtractor,
    partitioner: Partitioner,
    jobs: JobRegistry,
    permits: Arc<Semaphore>,
}

impl ScanService {
    /// Service backed by Python workers and the configured universe.
    pub fn new(config: ScannerConfig) -> Self {
        let universe = configured_universe(&config);
        let config = Arc::new(config);
        let adapter = ExecutionAdapter::python(config.clone(), universe);
        Self::assemble(config, adapter)
    }

    /// Service with an explicit runner and universe provider.
    pub fn with_parts(
        config: ScannerConfig,
        runner: Arc<dyn ScannerRunner>,
        universe: Option<Arc<dyn UniverseProvider>>,
    ) -> Self {
        let config = Arc::new(config);
        let adapter = ExecutionAdapter::new(config.clone(), runner, universe);
        Self::assemble(config, adapter)
    }

    /// Replace the partition boundary detector.
    pub fn with_detector(mut self, detector: Arc<dyn BoundaryDetector>) -> Self {
        self.partitioner = self.partitioner.with_detector(detector);
        self
    }

    fn assemble(config: Arc<ScannerConfig>, adapter: ExecutionAdapter) -> Self {
        let extractor = ParameterExtractor::new();
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            partitioner: Partitioner::new(extractor.clone()),
            extractor,
            adapter,
            jobs: JobRegistry::new(),
            permits,
            config,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn adapter(&self) -> &ExecutionAdapter {
        &self.adapter
    }

    /// Classify a submission and list its tunable parameters. Nothing runs.
    pub fn format(&self, submission: &ScannerSubmission) -> Result<FormatReport> {
        let classification = classify(submission.source())?;
        let threshold = self.config.extractor.min_confidence;
        let parameters: Vec<ParameterDescriptor> = self
            .extractor
            .extract(submission.source())?
            .into_iter()
            .filter(|p| p.confidence >= threshold)
            .collect();

        debug!(
            filename = %submission.filename(),
            shape = %classification.shape,
            parameters = parameters.len(),
            "Formatted scanner"
        );
        Ok(FormatReport {
            shape: classification.shape,
            runs_main_on_import: classification.runs_main_on_import,
            parameters,
        })
    }

    /// Split a multi-scanner file into independently executable partitions.
    pub fn split(&self, submission: &ScannerSubmission) -> Result<Vec<ScannerPartition>> {
        self.partitioner.partition(submission.source())
    }

    /// Start an execution and return immediately.
    ///
    /// Parse errors and invalid requests are returned here and create no
    /// job; everything after classification is reported through `poll`.
    pub async fn execute(
        &self,
        submission: ScannerSubmission,
        request: ExecutionRequest,
    ) -> Result<JobId> {
        request.validate()?;
        let classification = classify(submission.source())?;

        let pruned = self.jobs.prune(self.config.job_retention_secs).await;
        if pruned > 0 {
            debug!(pruned, "Pruned finished jobs");
        }

        let job_id = self
            .jobs
            .insert(Diagnostics::new(classification.shape.clone(), request.mode))
            .await;
        info!(
            job_id = %job_id,
            filename = %submission.filename(),
            shape = %classification.shape,
            mode = ?request.mode,
            "Scanner job queued"
        );

        let adapter = self.adapter.clone();
        let tracker = JobTracker::new(self.jobs.clone(), job_id);
        let permits = self.permits.clone();
        let ceiling = request.ceiling(self.config.timeout());
        let shape = classification.shape.clone();
        let mode = request.mode;
        let work = tokio::spawn(async move {
            match wait_for_permit(permits, ceiling).await {
                Ok(_permit) => {
                    pipeline::run(&adapter, &submission, &classification, &request, Some(&tracker)).await
                }
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "Scanner job never got a worker");
                    ExecutionResult::failed(Diagnostics::new(classification.shape.clone(), request.mode), &err)
                }
            }
        });

        // A panicking job still has to finish, or it would poll as Running forever.
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            let result = match work.await {
                Ok(result) => result,
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "Scanner job task aborted");
                    ExecutionResult::failed(
                        Diagnostics::new(shape, mode),
                        &ScannerError::Worker(format!("job task aborted: {err}")),
                    )
                }
            };
            info!(job_id = %job_id, status = ?result.status, records = result.records.len(), "Scanner job finished");
            jobs.finish(job_id, result).await;
        });

        Ok(job_id)
    }

    /// Status, progress and diagnostics of a job.
    pub async fn poll(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.jobs.snapshot(job_id).await
    }

    /// Records of a finished job.
    pub async fn fetch_results(&self, job_id: JobId) -> Result<Vec<ResultRecord>> {
        self.jobs.results(job_id).await
    }

    /// Execute inline and wait for the result.
    pub async fn run(
        &self,
        submission: &ScannerSubmission,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        request.validate()?;
        let classification = classify(submission.source())?;
        let ceiling = request.ceiling(self.config.timeout());
        let _permit = match wait_for_permit(self.permits.clone(), ceiling).await {
            Ok(permit) => permit,
            Err(err @ ScannerError::Timeout(_)) => {
                warn!(filename = %submission.filename(), "No worker became free within the ceiling");
                return Ok(ExecutionResult::failed(
                    Diagnostics::new(classification.shape.clone(), request.mode),
                    &err,
                ));
            }
            Err(err) => return Err(err),
        };
        Ok(pipeline::run(&self.adapter, submission, &classification, request, None).await)
    }
}

/// Wait for a worker slot, but no longer than the request's ceiling.
async fn wait_for_permit(permits: Arc<Semaphore>, ceiling: Duration) -> Result<OwnedSemaphorePermit> {
    match tokio::time::timeout(ceiling, permits.acquire_owned()).await {
        Ok(Ok(permit)) => Ok(permit),
        Ok(Err(_)) => Err(ScannerError::Worker("worker pool closed".to_string())),
        Err(_) => Err(ScannerError::Timeout(ceiling)),
    }
}

fn configured_universe(config: &ScannerConfig) -> Option<Arc<dyn UniverseProvider>> {
    if config.universe.symbols.is_empty() {
        return None;
    }
    let limiter = shared_limiter("universe", config.universe.requests_per_minute.max(1));
    let provider = RateLimitedUniverse::new(StaticUniverse::new(config.universe.symbols.clone()), limiter);
    Some(Arc::new(provider))
}
