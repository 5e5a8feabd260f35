//! Execution adapter.
//!
//! Runs a classified submission and hands back its namespace. One adapter
//! interface, two strategies chosen purely by entry-point shape:
//!
//! - `Direct`: sync functions and bare scripts; the worker is driven on the
//!   caller's runtime.
//! - `OwnedLoop`: async shapes; the worker is driven from a dedicated thread
//!   owning a private runtime, and the harness runs the coroutine on a new
//!   event loop of its own. No running loop is ever re-entered.

pub mod neutralize;
pub mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::classifier::{Classification, EntryPointShape};
use crate::config::ScannerConfig;
use crate::error::{Result, ScannerError};
use crate::harvest;
use crate::namespace::Namespace;
use crate::types::{ExecutionMode, ExecutionRequest, ScannerSubmission};
use crate::universe::UniverseProvider;

pub use worker::{
    FailureKind, PythonRunner, ReportStatus, ScannerFailure, ScannerRunner, WorkerJob,
    WorkerReport,
};

/// Calling convention used for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Run on the caller's runtime
    Direct,
    /// Run on a dedicated thread with its own runtime and event loop
    OwnedLoop,
}

impl ExecutionStrategy {
    pub fn for_shape(shape: &EntryPointShape) -> Self {
        if shape.is_async() {
            Self::OwnedLoop
        } else {
            Self::Direct
        }
    }
}

/// How the scanner run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Completed,
    /// Wall-clock ceiling reached; the namespace is whatever existed then
    TimedOut(Duration),
    /// The scanner raised
    Failed(ScannerFailure),
}

/// Namespace plus everything observed while producing it.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub namespace: Namespace,
    pub termination: Termination,
    pub strategy: ExecutionStrategy,
    pub warnings: Vec<String>,
    pub stderr_tail: Vec<String>,
    pub neutralized_lines: Vec<usize>,
    pub universe_size: Option<usize>,
    pub elapsed: Duration,
}

/// Runs submissions under the calling convention their shape requires.
#[derive(Clone)]
pub struct ExecutionAdapter {
    config: Arc<ScannerConfig>,
    runner: Arc<dyn ScannerRunner>,
    universe: Option<Arc<dyn UniverseProvider>>,
}

impl ExecutionAdapter {
    pub fn new(
        config: Arc<ScannerConfig>,
        runner: Arc<dyn ScannerRunner>,
        universe: Option<Arc<dyn UniverseProvider>>,
    ) -> Self {
        Self {
            config,
            runner,
            universe,
        }
    }

    /// Adapter backed by Python worker processes.
    pub fn python(config: Arc<ScannerConfig>, universe: Option<Arc<dyn UniverseProvider>>) -> Self {
        let runner = PythonRunner::new(config.python_bin.clone())
            .with_abort_grace(config.abort_grace())
            .with_stderr_tail(config.stderr_tail_lines);
        Self::new(config, Arc::new(runner), universe)
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Execute a submission and return its namespace.
    ///
    /// Scanner exceptions and timeouts are not errors here; they come back
    /// as a [`Termination`] next to whatever namespace existed. Errors are
    /// reserved for requests that cannot run at all, loop conflicts and
    /// workers that produced nothing.
    pub async fn execute(
        &self,
        submission: &ScannerSubmission,
        classification: &Classification,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        request.validate()?;
        let started = Instant::now();
        let shape = &classification.shape;
        if *shape == EntryPointShape::Unknown {
            return Err(ScannerError::InvalidRequest(
                "submission has not been classified".to_string(),
            ));
        }
        let strategy = ExecutionStrategy::for_shape(shape);
        let mut warnings = Vec::new();

        let (source, neutralized_lines) =
            if *shape == EntryPointShape::BareScript && self.config.neutralize_nested_asyncio_run {
                let neutralized = neutralize::neutralize_nested_runs(submission.source())?;
                (neutralized.source, neutralized.lines)
            } else {
                (submission.source().to_string(), Vec::new())
            };

        let timeout = request.ceiling(self.config.timeout());
        let universe = self
            .resolve_universe(classification, request, timeout, &mut warnings)
            .await?;
        let universe_size = universe.as_ref().map(Vec::len);

        let job = WorkerJob {
            source,
            filename: submission.filename().to_string(),
            module_name: module_name(shape).to_string(),
            shape: shape.clone(),
            runs_main_on_import: classification.runs_main_on_import,
            start_date: request.start_date,
            end_date: request.end_date,
            enhanced: request.mode == ExecutionMode::Enhanced,
            universe,
            candidates: harvest::candidate_names().into_iter().map(String::from).collect(),
            timeout_secs: timeout.as_secs_f64(),
        };

        info!(
            filename = %submission.filename(),
            shape = %shape,
            strategy = ?strategy,
            mode = ?request.mode,
            timeout_secs = timeout.as_secs(),
            "Executing scanner"
        );

        let report = match strategy {
            ExecutionStrategy::Direct => self.runner.run(job).await?,
            ExecutionStrategy::OwnedLoop => run_on_owned_loop(self.runner.clone(), job).await?,
        };

        let termination = match (report.status, report.error.clone()) {
            (ReportStatus::Timeout, _) => Termination::TimedOut(timeout),
            (_, Some(failure)) if failure.kind == FailureKind::LoopConflict => {
                warn!(filename = %submission.filename(), "Scanner hit a running event loop");
                return Err(failure.to_error());
            }
            (ReportStatus::Error, Some(failure)) => Termination::Failed(failure),
            (ReportStatus::Error, None) => Termination::Failed(ScannerFailure {
                kind: FailureKind::Exception,
                type_name: "WorkerError".to_string(),
                message: "worker reported an error without details".to_string(),
                traceback: None,
            }),
            (ReportStatus::Ok, _) => Termination::Completed,
        };

        warnings.extend(report.warnings);
        let namespace = Namespace::from_snapshot(
            report.bindings,
            report.return_value,
            report.names,
            &classification.binding_lines,
        );

        let elapsed = started.elapsed();
        info!(
            filename = %submission.filename(),
            termination = termination_label(&termination),
            bindings = namespace.bindings().len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Scanner execution finished"
        );

        Ok(ExecutionOutcome {
            namespace,
            termination,
            strategy,
            warnings,
            stderr_tail: report.stderr_tail,
            neutralized_lines,
            universe_size,
            elapsed,
        })
    }

    /// Blocking form of [`execute`](Self::execute).
    ///
    /// Safe to call from inside a running tokio runtime: the execution is
    /// handed to a scoped thread with its own runtime instead of blocking on
    /// the host's. With `delegate_on_host_loop` disabled that situation is a
    /// `LoopConflict`.
    pub fn execute_blocking(
        &self,
        submission: &ScannerSubmission,
        classification: &Classification,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        if tokio::runtime::Handle::try_current().is_err() {
            return self.block_on_own_runtime(submission, classification, request);
        }
        if !self.config.delegate_on_host_loop {
            return Err(ScannerError::LoopConflict(
                "blocking execution requested from inside a running runtime".to_string(),
            ));
        }

        std::thread::scope(|scope| {
            std::thread::Builder::new()
                .name("scanner-delegate".to_string())
                .spawn_scoped(scope, || self.block_on_own_runtime(submission, classification, request))?
                .join()
                .map_err(|_| ScannerError::Worker("delegated execution panicked".to_string()))?
        })
    }

    fn block_on_own_runtime(
        &self,
        submission: &ScannerSubmission,
        classification: &Classification,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.execute(submission, classification, request))
    }

    async fn resolve_universe(
        &self,
        classification: &Classification,
        request: &ExecutionRequest,
        ceiling: Duration,
        warnings: &mut Vec<String>,
    ) -> Result<Option<Vec<String>>> {
        if request.mode != ExecutionMode::Enhanced {
            return Ok(None);
        }
        match classification.shape {
            EntryPointShape::BareScript => {
                warnings.push(
                    "universe substitution does not apply to bare scripts; the scanner's own symbols were used"
                        .to_string(),
                );
                return Ok(None);
            }
            EntryPointShape::AsyncMainBlock if classification.runs_main_on_import => {
                warnings.push(
                    "main() runs on import; the scanner's own symbols were used".to_string(),
                );
                return Ok(None);
            }
            _ => {}
        }

        if let Some(symbols) = &request.universe_override {
            return Ok(Some(symbols.clone()));
        }
        let Some(provider) = &self.universe else {
            warnings.push("enhanced mode without a universe provider; the scanner's own symbols were used".to_string());
            return Ok(None);
        };
        let symbols = match tokio::time::timeout(ceiling, provider.universe()).await {
            Ok(symbols) => symbols?,
            Err(_) => {
                warn!(provider = provider.name(), "Universe provider did not answer within the ceiling");
                return Err(ScannerError::Timeout(ceiling));
            }
        };
        if symbols.is_empty() {
            warnings.push(format!(
                "universe provider `{}` returned no symbols; the scanner's own symbols were used",
                provider.name()
            ));
            return Ok(None);
        }
        Ok(Some(symbols))
    }
}

/// `__name__` a submission runs under. Bare scripts run as `__main__` so
/// their guarded code executes; callables are invoked by the harness.
fn module_name(shape: &EntryPointShape) -> &'static str {
    match shape {
        EntryPointShape::BareScript => "__main__",
        _ => "__scanner__",
    }
}

fn termination_label(termination: &Termination) -> &'static str {
    match termination {
        Termination::Completed => "completed",
        Termination::TimedOut(_) => "timed_out",
        Termination::Failed(_) => "failed",
    }
}

/// Drive a worker from a dedicated thread owning a current-thread runtime.
async fn run_on_owned_loop(runner: Arc<dyn ScannerRunner>, job: WorkerJob) -> Result<WorkerReport> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("scanner-owned-loop".to_string())
        .spawn(move || {
            let result = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(ScannerError::from)
                .and_then(|runtime| runtime.block_on(runner.run(job)));
            let _ = tx.send(result);
        })?;

    rx.await
        .map_err(|_| ScannerError::Worker("owned-loop thread exited without a result".to_string()))?
}
