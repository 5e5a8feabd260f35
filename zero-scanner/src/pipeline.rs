//! Execute → harvest → reconcile.
//!
//! Turns one execution into an [`ExecutionResult`]. Only fatal errors stop
//! the pipeline; everything else is recorded in diagnostics and the
//! pipeline continues on whatever data exists.

use std::time::Instant;

use tracing::{info, warn};

use crate::classifier::Classification;
use crate::error::ScannerError;
use crate::execution::{ExecutionAdapter, ExecutionOutcome, Termination};
use crate::harvest::{self, HarvestOutcome};
use crate::jobs::{progress, JobId, JobRegistry};
use crate::reconcile;
use crate::types::{
    Diagnostics, ErrorKind, ExecutionRequest, ExecutionResult, ExecutionStatus, ScannerSubmission,
};

/// Reports pipeline stages to the job registry.
#[derive(Debug, Clone)]
pub struct JobTracker {
    registry: JobRegistry,
    id: JobId,
}

impl JobTracker {
    pub fn new(registry: JobRegistry, id: JobId) -> Self {
        Self { registry, id }
    }

    async fn advance(&self, value: f64) {
        self.registry.progress(self.id, value).await;
    }
}

/// Run a classified submission end to end.
pub async fn run(
    adapter: &ExecutionAdapter,
    submission: &ScannerSubmission,
    classification: &Classification,
    request: &ExecutionRequest,
    tracker: Option<&JobTracker>,
) -> ExecutionResult {
    let started = Instant::now();
    let mut diagnostics = Diagnostics::new(classification.shape.clone(), request.mode);

    if let Some(tracker) = tracker {
        tracker.advance(progress::RUNNING).await;
    }

    let outcome = match adapter.execute(submission, classification, request).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(filename = %submission.filename(), error = %err, "Scanner execution failed");
            diagnostics.note(format!("execution did not produce a namespace ({})", err.code()));
            diagnostics.elapsed_ms = elapsed_ms(started);
            return ExecutionResult::failed(diagnostics, &err);
        }
    };

    if let Some(tracker) = tracker {
        tracker.advance(progress::HARVESTING).await;
    }
    let mut result = assemble(outcome, classification, request, diagnostics, tracker).await;
    result.diagnostics.elapsed_ms = elapsed_ms(started);
    info!(
        filename = %submission.filename(),
        status = ?result.status,
        records = result.records.len(),
        elapsed_ms = result.diagnostics.elapsed_ms,
        "Scanner pipeline finished"
    );
    result
}

async fn assemble(
    outcome: ExecutionOutcome,
    classification: &Classification,
    request: &ExecutionRequest,
    mut diagnostics: Diagnostics,
    tracker: Option<&JobTracker>,
) -> ExecutionResult {
    diagnostics.strategy = Some(outcome.strategy);
    diagnostics.universe_size = outcome.universe_size;
    diagnostics.neutralized_lines = outcome.neutralized_lines;
    diagnostics.stderr_tail = outcome.stderr_tail;
    for warning in outcome.warnings {
        diagnostics.note(warning);
    }

    let mut records = Vec::new();
    match harvest::harvest(&outcome.namespace, &classification.shape) {
        HarvestOutcome::Found(found) => {
            diagnostics.harvested_from = Some(found.source.to_string());
            diagnostics.harvested_records = found.records.len();

            if let Some(tracker) = tracker {
                tracker.advance(progress::RECONCILING).await;
            }
            let reconciled = reconcile::reconcile(found.records, request.start_date, request.end_date);
            diagnostics.dropped_unparseable_dates = reconciled.dropped_unparseable;
            diagnostics.dropped_out_of_range = reconciled.dropped_out_of_range;
            if reconciled.dropped_unparseable > 0 {
                diagnostics.error(
                    ErrorKind::DateParseError,
                    format!(
                        "{} record(s) dropped: missing or unparseable date",
                        reconciled.dropped_unparseable
                    ),
                    None,
                );
            }
            records = reconciled.records;
        }
        HarvestOutcome::NotFound => {
            diagnostics.note(format!(
                "no result variable found among {} bound name(s); empty result",
                outcome.namespace.names().len()
            ));
        }
    }

    let status = match outcome.termination {
        Termination::Completed => ExecutionStatus::Success,
        Termination::TimedOut(ceiling) => {
            diagnostics.record(&ScannerError::Timeout(ceiling));
            salvage_status(&diagnostics)
        }
        Termination::Failed(failure) => {
            let err = failure.to_error();
            diagnostics.error(ErrorKind::from_error(&err), err.to_string(), failure.traceback);
            salvage_status(&diagnostics)
        }
    };

    diagnostics.note(format!(
        "{} of {} harvested record(s) inside {}..{}",
        records.len(),
        diagnostics.harvested_records,
        request.start_date,
        request.end_date
    ));

    ExecutionResult {
        status,
        records,
        diagnostics,
    }
}

/// An interrupted run is Partial when anything was harvested.
fn salvage_status(diagnostics: &Diagnostics) -> ExecutionStatus {
    if diagnostics.harvested_records > 0 {
        ExecutionStatus::Partial
    } else {
        ExecutionStatus::Failed
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
