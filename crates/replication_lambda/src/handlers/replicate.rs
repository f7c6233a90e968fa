use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;

use crate::adapters::checkpoint_store::CheckpointStore;
use crate::adapters::credentials::{CredentialLease, LeaseProvider};
use crate::adapters::destination::DestinationStore;
use crate::adapters::source::SourceListing;
use crate::adapters::{StoreError, StoreErrorKind};
use crate::retry::with_retry;
use crate::runtime::budget::Budget;
use crate::runtime::checkpoint::Checkpoint;
use crate::runtime::contract::{
    CopyOutcome, CopyStatus, CopyTask, ErrorReport, FailedObject, PageTally, ReplicationTarget,
    RunStatus, RunSummary, RUN_SUMMARY_SCHEMA_VERSION,
};
use crate::runtime::error::ReplicationError;
use crate::runtime::filter::{classify, Classification, FilterSpec};
use crate::runtime::object_keys::ListedObject;
use crate::runtime::retry::RetryPolicy;

use super::broker::CredentialBroker;
use super::enumerator::{NamespaceEnumerator, MAX_PAGE_SIZE};
use super::transfer::TransferExecutor;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSettings {
    pub page_size: usize,
    pub max_concurrent_transfers: usize,
    /// Time kept in reserve for persisting the checkpoint before the deadline.
    pub safety_margin: Duration,
    pub retry: RetryPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_concurrent_transfers: 8,
            safety_margin: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a run talks to.
#[derive(Clone, Copy)]
pub struct ReplicationDeps<'a> {
    pub source: &'a dyn SourceListing,
    pub destination: &'a dyn DestinationStore,
    pub checkpoints: &'a dyn CheckpointStore,
    pub leases: &'a dyn LeaseProvider,
    pub budget: &'a dyn Budget,
}

#[derive(Debug, Error)]
#[error("replication run {} aborted: {}", .summary.run_key, .error)]
pub struct RunAborted {
    pub summary: RunSummary,
    pub error: ReplicationError,
}

struct RunState {
    run_key: String,
    started_at: DateTime<Utc>,
    pass_number: u64,
    pages: u64,
    tally: PageTally,
    failures: Vec<FailedObject>,
    persisted_marker: Option<String>,
    completed: bool,
}

impl RunState {
    fn new(run_key: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_key,
            started_at,
            pass_number: 0,
            pages: 0,
            tally: PageTally::default(),
            failures: Vec::new(),
            persisted_marker: None,
            completed: false,
        }
    }

    fn adopt(&mut self, checkpoint: &Checkpoint) {
        self.pass_number = checkpoint.pass_number;
        self.persisted_marker = checkpoint
            .continuation_marker
            .as_ref()
            .map(|marker| marker.as_str().to_string());
        self.completed = checkpoint.completed;
    }

    fn settle_page(&mut self, checkpoint: &Checkpoint, tally: &PageTally) {
        self.adopt(checkpoint);
        self.pages += 1;
        self.tally.absorb(tally);
    }

    fn summary(&self, status: RunStatus, error: Option<&ReplicationError>) -> RunSummary {
        RunSummary {
            run_key: self.run_key.clone(),
            status,
            record_schema: RUN_SUMMARY_SCHEMA_VERSION.to_string(),
            pass_number: self.pass_number,
            pages_processed: self.pages,
            tally: self.tally,
            failures: self.failures.clone(),
            continuation_marker: self.persisted_marker.clone(),
            completed: self.completed,
            started_at: self.started_at,
            ended_at: Utc::now(),
            error: error.map(|error| ErrorReport {
                error_code: error.kind().to_string(),
                error_message: error.to_string(),
            }),
        }
    }
}

/// Runs one invocation: resume from the checkpoint, then list, filter, copy
/// and checkpoint page by page until the namespace is exhausted or the budget
/// says stop. Fatal errors leave the checkpoint at its last persisted value.
pub async fn run_replication(
    target: &ReplicationTarget,
    settings: &RunSettings,
    deps: ReplicationDeps<'_>,
) -> Result<RunSummary, RunAborted> {
    let mut state = RunState::new(target.run_key(), Utc::now());
    tracing::info!(
        component = "replication_run",
        event = "run_started",
        run_key = %state.run_key,
        source_bucket = %target.source.bucket,
        source_prefix = target.source.prefix.as_deref().unwrap_or(""),
        destination_bucket = %target.destination_bucket,
        account_ids = ?target.filter.account_ids,
        region_ids = ?target.filter.region_ids,
    );

    match drive(target, settings, deps, &mut state).await {
        Ok(status) => {
            let summary = state.summary(status, None);
            tracing::info!(
                component = "replication_run",
                event = "run_finished",
                run_key = %summary.run_key,
                status = ?summary.status,
                pass_number = summary.pass_number,
                pages = summary.pages_processed,
                copied = summary.tally.copied,
                skipped_already_present = summary.tally.skipped_already_present,
                failed = summary.tally.failed,
                unparseable = summary.tally.unparseable,
                filtered_out = summary.tally.filtered_out,
                completed = summary.completed,
                continuation_marker = summary.continuation_marker.as_deref().unwrap_or(""),
            );
            Ok(summary)
        }
        Err(error) => {
            let summary = state.summary(RunStatus::Aborted, Some(&error));
            tracing::error!(
                component = "replication_run",
                event = "run_aborted",
                run_key = %summary.run_key,
                error_code = error.kind(),
                error = %error,
                pages = summary.pages_processed,
                continuation_marker = summary.continuation_marker.as_deref().unwrap_or(""),
            );
            Err(RunAborted { summary, error })
        }
    }
}

async fn drive(
    target: &ReplicationTarget,
    settings: &RunSettings,
    deps: ReplicationDeps<'_>,
    state: &mut RunState,
) -> Result<RunStatus, ReplicationError> {
    let persisted = load_checkpoint(deps.checkpoints, state).await?;
    if let Some(checkpoint) = &persisted {
        state.adopt(checkpoint);
    }
    let mut checkpoint = persisted
        .unwrap_or_else(|| Checkpoint::fresh(state.run_key.clone(), state.started_at))
        .begin_invocation(state.started_at);

    let broker = CredentialBroker::new(deps.leases, settings.retry);
    let lease = broker.acquire().await?;
    verify_access(target, deps, &lease, &settings.retry).await?;

    let enumerator =
        NamespaceEnumerator::new(deps.source, &broker, settings.retry, settings.page_size);
    let executor = TransferExecutor::new(deps.destination, settings.retry);
    let mut slowest_page = Duration::ZERO;

    loop {
        if deps.budget.should_stop(settings.safety_margin + slowest_page) {
            tracing::info!(
                component = "replication_run",
                event = "budget_exhausted",
                run_key = %state.run_key,
                remaining_ms = deps.budget.remaining().as_millis() as u64,
                slowest_page_ms = slowest_page.as_millis() as u64,
            );
            checkpoint.record_yield(Utc::now());
            save_checkpoint(deps.checkpoints, &checkpoint).await?;
            state.adopt(&checkpoint);
            return Ok(RunStatus::Yielded);
        }

        let page_started = Instant::now();
        let page = enumerator
            .list_page(checkpoint.continuation_marker.as_ref())
            .await?;
        let listed = page.objects.len();

        let (tasks, mut tally) = filter_page(deps.source.bucket(), &target.filter, page.objects);
        let outcomes =
            copy_page(&broker, &executor, tasks, settings.max_concurrent_transfers).await?;
        for outcome in outcomes {
            tally.record(outcome.status);
            if let (CopyStatus::Failed, Some(error)) = (outcome.status, outcome.error) {
                tracing::warn!(
                    component = "replication_run",
                    event = "object_failed",
                    key = %outcome.task.destination_key,
                    attempts = error.attempts,
                    error = %error.message,
                );
                state.failures.push(FailedObject {
                    key: outcome.task.destination_key,
                    error,
                });
            }
        }

        checkpoint.record_page(&tally, page.next_marker, Utc::now());
        save_checkpoint(deps.checkpoints, &checkpoint).await?;
        state.settle_page(&checkpoint, &tally);

        let elapsed = page_started.elapsed();
        slowest_page = slowest_page.max(elapsed);
        tracing::info!(
            component = "replication_run",
            event = "page_settled",
            run_key = %state.run_key,
            page = checkpoint.pages_processed,
            listed,
            copied = tally.copied,
            skipped_already_present = tally.skipped_already_present,
            failed = tally.failed,
            unparseable = tally.unparseable,
            filtered_out = tally.filtered_out,
            duration_ms = elapsed.as_millis() as u64,
        );

        if checkpoint.completed {
            return Ok(RunStatus::Completed);
        }
    }
}

/// Returns the stored checkpoint for this run key, as it was saved.
async fn load_checkpoint(
    store: &dyn CheckpointStore,
    state: &RunState,
) -> Result<Option<Checkpoint>, ReplicationError> {
    let loaded = store.load(&state.run_key).await.map_err(|error| {
        ReplicationError::Checkpoint(format!("loading checkpoint {}: {error}", state.run_key))
    })?;

    match loaded {
        Some(checkpoint) if checkpoint.run_key != state.run_key => {
            tracing::warn!(
                component = "replication_run",
                event = "checkpoint_discarded",
                run_key = %state.run_key,
                stored_run_key = %checkpoint.run_key,
            );
            Ok(None)
        }
        loaded => Ok(loaded),
    }
}

async fn save_checkpoint(
    store: &dyn CheckpointStore,
    checkpoint: &Checkpoint,
) -> Result<(), ReplicationError> {
    store.save(checkpoint).await.map_err(|error| {
        ReplicationError::Checkpoint(format!("saving checkpoint {}: {error}", checkpoint.run_key))
    })
}

async fn verify_access(
    target: &ReplicationTarget,
    deps: ReplicationDeps<'_>,
    lease: &CredentialLease,
    retry: &RetryPolicy,
) -> Result<(), ReplicationError> {
    let transient = |error: &StoreError| error.is_transient();

    with_retry(retry, "check_source_access", transient, |_| {
        deps.source.check_access(lease)
    })
    .await
    .map_err(|failure| match failure.error.kind {
        StoreErrorKind::Transient | StoreErrorKind::Permanent => ReplicationError::Enumeration {
            attempts: failure.attempts,
            message: format!(
                "source bucket {} unreachable: {}",
                target.source.bucket, failure.error
            ),
        },
        StoreErrorKind::Denied | StoreErrorKind::NotFound => ReplicationError::Authorization(
            format!(
                "source bucket {} is not accessible: {}",
                target.source.bucket, failure.error
            ),
        ),
    })?;

    with_retry(retry, "check_destination_access", transient, |_| {
        deps.destination.check_access()
    })
    .await
    .map_err(|failure| {
        ReplicationError::Configuration(format!(
            "destination bucket {} is not usable: {}",
            target.destination_bucket, failure.error
        ))
    })
}

fn filter_page(
    bucket: &str,
    filter: &FilterSpec,
    objects: Vec<ListedObject>,
) -> (Vec<CopyTask>, PageTally) {
    let mut tasks = Vec::with_capacity(objects.len());
    let mut tally = PageTally::default();

    for object in objects {
        match classify(bucket, object, filter) {
            Classification::Matched(descriptor) => tasks.push(CopyTask::for_descriptor(descriptor)),
            Classification::FilteredOut(_) => tally.filtered_out += 1,
            Classification::Unparseable { key, reason } => {
                tally.unparseable += 1;
                tracing::warn!(
                    component = "replication_run",
                    event = "key_unparseable",
                    key = %key,
                    reason = %reason,
                );
            }
        }
    }

    (tasks, tally)
}

/// Copies a page's tasks with bounded concurrency. Outcomes come back in key
/// order; only a credential failure aborts the page.
async fn copy_page(
    broker: &CredentialBroker<'_>,
    executor: &TransferExecutor<'_>,
    tasks: Vec<CopyTask>,
    concurrency: usize,
) -> Result<Vec<CopyOutcome>, ReplicationError> {
    stream::iter(tasks)
        .map(|task| async move {
            let lease = broker.acquire().await?;
            Ok::<_, ReplicationError>(executor.copy(task, &lease).await)
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}
