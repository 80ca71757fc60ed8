//! Checkpointed, resumable collection over a seed list of work items.
//!
//! Each item moves `Pending -> InProgress -> {Completed | NoDataFound |
//! Failed(retryable) | Failed(permanent)}`. Failures are never retried inline
//! (beyond the client's own backoff); they are deferred to retry passes that
//! run after the main pass. Items still failing after the last pass are
//! marked permanent and reported for manual review.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::checkpoint::{CheckpointError, CheckpointSession, CheckpointStatus, ProgressCheckpoint};
use crate::config::CollectorConfig;
use crate::dedup::dedupe;
use crate::error::{CollectorError, FailureReason};
use crate::openfec::{OpenFecClient, TrackerSummary};
use crate::resolver::CommitteeRoleResolver;
use crate::sink::FilingSink;
use crate::types::{CollectedEntity, FilingOutcome, ItemStatus, WorkItem};

type Observer = Box<dyn FnMut(&WorkItem, ItemStatus) + Send>;

/// A work item given up on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermanentFailure {
    pub key: String,
    pub reason: String,
    pub attempts: u32,
}

/// Outcome counts for one run, over the distinct items of the seed list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_items: usize,
    pub completed: usize,
    pub no_data: usize,
    pub retryable_failed: usize,
    pub permanent_failed: usize,
    /// Items already in a terminal state when the run started.
    pub skipped: usize,
    /// Items that failed at first and succeeded in a retry pass.
    pub recovered_on_retry: usize,
    pub retry_passes_run: u32,
    pub permanent_failures: Vec<PermanentFailure>,
    pub requests: TrackerSummary,
}

impl RunSummary {
    /// False while any item is failed, retryable or not.
    pub fn is_success(&self) -> bool {
        self.permanent_failed == 0 && self.retryable_failed == 0
    }
}

/// Top-level orchestrator and sole writer of the progress checkpoint.
pub struct CheckpointedCollector<S> {
    client: Arc<OpenFecClient>,
    resolver: CommitteeRoleResolver,
    session: CheckpointSession,
    sink: S,
    config: CollectorConfig,
    observer: Option<Observer>,
}

impl<S: FilingSink> CheckpointedCollector<S> {
    pub fn new(
        client: Arc<OpenFecClient>,
        session: CheckpointSession,
        sink: S,
        config: CollectorConfig,
    ) -> Self {
        Self {
            resolver: CommitteeRoleResolver::new(Arc::clone(&client)),
            client,
            session,
            sink,
            config,
            observer: None,
        }
    }

    /// Report each item's status after it is processed or skipped.
    pub fn with_observer(
        mut self,
        observer: impl FnMut(&WorkItem, ItemStatus) + Send + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn checkpoint(&self) -> &ProgressCheckpoint {
        self.session.state()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Persist progress now (used on interrupt).
    pub fn flush(&mut self) -> Result<(), CheckpointError> {
        self.session.flush()
    }

    /// Collect one work item without touching the checkpoint.
    ///
    /// Filings are fetched first so that items with no data cost no history
    /// lookup. Role resolution never fails; an unresolvable role is `Unknown`.
    pub async fn collect_item(&self, item: &WorkItem) -> FilingOutcome {
        let raw = match self
            .client
            .committee_reports(item.committee_id(), item.cycle())
            .await
        {
            Ok(raw) => raw,
            Err(e) => return FilingOutcome::Failed(FailureReason::from(&e)),
        };

        let deduped = dedupe(&raw);
        if deduped.canonical.is_empty() {
            if !deduped.dropped.is_empty() {
                tracing::warn!(
                    item = %item,
                    dropped = deduped.dropped.len(),
                    "every filing was missing key fields"
                );
            }
            return FilingOutcome::NoDataFound;
        }

        let role = self.resolver.resolve(item.committee_id(), item.cycle()).await;

        FilingOutcome::Completed(CollectedEntity {
            item: item.clone(),
            role,
            filings: deduped.canonical,
            dropped_filings: deduped.dropped.len(),
        })
    }

    /// Run the main pass and the retry passes over `seeds`.
    ///
    /// Returns an error only for checkpoint or sink failures; upstream
    /// failures are classified per item and reported in the summary.
    pub async fn run(&mut self, seeds: &[WorkItem]) -> Result<RunSummary, CollectorError> {
        let mut seen = HashSet::new();
        let items: Vec<&WorkItem> = seeds.iter().filter(|i| seen.insert(i.key())).collect();

        let mut summary = RunSummary {
            total_items: items.len(),
            ..RunSummary::default()
        };

        tracing::info!(
            items = items.len(),
            already_done = self.session.state().completed_ids().len(),
            "starting collection run"
        );

        // Main pass
        for item in &items {
            if self.session.status(&item.key()).is_terminal() {
                summary.skipped += 1;
                self.notify(item, ItemStatus::Skipped);
                continue;
            }
            self.process(item).await?;
        }

        // Retry passes over the failed set only
        for pass in 1..=self.config.max_retry_passes {
            let retry: Vec<&WorkItem> = items
                .iter()
                .copied()
                .filter(|i| self.session.status(&i.key()) == CheckpointStatus::RetryableFailed)
                .collect();
            if retry.is_empty() {
                break;
            }

            tracing::info!(pass, items = retry.len(), "starting retry pass");
            summary.retry_passes_run = pass;
            for item in retry {
                let status = self.process(item).await?;
                if matches!(status, ItemStatus::Completed | ItemStatus::NoDataFound) {
                    summary.recovered_on_retry += 1;
                }
            }
        }

        // Out of passes: whatever still fails is permanent
        for item in &items {
            if self.session.mark_permanent(&item.key()) {
                tracing::warn!(item = %item, "giving up after retry passes");
                self.notify(item, ItemStatus::PermanentFailed);
            }
        }

        self.session.flush()?;

        self.tally(&items, &mut summary);
        summary.requests = self.client.tracker_summary();

        tracing::info!(
            completed = summary.completed,
            no_data = summary.no_data,
            retryable_failed = summary.retryable_failed,
            permanent_failed = summary.permanent_failed,
            skipped = summary.skipped,
            "collection run finished"
        );
        Ok(summary)
    }

    async fn process(&mut self, item: &WorkItem) -> Result<ItemStatus, CollectorError> {
        let key = item.key();
        let status = match self.collect_item(item).await {
            FilingOutcome::Completed(entity) => {
                self.sink.deliver(&entity)?;
                self.session.mark_completed(&key);
                tracing::info!(
                    item = %item,
                    filings = entity.filings.len(),
                    "collected"
                );
                ItemStatus::Completed
            }
            FilingOutcome::NoDataFound => {
                self.session.mark_no_data(&key);
                tracing::info!(item = %item, "no filings found");
                ItemStatus::NoDataFound
            }
            FilingOutcome::Failed(reason) => {
                let permanent = self.config.client_errors_permanent && reason.is_client_error();
                tracing::warn!(item = %item, permanent, "collection failed: {}", reason);
                self.session.mark_failed(&key, reason, !permanent);
                if permanent {
                    ItemStatus::PermanentFailed
                } else {
                    ItemStatus::RetryableFailed
                }
            }
        };

        self.session.item_processed()?;
        self.notify(item, status);
        Ok(status)
    }

    fn tally(&self, items: &[&WorkItem], summary: &mut RunSummary) {
        let state = self.session.state();
        for item in items {
            let key = item.key();
            match state.status(&key) {
                CheckpointStatus::Completed => summary.completed += 1,
                CheckpointStatus::NoData => summary.no_data += 1,
                CheckpointStatus::RetryableFailed => summary.retryable_failed += 1,
                CheckpointStatus::PermanentFailed => {
                    summary.permanent_failed += 1;
                    if let Some(record) = state.failed_ids().get(&key) {
                        summary.permanent_failures.push(PermanentFailure {
                            key,
                            reason: record.reason.to_string(),
                            attempts: record.attempts,
                        });
                    }
                }
                CheckpointStatus::NotSeen => {}
            }
        }
    }

    fn notify(&mut self, item: &WorkItem, status: ItemStatus) {
        if let Some(observer) = self.observer.as_mut() {
            observer(item, status);
        }
    }
}
