//! Account import in bounded, self-chaining batches
//!
//! One batch walks the `/me/accounts` cursor until the cursor runs out or the
//! batch spends its page or time budget. Whatever is left is handed to a
//! delayed continuation job, so a session never holds a worker for long.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::ImportLimits;
use crate::constants::IMPORTED_TOKEN_LIFETIME_SECS;
use crate::domain::{Store, StoreError};
use crate::services::clock::Clock;
use crate::services::graph::GraphApi;
use crate::services::queue::{ImportBatchJob, JobQueue, QueueError};

#[derive(Debug, Error)]
pub enum ImporterError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No cursor left; the session is done
    Exhausted,
    TimeBudget,
    PageBudget,
    FetchFailed,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_number: u32,
    pub imported: usize,
    /// Pages without a linked business account
    pub skipped: usize,
    pub errors: usize,
    pub elapsed: Duration,
    pub stop: StopReason,
    /// Continuation that was enqueued, if any
    pub next: Option<ImportBatchJob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportProgress {
    pub total_active: usize,
    pub synced_last_24h: usize,
}

pub struct BatchImporter {
    store: Arc<dyn Store>,
    graph: Arc<dyn GraphApi>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    limits: ImportLimits,
}

impl BatchImporter {
    pub fn new(
        store: Arc<dyn Store>,
        graph: Arc<dyn GraphApi>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        limits: ImportLimits,
    ) -> Self {
        Self {
            store,
            graph,
            queue,
            clock,
            limits,
        }
    }

    /// Enqueue batch 1 of a new import session.
    pub async fn start(&self, user_access_token: &str) -> Result<(), QueueError> {
        let job = ImportBatchJob::first(user_access_token, self.limits.max_batches);
        self.queue.enqueue_import(job, None).await?;
        info!(max_batches = self.limits.max_batches, "Account import started");
        Ok(())
    }

    pub async fn run_batch(&self, job: ImportBatchJob) -> Result<BatchReport, ImporterError> {
        let started = Instant::now();
        let session_cap = self.limits.max_pages_per_import;
        let batch_budget = self.limits.pages_batch_size;

        info!(
            batch_number = job.batch_number,
            max_batches = job.max_batches,
            has_cursor = job.cursor.is_some(),
            "Starting account import batch"
        );

        let mut cursor = job.cursor.clone();
        let mut processed: u32 = 0;
        let mut imported = 0;
        let mut skipped = 0;
        let mut errors = 0;
        let mut first_call = true;

        let stop = loop {
            let session_left = session_cap.saturating_sub(job.pages_seen + processed);
            let batch_left = batch_budget.saturating_sub(processed);
            if session_left == 0 || batch_left == 0 {
                break StopReason::PageBudget;
            }

            if !first_call {
                tokio::time::sleep(self.limits.api_call_delay).await;
            }
            first_call = false;

            if started.elapsed() >= self.limits.max_processing_time {
                break StopReason::TimeBudget;
            }

            let limit = batch_left.min(session_left);
            let batch = match self
                .graph
                .fetch_pages(&job.user_access_token, cursor.as_deref(), limit)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    errors += 1;
                    warn!(
                        batch_number = job.batch_number,
                        error = %e,
                        "Fetching account pages failed"
                    );
                    break StopReason::FetchFailed;
                }
            };

            let now = self.clock.now();
            let expires_at = now + chrono::Duration::seconds(IMPORTED_TOKEN_LIFETIME_SECS);
            // Both budgets are hard even when the cursor asks for a larger page
            for page in batch.pages.iter().take(limit as usize) {
                processed += 1;
                let Some(account) = page.to_account() else {
                    skipped += 1;
                    continue;
                };
                match self
                    .store
                    .upsert_imported_account(&account, &job.user_access_token, expires_at, now)
                    .await
                {
                    Ok(_) => imported += 1,
                    Err(e) => {
                        errors += 1;
                        error!(
                            batch_number = job.batch_number,
                            business_account_id = %account.business_account_id,
                            username = %account.username,
                            error = %e,
                            "Failed to import account"
                        );
                    }
                }
            }

            cursor = batch.next;
            if cursor.is_none() {
                break StopReason::Exhausted;
            }
        };

        let pages_seen = job.pages_seen + processed;
        let next = self.continuation(&job, stop, cursor, pages_seen);
        if let Some(next) = &next {
            self.queue
                .enqueue_import(next.clone(), Some(self.limits.continuation_delay))
                .await?;
            info!(
                batch_number = job.batch_number,
                next_batch_number = next.batch_number,
                "Queued next import batch"
            );
        } else {
            info!(
                batch_number = job.batch_number,
                reason = finish_reason(stop),
                pages_seen,
                "Account import finished"
            );
        }

        let report = BatchReport {
            batch_number: job.batch_number,
            imported,
            skipped,
            errors,
            elapsed: started.elapsed(),
            stop,
            next,
        };
        info!(
            batch_number = report.batch_number,
            imported = report.imported,
            skipped = report.skipped,
            errors = report.errors,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Completed account import batch"
        );
        Ok(report)
    }

    fn continuation(
        &self,
        job: &ImportBatchJob,
        stop: StopReason,
        cursor: Option<String>,
        pages_seen: u32,
    ) -> Option<ImportBatchJob> {
        if stop == StopReason::Exhausted
            || job.batch_number >= job.max_batches
            || pages_seen >= self.limits.max_pages_per_import
        {
            return None;
        }
        // A failed first fetch retries from the same cursor, possibly the start
        if stop != StopReason::FetchFailed && cursor.is_none() {
            return None;
        }
        Some(ImportBatchJob {
            user_access_token: job.user_access_token.clone(),
            cursor,
            batch_number: job.batch_number + 1,
            max_batches: job.max_batches,
            pages_seen,
        })
    }
}

fn finish_reason(stop: StopReason) -> &'static str {
    match stop {
        StopReason::Exhausted => "no_more_pages",
        _ => "limit_reached",
    }
}

pub async fn import_progress(
    store: &dyn Store,
    clock: &dyn Clock,
) -> Result<ImportProgress, StoreError> {
    let since = clock.now() - chrono::Duration::hours(24);
    let total_active = store.active_accounts().await?.len();
    let synced_last_24h = store.accounts_synced_since(since).await?.len();
    Ok(ImportProgress {
        total_active,
        synced_last_24h,
    })
}
