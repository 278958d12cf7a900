//! Retry coordinator
//!
//! Runs one publish attempt for a [`PublishJob`] and decides what happens to
//! the item afterwards. Retries go back through the job queue with a delay;
//! the item stays queued (and keeps its claim) in between.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::publisher::{PublishError, Publisher};
use super::tokens::TokenManager;
use crate::constants::{MAX_PUBLISH_ATTEMPTS, RETRY_BACKOFF_SECS};
use crate::domain::{Store, StoreError};
use crate::services::clock::Clock;
use crate::services::error::{FailureKind, classify_message, final_failure_message};
use crate::services::queue::{JobQueue, PublishJob, QueueError};

#[derive(Debug, Error)]
pub enum RetryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Published { media_id: String },
    RetryScheduled { next_attempt: u32, delay: Duration },
    Failed { kind: FailureKind },
    /// The job no longer owns the item
    Stale,
}

/// Delay before `next_attempt` (2nd attempt waits 60s, 3rd waits 300s).
pub fn backoff_before(next_attempt: u32) -> Duration {
    let index = (next_attempt.saturating_sub(2) as usize).min(RETRY_BACKOFF_SECS.len() - 1);
    Duration::from_secs(RETRY_BACKOFF_SECS[index])
}

pub struct RetryCoordinator {
    store: Arc<dyn Store>,
    publisher: Arc<Publisher>,
    tokens: Arc<TokenManager>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl RetryCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<Publisher>,
        tokens: Arc<TokenManager>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            tokens,
            queue,
            clock,
        }
    }

    pub async fn execute(&self, job: &PublishJob) -> Result<AttemptOutcome, RetryError> {
        let Some(item) = self.store.item(job.item_id).await? else {
            info!(item_id = job.item_id, "Item gone, dropping publish job");
            return Ok(AttemptOutcome::Stale);
        };
        if !item.is_claimed_by(job.claim_id) {
            info!(
                item_id = item.id,
                status = item.status.as_str(),
                "Publish job no longer owns item, dropping"
            );
            return Ok(AttemptOutcome::Stale);
        }

        let Some(account) = self.store.account(job.account_id).await? else {
            let err = PublishError::AccountNotFound(job.account_id);
            return self.fail(job, err.kind(), &err.to_string()).await;
        };

        let mut result = self.publisher.publish(&account, &item).await;

        // One refresh-and-rerun when the remote rejects the token mid-publish
        if let Err(e) = &result
            && e.is_remote_auth()
        {
            warn!(
                item_id = item.id,
                account_id = account.id,
                attempt = job.attempt,
                error = %e,
                "Publish rejected credentials, refreshing once"
            );
            if let Ok(true) = self.tokens.refresh(&account).await {
                let refreshed = self.store.account(account.id).await?.unwrap_or(account);
                result = self.publisher.publish(&refreshed, &item).await;
            }
        }

        match result {
            Ok(media_id) => {
                let now = self.clock.now();
                if !self
                    .store
                    .mark_item_published(item.id, job.claim_id, &media_id, now)
                    .await?
                {
                    warn!(item_id = item.id, media_id = %media_id, "Published but claim was lost");
                }
                Ok(AttemptOutcome::Published { media_id })
            }
            Err(e) => self.handle_failure(job, e).await,
        }
    }

    async fn handle_failure(
        &self,
        job: &PublishJob,
        error: PublishError,
    ) -> Result<AttemptOutcome, RetryError> {
        let kind = error.kind();
        let message = error.to_string();

        if kind.is_permanent() {
            warn!(
                item_id = job.item_id,
                attempt = job.attempt,
                kind = kind.as_str(),
                error = %message,
                "Permanent publish failure"
            );
            let text = final_failure_message(kind, &message);
            return self.fail(job, kind, &text).await;
        }

        if job.attempt >= MAX_PUBLISH_ATTEMPTS {
            warn!(
                item_id = job.item_id,
                attempt = job.attempt,
                error = %message,
                "Publish retries exhausted"
            );
            let text = format!("Failed after {} attempts: {}", job.attempt, message);
            return self.fail(job, kind, &text).await;
        }

        let next_attempt = job.attempt + 1;
        let delay = backoff_before(next_attempt);
        let now = self.clock.now();
        if !self
            .store
            .record_item_error(job.item_id, job.claim_id, &message, now)
            .await?
        {
            return Ok(AttemptOutcome::Stale);
        }

        let retry = PublishJob {
            attempt: next_attempt,
            ..job.clone()
        };
        self.queue.enqueue_publish(retry, Some(delay)).await?;

        info!(
            item_id = job.item_id,
            attempt = job.attempt,
            next_attempt,
            delay_secs = delay.as_secs(),
            error = %message,
            "Publish attempt failed, retry scheduled"
        );
        Ok(AttemptOutcome::RetryScheduled {
            next_attempt,
            delay,
        })
    }

    async fn fail(
        &self,
        job: &PublishJob,
        kind: FailureKind,
        message: &str,
    ) -> Result<AttemptOutcome, RetryError> {
        let now = self.clock.now();
        if !self
            .store
            .mark_item_failed(job.item_id, job.claim_id, message, kind, now)
            .await?
        {
            return Ok(AttemptOutcome::Stale);
        }
        Ok(AttemptOutcome::Failed { kind })
    }

    /// Last word on a job the worker infrastructure has given up on.
    pub async fn on_final_failure(&self, job: &PublishJob, error: &str) -> Result<(), StoreError> {
        let kind = classify_message(error);
        let message = final_failure_message(kind, error);
        let now = self.clock.now();
        let updated = self
            .store
            .mark_item_failed(job.item_id, job.claim_id, &message, kind, now)
            .await?;
        warn!(
            item_id = job.item_id,
            attempt = job.attempt,
            kind = kind.as_str(),
            updated,
            "Publish job failed permanently"
        );
        Ok(())
    }
}
