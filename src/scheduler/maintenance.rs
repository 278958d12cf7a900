//! Maintenance sweeps: un-stick orphaned items, requeue recoverable failures

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Store, StoreError};
use crate::services::clock::Clock;
use crate::services::error::is_retryable;
use crate::services::queue::{JobQueue, PublishJob};
use crate::services::throttle::Throttle;

const MAINTENANCE_KEY: &str = "maintenance";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequeueReport {
    pub requeued: usize,
    pub permanent: usize,
    pub no_account: usize,
    pub errors: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub reset: usize,
    pub requeue: RequeueReport,
}

pub struct MaintenanceSweeper {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    throttle: Throttle,
    stuck_after: Duration,
    lookback: Duration,
}

impl MaintenanceSweeper {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        min_interval: Duration,
        stuck_after: Duration,
        lookback: Duration,
    ) -> Self {
        Self {
            throttle: Throttle::new(clock.clone(), min_interval),
            store,
            queue,
            clock,
            stuck_after,
            lookback,
        }
    }

    /// Both sweeps with the configured thresholds, at most once per interval.
    /// Returns `None` when throttled.
    pub async fn run(&self) -> Result<Option<MaintenanceReport>, StoreError> {
        if !self.throttle.try_acquire(MAINTENANCE_KEY) {
            return Ok(None);
        }

        let reset = self.reset_stuck_items(self.stuck_after).await?;
        let requeue = self.requeue_failures(self.lookback).await?;
        Ok(Some(MaintenanceReport { reset, requeue }))
    }

    /// Queued items untouched for longer than `older_than` go back to draft.
    pub async fn reset_stuck_items(&self, older_than: Duration) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let stale = self.store.stale_queued_items(now - older_than).await?;

        let mut reset = 0;
        for item in stale {
            let message = format!(
                "Reset by maintenance: queued since {} without completing",
                item.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if self.store.reset_item_to_draft(item.id, &message, now).await? {
                reset += 1;
                info!(
                    item_id = item.id,
                    container_id = item.container_id,
                    "Stuck item reset to draft"
                );
            }
        }

        if reset > 0 {
            info!(reset, "Stuck item sweep finished");
        }
        Ok(reset)
    }

    /// Failed items within `lookback` whose failure is not permanent are
    /// claimed again and redispatched from the first attempt.
    pub async fn requeue_failures(&self, lookback: Duration) -> Result<RequeueReport, StoreError> {
        let now = self.clock.now();
        let failed = self.store.failed_items_since(now - lookback).await?;
        let mut report = RequeueReport::default();

        for item in failed {
            if !is_retryable(item.failure_kind, item.error_message.as_deref()) {
                report.permanent += 1;
                continue;
            }

            let account = self.store.account_for_container(item.container_id).await?;
            let Some(account) = account.filter(|a| a.is_active) else {
                report.no_account += 1;
                continue;
            };

            let claim = Uuid::new_v4();
            if !self.store.claim_item(item.id, claim, None, now).await? {
                continue;
            }

            let job = PublishJob::first_attempt(item.id, account.id, claim);
            match self.queue.enqueue_publish(job, None).await {
                Ok(()) => {
                    report.requeued += 1;
                    info!(
                        item_id = item.id,
                        account_id = account.id,
                        previous_error = item.error_message.as_deref().unwrap_or(""),
                        "Failed item requeued"
                    );
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(item_id = item.id, error = %e, "Requeue dispatch failed");
                    self.store
                        .reset_item_to_draft(item.id, &format!("Requeue failed: {}", e), now)
                        .await?;
                }
            }
        }

        if report != RequeueReport::default() {
            info!(
                requeued = report.requeued,
                permanent = report.permanent,
                no_account = report.no_account,
                errors = report.errors,
                "Failure requeue sweep finished"
            );
        }
        Ok(report)
    }
}
