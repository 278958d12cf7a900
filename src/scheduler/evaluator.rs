//! Schedule evaluator: one tick over every active schedule

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sequencer::{Selection, Sequencer};
use crate::domain::models::{ItemStatus, Schedule, ScheduleStatus};
use crate::domain::{Store, StoreError};
use crate::services::clock::Clock;
use crate::services::queue::{JobQueue, PublishJob, QueueError};

#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    NotDue,
    AccountInactive,
    Idle,
    Dispatched { item_id: i64, completed: bool },
    Completed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Another tick was still running; nothing was evaluated
    pub skipped: bool,
    pub evaluated: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct Evaluator {
    store: Arc<dyn Store>,
    sequencer: Sequencer,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    running: Mutex<()>,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
    ) -> Self {
        Self {
            sequencer: Sequencer::new(store.clone(), clock.clone()),
            store,
            queue,
            clock,
            timezone,
            running: Mutex::new(()),
        }
    }

    /// Evaluate every active schedule once. Per-schedule failures are logged
    /// and counted, never propagated.
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Previous tick still running, skipping");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };

        let schedules = self.store.active_schedules().await?;
        let mut report = TickReport::default();

        for schedule in &schedules {
            report.evaluated += 1;
            let now = self.clock.now();
            match self.evaluate(schedule, now).await {
                Ok(ScheduleOutcome::Dispatched { completed, .. }) => {
                    report.dispatched += 1;
                    if completed {
                        report.completed += 1;
                    }
                }
                Ok(ScheduleOutcome::Completed) => report.completed += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(
                        schedule_id = schedule.id,
                        account_id = schedule.account_id,
                        container_id = schedule.container_id,
                        error = %e,
                        "Failed to process schedule"
                    );
                }
            }
        }

        info!(
            evaluated = report.evaluated,
            dispatched = report.dispatched,
            completed = report.completed,
            failed = report.failed,
            "Tick finished"
        );
        Ok(report)
    }

    pub async fn evaluate(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, EvaluateError> {
        if !schedule.should_fire(now, self.timezone) {
            return Ok(ScheduleOutcome::NotDue);
        }

        let active = self
            .store
            .account(schedule.account_id)
            .await?
            .is_some_and(|a| a.is_active);
        if !active {
            debug!(
                schedule_id = schedule.id,
                account_id = schedule.account_id,
                "Account inactive, skipping schedule"
            );
            return Ok(ScheduleOutcome::AccountInactive);
        }

        let item = match self.sequencer.next(schedule).await? {
            Selection::Item(item) => item,
            Selection::Idle => return Ok(ScheduleOutcome::Idle),
            Selection::Exhausted => {
                self.store
                    .set_schedule_status(schedule.id, ScheduleStatus::Completed)
                    .await?;
                info!(schedule_id = schedule.id, "Schedule completed");
                return Ok(ScheduleOutcome::Completed);
            }
        };

        let claim = Uuid::new_v4();
        if !self.store.claim_item(item.id, claim, None, now).await? {
            debug!(
                schedule_id = schedule.id,
                item_id = item.id,
                "Item claimed elsewhere, skipping"
            );
            return Ok(ScheduleOutcome::Idle);
        }

        let job = PublishJob::first_attempt(item.id, schedule.account_id, claim);
        if let Err(e) = self.queue.enqueue_publish(job, None).await {
            // Roll back so the same item is picked again on a later tick
            self.store
                .reset_item_to_draft(item.id, &format!("Dispatch failed: {}", e), now)
                .await?;
            self.store
                .set_schedule_position(schedule.id, schedule.current_position)
                .await?;
            return Err(e.into());
        }

        self.store.mark_schedule_fired(schedule.id, now).await?;
        info!(
            schedule_id = schedule.id,
            item_id = item.id,
            position = item.position,
            account_id = schedule.account_id,
            "Item dispatched"
        );

        // Complete as soon as the last draft leaves, so the next tick is a no-op
        let mut completed = false;
        if !schedule.repeat_cycle {
            let drafts_left = self
                .store
                .container_items(schedule.container_id)
                .await?
                .iter()
                .any(|i| i.status == ItemStatus::Draft);
            if !drafts_left {
                self.store
                    .set_schedule_status(schedule.id, ScheduleStatus::Completed)
                    .await?;
                info!(schedule_id = schedule.id, "Schedule completed");
                completed = true;
            }
        }

        Ok(ScheduleOutcome::Dispatched {
            item_id: item.id,
            completed,
        })
    }
}
