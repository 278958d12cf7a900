//! Background workers using apalis
//!
//! Publish attempts and import batches are consumed from Postgres-backed
//! storages. The tick, maintenance sweep and token sweep are cron streams
//! piped into their own storages, so a missed beat is picked up by whichever
//! process is running.

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::scheduler::Orchestrator;
use crate::services::queue::{ImportBatchJob, PublishJob};

const TICK_SCHEDULE: &str = "0 * * * * *";
// Offset from the tick; the sweeper throttles itself to its own interval
const MAINTENANCE_SCHEDULE: &str = "30 * * * * *";
const TOKEN_SWEEP_SCHEDULE: &str = "0 0 3 * * *";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to set up job storage: {0}")]
    Setup(#[from] sqlx::Error),

    #[error("invalid cron expression {expr}: {message}")]
    Schedule { expr: &'static str, message: String },

    #[error("worker monitor failed: {0}")]
    Monitor(String),
}

/// Cron marker: evaluate every active schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickJob {
    pub scheduled_at: DateTime<Utc>,
}

impl From<DateTime<Utc>> for TickJob {
    fn from(dt: DateTime<Utc>) -> Self {
        TickJob { scheduled_at: dt }
    }
}

/// Cron marker: stuck-item reset and failure requeue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceJob {
    pub scheduled_at: DateTime<Utc>,
}

impl From<DateTime<Utc>> for MaintenanceJob {
    fn from(dt: DateTime<Utc>) -> Self {
        MaintenanceJob { scheduled_at: dt }
    }
}

/// Cron marker: proactive token refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSweepJob {
    pub scheduled_at: DateTime<Utc>,
}

impl From<DateTime<Utc>> for TokenSweepJob {
    fn from(dt: DateTime<Utc>) -> Self {
        TokenSweepJob { scheduled_at: dt }
    }
}

/// Storages the publish and import workers consume. The same handles back
/// the [`ApalisQueue`](crate::services::queue::ApalisQueue) producers use.
#[derive(Clone)]
pub struct JobStorages {
    pub publish: PostgresStorage<PublishJob>,
    pub import: PostgresStorage<ImportBatchJob>,
}

impl JobStorages {
    /// Run apalis migrations and open both storages.
    pub async fn setup(pool: &PgPool) -> Result<Self, WorkerError> {
        PostgresStorage::setup(pool).await?;
        Ok(Self {
            publish: PostgresStorage::new(pool.clone()),
            import: PostgresStorage::new(pool.clone()),
        })
    }
}

fn failed<E>(e: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Failed(Arc::new(Box::new(e)))
}

/// One publish attempt. Anything the coordinator could not settle itself is
/// written to the item before the worker reports the failure.
async fn handle_publish(job: PublishJob, ctx: Data<Orchestrator>) -> Result<(), Error> {
    match ctx.coordinator.execute(&job).await {
        Ok(outcome) => {
            info!(
                item_id = job.item_id,
                attempt = job.attempt,
                ?outcome,
                "Publish job finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(
                item_id = job.item_id,
                account_id = job.account_id,
                attempt = job.attempt,
                error = %e,
                "Publish job failed"
            );
            if let Err(store_err) = ctx.coordinator.on_final_failure(&job, &e.to_string()).await {
                error!(item_id = job.item_id, error = %store_err, "Could not record final failure");
            }
            Err(failed(e))
        }
    }
}

async fn handle_import(job: ImportBatchJob, ctx: Data<Orchestrator>) -> Result<(), Error> {
    let batch_number = job.batch_number;
    ctx.importer.run_batch(job).await.map(|_| ()).map_err(|e| {
        error!(batch_number, error = %e, "Account import batch failed");
        failed(e)
    })
}

/// Always returns Ok; per-schedule failures are logged inside the tick.
async fn handle_tick(_job: TickJob, ctx: Data<Orchestrator>) -> Result<(), Error> {
    match ctx.evaluator.tick().await {
        Ok(report) => {
            if report.dispatched > 0 || report.failed > 0 || report.completed > 0 {
                info!(
                    evaluated = report.evaluated,
                    dispatched = report.dispatched,
                    completed = report.completed,
                    failed = report.failed,
                    "Tick complete"
                );
            }
        }
        Err(e) => warn!(error = %e, "Tick could not load schedules"),
    }
    Ok(())
}

async fn handle_maintenance(_job: MaintenanceJob, ctx: Data<Orchestrator>) -> Result<(), Error> {
    match ctx.maintenance.run().await {
        Ok(Some(report)) => info!(
            reset = report.reset,
            requeued = report.requeue.requeued,
            "Maintenance sweep complete"
        ),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Maintenance sweep failed"),
    }
    Ok(())
}

async fn handle_token_sweep(_job: TokenSweepJob, ctx: Data<Orchestrator>) -> Result<(), Error> {
    match ctx.tokens.sweep().await {
        Ok(report) => info!(
            checked = report.checked,
            refreshed = report.refreshed,
            failed = report.failed,
            "Token sweep complete"
        ),
        Err(e) => warn!(error = %e, "Token sweep failed"),
    }
    Ok(())
}

fn schedule(expr: &'static str) -> Result<Schedule, WorkerError> {
    Schedule::from_str(expr).map_err(|e| WorkerError::Schedule {
        expr,
        message: e.to_string(),
    })
}

/// Run every worker until the monitor stops.
pub async fn run_workers(
    pool: PgPool,
    orchestrator: Orchestrator,
    storages: JobStorages,
) -> Result<(), WorkerError> {
    let tick_backend =
        CronStream::new(schedule(TICK_SCHEDULE)?).pipe_to_storage(PostgresStorage::<TickJob>::new(pool.clone()));
    let maintenance_backend = CronStream::new(schedule(MAINTENANCE_SCHEDULE)?)
        .pipe_to_storage(PostgresStorage::<MaintenanceJob>::new(pool.clone()));
    let token_backend = CronStream::new(schedule(TOKEN_SWEEP_SCHEDULE)?)
        .pipe_to_storage(PostgresStorage::<TokenSweepJob>::new(pool));

    let publish_worker = WorkerBuilder::new("publish-worker")
        .data(orchestrator.clone())
        .backend(storages.publish)
        .build_fn(handle_publish);
    let import_worker = WorkerBuilder::new("import-worker")
        .data(orchestrator.clone())
        .backend(storages.import)
        .build_fn(handle_import);
    let tick_worker = WorkerBuilder::new("tick-worker")
        .data(orchestrator.clone())
        .backend(tick_backend)
        .build_fn(handle_tick);
    let maintenance_worker = WorkerBuilder::new("maintenance-worker")
        .data(orchestrator.clone())
        .backend(maintenance_backend)
        .build_fn(handle_maintenance);
    let token_worker = WorkerBuilder::new("token-sweep-worker")
        .data(orchestrator)
        .backend(token_backend)
        .build_fn(handle_token_sweep);

    info!(
        tick = TICK_SCHEDULE,
        maintenance = MAINTENANCE_SCHEDULE,
        token_sweep = TOKEN_SWEEP_SCHEDULE,
        "Apalis workers starting"
    );

    Monitor::new()
        .register(publish_worker)
        .register(import_worker)
        .register(tick_worker)
        .register(maintenance_worker)
        .register(token_worker)
        .run()
        .await
        .map_err(|e| WorkerError::Monitor(e.to_string()))
}
