//! Durable job queue
//!
//! Publish attempts and import batches are handed to apalis Postgres storage.
//! Delayed jobs rely on the storage's scheduled delivery.

use std::sync::Arc;
use std::time::Duration;

use apalis::prelude::*;
use apalis_sql::postgres::PostgresStorage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::clock::Clock;

/// One publish attempt for one claimed item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishJob {
    pub item_id: i64,
    pub account_id: i64,
    /// Fencing token written on the item when it was queued
    pub claim_id: Uuid,
    /// 1-based attempt number
    pub attempt: u32,
}

impl PublishJob {
    pub fn first_attempt(item_id: i64, account_id: i64, claim_id: Uuid) -> Self {
        Self {
            item_id,
            account_id,
            claim_id,
            attempt: 1,
        }
    }
}

/// One bounded unit of an account import session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportBatchJob {
    pub user_access_token: String,
    /// Continuation URL; `None` starts from the first page
    pub cursor: Option<String>,
    /// 1-based batch counter
    pub batch_number: u32,
    pub max_batches: u32,
    /// Remote pages processed by earlier batches of this session
    #[serde(default)]
    pub pages_seen: u32,
}

impl ImportBatchJob {
    pub fn first(user_access_token: impl Into<String>, max_batches: u32) -> Self {
        Self {
            user_access_token: user_access_token.into(),
            cursor: None,
            batch_number: 1,
            max_batches,
            pages_seen: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to enqueue {job}: {message}")]
    Enqueue { job: &'static str, message: String },
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue_publish(&self, job: PublishJob, delay: Option<Duration>)
    -> Result<(), QueueError>;

    async fn enqueue_import(
        &self,
        job: ImportBatchJob,
        delay: Option<Duration>,
    ) -> Result<(), QueueError>;
}

#[derive(Clone)]
pub struct ApalisQueue {
    publish: PostgresStorage<PublishJob>,
    import: PostgresStorage<ImportBatchJob>,
    clock: Arc<dyn Clock>,
}

impl ApalisQueue {
    pub fn new(
        publish: PostgresStorage<PublishJob>,
        import: PostgresStorage<ImportBatchJob>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            publish,
            import,
            clock,
        }
    }

    fn run_at(&self, delay: Duration) -> i64 {
        self.clock.now().timestamp() + delay.as_secs() as i64
    }
}

#[async_trait]
impl JobQueue for ApalisQueue {
    async fn enqueue_publish(
        &self,
        job: PublishJob,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        // push/schedule take &mut self; storages are cheap handles over the pool
        let mut storage = self.publish.clone();
        let result = match delay {
            Some(delay) => storage.schedule(job, self.run_at(delay)).await,
            None => storage.push(job).await,
        };
        result.map(|_| ()).map_err(|e| QueueError::Enqueue {
            job: "publish",
            message: e.to_string(),
        })
    }

    async fn enqueue_import(
        &self,
        job: ImportBatchJob,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let mut storage = self.import.clone();
        let result = match delay {
            Some(delay) => storage.schedule(job, self.run_at(delay)).await,
            None => storage.push(job).await,
        };
        result.map(|_| ()).map_err(|e| QueueError::Enqueue {
            job: "import",
            message: e.to_string(),
        })
    }
}
