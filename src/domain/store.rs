//! Persistence seam for the orchestrator
//!
//! The orchestrator only talks to storage through [`Store`]. Timestamps are
//! always supplied by the caller (from its injected clock) rather than taken
//! from the database, so the same rules hold for every implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{Account, ContentItem, ImportedAccount, Schedule, ScheduleStatus};
use crate::services::error::FailureKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0} not found")]
    NotFound(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    // Accounts

    async fn account(&self, id: i64) -> Result<Option<Account>, StoreError>;

    async fn active_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn update_access_token(
        &self,
        account_id: i64,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn update_page_token(
        &self,
        account_id: i64,
        page_access_token: &str,
    ) -> Result<(), StoreError>;

    /// Stop the account from being selected until it is re-authorised.
    async fn deactivate_account(&self, account_id: i64, at: DateTime<Utc>)
    -> Result<(), StoreError>;

    /// Insert or update keyed by business account id. Returns the row id.
    async fn upsert_imported_account(
        &self,
        account: &ImportedAccount,
        user_access_token: &str,
        token_expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// The account of the first schedule bound to `container_id`.
    async fn account_for_container(&self, container_id: i64)
    -> Result<Option<Account>, StoreError>;

    /// Active accounts synced at or after `since`.
    async fn accounts_synced_since(&self, since: DateTime<Utc>)
    -> Result<Vec<Account>, StoreError>;

    // Schedules

    async fn active_schedules(&self) -> Result<Vec<Schedule>, StoreError>;

    async fn set_schedule_position(&self, schedule_id: i64, position: i32)
    -> Result<(), StoreError>;

    async fn mark_schedule_fired(&self, schedule_id: i64, at: DateTime<Utc>)
    -> Result<(), StoreError>;

    async fn set_schedule_status(
        &self,
        schedule_id: i64,
        status: ScheduleStatus,
    ) -> Result<(), StoreError>;

    // Content items

    async fn item(&self, item_id: i64) -> Result<Option<ContentItem>, StoreError>;

    /// All items of a container ordered by ascending position.
    async fn container_items(&self, container_id: i64) -> Result<Vec<ContentItem>, StoreError>;

    /// Put every item of the container back to draft. Returns rows touched.
    async fn reset_container_items(
        &self,
        container_id: i64,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Move a draft or failed item to queued under `claim`. Returns false when
    /// the item was not in a claimable state.
    async fn claim_item(
        &self,
        item_id: i64,
        claim: Uuid,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Returns false when `claim` no longer owns the item.
    async fn mark_item_published(
        &self,
        item_id: i64,
        claim: Uuid,
        remote_media_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Returns false when `claim` no longer owns the item.
    async fn mark_item_failed(
        &self,
        item_id: i64,
        claim: Uuid,
        message: &str,
        kind: FailureKind,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Record a retryable error while the item stays queued.
    async fn record_item_error(
        &self,
        item_id: i64,
        claim: Uuid,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Return a queued item to draft, dropping its claim.
    async fn reset_item_to_draft(
        &self,
        item_id: i64,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Queued items last touched before `before`.
    async fn stale_queued_items(&self, before: DateTime<Utc>)
    -> Result<Vec<ContentItem>, StoreError>;

    /// Failed items last touched at or after `since`.
    async fn failed_items_since(&self, since: DateTime<Utc>)
    -> Result<Vec<ContentItem>, StoreError>;

    // OAuth state

    async fn save_oauth_state(&self, state: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Consume a state created at or after `not_before`. Returns whether it existed.
    async fn take_oauth_state(
        &self,
        state: &str,
        not_before: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
