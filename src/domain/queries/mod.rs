//! Postgres queries and the [`PgStore`] implementation of [`Store`]
//!
//! Query functions take a generic sqlx `Executor`, so they run equally on
//! the pool or inside a transaction (`&mut *tx`).

pub mod accounts;
pub mod items;
pub mod schedules;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::models::{Account, ContentItem, ImportedAccount, Schedule, ScheduleStatus};
use super::store::{Store, StoreError};
use crate::services::error::FailureKind;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        Ok(accounts::get_account(&self.pool, id).await?)
    }

    async fn active_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(accounts::list_active_accounts(&self.pool).await?)
    }

    async fn update_access_token(
        &self,
        account_id: i64,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(accounts::update_access_token(&self.pool, account_id, access_token, expires_at).await?)
    }

    async fn update_page_token(
        &self,
        account_id: i64,
        page_access_token: &str,
    ) -> Result<(), StoreError> {
        Ok(accounts::update_page_token(&self.pool, account_id, page_access_token).await?)
    }

    async fn deactivate_account(
        &self,
        account_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(accounts::deactivate_account(&self.pool, account_id, at).await?)
    }

    async fn upsert_imported_account(
        &self,
        account: &ImportedAccount,
        user_access_token: &str,
        token_expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Ok(accounts::upsert_imported_account(
            &self.pool,
            account,
            user_access_token,
            token_expires_at,
            at,
        )
        .await?)
    }

    async fn account_for_container(
        &self,
        container_id: i64,
    ) -> Result<Option<Account>, StoreError> {
        Ok(accounts::account_for_container(&self.pool, container_id).await?)
    }

    async fn accounts_synced_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        Ok(accounts::list_accounts_synced_since(&self.pool, since).await?)
    }

    async fn active_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        Ok(schedules::list_active_schedules(&self.pool).await?)
    }

    async fn set_schedule_position(
        &self,
        schedule_id: i64,
        position: i32,
    ) -> Result<(), StoreError> {
        Ok(schedules::set_position(&self.pool, schedule_id, position).await?)
    }

    async fn mark_schedule_fired(
        &self,
        schedule_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(schedules::mark_fired(&self.pool, schedule_id, at).await?)
    }

    async fn set_schedule_status(
        &self,
        schedule_id: i64,
        status: ScheduleStatus,
    ) -> Result<(), StoreError> {
        Ok(schedules::set_status(&self.pool, schedule_id, status).await?)
    }

    async fn item(&self, item_id: i64) -> Result<Option<ContentItem>, StoreError> {
        Ok(items::get_item(&self.pool, item_id).await?)
    }

    async fn container_items(&self, container_id: i64) -> Result<Vec<ContentItem>, StoreError> {
        Ok(items::list_container_items(&self.pool, container_id).await?)
    }

    async fn reset_container_items(
        &self,
        container_id: i64,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(items::reset_container_items(&self.pool, container_id, at).await?)
    }

    async fn claim_item(
        &self,
        item_id: i64,
        claim: Uuid,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(items::claim_item(&self.pool, item_id, claim, note, at).await?)
    }

    async fn mark_item_published(
        &self,
        item_id: i64,
        claim: Uuid,
        remote_media_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(items::mark_item_published(&self.pool, item_id, claim, remote_media_id, at).await?)
    }

    async fn mark_item_failed(
        &self,
        item_id: i64,
        claim: Uuid,
        message: &str,
        kind: FailureKind,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(items::mark_item_failed(&self.pool, item_id, claim, message, kind, at).await?)
    }

    async fn record_item_error(
        &self,
        item_id: i64,
        claim: Uuid,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(items::record_item_error(&self.pool, item_id, claim, message, at).await?)
    }

    async fn reset_item_to_draft(
        &self,
        item_id: i64,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(items::reset_item_to_draft(&self.pool, item_id, message, at).await?)
    }

    async fn stale_queued_items(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>, StoreError> {
        Ok(items::stale_queued_items(&self.pool, before).await?)
    }

    async fn failed_items_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>, StoreError> {
        Ok(items::failed_items_since(&self.pool, since).await?)
    }

    async fn save_oauth_state(&self, state: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        Ok(schedules::save_oauth_state(&self.pool, state, at).await?)
    }

    async fn take_oauth_state(
        &self,
        state: &str,
        not_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(schedules::take_oauth_state(&self.pool, state, not_before).await?)
    }
}
