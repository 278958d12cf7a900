//! In-memory [`Store`] for orchestrator tests
//!
//! Applies the same conditional-update rules as the Postgres queries.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{Account, ContentItem, ImportedAccount, ItemStatus, Schedule, ScheduleStatus};
use super::store::{Store, StoreError};
use crate::services::error::FailureKind;

#[derive(Default)]
struct State {
    accounts: Vec<Account>,
    schedules: Vec<Schedule>,
    items: Vec<ContentItem>,
    oauth_states: HashMap<String, DateTime<Utc>>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn item_mut(&mut self, id: i64) -> Option<&mut ContentItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    fn claimed_item_mut(&mut self, id: i64, claim: Uuid) -> Option<&mut ContentItem> {
        self.items
            .iter_mut()
            .find(|i| i.id == id && i.is_claimed_by(claim))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert_account(&self, mut account: Account) -> i64 {
        let mut state = self.lock();
        if account.id == 0 {
            account.id = state.next_id();
        }
        let id = account.id;
        state.accounts.push(account);
        id
    }

    pub fn insert_schedule(&self, mut schedule: Schedule) -> i64 {
        let mut state = self.lock();
        if schedule.id == 0 {
            schedule.id = state.next_id();
        }
        let id = schedule.id;
        state.schedules.push(schedule);
        id
    }

    pub fn insert_item(&self, mut item: ContentItem) -> i64 {
        let mut state = self.lock();
        if item.id == 0 {
            item.id = state.next_id();
        }
        let id = item.id;
        state.items.push(item);
        id
    }

    pub fn account_snapshot(&self, id: i64) -> Account {
        self.lock()
            .accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .unwrap()
    }

    pub fn all_accounts(&self) -> Vec<Account> {
        self.lock().accounts.clone()
    }

    pub fn schedule_snapshot(&self, id: i64) -> Schedule {
        self.lock()
            .schedules
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .unwrap()
    }

    pub fn item_snapshot(&self, id: i64) -> ContentItem {
        self.lock()
            .items
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .unwrap()
    }

    pub fn update_item(&self, id: i64, f: impl FnOnce(&mut ContentItem)) {
        let mut state = self.lock();
        if let Some(item) = state.item_mut(id) {
            f(item);
        }
    }

    pub fn update_account(&self, id: i64, f: impl FnOnce(&mut Account)) {
        let mut state = self.lock();
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) {
            f(account);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        Ok(self.lock().accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn active_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .lock()
            .accounts
            .iter()
            .filter(|a| a.is_active)
            .cloned()
            .collect())
    }

    async fn update_access_token(
        &self,
        account_id: i64,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))?;
        account.access_token = access_token.to_string();
        account.token_expires_at = Some(expires_at);
        Ok(())
    }

    async fn update_page_token(
        &self,
        account_id: i64,
        page_access_token: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))?;
        account.page_access_token = Some(page_access_token.to_string());
        Ok(())
    }

    async fn deactivate_account(
        &self,
        account_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == account_id) {
            account.is_active = false;
            account.last_sync_at = Some(at);
        }
        Ok(())
    }

    async fn upsert_imported_account(
        &self,
        imported: &ImportedAccount,
        user_access_token: &str,
        token_expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let mut state = self.lock();
        let existing = state.accounts.iter().position(|a| {
            a.business_account_id.as_deref() == Some(imported.business_account_id.as_str())
        });

        let index = match existing {
            Some(index) => index,
            None => {
                let id = state.next_id();
                state.accounts.push(Account {
                    id,
                    username: String::new(),
                    access_token: String::new(),
                    token_expires_at: None,
                    business_account_id: Some(imported.business_account_id.clone()),
                    page_id: None,
                    page_access_token: None,
                    is_active: true,
                    last_sync_at: None,
                });
                state.accounts.len() - 1
            }
        };
        let account = &mut state.accounts[index];

        account.username = imported.username.clone();
        account.access_token = user_access_token.to_string();
        account.token_expires_at = Some(token_expires_at);
        account.page_id = Some(imported.page_id.clone());
        account.page_access_token = Some(imported.page_access_token.clone());
        account.is_active = true;
        account.last_sync_at = Some(at);
        Ok(account.id)
    }

    async fn account_for_container(
        &self,
        container_id: i64,
    ) -> Result<Option<Account>, StoreError> {
        let state = self.lock();
        let account_id = state
            .schedules
            .iter()
            .filter(|s| s.container_id == container_id)
            .min_by_key(|s| s.id)
            .map(|s| s.account_id);
        Ok(account_id.and_then(|id| state.accounts.iter().find(|a| a.id == id).cloned()))
    }

    async fn accounts_synced_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .lock()
            .accounts
            .iter()
            .filter(|a| a.is_active && a.last_sync_at.is_some_and(|t| t >= since))
            .cloned()
            .collect())
    }

    async fn active_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        Ok(self
            .lock()
            .schedules
            .iter()
            .filter(|s| s.status == ScheduleStatus::Active)
            .cloned()
            .collect())
    }

    async fn set_schedule_position(
        &self,
        schedule_id: i64,
        position: i32,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(schedule) = state.schedules.iter_mut().find(|s| s.id == schedule_id) {
            schedule.current_position = position;
        }
        Ok(())
    }

    async fn mark_schedule_fired(
        &self,
        schedule_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(schedule) = state.schedules.iter_mut().find(|s| s.id == schedule_id) {
            schedule.last_posted_at = Some(at);
        }
        Ok(())
    }

    async fn set_schedule_status(
        &self,
        schedule_id: i64,
        status: ScheduleStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(schedule) = state.schedules.iter_mut().find(|s| s.id == schedule_id) {
            schedule.status = status;
        }
        Ok(())
    }

    async fn item(&self, item_id: i64) -> Result<Option<ContentItem>, StoreError> {
        Ok(self.lock().items.iter().find(|i| i.id == item_id).cloned())
    }

    async fn container_items(&self, container_id: i64) -> Result<Vec<ContentItem>, StoreError> {
        let mut items: Vec<ContentItem> = self
            .lock()
            .items
            .iter()
            .filter(|i| i.container_id == container_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.position);
        Ok(items)
    }

    async fn reset_container_items(
        &self,
        container_id: i64,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let mut touched = 0;
        for item in state.items.iter_mut().filter(|i| i.container_id == container_id) {
            item.status = ItemStatus::Draft;
            item.error_message = None;
            item.failure_kind = None;
            item.claim_id = None;
            item.updated_at = at;
            touched += 1;
        }
        Ok(touched)
    }

    async fn claim_item(
        &self,
        item_id: i64,
        claim: Uuid,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.item_mut(item_id) {
            Some(item) if matches!(item.status, ItemStatus::Draft | ItemStatus::Failed) => {
                item.status = ItemStatus::Queued;
                item.claim_id = Some(claim);
                item.error_message = note.map(str::to_string);
                item.failure_kind = None;
                item.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_item_published(
        &self,
        item_id: i64,
        claim: Uuid,
        remote_media_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.claimed_item_mut(item_id, claim) {
            Some(item) => {
                item.status = ItemStatus::Published;
                item.remote_media_id = Some(remote_media_id.to_string());
                item.posted_at = Some(at);
                item.error_message = None;
                item.failure_kind = None;
                item.claim_id = None;
                item.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_item_failed(
        &self,
        item_id: i64,
        claim: Uuid,
        message: &str,
        kind: FailureKind,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.claimed_item_mut(item_id, claim) {
            Some(item) => {
                item.status = ItemStatus::Failed;
                item.error_message = Some(message.to_string());
                item.failure_kind = Some(kind);
                item.claim_id = None;
                item.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_item_error(
        &self,
        item_id: i64,
        claim: Uuid,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.claimed_item_mut(item_id, claim) {
            Some(item) => {
                item.error_message = Some(message.to_string());
                item.failure_kind = Some(FailureKind::Transient);
                item.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_item_to_draft(
        &self,
        item_id: i64,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.item_mut(item_id) {
            Some(item) if item.status == ItemStatus::Queued => {
                item.status = ItemStatus::Draft;
                item.error_message = Some(message.to_string());
                item.failure_kind = None;
                item.claim_id = None;
                item.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stale_queued_items(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>, StoreError> {
        Ok(self
            .lock()
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Queued && i.updated_at < before)
            .cloned()
            .collect())
    }

    async fn failed_items_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>, StoreError> {
        Ok(self
            .lock()
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Failed && i.updated_at >= since)
            .cloned()
            .collect())
    }

    async fn save_oauth_state(&self, state: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.lock().oauth_states.insert(state.to_string(), at);
        Ok(())
    }

    async fn take_oauth_state(
        &self,
        state: &str,
        not_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        let fresh = guard
            .oauth_states
            .get(state)
            .is_some_and(|created| *created >= not_before);
        if fresh {
            guard.oauth_states.remove(state);
        }
        Ok(fresh)
    }
}
