//! Fakes and fixtures for orchestrator tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::domain::models::{Account, ContentItem, ItemStatus, Schedule, ScheduleStatus};
use crate::services::graph::{
    BusinessAccount, ContainerStatus, GraphApi, GraphError, MediaRequest, PageBatch, RemotePage,
    TokenGrant,
};
use crate::services::queue::{ImportBatchJob, JobQueue, PublishJob, QueueError};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 4, 12, 0, 0).unwrap()
}

/// Graph errors the fake can be told to return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scripted {
    Auth,
    Throttled,
    BadRequest,
    Empty,
}

impl Scripted {
    fn into_error(self, what: &'static str) -> GraphError {
        match self {
            Scripted::Auth => GraphError::Api {
                status: 400,
                code: Some(190),
                error_type: Some("OAuthException".into()),
                message: "Error validating access token: Session has expired".into(),
            },
            Scripted::Throttled => GraphError::Api {
                status: 400,
                code: Some(4),
                error_type: None,
                message: "Application request limit reached".into(),
            },
            Scripted::BadRequest => GraphError::Api {
                status: 400,
                code: Some(100),
                error_type: None,
                message: "Invalid parameter".into(),
            },
            Scripted::Empty => GraphError::EmptyResponse(what),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    Grant { token: String, expires_in: Option<i64> },
    Reject,
    Unreachable,
}

struct FakeState {
    token_valid: bool,
    validate_unreachable: bool,
    refresh: RefreshBehavior,
    pages: Vec<RemotePage>,
    fetch_failures: VecDeque<Scripted>,
    create_failures: VecDeque<Scripted>,
    publish_failures: VecDeque<Scripted>,
    statuses: VecDeque<ContainerStatus>,
    next_id: u32,
    calls: Vec<String>,
    created: Vec<MediaRequest>,
}

/// Scripted [`GraphApi`] that records every call.
pub struct FakeGraph {
    state: Mutex<FakeState>,
}

impl Default for FakeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGraph {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                token_valid: true,
                validate_unreachable: false,
                refresh: RefreshBehavior::Grant {
                    token: "refreshed-token".into(),
                    expires_in: Some(5_184_000),
                },
                pages: Vec::new(),
                fetch_failures: VecDeque::new(),
                create_failures: VecDeque::new(),
                publish_failures: VecDeque::new(),
                statuses: VecDeque::new(),
                next_id: 0,
                calls: Vec::new(),
                created: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_token_valid(&self, valid: bool) {
        self.lock().token_valid = valid;
    }

    pub fn set_validate_unreachable(&self, unreachable: bool) {
        self.lock().validate_unreachable = unreachable;
    }

    pub fn set_refresh(&self, behavior: RefreshBehavior) {
        self.lock().refresh = behavior;
    }

    pub fn set_pages(&self, pages: Vec<RemotePage>) {
        self.lock().pages = pages;
    }

    pub fn fail_next_fetch(&self, error: Scripted) {
        self.lock().fetch_failures.push_back(error);
    }

    pub fn fail_next_create(&self, error: Scripted) {
        self.lock().create_failures.push_back(error);
    }

    pub fn fail_next_publish(&self, error: Scripted) {
        self.lock().publish_failures.push_back(error);
    }

    pub fn push_status(&self, status: ContainerStatus) {
        self.lock().statuses.push_back(status);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn created(&self) -> Vec<MediaRequest> {
        self.lock().created.clone()
    }
}

/// `n` remote pages that each carry a business account.
pub fn remote_pages(n: usize) -> Vec<RemotePage> {
    (1..=n)
        .map(|i| RemotePage {
            id: format!("page-{}", i),
            name: Some(format!("Page {}", i)),
            access_token: Some(format!("page-token-{}", i)),
            instagram_business_account: Some(BusinessAccount {
                id: format!("ig-{}", i),
                username: Some(format!("brand{}", i)),
                media_count: Some(i as i64),
            }),
        })
        .collect()
}

fn parse_cursor(cursor: &str) -> Option<(usize, usize)> {
    let mut parts = cursor.strip_prefix("cursor:")?.split(':');
    let offset = parts.next()?.parse().ok()?;
    let limit = parts.next()?.parse().ok()?;
    Some((offset, limit))
}

#[async_trait]
impl GraphApi for FakeGraph {
    async fn validate_token(&self, _access_token: &str) -> Result<bool, GraphError> {
        let mut state = self.lock();
        state.calls.push("validate".into());
        if state.validate_unreachable {
            return Err(Scripted::Throttled.into_error("validate"));
        }
        Ok(state.token_valid)
    }

    async fn refresh_token(&self, access_token: &str) -> Result<TokenGrant, GraphError> {
        let mut state = self.lock();
        state.calls.push(format!("refresh:{}", access_token));
        match state.refresh.clone() {
            RefreshBehavior::Grant { token, expires_in } => {
                state.token_valid = true;
                Ok(TokenGrant {
                    access_token: token,
                    expires_in,
                })
            }
            RefreshBehavior::Reject => Err(Scripted::Auth.into_error("refresh")),
            RefreshBehavior::Unreachable => Err(Scripted::Throttled.into_error("refresh")),
        }
    }

    async fn fetch_pages(
        &self,
        _access_token: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<PageBatch, GraphError> {
        let mut state = self.lock();
        state
            .calls
            .push(format!("pages:{}", cursor.unwrap_or("start")));
        if let Some(error) = state.fetch_failures.pop_front() {
            return Err(error.into_error("pages"));
        }

        let (offset, limit) = match cursor {
            Some(c) => parse_cursor(c).ok_or_else(|| GraphError::Decode(c.to_string()))?,
            None => (0, limit as usize),
        };
        let end = (offset + limit).min(state.pages.len());
        let pages = state.pages[offset.min(end)..end].to_vec();
        let next = (end < state.pages.len()).then(|| format!("cursor:{}:{}", end, limit));
        Ok(PageBatch { pages, next })
    }

    async fn create_media(
        &self,
        account_id: &str,
        _access_token: &str,
        request: &MediaRequest,
    ) -> Result<String, GraphError> {
        let mut state = self.lock();
        state.calls.push(format!("create:{}", account_id));
        if let Some(error) = state.create_failures.pop_front() {
            return Err(error.into_error("media create"));
        }
        state.created.push(request.clone());
        state.next_id += 1;
        Ok(format!("container-{}", state.next_id))
    }

    async fn container_status(
        &self,
        container_id: &str,
        _access_token: &str,
    ) -> Result<ContainerStatus, GraphError> {
        let mut state = self.lock();
        state.calls.push(format!("status:{}", container_id));
        Ok(state
            .statuses
            .pop_front()
            .unwrap_or(ContainerStatus::Finished))
    }

    async fn publish_media(
        &self,
        account_id: &str,
        _access_token: &str,
        creation_id: &str,
    ) -> Result<String, GraphError> {
        let mut state = self.lock();
        state
            .calls
            .push(format!("publish:{}:{}", account_id, creation_id));
        if let Some(error) = state.publish_failures.pop_front() {
            return Err(error.into_error("media publish"));
        }
        Ok(format!("media-for-{}", creation_id))
    }
}

/// [`JobQueue`] that keeps what it was given.
#[derive(Default)]
pub struct RecordingQueue {
    publish: Mutex<Vec<(PublishJob, Option<Duration>)>>,
    import: Mutex<Vec<(ImportBatchJob, Option<Duration>)>>,
    fail: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn publish_jobs(&self) -> Vec<(PublishJob, Option<Duration>)> {
        self.publish.lock().unwrap().clone()
    }

    pub fn import_jobs(&self) -> Vec<(ImportBatchJob, Option<Duration>)> {
        self.import.lock().unwrap().clone()
    }

    pub fn take_publish_jobs(&self) -> Vec<(PublishJob, Option<Duration>)> {
        std::mem::take(&mut *self.publish.lock().unwrap())
    }

    pub fn take_import_jobs(&self) -> Vec<(ImportBatchJob, Option<Duration>)> {
        std::mem::take(&mut *self.import.lock().unwrap())
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue_publish(
        &self,
        job: PublishJob,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QueueError::Enqueue {
                job: "publish",
                message: "queue unavailable".into(),
            });
        }
        self.publish.lock().unwrap().push((job, delay));
        Ok(())
    }

    async fn enqueue_import(
        &self,
        job: ImportBatchJob,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QueueError::Enqueue {
                job: "import",
                message: "queue unavailable".into(),
            });
        }
        self.import.lock().unwrap().push((job, delay));
        Ok(())
    }
}

pub mod fixtures {
    use super::*;

    /// Active account with a token valid for 30 more days.
    pub fn account(id: i64, now: DateTime<Utc>) -> Account {
        Account {
            id,
            username: format!("brand{}", id),
            access_token: format!("user-token-{}", id),
            token_expires_at: Some(now + chrono::Duration::days(30)),
            business_account_id: Some(format!("ig-{}", id)),
            page_id: Some(format!("page-{}", id)),
            page_access_token: Some(format!("page-token-{}", id)),
            is_active: true,
            last_sync_at: None,
        }
    }

    pub fn schedule(
        id: i64,
        account_id: i64,
        container_id: i64,
        start: DateTime<Utc>,
        interval_minutes: i32,
        repeat_cycle: bool,
    ) -> Schedule {
        Schedule {
            id,
            name: format!("schedule {}", id),
            account_id,
            container_id,
            start_date: start.date_naive(),
            start_time: Some(start.time()),
            interval_minutes,
            repeat_cycle,
            status: ScheduleStatus::Active,
            last_posted_at: None,
            current_position: 0,
        }
    }

    pub fn item(id: i64, container_id: i64, position: i32, updated_at: DateTime<Utc>) -> ContentItem {
        ContentItem {
            id,
            container_id,
            position,
            caption: format!("caption {}", position),
            media: vec![format!("uploads/{}.jpg", position)],
            is_story: false,
            story_stickers: Vec::new(),
            story_duration: crate::constants::DEFAULT_STORY_DURATION_SECS,
            status: ItemStatus::Draft,
            error_message: None,
            failure_kind: None,
            claim_id: None,
            remote_media_id: None,
            posted_at: None,
            updated_at,
        }
    }
}
