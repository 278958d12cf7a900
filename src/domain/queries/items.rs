//! Content item queries

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::constants::DEFAULT_STORY_DURATION_SECS;
use crate::domain::models::{ContentItem, ItemStatus, StorySticker};
use crate::services::error::FailureKind;

const ITEM_COLUMNS: &str = r#"
    id, container_id, position, caption, media, is_story, story_stickers,
    story_duration, status, error_message, failure_kind, claim_id,
    remote_media_id, posted_at, updated_at
"#;

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    container_id: i64,
    position: i32,
    caption: String,
    media: Json<Vec<String>>,
    is_story: bool,
    story_stickers: Json<Vec<StorySticker>>,
    story_duration: i32,
    status: ItemStatus,
    error_message: Option<String>,
    failure_kind: Option<String>,
    claim_id: Option<Uuid>,
    remote_media_id: Option<String>,
    posted_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<ItemRow> for ContentItem {
    fn from(row: ItemRow) -> Self {
        ContentItem {
            id: row.id,
            container_id: row.container_id,
            position: row.position,
            caption: row.caption,
            media: row.media.0,
            is_story: row.is_story,
            story_stickers: row.story_stickers.0,
            story_duration: if row.story_duration > 0 {
                row.story_duration
            } else {
                DEFAULT_STORY_DURATION_SECS
            },
            status: row.status,
            error_message: row.error_message,
            failure_kind: row.failure_kind.as_deref().and_then(FailureKind::parse),
            claim_id: row.claim_id,
            remote_media_id: row.remote_media_id,
            posted_at: row.posted_at,
            updated_at: row.updated_at,
        }
    }
}

pub async fn get_item<'e, E>(executor: E, item_id: i64) -> Result<Option<ContentItem>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("SELECT {} FROM content_items WHERE id = $1", ITEM_COLUMNS);
    let row: Option<ItemRow> = sqlx::query_as(&sql)
        .bind(item_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(ContentItem::from))
}

pub async fn list_container_items<'e, E>(
    executor: E,
    container_id: i64,
) -> Result<Vec<ContentItem>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {} FROM content_items WHERE container_id = $1 ORDER BY position ASC",
        ITEM_COLUMNS
    );
    let rows: Vec<ItemRow> = sqlx::query_as(&sql)
        .bind(container_id)
        .fetch_all(executor)
        .await?;
    Ok(rows.into_iter().map(ContentItem::from).collect())
}

/// Reset every item of a container to draft (repeat-cycle restart)
pub async fn reset_container_items<'e, E>(
    executor: E,
    container_id: i64,
    at: DateTime<Utc>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE content_items
        SET status = 'draft',
            error_message = NULL,
            failure_kind = NULL,
            claim_id = NULL,
            updated_at = $2
        WHERE container_id = $1
        "#,
    )
    .bind(container_id)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Claim a draft or failed item for publishing
pub async fn claim_item<'e, E>(
    executor: E,
    item_id: i64,
    claim: Uuid,
    note: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE content_items
        SET status = 'queued',
            claim_id = $2,
            error_message = $3,
            failure_kind = NULL,
            updated_at = $4
        WHERE id = $1 AND status IN ('draft', 'failed')
        "#,
    )
    .bind(item_id)
    .bind(claim)
    .bind(note)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn mark_item_published<'e, E>(
    executor: E,
    item_id: i64,
    claim: Uuid,
    remote_media_id: &str,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE content_items
        SET status = 'published',
            remote_media_id = $3,
            posted_at = $4,
            error_message = NULL,
            failure_kind = NULL,
            claim_id = NULL,
            updated_at = $4
        WHERE id = $1 AND claim_id = $2 AND status = 'queued'
        "#,
    )
    .bind(item_id)
    .bind(claim)
    .bind(remote_media_id)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn mark_item_failed<'e, E>(
    executor: E,
    item_id: i64,
    claim: Uuid,
    message: &str,
    kind: FailureKind,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE content_items
        SET status = 'failed',
            error_message = $3,
            failure_kind = $4,
            claim_id = NULL,
            updated_at = $5
        WHERE id = $1 AND claim_id = $2 AND status = 'queued'
        "#,
    )
    .bind(item_id)
    .bind(claim)
    .bind(message)
    .bind(kind.as_str())
    .bind(at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn record_item_error<'e, E>(
    executor: E,
    item_id: i64,
    claim: Uuid,
    message: &str,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE content_items
        SET error_message = $3,
            failure_kind = 'transient',
            updated_at = $4
        WHERE id = $1 AND claim_id = $2 AND status = 'queued'
        "#,
    )
    .bind(item_id)
    .bind(claim)
    .bind(message)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn reset_item_to_draft<'e, E>(
    executor: E,
    item_id: i64,
    message: &str,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE content_items
        SET status = 'draft',
            error_message = $2,
            failure_kind = NULL,
            claim_id = NULL,
            updated_at = $3
        WHERE id = $1 AND status = 'queued'
        "#,
    )
    .bind(item_id)
    .bind(message)
    .bind(at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn stale_queued_items<'e, E>(
    executor: E,
    before: DateTime<Utc>,
) -> Result<Vec<ContentItem>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {} FROM content_items WHERE status = 'queued' AND updated_at < $1 ORDER BY updated_at ASC",
        ITEM_COLUMNS
    );
    let rows: Vec<ItemRow> = sqlx::query_as(&sql).bind(before).fetch_all(executor).await?;
    Ok(rows.into_iter().map(ContentItem::from).collect())
}

pub async fn failed_items_since<'e, E>(
    executor: E,
    since: DateTime<Utc>,
) -> Result<Vec<ContentItem>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {} FROM content_items WHERE status = 'failed' AND updated_at >= $1 ORDER BY updated_at ASC",
        ITEM_COLUMNS
    );
    let rows: Vec<ItemRow> = sqlx::query_as(&sql).bind(since).fetch_all(executor).await?;
    Ok(rows.into_iter().map(ContentItem::from).collect())
}
