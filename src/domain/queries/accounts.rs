//! Account queries

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use crate::domain::models::{Account, ImportedAccount};

const ACCOUNT_COLUMNS: &str = r#"
    a.id, a.username, a.access_token, a.token_expires_at, a.business_account_id,
    a.page_id, a.page_access_token, a.is_active, a.last_sync_at
"#;

pub async fn get_account<'e, E>(executor: E, account_id: i64) -> Result<Option<Account>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("SELECT {} FROM accounts a WHERE a.id = $1", ACCOUNT_COLUMNS);
    sqlx::query_as(&sql)
        .bind(account_id)
        .fetch_optional(executor)
        .await
}

pub async fn list_active_accounts<'e, E>(executor: E) -> Result<Vec<Account>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {} FROM accounts a WHERE a.is_active = TRUE ORDER BY a.id ASC",
        ACCOUNT_COLUMNS
    );
    sqlx::query_as(&sql).fetch_all(executor).await
}

pub async fn list_accounts_synced_since<'e, E>(
    executor: E,
    since: DateTime<Utc>,
) -> Result<Vec<Account>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {} FROM accounts a WHERE a.is_active = TRUE AND a.last_sync_at >= $1 ORDER BY a.last_sync_at DESC",
        ACCOUNT_COLUMNS
    );
    sqlx::query_as(&sql).bind(since).fetch_all(executor).await
}

pub async fn update_access_token<'e, E>(
    executor: E,
    account_id: i64,
    access_token: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE accounts SET
            access_token = $2,
            token_expires_at = $3,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(account_id)
    .bind(access_token)
    .bind(expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_page_token<'e, E>(
    executor: E,
    account_id: i64,
    page_access_token: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE accounts SET page_access_token = $2, updated_at = NOW() WHERE id = $1")
        .bind(account_id)
        .bind(page_access_token)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn deactivate_account<'e, E>(
    executor: E,
    account_id: i64,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE accounts SET is_active = FALSE, last_sync_at = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(account_id)
    .bind(at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Insert or refresh an imported account, keyed by its business account id
pub async fn upsert_imported_account<'e, E>(
    executor: E,
    account: &ImportedAccount,
    user_access_token: &str,
    token_expires_at: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO accounts (
            username, access_token, token_expires_at, business_account_id,
            page_id, page_access_token, media_count, is_active, last_sync_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8)
        ON CONFLICT (business_account_id) DO UPDATE SET
            username = $1,
            access_token = $2,
            token_expires_at = $3,
            page_id = $5,
            page_access_token = $6,
            media_count = $7,
            is_active = TRUE,
            last_sync_at = $8,
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(&account.username)
    .bind(user_access_token)
    .bind(token_expires_at)
    .bind(&account.business_account_id)
    .bind(&account.page_id)
    .bind(&account.page_access_token)
    .bind(account.media_count)
    .bind(at)
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

/// Account of the earliest schedule bound to a container
pub async fn account_for_container<'e, E>(
    executor: E,
    container_id: i64,
) -> Result<Option<Account>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        r#"
        SELECT {} FROM accounts a
        JOIN schedules s ON s.account_id = a.id
        WHERE s.container_id = $1
        ORDER BY s.id ASC
        LIMIT 1
        "#,
        ACCOUNT_COLUMNS
    );
    sqlx::query_as(&sql)
        .bind(container_id)
        .fetch_optional(executor)
        .await
}
