//! Schedule and OAuth state queries

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use crate::domain::models::{Schedule, ScheduleStatus};

pub async fn list_active_schedules<'e, E>(executor: E) -> Result<Vec<Schedule>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, name, account_id, container_id, start_date, start_time,
               interval_minutes, repeat_cycle, status, last_posted_at, current_position
        FROM schedules
        WHERE status = 'active'
        ORDER BY id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

pub async fn set_position<'e, E>(executor: E, schedule_id: i64, position: i32) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE schedules SET current_position = $2 WHERE id = $1")
        .bind(schedule_id)
        .bind(position)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn mark_fired<'e, E>(executor: E, schedule_id: i64, at: DateTime<Utc>) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE schedules SET last_posted_at = $2 WHERE id = $1")
        .bind(schedule_id)
        .bind(at)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn set_status<'e, E>(
    executor: E,
    schedule_id: i64,
    status: ScheduleStatus,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE schedules SET status = $2 WHERE id = $1")
        .bind(schedule_id)
        .bind(status)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn save_oauth_state<'e, E>(executor: E, state: &str, at: DateTime<Utc>) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("INSERT INTO oauth_states (state, created_at) VALUES ($1, $2)")
        .bind(state)
        .bind(at)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn take_oauth_state<'e, E>(
    executor: E,
    state: &str,
    not_before: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    // Atomic DELETE + RETURNING so a state can only be consumed once
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        DELETE FROM oauth_states
        WHERE state = $1 AND created_at >= $2
        RETURNING state
        "#,
    )
    .bind(state)
    .bind(not_before)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}
