//! Schedule model and due-time rules

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Completed,
    Stopped,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Stopped => "stopped",
        }
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ScheduleStatus::Active),
            "paused" => Ok(ScheduleStatus::Paused),
            "completed" => Ok(ScheduleStatus::Completed),
            "stopped" => Ok(ScheduleStatus::Stopped),
            other => Err(format!("unknown schedule status: {}", other)),
        }
    }
}

impl Type<Postgres> for ScheduleStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for ScheduleStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        Ok(s.parse::<ScheduleStatus>()?)
    }
}

impl Encode<'_, Postgres> for ScheduleStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

/// Binds one account to one container with timing and repeat policy.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub account_id: i64,
    pub container_id: i64,
    /// Start date and time, read in the reference timezone
    pub start_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub interval_minutes: i32,
    pub repeat_cycle: bool,
    pub status: ScheduleStatus,
    pub last_posted_at: Option<DateTime<Utc>>,
    /// Ordinal of the last item handed out
    pub current_position: i32,
}

impl Schedule {
    pub fn interval(&self) -> Duration {
        Duration::minutes(self.interval_minutes.max(1) as i64)
    }

    /// The configured start as an instant, interpreting the stored local date
    /// and time in `tz`. Local times skipped by a DST change resolve to the
    /// same wall-clock reading in UTC.
    pub fn starts_at(&self, tz: Tz) -> DateTime<Utc> {
        let local = self
            .start_date
            .and_time(self.start_time.unwrap_or_default());
        match tz.from_local_datetime(&local).earliest() {
            Some(start) => start.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&local),
        }
    }

    /// When this schedule next becomes due.
    pub fn next_due_at(&self, tz: Tz) -> DateTime<Utc> {
        match self.last_posted_at {
            Some(last) => last + self.interval(),
            None => self.starts_at(tz),
        }
    }

    /// Boundary-inclusive due check.
    pub fn should_fire(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        now >= self.next_due_at(tz)
    }
}
