//! Content item model definitions

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};
use uuid::Uuid;

use crate::services::error::FailureKind;

/// Item lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Draft,
    Queued,
    Published,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Draft => "draft",
            ItemStatus::Queued => "queued",
            ItemStatus::Published => "published",
            ItemStatus::Failed => "failed",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ItemStatus::Draft),
            "queued" => Ok(ItemStatus::Queued),
            "published" => Ok(ItemStatus::Published),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(format!("unknown item status: {}", other)),
        }
    }
}

// sqlx Type/Decode/Encode for ItemStatus so rows decode straight into the enum
impl Type<Postgres> for ItemStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for ItemStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        Ok(s.parse::<ItemStatus>()?)
    }
}

impl Encode<'_, Postgres> for ItemStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

/// Where a sticker sits on the story, as fractions of width and height.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StickerPosition {
    pub x: f64,
    pub y: f64,
}

/// Interactive overlay on a story.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorySticker {
    pub sticker_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<StickerPosition>,
}

/// One publishable unit inside a container.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: i64,
    pub container_id: i64,
    /// Ordinal within the container; unique, positive, not necessarily contiguous
    pub position: i32,
    pub caption: String,
    pub media: Vec<String>,
    pub is_story: bool,
    pub story_stickers: Vec<StorySticker>,
    pub story_duration: i32,
    pub status: ItemStatus,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub claim_id: Option<Uuid>,
    pub remote_media_id: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    /// True when `claim` still owns this item's in-flight publish.
    pub fn is_claimed_by(&self, claim: Uuid) -> bool {
        self.status == ItemStatus::Queued && self.claim_id == Some(claim)
    }
}
