//! Application constants

/// Maximum publish attempts for one item, including the first
pub const MAX_PUBLISH_ATTEMPTS: u32 = 3;

/// Delay before the 2nd and 3rd publish attempts (seconds)
pub const RETRY_BACKOFF_SECS: [u64; 2] = [60, 300];

/// Tokens expiring within this many days are refreshed proactively
pub const TOKEN_REFRESH_WINDOW_DAYS: i64 = 7;

/// Lifetime assumed when a token grant omits `expires_in` (seconds)
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 5_183_999;

/// Lifetime given to tokens of freshly imported accounts (60 days)
pub const IMPORTED_TOKEN_LIFETIME_SECS: i64 = 5_184_000;

/// Position a schedule's sequence pointer returns to on a cycle restart
pub const SEQUENCE_ORIGIN: i32 = 0;

/// Upper bound on page requests when re-deriving page tokens
pub const MAX_PAGE_TOKEN_LOOKUPS: usize = 10;

/// Validity window of a stored OAuth state (minutes)
pub const OAUTH_STATE_TTL_MINUTES: i64 = 10;

/// Default display duration of a story (seconds)
pub const DEFAULT_STORY_DURATION_SECS: i32 = 15;

/// Scopes requested from the OAuth dialog
pub const OAUTH_SCOPES: &[&str] = &[
    "public_profile",
    "pages_show_list",
    "pages_read_engagement",
    "instagram_basic",
    "instagram_content_publish",
];
