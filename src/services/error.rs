//! Failure classification and error helpers
//!
//! Remote failures carry a structured [`FailureKind`]. Free error text (stored
//! messages, errors from outside the Graph client) is classified with
//! [`classify_message`], which only knows how to spot credential problems.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Substrings that mark an error as a credential problem.
pub const PERMANENT_ERROR_INDICATORS: &[&str] = &[
    "token",
    "authorization",
    "oauth",
    "expired",
    "invalid credentials",
    "missing credentials",
    "missing facebook page token",
];

/// Stored text for items that cannot publish until the account is re-authorised.
pub const REAUTH_REQUIRED_MESSAGE: &str =
    "Account token is invalid or expired and cannot be refreshed - re-authentication required";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing credential or identifier; needs an operator
    Configuration,
    /// Token rejected by the remote
    Authentication,
    /// The item itself cannot be published (no media, bad payload)
    Content,
    /// Worth retrying after a delay
    Transient,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Authentication => "authentication",
            FailureKind::Content => "content",
            FailureKind::Transient => "transient",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "configuration" => Some(FailureKind::Configuration),
            "authentication" => Some(FailureKind::Authentication),
            "content" => Some(FailureKind::Content),
            "transient" => Some(FailureKind::Transient),
            _ => None,
        }
    }

    /// Permanent failures skip the retry schedule and the sweeper requeue.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FailureKind::Configuration | FailureKind::Authentication)
    }

    /// True when retrying cannot help until someone re-authorises the account.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, FailureKind::Configuration | FailureKind::Authentication)
    }
}

/// Fallback classifier over unstructured error text.
pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if PERMANENT_ERROR_INDICATORS
        .iter()
        .any(|indicator| lower.contains(indicator))
    {
        FailureKind::Authentication
    } else {
        FailureKind::Transient
    }
}

/// Combine a structured kind with remote error text. The text can escalate a
/// retryable kind to an authentication failure but never relaxes a
/// permanent one. Only pass text the remote wrote, never a formatted error
/// that may carry a request URL.
pub fn classify(kind: FailureKind, message: &str) -> FailureKind {
    if !kind.is_permanent() && classify_message(message).is_permanent() {
        FailureKind::Authentication
    } else {
        kind
    }
}

/// Whether a stored failure is worth requeueing. A stored kind is trusted
/// as is; rows without one are judged on their text alone.
pub fn is_retryable(kind: Option<FailureKind>, message: Option<&str>) -> bool {
    match kind {
        Some(kind) => !kind.is_permanent(),
        None => !classify_message(message.unwrap_or_default()).is_permanent(),
    }
}

/// User-facing text written to an item that has given up.
pub fn final_failure_message(kind: FailureKind, error: &str) -> String {
    if kind.needs_reauth() {
        format!("Publishing stopped - account needs re-authentication: {}", error)
    } else {
        format!("Publishing failed permanently: {}", error)
    }
}

/// Extension trait for logging errors and converting to StatusCode
pub trait LogErr<T> {
    /// Log error with context and return INTERNAL_SERVER_ERROR
    fn log_500(self, context: &str) -> Result<T, StatusCode>;

    /// Log error with context and return a custom StatusCode
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, StatusCode> {
        self.log_status(context, StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{}", context);
            status
        })
    }
}
