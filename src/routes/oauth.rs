//! Instagram OAuth endpoints (/auth/instagram/*)

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use base64::Engine;
use chrono::Duration;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::AppState;
use crate::constants::{OAUTH_SCOPES, OAUTH_STATE_TTL_MINUTES};
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/instagram", get(auth_instagram))
        .route("/auth/instagram/callback", get(auth_instagram_callback))
}

/// Random state for CSRF protection
fn generate_state() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Serialize)]
pub struct AuthUrlResponse {
    pub url: String,
}

/// GET /auth/instagram - Start OAuth flow, returns URL to redirect user to
pub async fn auth_instagram(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AuthUrlResponse>, StatusCode> {
    let oauth_state = generate_state();
    state
        .store
        .save_oauth_state(&oauth_state, state.clock.now())
        .await
        .log_500("Failed to save OAuth state")?;

    Ok(Json(AuthUrlResponse {
        url: state.graph.authorize_url(OAUTH_SCOPES, &oauth_state),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub import_started: bool,
}

/// GET /auth/instagram/callback - Exchange the code for a long-lived user
/// token and start importing the accounts it can see
pub async fn auth_instagram_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>, StatusCode> {
    if let Some(error) = params.error {
        warn!(
            error = %error,
            description = params.error_description.as_deref().unwrap_or(""),
            "OAuth dialog returned an error"
        );
        return Err(StatusCode::BAD_REQUEST);
    }
    let (Some(code), Some(oauth_state)) = (params.code, params.state) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let not_before = state.clock.now() - Duration::minutes(OAUTH_STATE_TTL_MINUTES);
    let known = state
        .store
        .take_oauth_state(&oauth_state, not_before)
        .await
        .log_500("Failed to read OAuth state")?;
    if !known {
        warn!("OAuth callback with unknown or expired state");
        return Err(StatusCode::BAD_REQUEST);
    }

    let short_lived = state
        .graph
        .exchange_code(&code)
        .await
        .log_status("Token exchange failed", StatusCode::BAD_GATEWAY)?;
    let long_lived = state
        .graph
        .exchange_long_lived(&short_lived.access_token)
        .await
        .log_status("Long-lived token exchange failed", StatusCode::BAD_GATEWAY)?;

    state
        .importer
        .start(&long_lived.access_token)
        .await
        .log_500("Failed to queue account import")?;
    info!(expires_in = long_lived.expires_in, "Instagram authorised, import queued");

    Ok(Json(CallbackResponse {
        import_started: true,
    }))
}
