//! Token lifecycle: validation, refresh and the proactive sweep
//!
//! The primary (user) token is the only credential that can be exchanged.
//! The page token depends on it and is re-derived after every successful
//! exchange by matching the account's business id in `/me/accounts`.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_TOKEN_LIFETIME_SECS, MAX_PAGE_TOKEN_LOOKUPS, TOKEN_REFRESH_WINDOW_DAYS};
use crate::domain::models::Account;
use crate::domain::{Store, StoreError};
use crate::services::clock::Clock;
use crate::services::error::FailureKind;
use crate::services::graph::{GraphApi, GraphError};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("credential check failed: {0}")]
    Graph(#[from] GraphError),

    #[error("account {0} not found")]
    AccountNotFound(i64),
}

/// Which accounts a manual refresh run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSelection {
    Account(i64),
    All,
    NeedsRefresh,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatusSummary {
    pub total: usize,
    pub valid: usize,
    pub expiring_soon: usize,
    pub expired: usize,
    pub unknown_expiry: usize,
    pub needs_refresh: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub refreshed: usize,
    pub failed: usize,
}

pub struct TokenManager {
    store: Arc<dyn Store>,
    graph: Arc<dyn GraphApi>,
    clock: Arc<dyn Clock>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn Store>, graph: Arc<dyn GraphApi>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            graph,
            clock,
        }
    }

    /// True when the expiry is unknown or less than the refresh window away.
    pub fn needs_refresh(&self, account: &Account) -> bool {
        match account.token_expires_at {
            None => true,
            Some(expires_at) => {
                expires_at < self.clock.now() + Duration::days(TOKEN_REFRESH_WINDOW_DAYS)
            }
        }
    }

    /// Make sure the account can be used for a remote call.
    pub async fn ensure_valid(&self, account: &Account) -> Result<bool, TokenError> {
        let valid = self.graph.validate_token(&account.access_token).await?;

        if !valid {
            info!(account_id = account.id, "Access token rejected, attempting refresh");
            return self.refresh(account).await;
        }

        if self.needs_refresh(account) {
            info!(
                account_id = account.id,
                expires_at = ?account.token_expires_at,
                "Access token near expiry, refreshing proactively"
            );
            return self.refresh(account).await;
        }

        Ok(true)
    }

    /// Exchange the primary token and cascade to the page token.
    ///
    /// Returns `Ok(false)` when the remote rejected the exchange, in which
    /// case the account has been deactivated. Outages are returned as errors
    /// and leave the account untouched.
    pub async fn refresh(&self, account: &Account) -> Result<bool, TokenError> {
        let grant = match self.graph.refresh_token(&account.access_token).await {
            Ok(grant) => grant,
            Err(e) if e.kind() == FailureKind::Transient => return Err(e.into()),
            Err(e) => {
                warn!(
                    account_id = account.id,
                    error = %e,
                    "Token refresh rejected, deactivating account"
                );
                self.store
                    .deactivate_account(account.id, self.clock.now())
                    .await?;
                return Ok(false);
            }
        };

        let lifetime = grant.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let expires_at = self.clock.now() + Duration::seconds(lifetime);
        self.store
            .update_access_token(account.id, &grant.access_token, expires_at)
            .await?;
        info!(account_id = account.id, %expires_at, "Access token refreshed");

        match self.refresh_page_token(account, &grant.access_token).await {
            Ok(true) => debug!(account_id = account.id, "Page token refreshed"),
            Ok(false) => warn!(
                account_id = account.id,
                "No matching page for business account, page token left unchanged"
            ),
            Err(e) => warn!(
                account_id = account.id,
                error = %e,
                "Page token refresh failed, keeping previous page token"
            ),
        }

        Ok(true)
    }

    /// Scan the user's pages for the account's business id and store the
    /// matching page token. Returns whether a match was found.
    async fn refresh_page_token(
        &self,
        account: &Account,
        user_token: &str,
    ) -> Result<bool, TokenError> {
        let Some(business_id) = account.business_account_id.as_deref() else {
            return Ok(false);
        };

        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGE_TOKEN_LOOKUPS {
            let batch = self
                .graph
                .fetch_pages(user_token, cursor.as_deref(), 100)
                .await?;

            let token = batch.pages.iter().find_map(|page| {
                let business = page.instagram_business_account.as_ref()?;
                (business.id == business_id)
                    .then(|| page.access_token.clone())
                    .flatten()
            });
            if let Some(token) = token {
                self.store.update_page_token(account.id, &token).await?;
                return Ok(true);
            }

            match batch.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(false)
    }

    /// Refresh every active account that needs it.
    pub async fn sweep(&self) -> Result<SweepReport, TokenError> {
        let before = self.status_summary().await?;
        info!(?before, "Proactive token refresh starting");

        let mut report = SweepReport::default();
        for account in self.store.active_accounts().await? {
            report.checked += 1;
            if !self.needs_refresh(&account) {
                continue;
            }
            match self.refresh(&account).await {
                Ok(true) => report.refreshed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(account_id = account.id, error = %e, "Proactive refresh failed");
                }
            }
        }

        let after = self.status_summary().await?;
        info!(
            checked = report.checked,
            refreshed = report.refreshed,
            failed = report.failed,
            ?after,
            "Proactive token refresh finished"
        );
        Ok(report)
    }

    /// Accounts targeted by a manual refresh run.
    pub async fn select(&self, selection: TokenSelection) -> Result<Vec<Account>, TokenError> {
        match selection {
            TokenSelection::Account(id) => {
                let account = self
                    .store
                    .account(id)
                    .await?
                    .ok_or(TokenError::AccountNotFound(id))?;
                Ok(vec![account])
            }
            TokenSelection::All => Ok(self.store.active_accounts().await?),
            TokenSelection::NeedsRefresh => Ok(self
                .store
                .active_accounts()
                .await?
                .into_iter()
                .filter(|a| self.needs_refresh(a))
                .collect()),
        }
    }

    /// Counts of token states across active accounts.
    pub async fn status_summary(&self) -> Result<TokenStatusSummary, TokenError> {
        let now = self.clock.now();
        let window = now + Duration::days(TOKEN_REFRESH_WINDOW_DAYS);
        let mut summary = TokenStatusSummary::default();

        for account in self.store.active_accounts().await? {
            summary.total += 1;
            match account.token_expires_at {
                None => summary.unknown_expiry += 1,
                Some(at) if at <= now => summary.expired += 1,
                Some(at) if at < window => summary.expiring_soon += 1,
                Some(_) => summary.valid += 1,
            }
            if self.needs_refresh(&account) {
                summary.needs_refresh += 1;
            }
        }

        Ok(summary)
    }
}
