//! Publishing account model

use chrono::{DateTime, Utc};

/// A remote publishing identity.
///
/// `access_token` is the primary (user) credential. The page token is derived
/// from it and is only usable together with `business_account_id`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub access_token: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub business_account_id: Option<String>,
    pub page_id: Option<String>,
    pub page_access_token: Option<String>,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Credentials needed for a publish call.
#[derive(Debug, Clone, Copy)]
pub struct PublishCredentials<'a> {
    pub business_account_id: &'a str,
    pub page_access_token: &'a str,
}

impl Account {
    /// Both halves of the dependent credential, or `None` when either is
    /// missing (a page token without its business account is meaningless).
    pub fn publish_credentials(&self) -> Option<PublishCredentials<'_>> {
        let business_account_id = self.business_account_id.as_deref().filter(|s| !s.is_empty())?;
        let page_access_token = self.page_access_token.as_deref().filter(|s| !s.is_empty())?;
        Some(PublishCredentials {
            business_account_id,
            page_access_token,
        })
    }
}

/// An account mapped from one remote page during an import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedAccount {
    pub business_account_id: String,
    pub username: String,
    pub page_id: String,
    pub page_access_token: String,
    pub media_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            id: 1,
            username: "brand".into(),
            access_token: "user-token".into(),
            token_expires_at: None,
            business_account_id: Some("1784".into()),
            page_id: Some("99".into()),
            page_access_token: Some("page-token".into()),
            is_active: true,
            last_sync_at: None,
        }
    }

    #[test]
    fn credentials_need_both_halves() {
        assert!(account().publish_credentials().is_some());

        let mut no_id = account();
        no_id.business_account_id = None;
        assert!(no_id.publish_credentials().is_none());

        let mut blank_token = account();
        blank_token.page_access_token = Some(String::new());
        assert!(blank_token.publish_credentials().is_none());
    }
}
