//! Publish executor
//!
//! Every item goes through the same create -> wait until ready -> publish
//! shape. The strategies only differ in the create calls they make.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use super::tokens::{TokenError, TokenManager};
use crate::domain::models::{Account, ContentItem};
use crate::domain::{Store, StoreError};
use crate::services::error::{FailureKind, REAUTH_REQUIRED_MESSAGE};
use crate::services::graph::{ContainerStatus, GraphApi, GraphError, MediaRequest};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{reauth} (account {0})", reauth = REAUTH_REQUIRED_MESSAGE)]
    InvalidCredentials(i64),

    #[error("Missing credentials for account {0}: business account id and page token are required")]
    MissingCredentials(i64),

    #[error("Account {0} not found")]
    AccountNotFound(i64),

    #[error("Item {0} has no media to publish")]
    NoMedia(i64),

    #[error("Media container {container} stopped processing with status {status}")]
    ProcessingFailed { container: String, status: String },

    #[error("Media container {container} not ready after {waited:?}")]
    ProcessingTimeout { container: String, waited: Duration },
}

impl PublishError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PublishError::Graph(e) | PublishError::Token(TokenError::Graph(e)) => e.kind(),
            PublishError::Token(TokenError::AccountNotFound(_))
            | PublishError::AccountNotFound(_) => FailureKind::Configuration,
            PublishError::Token(TokenError::Store(_)) | PublishError::Store(_) => {
                FailureKind::Transient
            }
            PublishError::InvalidCredentials(_) => FailureKind::Authentication,
            PublishError::MissingCredentials(_) => FailureKind::Configuration,
            PublishError::NoMedia(_) => FailureKind::Content,
            PublishError::ProcessingFailed { .. } | PublishError::ProcessingTimeout { .. } => {
                FailureKind::Transient
            }
        }
    }

    /// Auth failure reported by the remote mid-publish, as opposed to the
    /// up-front credential check.
    pub fn is_remote_auth(&self) -> bool {
        matches!(self, PublishError::Graph(_)) && self.kind() == FailureKind::Authentication
    }
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Prefix for media references that are not absolute URLs
    pub media_base_url: String,
    pub poll_interval: Duration,
    pub processing_timeout: Duration,
}

pub struct Publisher {
    store: Arc<dyn Store>,
    graph: Arc<dyn GraphApi>,
    tokens: Arc<TokenManager>,
    settings: PublishSettings,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn Store>,
        graph: Arc<dyn GraphApi>,
        tokens: Arc<TokenManager>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            store,
            graph,
            tokens,
            settings,
        }
    }

    /// Publish `item` under `account`. Returns the remote media id.
    pub async fn publish(&self, account: &Account, item: &ContentItem) -> Result<String, PublishError> {
        if !self.tokens.ensure_valid(account).await? {
            return Err(PublishError::InvalidCredentials(account.id));
        }

        // ensure_valid may have rotated both tokens
        let account = self
            .store
            .account(account.id)
            .await?
            .ok_or(PublishError::AccountNotFound(account.id))?;
        let creds = account
            .publish_credentials()
            .ok_or(PublishError::MissingCredentials(account.id))?;

        let urls: Vec<String> = item
            .media
            .iter()
            .filter(|m| !m.trim().is_empty())
            .map(|m| resolve_media_url(&self.settings.media_base_url, m))
            .collect();
        if urls.is_empty() {
            return Err(PublishError::NoMedia(item.id));
        }

        let ig_id = creds.business_account_id;
        let token = creds.page_access_token;

        let creation_id = if item.is_story {
            debug!(item_id = item.id, "Publishing story");
            let request = MediaRequest::Story {
                image_url: urls[0].clone(),
                stickers: item.story_stickers.clone(),
            };
            self.create_ready(ig_id, token, &request).await?
        } else if urls.len() > 1 {
            debug!(item_id = item.id, children = urls.len(), "Publishing carousel");
            let mut children = Vec::with_capacity(urls.len());
            for url in &urls {
                let child = MediaRequest::CarouselChild {
                    image_url: url.clone(),
                };
                children.push(self.create_ready(ig_id, token, &child).await?);
            }
            let carousel = MediaRequest::Carousel {
                children,
                caption: item.caption.clone(),
            };
            self.create_ready(ig_id, token, &carousel).await?
        } else {
            let request = MediaRequest::Image {
                image_url: urls[0].clone(),
                caption: item.caption.clone(),
            };
            self.create_ready(ig_id, token, &request).await?
        };

        let media_id = self.graph.publish_media(ig_id, token, &creation_id).await?;
        info!(
            item_id = item.id,
            account_id = account.id,
            media_id = %media_id,
            "Item published"
        );
        Ok(media_id)
    }

    async fn create_ready(
        &self,
        ig_id: &str,
        token: &str,
        request: &MediaRequest,
    ) -> Result<String, PublishError> {
        let container = self.graph.create_media(ig_id, token, request).await?;
        self.wait_until_ready(&container, token).await?;
        Ok(container)
    }

    /// Poll the container until the remote has finished processing it.
    async fn wait_until_ready(&self, container: &str, token: &str) -> Result<(), PublishError> {
        let started = tokio::time::Instant::now();
        loop {
            let status = self.graph.container_status(container, token).await?;
            match status {
                ContainerStatus::Finished | ContainerStatus::Published => return Ok(()),
                ContainerStatus::Error | ContainerStatus::Expired => {
                    return Err(PublishError::ProcessingFailed {
                        container: container.to_string(),
                        status: format!("{:?}", status),
                    });
                }
                ContainerStatus::InProgress | ContainerStatus::Unknown(_) => {}
            }

            let waited = started.elapsed();
            if waited >= self.settings.processing_timeout {
                return Err(PublishError::ProcessingTimeout {
                    container: container.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

/// Absolute URLs pass through; anything else is a path under `base`.
pub fn resolve_media_url(base: &str, reference: &str) -> String {
    let reference = reference.trim();
    if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            reference.trim_start_matches('/')
        )
    }
}
