//! Graph API client
//!
//! [`GraphApi`] is the seam the orchestrator uses for every remote call. The
//! OAuth-only helpers (authorize URL, code exchange) live on [`GraphClient`]
//! directly since only the callback route needs them.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::config::GraphSettings;
use crate::domain::models::{ImportedAccount, StorySticker};
use crate::services::error::{FailureKind, classify};

/// Graph error codes that mean the token is unusable.
const AUTH_ERROR_CODES: &[i64] = &[102, 190, 10];

/// Graph error codes worth retrying later (throttling, temporary outages,
/// container not ready).
const TRANSIENT_ERROR_CODES: &[i64] = &[1, 2, 4, 17, 32, 613, 9007];

const PAGE_FIELDS: &str =
    "id,name,access_token,instagram_business_account{id,username,media_count}";

#[derive(Debug, Error)]
pub enum GraphError {
    /// Transport failure. The request URL is stripped since it carries the
    /// access token.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Graph API error (status {status}, code {code:?}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        error_type: Option<String>,
        message: String,
    },

    #[error("no id returned by {0}")]
    EmptyResponse(&'static str),

    #[error("failed to parse Graph response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        GraphError::Http(e.without_url())
    }
}

impl GraphError {
    /// Structured failure kind for this error. Only the remote's own message
    /// goes through the text fallback; transport and decode failures stay
    /// transient.
    pub fn kind(&self) -> FailureKind {
        match self {
            GraphError::Http(_) | GraphError::EmptyResponse(_) | GraphError::Decode(_) => {
                FailureKind::Transient
            }
            GraphError::Api {
                status,
                code,
                error_type,
                message,
            } => {
                let oauth_type = error_type.as_deref() == Some("OAuthException");
                let base = match code {
                    Some(c) if AUTH_ERROR_CODES.contains(c) || (200..300).contains(c) => {
                        FailureKind::Authentication
                    }
                    Some(c) if TRANSIENT_ERROR_CODES.contains(c) => FailureKind::Transient,
                    _ if oauth_type || *status == 401 => FailureKind::Authentication,
                    _ if *status == 429 || *status >= 500 => FailureKind::Transient,
                    _ => FailureKind::Content,
                };
                classify(base, message)
            }
        }
    }

    pub fn is_auth(&self) -> bool {
        self.kind() == FailureKind::Authentication
    }
}

/// Access token plus lifetime as returned by every token endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BusinessAccount {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub media_count: Option<i64>,
}

/// One entry of `/me/accounts`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemotePage {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub instagram_business_account: Option<BusinessAccount>,
}

impl RemotePage {
    /// The publishing account behind this page, if it has one and carries a
    /// page token.
    pub fn to_account(&self) -> Option<ImportedAccount> {
        let business = self.instagram_business_account.as_ref()?;
        let page_access_token = self.access_token.clone().filter(|t| !t.is_empty())?;
        let username = business
            .username
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| business.id.clone());

        Some(ImportedAccount {
            business_account_id: business.id.clone(),
            username,
            page_id: self.id.clone(),
            page_access_token,
            media_count: business.media_count.unwrap_or(0),
        })
    }
}

/// One page of `/me/accounts` results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageBatch {
    pub pages: Vec<RemotePage>,
    /// Continuation URL, re-issued verbatim
    pub next: Option<String>,
}

/// Processing state of a media container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Finished,
    InProgress,
    Published,
    Error,
    Expired,
    Unknown(String),
}

impl ContainerStatus {
    fn parse(code: &str) -> Self {
        match code {
            "FINISHED" => ContainerStatus::Finished,
            "IN_PROGRESS" => ContainerStatus::InProgress,
            "PUBLISHED" => ContainerStatus::Published,
            "ERROR" => ContainerStatus::Error,
            "EXPIRED" => ContainerStatus::Expired,
            other => ContainerStatus::Unknown(other.to_string()),
        }
    }
}

/// Parameters of one `POST /{account}/media` call.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaRequest {
    Image {
        image_url: String,
        caption: String,
    },
    CarouselChild {
        image_url: String,
    },
    Carousel {
        children: Vec<String>,
        caption: String,
    },
    Story {
        image_url: String,
        stickers: Vec<StorySticker>,
    },
}

impl MediaRequest {
    pub fn form_params(&self) -> Result<Vec<(&'static str, String)>, GraphError> {
        let params = match self {
            MediaRequest::Image { image_url, caption } => {
                let mut params = vec![("image_url", image_url.clone())];
                if !caption.is_empty() {
                    params.push(("caption", caption.clone()));
                }
                params
            }
            MediaRequest::CarouselChild { image_url } => vec![
                ("image_url", image_url.clone()),
                ("is_carousel_item", "true".to_string()),
            ],
            MediaRequest::Carousel { children, caption } => vec![
                ("media_type", "CAROUSEL".to_string()),
                ("children", children.join(",")),
                ("caption", caption.clone()),
            ],
            MediaRequest::Story { image_url, stickers } => {
                let mut params = vec![
                    ("media_type", "STORIES".to_string()),
                    ("image_url", image_url.clone()),
                ];
                if !stickers.is_empty() {
                    let encoded = serde_json::to_string(stickers)
                        .map_err(|e| GraphError::Decode(e.to_string()))?;
                    params.push(("story_stickers", encoded));
                }
                params
            }
        };
        Ok(params)
    }
}

#[async_trait]
pub trait GraphApi: Send + Sync {
    /// Lightweight identity call. `Ok(false)` means the token was rejected.
    async fn validate_token(&self, access_token: &str) -> Result<bool, GraphError>;

    /// Exchange a user token for a fresh long-lived one.
    async fn refresh_token(&self, access_token: &str) -> Result<TokenGrant, GraphError>;

    /// First page when `cursor` is `None`, otherwise the continuation URL.
    async fn fetch_pages(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<PageBatch, GraphError>;

    /// Returns the creation (container) id.
    async fn create_media(
        &self,
        account_id: &str,
        access_token: &str,
        request: &MediaRequest,
    ) -> Result<String, GraphError>;

    async fn container_status(
        &self,
        container_id: &str,
        access_token: &str,
    ) -> Result<ContainerStatus, GraphError>;

    /// Returns the published media id.
    async fn publish_media(
        &self,
        account_id: &str,
        access_token: &str,
        creation_id: &str,
    ) -> Result<String, GraphError>;
}

#[derive(Clone)]
pub struct GraphClient {
    settings: GraphSettings,
    http: Client,
}

impl GraphClient {
    pub fn new(settings: GraphSettings) -> Self {
        Self {
            settings,
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.graph_url.trim_end_matches('/'), path)
    }

    /// Build the OAuth dialog URL for `state`.
    pub fn authorize_url(&self, scopes: &[&str], state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&response_type=code&state={}",
            self.settings.dialog_url,
            percent_encode(&self.settings.app_id),
            percent_encode(&self.settings.redirect_uri),
            percent_encode(&scopes.join(",")),
            percent_encode(state)
        )
    }

    /// Exchange an authorization code for a short-lived user token
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, GraphError> {
        let params = [
            ("client_id", self.settings.app_id.as_str()),
            ("client_secret", self.settings.app_secret.as_str()),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("code", code),
        ];

        let resp = self
            .http
            .post(self.url("oauth/access_token"))
            .form(&params)
            .send()
            .await?;

        parse_json(resp).await
    }

    /// Upgrade a user token to a long-lived one (about 60 days)
    pub async fn exchange_long_lived(&self, access_token: &str) -> Result<TokenGrant, GraphError> {
        let params = [
            ("grant_type", "fb_exchange_token"),
            ("client_id", self.settings.app_id.as_str()),
            ("client_secret", self.settings.app_secret.as_str()),
            ("fb_exchange_token", access_token),
        ];

        let resp = self
            .http
            .get(self.url("oauth/access_token"))
            .query(&params)
            .send()
            .await?;

        parse_json(resp).await
    }
}

#[async_trait]
impl GraphApi for GraphClient {
    async fn validate_token(&self, access_token: &str) -> Result<bool, GraphError> {
        let resp = self
            .http
            .get(self.url("me"))
            .query(&[("fields", "id"), ("access_token", access_token)])
            .send()
            .await?;

        match parse_json::<IdResponse>(resp).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_auth() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn refresh_token(&self, access_token: &str) -> Result<TokenGrant, GraphError> {
        self.exchange_long_lived(access_token).await
    }

    async fn fetch_pages(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<PageBatch, GraphError> {
        let request = match cursor {
            Some(next) => self.http.get(next),
            None => self.http.get(self.url("me/accounts")).query(&[
                ("fields", PAGE_FIELDS.to_string()),
                ("limit", limit.to_string()),
                ("access_token", access_token.to_string()),
            ]),
        };

        let resp = request.send().await?;
        let body: PagesResponse = parse_json(resp).await?;

        Ok(PageBatch {
            pages: body.data,
            next: body.paging.and_then(|p| p.next).filter(|n| !n.is_empty()),
        })
    }

    async fn create_media(
        &self,
        account_id: &str,
        access_token: &str,
        request: &MediaRequest,
    ) -> Result<String, GraphError> {
        let mut params = request.form_params()?;
        params.push(("access_token", access_token.to_string()));

        let resp = self
            .http
            .post(self.url(&format!("{}/media", account_id)))
            .form(&params)
            .send()
            .await?;

        let body: IdResponse = parse_json(resp).await?;
        body.id
            .filter(|id| !id.is_empty())
            .ok_or(GraphError::EmptyResponse("media create"))
    }

    async fn container_status(
        &self,
        container_id: &str,
        access_token: &str,
    ) -> Result<ContainerStatus, GraphError> {
        let resp = self
            .http
            .get(self.url(container_id))
            .query(&[("fields", "status_code"), ("access_token", access_token)])
            .send()
            .await?;

        let body: StatusResponse = parse_json(resp).await?;
        Ok(ContainerStatus::parse(body.status_code.as_deref().unwrap_or("")))
    }

    async fn publish_media(
        &self,
        account_id: &str,
        access_token: &str,
        creation_id: &str,
    ) -> Result<String, GraphError> {
        let params = [("creation_id", creation_id), ("access_token", access_token)];

        let resp = self
            .http
            .post(self.url(&format!("{}/media_publish", account_id)))
            .form(&params)
            .send()
            .await?;

        let body: IdResponse = parse_json(resp).await?;
        body.id
            .filter(|id| !id.is_empty())
            .ok_or(GraphError::EmptyResponse("media publish"))
    }
}

/// Decode a success body, or turn the Graph error envelope into [`GraphError::Api`]
async fn parse_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, GraphError> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(api_error(status.as_u16(), &text));
    }

    serde_json::from_str(&text)
        .map_err(|e| GraphError::Decode(format!("{} - body: {}", e, text)))
}

fn api_error(status: u16, body: &str) -> GraphError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => GraphError::Api {
            status,
            code: envelope.error.code,
            error_type: envelope.error.error_type,
            message: envelope.error.message.unwrap_or_else(|| body.to_string()),
        },
        Err(_) => GraphError::Api {
            status,
            code: None,
            error_type: None,
            message: body.to_string(),
        },
    }
}

fn percent_encode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    #[serde(default)]
    data: Vec<RemotePage>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GraphClient {
        GraphClient::new(GraphSettings {
            app_id: "app-id".into(),
            app_secret: "app-secret".into(),
            redirect_uri: "http://localhost/cb".into(),
            graph_url: server.uri(),
            dialog_url: "https://www.facebook.com/v18.0/dialog/oauth".into(),
        })
    }

    fn oauth_error(code: i64) -> serde_json::Value {
        serde_json::json!({
            "error": {"message": "Error validating access token", "type": "OAuthException", "code": code}
        })
    }

    #[tokio::test]
    async fn validate_token_distinguishes_rejection_from_outage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(query_param("access_token", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(query_param("access_token", "stale"))
            .respond_with(ResponseTemplate::new(400).set_body_json(oauth_error(190)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(query_param("access_token", "flaky"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let graph = client(&server);
        assert!(graph.validate_token("good").await.unwrap());
        assert!(!graph.validate_token("stale").await.unwrap());
        let err = graph.validate_token("flaky").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn refresh_uses_long_lived_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .and(query_param("grant_type", "fb_exchange_token"))
            .and(query_param("fb_exchange_token", "old"))
            .and(query_param("client_secret", "app-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"access_token": "new", "token_type": "bearer", "expires_in": 5183944}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let grant = client(&server).refresh_token("old").await.unwrap();
        assert_eq!(grant.access_token, "new");
        assert_eq!(grant.expires_in, Some(5183944));
    }

    #[tokio::test]
    async fn fetch_pages_follows_next_verbatim() {
        let server = MockServer::start().await;
        let next = format!("{}/cursor/page-2", server.uri());
        Mock::given(method("GET"))
            .and(path("/me/accounts"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "p1", "name": "Page 1", "access_token": "pt1",
                     "instagram_business_account": {"id": "ig1", "username": "one", "media_count": 4}},
                    {"id": "p2", "name": "Page 2", "access_token": "pt2"}
                ],
                "paging": {"next": next}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cursor/page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [], "paging": {}
            })))
            .mount(&server)
            .await;

        let graph = client(&server);
        let first = graph.fetch_pages("user", None, 2).await.unwrap();
        assert_eq!(first.pages.len(), 2);
        assert_eq!(first.next.as_deref(), Some(next.as_str()));

        let account = first.pages[0].to_account().unwrap();
        assert_eq!(account.business_account_id, "ig1");
        assert_eq!(account.username, "one");
        assert_eq!(account.media_count, 4);
        assert!(first.pages[1].to_account().is_none());

        let second = graph.fetch_pages("user", first.next.as_deref(), 2).await.unwrap();
        assert!(second.pages.is_empty());
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn create_and_publish_send_form_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1784/media"))
            .and(body_string_contains("is_carousel_item=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "c1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1784/media_publish"))
            .and(body_string_contains("creation_id=c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m1"})))
            .expect(1)
            .mount(&server)
            .await;

        let graph = client(&server);
        let child = MediaRequest::CarouselChild {
            image_url: "https://cdn.example.com/a.jpg".into(),
        };
        let creation = graph.create_media("1784", "page", &child).await.unwrap();
        assert_eq!(creation, "c1");
        let media = graph.publish_media("1784", "page", &creation).await.unwrap();
        assert_eq!(media, "m1");
    }

    #[tokio::test]
    async fn missing_id_is_an_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1784/media_publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = client(&server)
            .publish_media("1784", "page", "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::EmptyResponse(_)));
        assert_eq!(err.kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn container_status_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/c1"))
            .and(query_param("fields", "status_code"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status_code": "IN_PROGRESS", "id": "c1"})),
            )
            .mount(&server)
            .await;

        let status = client(&server).container_status("c1", "page").await.unwrap();
        assert_eq!(status, ContainerStatus::InProgress);
    }

    #[test]
    fn error_codes_map_to_kinds() {
        let api = |status, code: Option<i64>, error_type: Option<&str>| GraphError::Api {
            status,
            code,
            error_type: error_type.map(str::to_string),
            message: "x".into(),
        };
        assert_eq!(api(400, Some(190), Some("OAuthException")).kind(), FailureKind::Authentication);
        assert_eq!(api(403, Some(200), None).kind(), FailureKind::Authentication);
        assert_eq!(api(400, Some(4), Some("OAuthException")).kind(), FailureKind::Transient);
        assert_eq!(api(400, Some(613), None).kind(), FailureKind::Transient);
        assert_eq!(api(500, None, None).kind(), FailureKind::Transient);
        assert_eq!(api(400, Some(100), None).kind(), FailureKind::Content);

        let expired = GraphError::Api {
            status: 400,
            code: Some(100),
            error_type: None,
            message: "Error validating access token: Session has expired".into(),
        };
        assert_eq!(expired.kind(), FailureKind::Authentication);
    }

    #[tokio::test]
    async fn unreachable_remote_is_transient_and_hides_the_token() {
        let graph = GraphClient::new(GraphSettings {
            app_id: "app-id".into(),
            app_secret: "s".into(),
            redirect_uri: "http://localhost/cb".into(),
            graph_url: "http://127.0.0.1:9".into(),
            dialog_url: "https://www.facebook.com/v18.0/dialog/oauth".into(),
        });

        let err = graph.validate_token("secret-user-token").await.unwrap_err();

        assert!(matches!(err, GraphError::Http(_)));
        assert_eq!(err.kind(), FailureKind::Transient);
        assert!(!err.is_auth());
        let text = err.to_string();
        assert!(!text.contains("secret-user-token"), "{text}");
        assert!(!text.contains("access_token"), "{text}");

        let err = graph.container_status("c1", "secret-page-token").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
        assert!(!err.to_string().contains("secret-page-token"));
    }

    #[test]
    fn story_stickers_travel_as_json() {
        let request = MediaRequest::Story {
            image_url: "https://cdn.example.com/s.jpg".into(),
            stickers: vec![StorySticker {
                sticker_type: "question".into(),
                text: Some("Ask me anything".into()),
                options: vec![],
                username: None,
                position: None,
            }],
        };
        let params = request.form_params().unwrap();
        assert!(params.contains(&("media_type", "STORIES".to_string())));
        let (_, stickers) = params.iter().find(|(k, _)| *k == "story_stickers").unwrap();
        assert!(stickers.contains("\"sticker_type\":\"question\""));
    }

    #[test]
    fn authorize_url_carries_state_and_scopes() {
        let graph = GraphClient::new(GraphSettings {
            app_id: "app-id".into(),
            app_secret: "s".into(),
            redirect_uri: "http://localhost/cb".into(),
            graph_url: "https://graph.facebook.com/v18.0".into(),
            dialog_url: "https://www.facebook.com/v18.0/dialog/oauth".into(),
        });
        let url = graph.authorize_url(&["instagram_basic", "pages_show_list"], "st8");
        assert!(url.starts_with("https://www.facebook.com/v18.0/dialog/oauth?client_id=app%2Did"));
        assert!(url.contains("state=st8"));
        assert!(url.contains("scope=instagram%5Fbasic%2Cpages%5Fshow%5Flist"));
    }
}
