//! Request broker
//!
//! The broker is the single entry point for platform operations. Each call
//! passes the rate/quota governor first, then normalizes and uploads media
//! where needed, composes the versioned API request, dispatches it through the
//! transport with the session's authentication, and maps the response into a
//! domain type.
//!
//! # Delete fallback
//!
//! The versioned delete endpoint is known to fail with a server fault for
//! some apps. When that happens (or when `DeletePolicy::modern_delete_broken`
//! is set) an OAuth 1.0a session retries once through the legacy endpoint.
//! The legacy endpoint does not accept OAuth 2.0 bearer tokens, so an
//! OAuth 2.0 session fails with `ChirpgateError::FallbackExhausted`.
//!
//! # Errors
//!
//! Every public operation returns errors through `funnel`, so callers only
//! ever see tagged errors or `ChirpgateError::Platform`.

use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::http::ReqwestTransport;
use crate::api::{ApiRequest, HttpTransport};
use crate::config::{AuthScheme, Config, DeletePolicy, Endpoints};
use crate::credentials::CredentialStore;
use crate::error::{ChirpgateError, Result};
use crate::media;
use crate::rate_limiter::{EndpointKey, RateGovernor};
use crate::refresh::{self, TokenRefresher};
use crate::session::Session;
use crate::types::{
    Author, DeleteOutcome, DeleteRoute, PostDetails, PostMetrics, PostRequest, PostedItem,
    SearchRequest, SearchResults,
};
use crate::upload::{self, MediaUploader};

const TWEET_FIELDS: &str = "created_at,public_metrics,author_id";
const USER_FIELDS: &str = "username,name,public_metrics";

pub struct Broker {
    transport: Arc<dyn HttpTransport>,
    session: RwLock<Arc<Session>>,
    governor: Arc<RateGovernor>,
    uploader: Box<dyn MediaUploader>,
    refresher: Option<TokenRefresher>,
    store: Arc<dyn CredentialStore>,
    endpoints: Endpoints,
    delete_policy: DeletePolicy,
}

impl Broker {
    /// Build a broker talking to the real platform
    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config.http)?);
        let session = Session::from_config(config)?;
        Self::new(config, session, transport, store)
    }

    /// Build a broker with limits taken from `config`
    pub fn new(
        config: &Config,
        session: Session,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let governor = Arc::new(RateGovernor::new(config.limits.to_limit_table()?));
        Ok(Self::with_governor(config, session, transport, store, governor))
    }

    /// Build a broker around an existing governor
    pub fn with_governor(
        config: &Config,
        session: Session,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        governor: Arc<RateGovernor>,
    ) -> Self {
        let scheme = session.scheme();
        let uploader = upload::for_scheme(
            scheme,
            Arc::clone(&transport),
            Arc::clone(&governor),
            &config.endpoints,
        );
        let refresher = match scheme {
            AuthScheme::OAuth2 => Some(TokenRefresher::new(
                Arc::clone(&transport),
                config.endpoints.token.clone(),
                config.debug,
            )),
            AuthScheme::OAuth1 => None,
        };

        tracing::debug!(
            "Broker ready: {} auth, {} uploader",
            scheme,
            uploader.name()
        );

        Self {
            transport,
            session: RwLock::new(Arc::new(session)),
            governor,
            uploader,
            refresher,
            store,
            endpoints: config.endpoints.clone(),
            delete_policy: config.delete.clone(),
        }
    }

    pub async fn scheme(&self) -> AuthScheme {
        self.session.read().await.scheme()
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Refresh the OAuth 2.0 token now if it is close to expiry
    pub async fn refresh_if_needed(&self) -> Result<()> {
        self.current_session().await.map(|_| ()).map_err(funnel)
    }

    /// Publish a post, uploading any media first
    pub async fn post(&self, request: PostRequest) -> Result<PostedItem> {
        self.create_post(request).await.map_err(funnel)
    }

    /// Fetch a single post with its metrics
    pub async fn lookup(&self, id: &str) -> Result<PostDetails> {
        self.lookup_post(id).await.map_err(funnel)
    }

    /// Delete a post, falling back to the legacy endpoint where allowed
    pub async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        self.delete_post(id).await.map_err(funnel)
    }

    /// Search recent posts
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResults> {
        self.search_posts(request).await.map_err(funnel)
    }

    /// Current session, rotated first if the OAuth 2.0 token is about to expire
    async fn current_session(&self) -> Result<Arc<Session>> {
        let session = Arc::clone(&*self.session.read().await);

        let Some(refresher) = &self.refresher else {
            return Ok(session);
        };
        let now = Utc::now();
        match session.oauth2() {
            Some(creds) if refresher.needs_refresh(creds, now) => {}
            _ => return Ok(session),
        }

        let mut guard = self.session.write().await;
        let current = Arc::clone(&*guard);
        let Some(creds) = current.oauth2() else {
            return Ok(current);
        };
        // Another caller may have rotated the token while we waited for the lock
        if !refresher.needs_refresh(creds, now) {
            return Ok(current);
        }

        let refreshed = refresher.refresh(creds, now).await?;
        let consumed = creds.refresh_token.as_ref().map(|t| t.expose_secret());
        if let Err(e) = refresh::persist(self.store.as_ref(), &refreshed, consumed) {
            tracing::warn!(
                "Refreshed tokens could not be saved to {}: {}",
                self.store.backend_name(),
                e
            );
        }

        let fresh = Arc::new(Session::from_oauth2(refreshed));
        *guard = Arc::clone(&fresh);
        Ok(fresh)
    }

    async fn create_post(&self, request: PostRequest) -> Result<PostedItem> {
        self.governor.check_and_record(EndpointKey::CreatePost)?;
        let session = self.current_session().await?;

        let mut media_ids = Vec::with_capacity(request.media.len());
        for item in &request.media {
            let normalized = media::normalize(item)?;
            let id = self
                .uploader
                .upload(session.auth(), &normalized)
                .await
                .map_err(|e| upload::explain_upload_error(e, session.scheme()))?;
            media_ids.push(id);
        }

        let mut body = json!({ "text": request.text });
        if let Some(reply_to) = &request.reply_to {
            body["reply"] = json!({ "in_reply_to_tweet_id": reply_to });
        }
        if !media_ids.is_empty() {
            body["media"] = json!({ "media_ids": media_ids });
        }

        let response = self
            .transport
            .execute(
                ApiRequest::post(self.endpoints.create_post()).json(body),
                session.auth(),
            )
            .await?
            .error_for_status()?;

        let body = response.json()?;
        let data = &body["data"];
        let id = required_str(data, "id", response.status)?;
        let text = data["text"].as_str().unwrap_or(&request.text).to_string();

        tracing::info!("Posted {} with {} media item(s)", id, media_ids.len());
        Ok(PostedItem { id, text })
    }

    async fn lookup_post(&self, id: &str) -> Result<PostDetails> {
        self.governor.check_and_record(EndpointKey::LookupPost)?;
        let session = self.current_session().await?;

        let response = self
            .transport
            .execute(
                ApiRequest::get(self.endpoints.post(id)).query("tweet.fields", TWEET_FIELDS),
                session.auth(),
            )
            .await?
            .error_for_status()?;

        let body = response.json()?;
        if body["data"].is_null() {
            return Err(ChirpgateError::Platform {
                code: "NOT_FOUND".to_string(),
                status: 404,
                message: format!("Post {} was not found", id),
            });
        }
        Ok(map_post(&body["data"]))
    }

    async fn delete_post(&self, id: &str) -> Result<DeleteOutcome> {
        self.governor.check_and_record(EndpointKey::DeletePost)?;
        let session = self.current_session().await?;

        let failure = if self.delete_policy.modern_delete_broken {
            tracing::debug!("Skipping versioned delete for {}: marked broken", id);
            "the versioned delete endpoint is marked as broken".to_string()
        } else {
            let response = self
                .transport
                .execute(ApiRequest::delete(self.endpoints.post(id)), session.auth())
                .await?;

            if response.is_success() {
                let deleted = response.json()?["data"]["deleted"]
                    .as_bool()
                    .unwrap_or(false);
                tracing::info!("Deleted {} (confirmed: {})", id, deleted);
                return Ok(DeleteOutcome {
                    id: id.to_string(),
                    deleted,
                    route: DeleteRoute::Modern,
                });
            }

            if !self.delete_policy.fallback_statuses.contains(&response.status) {
                return Err(response.to_platform_error());
            }
            tracing::warn!(
                "Versioned delete of {} failed with status {}",
                id,
                response.status
            );
            format!(
                "the versioned delete endpoint failed with status {}",
                response.status
            )
        };

        match session.scheme() {
            AuthScheme::OAuth2 => Err(ChirpgateError::FallbackExhausted(format!(
                "{}, and the legacy delete endpoint only accepts OAuth 1.0a credentials. \
                 Set AUTH_TYPE=oauth1 with X_API_KEY, X_API_SECRET, X_ACCESS_TOKEN and \
                 X_ACCESS_TOKEN_SECRET to delete posts",
                failure
            ))),
            AuthScheme::OAuth1 => self.legacy_delete(&session, id).await,
        }
    }

    async fn legacy_delete(&self, session: &Session, id: &str) -> Result<DeleteOutcome> {
        tracing::info!("Retrying delete of {} through the legacy endpoint", id);

        let response = self
            .transport
            .execute(
                ApiRequest::post(self.endpoints.legacy_destroy(id)),
                session.auth(),
            )
            .await?
            .error_for_status()?;

        let body = response.json()?;
        match body["id_str"].as_str() {
            Some(confirmed) if !confirmed.is_empty() => {
                tracing::info!("Deleted {} through the legacy endpoint", confirmed);
                Ok(DeleteOutcome {
                    id: id.to_string(),
                    deleted: true,
                    route: DeleteRoute::Legacy,
                })
            }
            _ => Err(ChirpgateError::Platform {
                code: "DELETE_UNCONFIRMED".to_string(),
                status: response.status,
                message: format!("Legacy delete of {} returned no confirmation", id),
            }),
        }
    }

    async fn search_posts(&self, request: SearchRequest) -> Result<SearchResults> {
        self.governor.check_and_record(EndpointKey::SearchPosts)?;
        let session = self.current_session().await?;

        let response = self
            .transport
            .execute(
                ApiRequest::get(self.endpoints.search_recent())
                    .query("query", request.query.as_str())
                    .query("max_results", request.max_results.to_string())
                    .query("tweet.fields", TWEET_FIELDS)
                    .query("expansions", "author_id")
                    .query("user.fields", USER_FIELDS),
                session.auth(),
            )
            .await?
            .error_for_status()?;

        let body = response.json()?;
        let posts = array(&body["data"]).iter().map(map_post).collect::<Vec<_>>();
        let authors = array(&body["includes"]["users"])
            .iter()
            .map(map_author)
            .collect();

        tracing::debug!("Search returned {} post(s)", posts.len());
        Ok(SearchResults { posts, authors })
    }
}

/// Normalize every failure into the shapes callers expect
///
/// Tagged errors pass through. Transport errors that carry an HTTP status
/// become `Platform` errors with that status; anything else becomes an
/// internal `Platform` error with status 500.
pub fn funnel(error: ChirpgateError) -> ChirpgateError {
    match error {
        ChirpgateError::Http(e) => match e.status() {
            Some(status) => ChirpgateError::Platform {
                code: format!("HTTP_{}", status.as_u16()),
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => ChirpgateError::Platform {
                code: "INTERNAL_ERROR".to_string(),
                status: 500,
                message: e.to_string(),
            },
        },
        ChirpgateError::Internal(message) => ChirpgateError::Platform {
            code: "INTERNAL_ERROR".to_string(),
            status: 500,
            message,
        },
        tagged => tagged,
    }
}

fn array(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn string_field(value: &Value, field: &str) -> String {
    value[field].as_str().unwrap_or_default().to_string()
}

fn count_field(value: &Value, field: &str) -> u64 {
    value["public_metrics"][field].as_u64().unwrap_or(0)
}

fn required_str(value: &Value, field: &str, status: u16) -> Result<String> {
    match value[field].as_str() {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(ChirpgateError::Platform {
            code: "INVALID_RESPONSE".to_string(),
            status,
            message: format!("Response is missing data.{}", field),
        }),
    }
}

fn map_post(value: &Value) -> PostDetails {
    PostDetails {
        id: string_field(value, "id"),
        text: string_field(value, "text"),
        author_id: string_field(value, "author_id"),
        created_at: string_field(value, "created_at"),
        metrics: PostMetrics {
            like_count: count_field(value, "like_count"),
            retweet_count: count_field(value, "retweet_count"),
            reply_count: count_field(value, "reply_count"),
            quote_count: count_field(value, "quote_count"),
        },
    }
}

fn map_author(value: &Value) -> Author {
    Author {
        id: string_field(value, "id"),
        username: string_field(value, "username"),
        name: string_field(value, "name"),
        followers_count: count_field(value, "followers_count"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::api::Method;
    use crate::credentials::MemoryStore;
    use crate::error::QuotaError;

    fn oauth1_broker(mock: &MockTransport) -> Broker {
        let mut config = Config::default();
        config.auth.oauth1.api_key = Some("key".to_string());
        config.auth.oauth1.api_secret = Some("secret".to_string());
        config.auth.oauth1.access_token = Some("token".to_string());
        config.auth.oauth1.access_token_secret = Some("token-secret".to_string());
        let session = Session::from_config(&config).unwrap();
        Broker::new(
            &config,
            session,
            Arc::new(mock.clone()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_map_post_defaults_missing_fields() {
        let post = map_post(&json!({"id": "1", "text": "hi"}));
        assert_eq!(post.author_id, "");
        assert_eq!(post.created_at, "");
        assert_eq!(post.metrics, PostMetrics::default());
    }

    #[test]
    fn test_map_post_reads_metrics() {
        let post = map_post(&json!({
            "id": "1",
            "text": "hi",
            "author_id": "2244994945",
            "created_at": "2024-01-01T00:00:00.000Z",
            "public_metrics": {"like_count": 5, "retweet_count": 2, "reply_count": 1, "quote_count": 0}
        }));
        assert_eq!(post.author_id, "2244994945");
        assert_eq!(post.metrics.like_count, 5);
        assert_eq!(post.metrics.retweet_count, 2);
        assert_eq!(post.metrics.reply_count, 1);
    }

    #[test]
    fn test_funnel_wraps_internal_errors() {
        match funnel(ChirpgateError::Internal("boom".to_string())) {
            ChirpgateError::Platform { code, status, .. } => {
                assert_eq!(code, "INTERNAL_ERROR");
                assert_eq!(status, 500);
            }
            other => panic!("Expected platform error, got {:?}", other),
        }

        let quota: ChirpgateError = QuotaError::RateLimited {
            key: EndpointKey::CreatePost,
            wait_secs: 3,
        }
        .into();
        assert!(funnel(quota).is_quota());
    }

    #[tokio::test]
    async fn test_post_with_reply_composes_body() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Post,
            "/2/tweets",
            201,
            r#"{"data":{"id":"10","text":"@someone thanks"}}"#,
        );
        let broker = oauth1_broker(&mock);

        let mut request = PostRequest::new("@someone thanks");
        request.reply_to = Some("9".to_string());
        let posted = broker.post(request).await.unwrap();
        assert_eq!(posted.id, "10");

        let sent = &mock.requests()[0].request;
        match &sent.body {
            crate::api::RequestBody::Json(body) => {
                assert_eq!(body["reply"]["in_reply_to_tweet_id"], "9");
                assert!(body.get("media").is_none());
            }
            other => panic!("Expected JSON body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_post_within_interval_is_rate_limited() {
        let mock = MockTransport::new();
        mock.respond(Method::Post, "/2/tweets", 201, r#"{"data":{"id":"1","text":"a"}}"#);
        let broker = oauth1_broker(&mock);

        broker.post(PostRequest::new("a")).await.unwrap();
        let error = broker.post(PostRequest::new("b")).await.unwrap_err();

        assert!(error.is_quota());
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_maps_details() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "/2/tweets/20",
            200,
            r#"{"data":{"id":"20","text":"hello","author_id":"7","created_at":"2024-05-01T10:00:00.000Z","public_metrics":{"like_count":3,"retweet_count":0,"reply_count":0,"quote_count":1}}}"#,
        );
        let broker = oauth1_broker(&mock);

        let details = broker.lookup("20").await.unwrap();
        assert_eq!(details.author_id, "7");
        assert_eq!(details.metrics.quote_count, 1);
        assert_eq!(
            mock.requests()[0].request.query,
            vec![("tweet.fields".to_string(), TWEET_FIELDS.to_string())]
        );
    }

    #[tokio::test]
    async fn test_lookup_missing_post_is_not_found() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "/2/tweets/21",
            200,
            r#"{"errors":[{"title":"Not Found Error","detail":"Could not find tweet with id: [21]."}]}"#,
        );
        let broker = oauth1_broker(&mock);

        let error = broker.lookup("21").await.unwrap_err();
        assert_eq!(error.code(), "NOT_FOUND");
        assert_eq!(error.status(), 404);
    }

    #[tokio::test]
    async fn test_delete_other_status_propagates_without_fallback() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Delete,
            "/2/tweets/30",
            403,
            r#"{"title":"Forbidden","detail":"You are not allowed to delete this Tweet.","status":403}"#,
        );
        let broker = oauth1_broker(&mock);

        let error = broker.delete("30").await.unwrap_err();
        assert_eq!(error.code(), "Forbidden");
        assert_eq!(error.status(), 403);
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_modern_delete_success() {
        let mock = MockTransport::new();
        mock.respond(Method::Delete, "/2/tweets/31", 200, r#"{"data":{"deleted":true}}"#);
        let broker = oauth1_broker(&mock);

        let outcome = broker.delete("31").await.unwrap();
        assert!(outcome.deleted);
        assert_eq!(outcome.route, DeleteRoute::Modern);
    }

    #[tokio::test]
    async fn test_unscripted_transport_failure_is_internal_platform_error() {
        let mock = MockTransport::new();
        let broker = oauth1_broker(&mock);

        let error = broker.lookup("1").await.unwrap_err();
        assert_eq!(error.code(), "INTERNAL_ERROR");
        assert_eq!(error.status(), 500);
    }
}
