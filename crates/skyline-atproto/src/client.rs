//! XRPC client for a PDS, and its [`EntityService`] implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    AtUri, AtprotoError, ConfirmedRelationship, CreateRecordResponse, EntityService,
    FeedDescriptor, FeedParams, MutationRequest, PostView, ProfileView, RelationshipAction,
    RemotePage, ServiceError, Session, SinceMarker,
};

/// Retries after the first attempt for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubles each time.
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Client for interacting with an ATProto PDS and the app view it proxies.
pub struct XrpcClient {
    http: Client,
    pds_url: String,
    session: Arc<RwLock<Option<Session>>>,
    retry_interval: Duration,
}

impl XrpcClient {
    /// Create a new client for the given PDS URL.
    pub fn new(pds_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            pds_url: pds_url.into().trim_end_matches('/').to_string(),
            session: Arc::new(RwLock::new(None)),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Override the initial retry delay.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn pds_url(&self) -> &str {
        &self.pds_url
    }

    /// Authenticate with the PDS using identifier and app password.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, identifier: &str, password: &str) -> Result<(), AtprotoError> {
        #[derive(Serialize)]
        struct LoginRequest<'a> {
            identifier: &'a str,
            password: &'a str,
        }

        let url = self.xrpc_url("com.atproto.server.createSession");
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest {
                identifier,
                password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AtprotoError::Auth(format!(
                "login failed ({}): {}",
                status, text
            )));
        }

        let session: Session = response.json().await?;
        debug!(did = %session.did, handle = %session.handle, "authenticated with PDS");

        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Refresh the current session tokens.
    pub async fn refresh_session(&self) -> Result<(), AtprotoError> {
        let refresh_jwt = {
            let session = self.session.read().await;
            session
                .as_ref()
                .map(|s| s.refresh_jwt.clone())
                .ok_or_else(|| AtprotoError::Auth("no session to refresh".to_string()))?
        };

        let response = self
            .http
            .post(self.xrpc_url("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AtprotoError::Auth(format!(
                "refresh failed ({}): {}",
                status, text
            )));
        }

        let session: Session = response.json().await?;
        debug!(did = %session.did, "refreshed session");

        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Drop the session tokens.
    pub async fn logout(&self) {
        *self.session.write().await = None;
    }

    /// Get the current session DID.
    pub async fn did(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.did.clone())
    }

    /// Get the current session handle.
    pub async fn handle(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.handle.clone())
    }

    async fn access_token(&self) -> Result<String, AtprotoError> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_jwt.clone())
            .ok_or_else(|| AtprotoError::Auth("not authenticated".to_string()))
    }

    async fn try_refresh(&self) -> bool {
        match self.refresh_session().await {
            Ok(()) => {
                debug!("automatically refreshed expired session");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to auto-refresh session");
                false
            }
        }
    }

    fn xrpc_url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.pds_url, nsid)
    }

    /// Send an authenticated request, refreshing an expired session once and
    /// retrying transient failures with exponential backoff.
    async fn send_authed<T, F>(&self, nsid: &str, build: F) -> Result<T, AtprotoError>
    where
        T: DeserializeOwned,
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let url = self.xrpc_url(nsid);
        let mut backoff = ExponentialBackoff {
            initial_interval: self.retry_interval,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.retry_interval * 8,
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempt = 0;
        let mut refreshed = false;

        loop {
            let token = self.access_token().await?;
            let result = match build(&self.http, &url).bearer_auth(token).send().await {
                Ok(response) => self.handle_response(nsid, response).await,
                Err(e) => Err(AtprotoError::Http(e)),
            };

            match result {
                Ok(v) => return Ok(v),
                Err(ref e) if e.is_expired_token() && !refreshed => {
                    refreshed = true;
                    if self.try_refresh().await {
                        continue;
                    }
                    return result;
                }
                Err(ref e) if e.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let wait = backoff.next_backoff().unwrap_or(self.retry_interval);
                    warn!(
                        nsid,
                        attempt,
                        backoff_ms = wait.as_millis() as u64,
                        error = %e,
                        "transient XRPC error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(_) => return result,
            }
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        nsid: &str,
        response: reqwest::Response,
    ) -> Result<T, AtprotoError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(AtprotoError::RateLimited {
                endpoint: Some(nsid.to_string()),
                retry_after_secs,
            });
        }

        let text = response.text().await?;

        if !status.is_success() {
            if let Ok(xrpc_error) = serde_json::from_str::<XrpcError>(&text) {
                return Err(AtprotoError::Xrpc {
                    error: xrpc_error.error,
                    message: xrpc_error.message.unwrap_or_default(),
                });
            }
            return Err(AtprotoError::InvalidResponse(format!(
                "request failed ({}): {}",
                status, text
            )));
        }

        // Some procedures (deleteRecord) may answer with an empty body.
        let body = if text.trim().is_empty() { "null" } else { &text };
        Ok(serde_json::from_str(body)?)
    }

    /// Fetch one page of a feed.
    #[tracing::instrument(skip(self, feed), fields(feed = %feed))]
    pub async fn get_feed_page(
        &self,
        feed: &FeedDescriptor,
        params: FeedParams,
        cursor: Option<&str>,
    ) -> Result<RemotePage, AtprotoError> {
        let mut query: Vec<(&str, String)> = vec![("limit", params.limit.to_string())];
        let nsid = match feed {
            FeedDescriptor::Following => "app.bsky.feed.getTimeline",
            FeedDescriptor::Author { actor, filter } => {
                query.push(("actor", actor.clone()));
                query.push(("filter", filter.clone()));
                "app.bsky.feed.getAuthorFeed"
            }
            FeedDescriptor::Generator { uri } => {
                query.push(("feed", uri.clone()));
                "app.bsky.feed.getFeed"
            }
            FeedDescriptor::List { uri } => {
                query.push(("list", uri.clone()));
                "app.bsky.feed.getListFeed"
            }
        };
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let page: RemotePage = self
            .send_authed(nsid, |http, url| http.get(url).query(&query))
            .await?;
        debug!(items = page.items.len(), has_cursor = page.cursor.is_some(), "fetched feed page");
        Ok(page)
    }

    /// Create a record in the viewer's repository.
    pub async fn create_record(
        &self,
        collection: &str,
        record: serde_json::Value,
    ) -> Result<CreateRecordResponse, AtprotoError> {
        let did = self
            .did()
            .await
            .ok_or_else(|| AtprotoError::Auth("not authenticated".to_string()))?;

        let mut record = record;
        if let serde_json::Value::Object(ref mut map) = record {
            map.insert(
                "$type".to_string(),
                serde_json::Value::String(collection.to_string()),
            );
        }

        let body = serde_json::json!({
            "repo": did,
            "collection": collection,
            "record": record,
        });

        let created: CreateRecordResponse = self
            .send_authed("com.atproto.repo.createRecord", |http, url| {
                http.post(url).json(&body)
            })
            .await?;
        debug!(collection, uri = %created.uri, "created record");
        Ok(created)
    }

    /// Delete a record from the viewer's repository.
    pub async fn delete_record(&self, collection: &str, rkey: &str) -> Result<(), AtprotoError> {
        let did = self
            .did()
            .await
            .ok_or_else(|| AtprotoError::Auth("not authenticated".to_string()))?;

        let body = serde_json::json!({
            "repo": did,
            "collection": collection,
            "rkey": rkey,
        });

        let _: serde_json::Value = self
            .send_authed("com.atproto.repo.deleteRecord", |http, url| {
                http.post(url).json(&body)
            })
            .await?;
        debug!(collection, rkey, "deleted record");
        Ok(())
    }

    /// Hydrate posts by URI. Posts the app view can't see are omitted.
    pub async fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>, AtprotoError> {
        let query: Vec<(&str, &str)> = uris.iter().map(|uri| ("uris", uri.as_str())).collect();
        let response: PostsResponse = self
            .send_authed("app.bsky.feed.getPosts", |http, url| http.get(url).query(&query))
            .await?;
        debug!(requested = uris.len(), found = response.posts.len(), "hydrated posts");
        Ok(response.posts)
    }

    /// Fetch a single post, failing if the app view doesn't know it.
    pub async fn get_post(&self, uri: &str) -> Result<PostView, AtprotoError> {
        self.get_posts(&[uri.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AtprotoError::NotFound(uri.to_string()))
    }

    /// Fetch a hydrated profile by DID or handle.
    pub async fn get_profile(&self, actor: &str) -> Result<ProfileView, AtprotoError> {
        self.send_authed("app.bsky.actor.getProfile", |http, url| {
            http.get(url).query(&[("actor", actor)])
        })
        .await
    }

    async fn create_relationship(
        &self,
        request: &MutationRequest,
    ) -> Result<String, ServiceError> {
        let created_at = Utc::now().to_rfc3339();
        let record = match request.action {
            RelationshipAction::Like | RelationshipAction::Repost => {
                let cid = request.subject_cid.as_deref().ok_or_else(|| {
                    ServiceError::Conflict(format!("cannot {} without a subject cid", request.action))
                })?;
                serde_json::json!({
                    "subject": {"uri": request.subject, "cid": cid},
                    "createdAt": created_at,
                })
            }
            RelationshipAction::Follow => serde_json::json!({
                "subject": request.subject,
                "createdAt": created_at,
            }),
        };

        let created = self
            .create_record(request.action.collection(), record)
            .await?;
        Ok(created.uri)
    }

    async fn remove_relationship(
        &self,
        action: RelationshipAction,
        record_uri: &str,
    ) -> Result<(), ServiceError> {
        let uri = AtUri::parse(record_uri).map_err(|e| ServiceError::Conflict(e.to_string()))?;
        if !uri.is_in(action.collection()) {
            return Err(ServiceError::Conflict(format!(
                "{record_uri} is not a {action} record"
            )));
        }
        self.delete_record(&uri.collection, &uri.rkey).await?;
        Ok(())
    }
}

#[async_trait]
impl EntityService for XrpcClient {
    async fn fetch_page(
        &self,
        feed: &FeedDescriptor,
        params: FeedParams,
        cursor: Option<&str>,
    ) -> Result<RemotePage, ServiceError> {
        Ok(self.get_feed_page(feed, params, cursor).await?)
    }

    async fn mutate_relationship(
        &self,
        request: &MutationRequest,
    ) -> Result<ConfirmedRelationship, ServiceError> {
        let record = match (request.desired, request.current_record.as_deref()) {
            (true, Some(existing)) => Some(existing.to_string()),
            (true, None) => Some(self.create_relationship(request).await?),
            (false, Some(existing)) => {
                self.remove_relationship(request.action, existing).await?;
                None
            }
            (false, None) => None,
        };
        Ok(ConfirmedRelationship { record })
    }

    async fn check_newer(
        &self,
        feed: &FeedDescriptor,
        since: &SinceMarker,
    ) -> Result<bool, ServiceError> {
        let peek = self
            .get_feed_page(feed, FeedParams { limit: 1 }, None)
            .await?;
        Ok(peek
            .items
            .first()
            .is_some_and(|item| item.post.uri != since.uri && item.sort_at() > since.sort_at))
    }
}

#[derive(Debug, Deserialize)]
struct PostsResponse {
    posts: Vec<PostView>,
}

/// XRPC error response format.
#[derive(Debug, Deserialize)]
struct XrpcError {
    error: String,
    message: Option<String>,
}
