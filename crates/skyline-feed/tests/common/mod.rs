//! Scripted feed service for pager and staleness tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use skyline_atproto::{
    ConfirmedRelationship, EntityService, FeedDescriptor, FeedParams, FeedViewPost,
    MutationRequest, PostView, PostViewerState, ProfileViewBasic, RemotePage, ServiceError,
    SinceMarker,
};
use tokio::sync::{Semaphore, watch};

type PageResult = Result<RemotePage, ServiceError>;

pub struct FeedService {
    pages: Mutex<HashMap<Option<String>, VecDeque<PageResult>>>,
    requested: Mutex<Vec<(Option<String>, u8)>>,
    gate: Option<Semaphore>,
    fetches_tx: watch::Sender<usize>,
    newer: Mutex<VecDeque<Result<bool, ServiceError>>>,
    check_delay: Mutex<Option<Duration>>,
    checks: AtomicUsize,
    last_since: Mutex<Option<SinceMarker>>,
}

impl FeedService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_gate(None))
    }

    /// Page fetches block until [`FeedService::release`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::with_gate(Some(Semaphore::new(0))))
    }

    fn with_gate(gate: Option<Semaphore>) -> Self {
        let (fetches_tx, _) = watch::channel(0);
        Self {
            pages: Mutex::new(HashMap::new()),
            requested: Mutex::new(Vec::new()),
            gate,
            fetches_tx,
            newer: Mutex::new(VecDeque::new()),
            check_delay: Mutex::new(None),
            checks: AtomicUsize::new(0),
            last_since: Mutex::new(None),
        }
    }

    /// Queue a response for a request with `cursor` (`None` = first page).
    pub fn script(&self, cursor: Option<&str>, response: PageResult) {
        self.pages
            .lock()
            .unwrap()
            .entry(cursor.map(str::to_string))
            .or_default()
            .push_back(response);
    }

    pub fn script_page(&self, cursor: Option<&str>, items: Vec<FeedViewPost>, next: Option<&str>) {
        self.script(
            cursor,
            Ok(RemotePage {
                items,
                cursor: next.map(str::to_string),
            }),
        );
    }

    /// Queue an answer for the next `check_newer` call.
    pub fn script_newer(&self, answer: Result<bool, ServiceError>) {
        self.newer.lock().unwrap().push_back(answer);
    }

    pub fn delay_checks(&self, delay: Duration) {
        *self.check_delay.lock().unwrap() = Some(delay);
    }

    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Cursors of every page request, in order.
    pub fn requested_cursors(&self) -> Vec<Option<String>> {
        self.requested
            .lock()
            .unwrap()
            .iter()
            .map(|(cursor, _)| cursor.clone())
            .collect()
    }

    pub fn requested_limits(&self) -> Vec<u8> {
        self.requested
            .lock()
            .unwrap()
            .iter()
            .map(|(_, limit)| *limit)
            .collect()
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn last_since(&self) -> Option<SinceMarker> {
        self.last_since.lock().unwrap().clone()
    }

    pub async fn wait_for_fetches(&self, n: usize) {
        let mut rx = self.fetches_tx.subscribe();
        let waited = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|started| *started >= n),
        )
        .await
        .is_ok_and(|changed| changed.is_ok());
        assert!(waited, "timed out waiting for {n} fetches");
    }
}

#[async_trait]
impl EntityService for FeedService {
    async fn fetch_page(
        &self,
        _feed: &FeedDescriptor,
        params: FeedParams,
        cursor: Option<&str>,
    ) -> Result<RemotePage, ServiceError> {
        self.requested
            .lock()
            .unwrap()
            .push((cursor.map(str::to_string), params.limit));
        self.fetches_tx.send_modify(|started| *started += 1);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| ServiceError::Transient("gate closed".into()))?
                .forget();
        }

        let scripted = self
            .pages
            .lock()
            .unwrap()
            .get_mut(&cursor.map(str::to_string))
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Err(ServiceError::Conflict(format!("unscripted cursor {cursor:?}"))))
    }

    async fn mutate_relationship(
        &self,
        _request: &MutationRequest,
    ) -> Result<ConfirmedRelationship, ServiceError> {
        Err(ServiceError::Conflict("not scripted".into()))
    }

    async fn check_newer(
        &self,
        _feed: &FeedDescriptor,
        since: &SinceMarker,
    ) -> Result<bool, ServiceError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        *self.last_since.lock().unwrap() = Some(since.clone());

        let delay = *self.check_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let answer = self.newer.lock().unwrap().pop_front();
        answer.unwrap_or(Ok(false))
    }
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap()
}

pub fn item(rkey: &str, minute: u32) -> FeedViewPost {
    FeedViewPost {
        post: PostView {
            uri: format!("at://did:plc:alice/app.bsky.feed.post/{rkey}"),
            cid: format!("cid-{rkey}"),
            author: ProfileViewBasic {
                did: "did:plc:alice".to_string(),
                handle: "alice.test".to_string(),
                display_name: None,
            },
            record: serde_json::json!({ "text": format!("post {rkey}") }),
            reply_count: 0,
            repost_count: 0,
            like_count: 2,
            quote_count: 0,
            indexed_at: at(minute),
            viewer: PostViewerState::default(),
        },
        reason: None,
    }
}
