//! Scripted entity service for queue tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use skyline_atproto::{
    ConfirmedRelationship, EntityService, FeedDescriptor, FeedParams, MutationRequest, PostView,
    PostViewerState, ProfileView, ProfileViewBasic, ProfileViewerState, RemotePage, ServiceError,
    SinceMarker,
};
use tokio::sync::{Semaphore, watch};

pub const POST_URI: &str = "at://did:plc:alice/app.bsky.feed.post/3kqueue";
pub const PROFILE_DID: &str = "did:plc:bob";

/// Mutation service whose calls can be held open and made to fail.
pub struct MockService {
    /// `None` lets calls through immediately.
    gate: Option<Semaphore>,
    failures: Mutex<VecDeque<ServiceError>>,
    requests: Mutex<Vec<MutationRequest>>,
    started_tx: watch::Sender<usize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_rkey: AtomicU64,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockService {
    /// Calls complete as soon as they start.
    pub fn open() -> Arc<Self> {
        Arc::new(Self::with_gate(None))
    }

    /// Calls block until [`MockService::release`] lets them through.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::with_gate(Some(Semaphore::new(0))))
    }

    fn with_gate(gate: Option<Semaphore>) -> Self {
        let (started_tx, _) = watch::channel(0);
        Self {
            gate,
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            started_tx,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            next_rkey: AtomicU64::new(1),
        }
    }

    /// Let `n` held calls complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// The next completing call fails with `err`.
    pub fn fail_next(&self, err: ServiceError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn requests(&self) -> Vec<MutationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` calls have started.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.started_tx.subscribe();
        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            rx.wait_for(|started| *started >= n),
        )
        .await
        .is_ok_and(|changed| changed.is_ok());
        assert!(waited, "timed out waiting for {n} calls");
    }
}

#[async_trait]
impl EntityService for MockService {
    async fn fetch_page(
        &self,
        _feed: &FeedDescriptor,
        _params: FeedParams,
        _cursor: Option<&str>,
    ) -> Result<RemotePage, ServiceError> {
        Err(ServiceError::Conflict("not scripted".into()))
    }

    async fn mutate_relationship(
        &self,
        request: &MutationRequest,
    ) -> Result<ConfirmedRelationship, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.started_tx.send_modify(|started| *started += 1);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| ServiceError::Transient("gate closed".into()))?;
            permit.forget();
        }

        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        let record = request.desired.then(|| {
            let rkey = self.next_rkey.fetch_add(1, Ordering::SeqCst);
            format!("at://did:plc:me/{}/{rkey}", request.action.collection())
        });
        Ok(ConfirmedRelationship { record })
    }

    async fn check_newer(
        &self,
        _feed: &FeedDescriptor,
        _since: &SinceMarker,
    ) -> Result<bool, ServiceError> {
        Ok(false)
    }
}

pub fn post(like_count: u64, repost_count: u64) -> PostView {
    PostView {
        uri: POST_URI.to_string(),
        cid: "bafyreiqueue".to_string(),
        author: ProfileViewBasic {
            did: "did:plc:alice".to_string(),
            handle: "alice.test".to_string(),
            display_name: None,
        },
        record: serde_json::json!({ "text": "toggle me" }),
        reply_count: 0,
        repost_count,
        like_count,
        quote_count: 0,
        indexed_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        viewer: PostViewerState::default(),
    }
}

pub fn profile(followers_count: u64) -> ProfileView {
    ProfileView {
        did: PROFILE_DID.to_string(),
        handle: "bob.test".to_string(),
        display_name: Some("Bob".to_string()),
        followers_count,
        follows_count: 12,
        viewer: ProfileViewerState::default(),
    }
}

/// Let spawned drivers run until they block or finish.
pub async fn settle_tasks() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
