//! Per-(entity, action) mutation queue.
//!
//! Each slot is a small state machine. A slot that exists has a driver task
//! running; the driver owns the single outstanding network call and the
//! slot's `queued` field holds the latest request that arrived while it was
//! busy. Newer requests replace older queued ones, so a burst of toggles
//! turns into at most one follow-up call.
//!
//! Lock order is always slot map, then shadow cache.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use skyline_atproto::lifetime::run_until_cancelled;
use skyline_atproto::{
    CancelSignal, ConfirmedRelationship, EntityService, MutationRequest, PostView, ProfileView,
    RelationshipAction,
};
use skyline_cache::{ShadowCache, ShadowPatch};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::MutationError;
use crate::toggle::Toggleable;

type MutationResult = Result<ConfirmedRelationship, MutationError>;
type SlotKey = (String, RelationshipAction);
type FieldOf<E> = <<E as skyline_cache::Shadowable>::Patch as ShadowPatch>::Field;

/// A request waiting for the driver.
struct Request {
    desired: bool,
    reply: oneshot::Sender<MutationResult>,
    cancel: CancelSignal,
}

#[derive(Default)]
struct Slot {
    queued: Option<Request>,
}

/// Resolves when the server has confirmed (or refused) a queued mutation.
///
/// Resolves to [`MutationError::Aborted`] when a newer request for the same
/// relationship replaced this one before it was sent.
#[must_use = "the mutation runs regardless, but its outcome is only observable here"]
pub struct PendingMutation {
    rx: oneshot::Receiver<MutationResult>,
}

impl PendingMutation {
    fn ready(result: MutationResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for PendingMutation {
    type Output = MutationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Err(MutationError::Aborted)))
    }
}

/// Serializes relationship mutations per entity and action.
pub struct MutationQueue<E: Toggleable> {
    cache: Arc<ShadowCache<E>>,
    service: Arc<dyn EntityService>,
    slots: DashMap<SlotKey, Slot>,
    calls: AtomicU64,
}

impl<E: Toggleable> MutationQueue<E> {
    pub fn new(cache: Arc<ShadowCache<E>>, service: Arc<dyn EntityService>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            service,
            slots: DashMap::new(),
            calls: AtomicU64::new(0),
        })
    }

    /// The shadow cache this queue writes optimistic state into.
    pub fn cache(&self) -> &Arc<ShadowCache<E>> {
        &self.cache
    }

    /// Request that the `action` relationship on `key` become `desired`.
    ///
    /// The optimistic patch is visible in the shadow cache before this
    /// returns. Must be called from within a Tokio runtime.
    pub fn enqueue(
        self: &Arc<Self>,
        key: &str,
        action: RelationshipAction,
        desired: bool,
        cancel: CancelSignal,
    ) -> PendingMutation {
        let Some(field) = E::field_for(action) else {
            return PendingMutation::ready(Err(MutationError::UnsupportedAction {
                key: key.to_string(),
                action,
            }));
        };
        if cancel.is_cancelled() {
            return PendingMutation::ready(Err(MutationError::Aborted));
        }

        let (reply, rx) = oneshot::channel();
        let request = Request {
            desired,
            reply,
            cancel,
        };

        let spawn = {
            let entry = self.slots.entry((key.to_string(), action));
            let Some(base) = self.cache.base(key) else {
                drop(entry);
                return PendingMutation::ready(Err(MutationError::UnknownEntity(key.to_string())));
            };
            self.cache
                .apply_optimistic(key, base.optimistic_patch(action, desired));

            match entry {
                Entry::Occupied(mut slot) => {
                    if let Some(replaced) = slot.get_mut().queued.replace(request) {
                        trace!(key = %key, action = %action, "superseding queued mutation");
                        let _ = replaced.reply.send(Err(MutationError::Aborted));
                    }
                    false
                }
                Entry::Vacant(slot) => {
                    slot.insert(Slot {
                        queued: Some(request),
                    });
                    true
                }
            }
        };

        if spawn {
            let queue = Arc::clone(self);
            let key = key.to_string();
            tokio::spawn(async move { queue.drive(key, action, field).await });
        }

        PendingMutation { rx }
    }

    /// Whether a driver is currently working on `(key, action)`.
    pub fn in_flight(&self, key: &str, action: RelationshipAction) -> bool {
        self.slots.contains_key(&(key.to_string(), action))
    }

    /// Total network calls issued since creation.
    pub fn calls_dispatched(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    #[tracing::instrument(skip(self, field), fields(action = %action))]
    async fn drive(self: Arc<Self>, key: String, action: RelationshipAction, field: FieldOf<E>) {
        let slot_key = (key.clone(), action);

        loop {
            let request = match self.slots.entry(slot_key.clone()) {
                Entry::Occupied(mut slot) => match slot.get_mut().queued.take() {
                    Some(request) => request,
                    None => {
                        self.settle(&key, field);
                        slot.remove();
                        debug!("mutation slot settled");
                        return;
                    }
                },
                Entry::Vacant(_) => return,
            };

            let Some(base) = self.cache.base(&key) else {
                let _ = request
                    .reply
                    .send(Err(MutationError::UnknownEntity(key.clone())));
                continue;
            };

            // Its owner went away while it waited; later requests may not have.
            if request.cancel.is_cancelled() {
                trace!("queued mutation cancelled before dispatch");
                let _ = request.reply.send(Err(MutationError::Aborted));
                continue;
            }

            let confirmed = base.relationship(action).map(str::to_string);
            if request.desired == confirmed.is_some() {
                trace!(desired = request.desired, "already confirmed, no call needed");
                let _ = request
                    .reply
                    .send(Ok(ConfirmedRelationship { record: confirmed }));
                continue;
            }

            let mutation = MutationRequest {
                subject: key.clone(),
                subject_cid: base.subject_cid().map(str::to_string),
                action,
                desired: request.desired,
                current_record: confirmed,
            };

            self.calls.fetch_add(1, Ordering::SeqCst);
            debug!(desired = request.desired, "dispatching relationship mutation");

            let outcome = run_until_cancelled(
                &request.cancel,
                self.service.mutate_relationship(&mutation),
            )
            .await;

            match outcome {
                None => {
                    // The result is never applied. Whatever is queued runs
                    // against the last confirmed state; if nothing is, the
                    // field settles back to it.
                    debug!("relationship mutation cancelled");
                    let _ = request.reply.send(Err(MutationError::Aborted));
                }
                Some(Ok(confirmed)) => {
                    if let Some(current) = self.cache.base(&key) {
                        self.cache
                            .insert_base(current.with_relationship(action, confirmed.record.clone()));
                    }
                    let _ = request.reply.send(Ok(confirmed));
                }
                Some(Err(err)) => {
                    let err = MutationError::from(err);
                    if err.is_silent() {
                        debug!(error = %err, "relationship mutation aborted");
                    } else {
                        warn!(error = %err, "relationship mutation failed");
                    }
                    let _ = request.reply.send(Err(err));
                }
            }
        }
    }

    /// Drop the action's optimistic field, leaving the confirmed base.
    fn settle(&self, key: &str, field: FieldOf<E>) {
        match self.cache.base(key) {
            Some(base) => self.cache.settle(key, base, field),
            None => self.cache.revert_field(key, field),
        }
    }
}

impl MutationQueue<PostView> {
    pub fn like(self: &Arc<Self>, uri: &str, cancel: CancelSignal) -> PendingMutation {
        self.enqueue(uri, RelationshipAction::Like, true, cancel)
    }

    pub fn unlike(self: &Arc<Self>, uri: &str, cancel: CancelSignal) -> PendingMutation {
        self.enqueue(uri, RelationshipAction::Like, false, cancel)
    }

    pub fn repost(self: &Arc<Self>, uri: &str, cancel: CancelSignal) -> PendingMutation {
        self.enqueue(uri, RelationshipAction::Repost, true, cancel)
    }

    pub fn unrepost(self: &Arc<Self>, uri: &str, cancel: CancelSignal) -> PendingMutation {
        self.enqueue(uri, RelationshipAction::Repost, false, cancel)
    }
}

impl MutationQueue<ProfileView> {
    pub fn follow(self: &Arc<Self>, did: &str, cancel: CancelSignal) -> PendingMutation {
        self.enqueue(did, RelationshipAction::Follow, true, cancel)
    }

    pub fn unfollow(self: &Arc<Self>, did: &str, cancel: CancelSignal) -> PendingMutation {
        self.enqueue(did, RelationshipAction::Follow, false, cancel)
    }
}
