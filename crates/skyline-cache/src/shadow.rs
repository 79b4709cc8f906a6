//! Confirmed entity snapshots plus an overlay of unconfirmed local edits.
//!
//! Every write (`insert_base`, `apply_optimistic`, `reconcile`, `settle`,
//! `revert`) happens under a single DashMap shard guard, so readers never see
//! a half-applied change for a key. Subscribers are notified after the guard
//! is released.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::trace;

/// Broadcast channel capacity for shadow updates.
const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// A partial set of field overrides for one entity.
pub trait ShadowPatch: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Identifies one overridable field.
    type Field: Copy + fmt::Debug + Send + Sync + 'static;

    /// Lay `newer` over `self`; fields set in `newer` win.
    fn merge(&mut self, newer: &Self);

    /// Drop the override for `field`.
    fn clear(&mut self, field: Self::Field);

    /// Whether no field is overridden.
    fn is_empty(&self) -> bool;
}

/// An entity that can be viewed through a shadow overlay.
pub trait Shadowable: Clone + fmt::Debug + Send + Sync + 'static {
    type Patch: ShadowPatch;

    /// Stable identity (post URI, profile DID).
    fn shadow_key(&self) -> &str;

    /// This entity with `patch` applied, including any derived counters.
    fn apply_patch(&self, patch: &Self::Patch) -> Self;
}

/// Outcome of [`ShadowCache::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The base was replaced and the overlay cleared.
    Applied,
    /// The base was replaced but a newer optimistic patch was kept.
    Superseded,
}

/// Notification sent to subscribers whenever the merged view of a key changes.
#[derive(Debug, Clone)]
pub struct ShadowUpdate<E> {
    pub key: String,
    /// Merged value, or `None` if the key no longer has a base.
    pub value: Option<E>,
}

#[derive(Debug, Clone)]
struct Overlay<P> {
    patch: P,
    version: u64,
}

#[derive(Debug)]
struct Slot<E: Shadowable> {
    base: Option<E>,
    overlay: Option<Overlay<E::Patch>>,
}

impl<E: Shadowable> Slot<E> {
    fn merged(&self) -> Option<E> {
        let base = self.base.as_ref()?;
        Some(match &self.overlay {
            Some(overlay) => base.apply_patch(&overlay.patch),
            None => base.clone(),
        })
    }

    fn is_vacant(&self) -> bool {
        self.base.is_none() && self.overlay.is_none()
    }
}

impl<E: Shadowable> Default for Slot<E> {
    fn default() -> Self {
        Self {
            base: None,
            overlay: None,
        }
    }
}

/// Shared cache presenting optimistic-plus-confirmed entity state.
pub struct ShadowCache<E: Shadowable> {
    slots: DashMap<String, Slot<E>>,
    /// Source of overlay versions; monotonic across all keys.
    versions: AtomicU64,
    updates_tx: broadcast::Sender<ShadowUpdate<E>>,
}

impl<E: Shadowable> ShadowCache<E> {
    /// Create a new empty cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Merged view of `key`: the confirmed base with any overlay applied.
    pub fn read(&self, key: &str) -> Option<E> {
        self.slots.get(key).and_then(|slot| slot.merged())
    }

    /// Apply the overlay for `entity`'s key to an externally supplied snapshot.
    pub fn shadow(&self, entity: &E) -> E {
        match self
            .slots
            .get(entity.shadow_key())
            .and_then(|slot| slot.overlay.clone())
        {
            Some(overlay) => entity.apply_patch(&overlay.patch),
            None => entity.clone(),
        }
    }

    /// The last confirmed snapshot for `key`, without the overlay.
    pub fn base(&self, key: &str) -> Option<E> {
        self.slots.get(key).and_then(|slot| slot.base.clone())
    }

    /// Store a confirmed snapshot. Any overlay stays in place.
    pub fn insert_base(&self, entity: E) {
        let key = entity.shadow_key().to_string();
        let merged = {
            let mut slot = self.slots.entry(key.clone()).or_default();
            slot.base = Some(entity);
            slot.merged()
        };
        trace!(key = %key, "shadow: base stored");
        self.broadcast(key, merged);
    }

    /// Store many confirmed snapshots.
    pub fn insert_bases(&self, entities: impl IntoIterator<Item = E>) {
        for entity in entities {
            self.insert_base(entity);
        }
    }

    /// Install or extend the overlay for `key` and return its version.
    ///
    /// Fields in `patch` replace earlier overrides. Re-applying a patch that
    /// changes nothing returns the current version and notifies no one.
    pub fn apply_optimistic(&self, key: &str, patch: E::Patch) -> u64 {
        let (version, merged) = {
            let mut slot = self.slots.entry(key.to_string()).or_default();
            let mut next = slot
                .overlay
                .as_ref()
                .map(|o| o.patch.clone())
                .unwrap_or_default();
            next.merge(&patch);

            if let Some(existing) = &slot.overlay
                && existing.patch == next
            {
                return existing.version;
            }

            let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
            slot.overlay = Some(Overlay {
                patch: next,
                version,
            });
            (version, slot.merged())
        };

        trace!(key = %key, version, "shadow: optimistic patch applied");
        self.broadcast(key.to_string(), merged);
        version
    }

    /// Version of the current overlay for `key`, if any.
    pub fn overlay_version(&self, key: &str) -> Option<u64> {
        self.slots
            .get(key)
            .and_then(|slot| slot.overlay.as_ref().map(|o| o.version))
    }

    /// Whether `key` has unconfirmed local edits.
    pub fn has_overlay(&self, key: &str) -> bool {
        self.overlay_version(key).is_some()
    }

    /// Replace the base with server truth and clear the overlay, unless a
    /// patch newer than `version` has been applied since.
    pub fn reconcile(&self, key: &str, server: E, version: u64) -> Reconciliation {
        let (outcome, merged) = {
            let mut slot = self.slots.entry(key.to_string()).or_default();
            slot.base = Some(server);
            let outcome = match &slot.overlay {
                Some(overlay) if overlay.version > version => Reconciliation::Superseded,
                _ => {
                    slot.overlay = None;
                    Reconciliation::Applied
                }
            };
            (outcome, slot.merged())
        };

        trace!(key = %key, version, outcome = ?outcome, "shadow: reconciled");
        self.broadcast(key.to_string(), merged);
        outcome
    }

    /// Replace the base with server truth and drop only the override for
    /// `field`, leaving other pending edits alone.
    pub fn settle(&self, key: &str, server: E, field: <E::Patch as ShadowPatch>::Field) {
        let merged = {
            let mut slot = self.slots.entry(key.to_string()).or_default();
            slot.base = Some(server);
            Self::clear_field(&mut slot, field);
            slot.merged()
        };

        trace!(key = %key, field = ?field, "shadow: settled");
        self.broadcast(key.to_string(), merged);
    }

    /// Discard every unconfirmed edit for `key`.
    pub fn revert(&self, key: &str) {
        let merged = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().overlay.take().is_none() {
                    return;
                }
                let merged = entry.get().merged();
                if entry.get().is_vacant() {
                    entry.remove();
                }
                merged
            }
            Entry::Vacant(_) => return,
        };

        trace!(key = %key, "shadow: overlay reverted");
        self.broadcast(key.to_string(), merged);
    }

    /// Discard the unconfirmed edit of one field for `key`.
    pub fn revert_field(&self, key: &str, field: <E::Patch as ShadowPatch>::Field) {
        let merged = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().overlay.is_none() {
                    return;
                }
                Self::clear_field(entry.get_mut(), field);
                let merged = entry.get().merged();
                if entry.get().is_vacant() {
                    entry.remove();
                }
                merged
            }
            Entry::Vacant(_) => return,
        };

        trace!(key = %key, field = ?field, "shadow: field reverted");
        self.broadcast(key.to_string(), merged);
    }

    fn clear_field(slot: &mut Slot<E>, field: <E::Patch as ShadowPatch>::Field) {
        if let Some(overlay) = slot.overlay.as_mut() {
            overlay.patch.clear(field);
            if overlay.patch.is_empty() {
                slot.overlay = None;
            }
        }
    }

    /// Evict `key` entirely.
    pub fn remove(&self, key: &str) {
        if self.slots.remove(key).is_some() {
            self.broadcast(key.to_string(), None);
        }
    }

    /// Number of keys with a base or an overlay.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop everything (e.g. on account switch). Watchers of every dropped
    /// key see [`EntityChange::Removed`].
    pub fn clear(&self) {
        let keys: Vec<String> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        for key in keys {
            self.remove(&key);
        }
    }

    /// Subscribe to every change.
    pub fn subscribe(&self) -> broadcast::Receiver<ShadowUpdate<E>> {
        self.updates_tx.subscribe()
    }

    /// Watch the merged value of a single key.
    pub fn on_entity_changed(self: &Arc<Self>, key: impl Into<String>) -> EntityWatcher<E> {
        EntityWatcher {
            key: key.into(),
            rx: self.updates_tx.subscribe(),
            cache: Arc::clone(self),
        }
    }

    fn broadcast(&self, key: String, value: Option<E>) {
        if self.updates_tx.send(ShadowUpdate { key, value }).is_err() {
            trace!("no subscribers for shadow update");
        }
    }
}

impl<E: Shadowable> Default for ShadowCache<E> {
    fn default() -> Self {
        let (updates_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            slots: DashMap::new(),
            versions: AtomicU64::new(0),
            updates_tx,
        }
    }
}

/// A change observed by an [`EntityWatcher`].
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange<E> {
    Updated(E),
    Removed,
}

/// Observer for one key of a [`ShadowCache`].
pub struct EntityWatcher<E: Shadowable> {
    key: String,
    rx: broadcast::Receiver<ShadowUpdate<E>>,
    cache: Arc<ShadowCache<E>>,
}

impl<E: Shadowable> EntityWatcher<E> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next change to the watched key.
    ///
    /// If the watcher fell behind, the current value is returned instead of
    /// the missed intermediate ones.
    pub async fn changed(&mut self) -> EntityChange<E> {
        loop {
            match self.rx.recv().await {
                Ok(update) if update.key == self.key => {
                    return match update.value {
                        Some(value) => EntityChange::Updated(value),
                        None => EntityChange::Removed,
                    };
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    trace!(key = %self.key, skipped, "shadow watcher lagged, re-reading");
                    return match self.cache.read(&self.key) {
                        Some(value) => EntityChange::Updated(value),
                        None => EntityChange::Removed,
                    };
                }
                // The cache owns the sender and we hold the cache.
                Err(RecvError::Closed) => return EntityChange::Removed,
            }
        }
    }
}
