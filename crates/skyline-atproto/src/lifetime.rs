//! Cancellation tied to the lifetime of an owner (a screen, a session).
//!
//! A [`Lifetime`] holds the sending side of a `watch` channel; every
//! [`CancelSignal`] cloned from it observes the end of that lifetime.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Owner side of a cancellation scope. Ending or dropping it cancels every
/// signal handed out.
#[derive(Debug)]
pub struct Lifetime {
    tx: watch::Sender<bool>,
}

impl Lifetime {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A signal that fires when this lifetime ends.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// End the lifetime, cancelling all outstanding work.
    pub fn end(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        self.end();
    }
}

/// Receiving side of a [`Lifetime`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the owning lifetime has ended. Never resolves for
    /// [`CancelSignal::never`].
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        // A closed channel means the Lifetime was dropped, which ends it.
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

/// Treat a shutdown flag (`true` = shutting down) as a cancel signal.
impl From<watch::Receiver<bool>> for CancelSignal {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }
}

/// Run `fut` unless `signal` fires first; `None` means cancelled.
pub async fn run_until_cancelled<F: Future>(signal: &CancelSignal, fut: F) -> Option<F::Output> {
    if signal.is_cancelled() {
        return None;
    }
    tokio::select! {
        biased;
        _ = signal.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Run `fut` for at most `limit`; `None` means it timed out.
pub async fn with_timeout<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(limit, fut).await.ok()
}
