//! Detection of newer content at the head of a loaded feed.
//!
//! The monitor never touches loaded pages. It only raises the pager's
//! has-new flag so the UI can offer a "load new posts" affordance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use skyline_atproto::lifetime::{run_until_cancelled, with_timeout};
use skyline_atproto::{CancelSignal, FeedParams};
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::error::FeedError;
use crate::pager::{FeedPage, FeedPager};

/// How old the first page must be before regaining focus triggers a check.
pub const CHECK_LATEST_AFTER: Duration = Duration::from_secs(30);

/// Upper bound on a single freshness check.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessConfig {
    pub stale_after: Duration,
    pub check_timeout: Duration,
    /// Fixed polling interval while the feed is visible; `None` disables it.
    pub poll_interval: Option<Duration>,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            stale_after: CHECK_LATEST_AFTER,
            check_timeout: CHECK_TIMEOUT,
            poll_interval: None,
        }
    }
}

/// Host lifecycle changes the monitor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The feed became the visible screen.
    Focus,
    /// The feed stopped being the visible screen.
    Blur,
    /// The application came to the foreground.
    Foreground,
    /// The application went to the background.
    Background,
}

pub struct StalenessMonitor {
    pager: Arc<FeedPager>,
    config: StalenessConfig,
    enabled: AtomicBool,
}

impl StalenessMonitor {
    pub fn new(pager: Arc<FeedPager>, config: StalenessConfig) -> Arc<Self> {
        Arc::new(Self {
            pager,
            config,
            enabled: AtomicBool::new(true),
        })
    }

    pub fn pager(&self) -> &Arc<FeedPager> {
        &self.pager
    }

    pub fn config(&self) -> &StalenessConfig {
        &self.config
    }

    /// Turn checks on or off (e.g. while the feed is not the active tab).
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Ask the server whether anything is newer than the head of `first_page`.
    ///
    /// For an empty first page any item at all counts as new.
    pub async fn poll_latest(&self, first_page: &FeedPage) -> Result<bool, FeedError> {
        let service = self.pager.service();
        let feed = self.pager.feed();
        match first_page.since_marker() {
            Some(since) => Ok(service.check_newer(feed, &since).await?),
            None => {
                let peek = service
                    .fetch_page(feed, FeedParams { limit: 1 }, None)
                    .await?;
                Ok(!peek.items.is_empty())
            }
        }
    }

    /// Check for new content and raise the has-new flag if there is some.
    ///
    /// Skipped while disabled, before a first page exists, or while the pager
    /// is fetching. Bounded by the configured timeout; failures are logged
    /// and otherwise ignored. Returns whether the flag was raised.
    pub async fn check_for_new(&self, cancel: &CancelSignal) -> bool {
        if !self.is_enabled() || self.pager.is_fetching() {
            return false;
        }
        let generation = self.pager.generation();
        let Some(first) = self.pager.first_page().await else {
            return false;
        };

        let check = run_until_cancelled(cancel, self.poll_latest(&first));
        match with_timeout(self.config.check_timeout, check).await {
            None => {
                debug!(feed = %self.pager.feed(), "freshness check timed out");
                false
            }
            Some(None) => false,
            Some(Some(Ok(true))) => {
                // The feed may have been reloaded while we were asking.
                if self.pager.generation() != generation {
                    trace!("first page changed during check, ignoring result");
                    return false;
                }
                info!(feed = %self.pager.feed(), "newer posts available");
                self.pager.mark_has_new();
                true
            }
            Some(Some(Ok(false))) => false,
            Some(Some(Err(e))) => {
                warn!(feed = %self.pager.feed(), error = %e, "freshness check failed");
                false
            }
        }
    }

    /// The feed regained focus: check only if the first page is stale.
    pub async fn on_focus(&self, cancel: &CancelSignal) -> bool {
        match self.pager.first_page().await {
            Some(first) if first.age() > self.config.stale_after => {
                self.check_for_new(cancel).await
            }
            _ => false,
        }
    }

    /// The application came back to the foreground: always check.
    pub async fn on_foreground(&self, cancel: &CancelSignal) -> bool {
        self.check_for_new(cancel).await
    }

    pub fn has_new(&self) -> watch::Receiver<bool> {
        self.pager.has_new()
    }

    /// The user has seen the affordance; lower the flag without reloading.
    pub fn acknowledge(&self) {
        self.pager.clear_has_new();
    }

    /// The user acted on the affordance: reload from the top.
    pub async fn load_new(&self, cancel: &CancelSignal) -> Result<FeedPage, FeedError> {
        let page = self.pager.truncate_and_reload(cancel).await?;
        self.pager.clear_has_new();
        Ok(page)
    }

    /// Drive checks from lifecycle events and the optional polling interval
    /// until `shutdown` flips or the event channel closes.
    ///
    /// Nothing is checked unless the feed is both focused and in the
    /// foreground. A lifecycle check restarts the polling period.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<LifecycleEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let cancel = CancelSignal::from(shutdown_rx.clone());
        let mut focused = true;
        let mut foreground = true;
        let mut ticker = self.config.poll_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        info!(
            feed = %self.pager.feed(),
            poll_interval = ?self.config.poll_interval,
            "staleness monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("staleness monitor shutting down");
                    break;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("lifecycle channel closed");
                        break;
                    };
                    trace!(event = ?event, "lifecycle event");
                    match event {
                        LifecycleEvent::Focus => {
                            focused = true;
                            if foreground {
                                self.on_focus(&cancel).await;
                                restart(&mut ticker);
                            }
                        }
                        LifecycleEvent::Blur => focused = false,
                        LifecycleEvent::Foreground => {
                            foreground = true;
                            // A feed that isn't on screen is never checked.
                            if focused {
                                self.on_foreground(&cancel).await;
                                restart(&mut ticker);
                            }
                        }
                        LifecycleEvent::Background => foreground = false,
                    }
                }

                _ = next_tick(&mut ticker), if focused && foreground => {
                    self.check_for_new(&cancel).await;
                }
            }
        }
    }
}

fn restart(ticker: &mut Option<Interval>) {
    if let Some(interval) = ticker {
        interval.reset();
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
