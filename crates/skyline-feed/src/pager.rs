//! Cursor-based feed pager.
//!
//! Pages are append-only and kept in server order. Fetches for one feed are
//! serialized, and every fetch remembers the generation it started in: a
//! reload bumps the generation, so results from fetches that started before
//! it are dropped instead of being mixed into the fresh feed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use skyline_atproto::lifetime::run_until_cancelled;
use skyline_atproto::{
    CancelSignal, EntityService, FeedDescriptor, FeedParams, FeedViewPost, RemotePage,
    SinceMarker,
};
use skyline_cache::PostCache;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::FeedError;

/// One loaded page.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub items: Vec<FeedViewPost>,
    /// Continuation token for the next page; `None` at the end of the feed.
    pub cursor: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// Monotonic fetch time, used for staleness decisions.
    pub fetched_instant: Instant,
}

impl FeedPage {
    fn from_remote(remote: RemotePage) -> Self {
        Self {
            items: remote.items,
            cursor: remote.cursor,
            fetched_at: Utc::now(),
            fetched_instant: Instant::now(),
        }
    }

    /// Marker for the newest item on this page.
    pub fn since_marker(&self) -> Option<SinceMarker> {
        SinceMarker::from_items(&self.items)
    }

    /// Time since this page was fetched.
    pub fn age(&self) -> Duration {
        self.fetched_instant.elapsed()
    }
}

/// What a feed should render. Exactly one applies at any time.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedView {
    /// Nothing loaded yet, or the first load is still running.
    Loading,
    /// Nothing loaded and the last attempt failed.
    Failed(FeedError),
    /// Loaded, and the feed has no items.
    Empty,
    Items {
        count: usize,
        /// Set when loading the page after the last one failed.
        tail_error: Option<FeedError>,
        end_of_feed: bool,
        fetching_next: bool,
    },
}

#[derive(Debug, Default)]
struct PagerState {
    pages: Vec<FeedPage>,
    error: Option<FeedError>,
}

struct FetchGuard<'a>(&'a AtomicUsize);

impl<'a> FetchGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Loads one feed as a sequence of pages.
pub struct FeedPager {
    service: Arc<dyn EntityService>,
    feed: FeedDescriptor,
    params: FeedParams,
    posts: Option<Arc<PostCache>>,
    state: RwLock<PagerState>,
    fetch_lock: Mutex<()>,
    fetches: AtomicUsize,
    generation: AtomicU64,
    has_new_tx: watch::Sender<bool>,
    scroll_tx: watch::Sender<u64>,
}

impl FeedPager {
    pub fn new(
        service: Arc<dyn EntityService>,
        feed: FeedDescriptor,
        params: FeedParams,
    ) -> Arc<Self> {
        Arc::new(Self::build(service, feed, params, None))
    }

    /// Like [`FeedPager::new`], but fetched posts are stored in `posts` and
    /// [`FeedPager::items`] reads them back through its overlay.
    pub fn with_post_cache(
        service: Arc<dyn EntityService>,
        feed: FeedDescriptor,
        params: FeedParams,
        posts: Arc<PostCache>,
    ) -> Arc<Self> {
        Arc::new(Self::build(service, feed, params, Some(posts)))
    }

    fn build(
        service: Arc<dyn EntityService>,
        feed: FeedDescriptor,
        params: FeedParams,
        posts: Option<Arc<PostCache>>,
    ) -> Self {
        let (has_new_tx, _) = watch::channel(false);
        let (scroll_tx, _) = watch::channel(0);
        Self {
            service,
            feed,
            params,
            posts,
            state: RwLock::new(PagerState::default()),
            fetch_lock: Mutex::new(()),
            fetches: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            has_new_tx,
            scroll_tx,
        }
    }

    pub fn feed(&self) -> &FeedDescriptor {
        &self.feed
    }

    pub(crate) fn service(&self) -> &Arc<dyn EntityService> {
        &self.service
    }

    /// Load (or refresh) the first page, replacing everything loaded so far.
    ///
    /// Fetches started before this call no longer affect the feed.
    pub async fn fetch_first_page(&self, cancel: &CancelSignal) -> Result<FeedPage, FeedError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.load_first(generation, cancel).await
    }

    /// Load the page after the last loaded one.
    ///
    /// Fails with [`FeedError::Exhausted`] once the server has returned a page
    /// without a cursor. A transient failure leaves loaded pages in place and
    /// can be retried.
    #[tracing::instrument(skip(self, cancel), fields(feed = %self.feed))]
    pub async fn fetch_next_page(&self, cancel: &CancelSignal) -> Result<FeedPage, FeedError> {
        let _fetching = FetchGuard::enter(&self.fetches);
        let _serial = self.fetch_lock.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);

        let cursor = {
            let state = self.state.read().await;
            let Some(last) = state.pages.last() else {
                return Err(FeedError::NotLoaded);
            };
            match &last.cursor {
                Some(cursor) => cursor.clone(),
                None => return Err(FeedError::Exhausted),
            }
        };

        let result = self.fetch(Some(&cursor), cancel).await;

        let mut state = self.state.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("dropping page fetched before reload");
            return Err(FeedError::Aborted);
        }

        match result {
            Ok(page) => {
                debug!(items = page.items.len(), has_more = page.cursor.is_some(), "loaded page");
                self.seed(&page);
                state.pages.push(page.clone());
                state.error = None;
                Ok(page)
            }
            Err(FeedError::Aborted) => Err(FeedError::Aborted),
            Err(e) => {
                warn!(error = %e, "failed to load next page");
                state.error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Discard every page and load a fresh first page.
    ///
    /// Clears the has-new flag and asks observers to scroll to the top.
    pub async fn truncate_and_reload(&self, cancel: &CancelSignal) -> Result<FeedPage, FeedError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.state.write().await;
            state.pages.clear();
            state.error = None;
        }
        self.has_new_tx.send_replace(false);
        self.scroll_tx.send_modify(|epoch| *epoch += 1);
        info!(feed = %self.feed, "feed truncated for reload");

        self.load_first(generation, cancel).await
    }

    /// React to the viewer publishing a post.
    ///
    /// Only a feed the post would appear at the top of, that hasn't been
    /// paged past its first page, is refreshed. Returns whether it was.
    pub async fn on_post_created(
        &self,
        my_did: &str,
        cancel: &CancelSignal,
    ) -> Result<bool, FeedError> {
        let relevant = matches!(self.feed, FeedDescriptor::Following)
            || self.feed.is_author_feed_of(my_did);
        if !relevant || self.state.read().await.pages.len() != 1 {
            return Ok(false);
        }
        self.fetch_first_page(cancel).await?;
        Ok(true)
    }

    async fn load_first(
        &self,
        generation: u64,
        cancel: &CancelSignal,
    ) -> Result<FeedPage, FeedError> {
        let _fetching = FetchGuard::enter(&self.fetches);
        let _serial = self.fetch_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(FeedError::Aborted);
        }

        let result = self.fetch(None, cancel).await;

        let mut state = self.state.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("dropping first page superseded by a newer reload");
            return Err(FeedError::Aborted);
        }

        match result {
            Ok(page) => {
                info!(
                    feed = %self.feed,
                    items = page.items.len(),
                    has_more = page.cursor.is_some(),
                    "loaded first page"
                );
                self.seed(&page);
                state.pages = vec![page.clone()];
                state.error = None;
                self.has_new_tx.send_replace(false);
                Ok(page)
            }
            Err(FeedError::Aborted) => Err(FeedError::Aborted),
            Err(e) => {
                warn!(feed = %self.feed, error = %e, "failed to load first page");
                state.error = Some(e.clone());
                Err(e)
            }
        }
    }

    async fn fetch(
        &self,
        cursor: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<FeedPage, FeedError> {
        let call = self.service.fetch_page(&self.feed, self.params, cursor);
        match run_until_cancelled(cancel, call).await {
            None => Err(FeedError::Aborted),
            Some(Ok(remote)) => Ok(FeedPage::from_remote(remote)),
            Some(Err(e)) => Err(e.into()),
        }
    }

    fn seed(&self, page: &FeedPage) {
        if let Some(posts) = &self.posts {
            posts.insert_bases(page.items.iter().map(|item| item.post.clone()));
        }
    }

    /// Loaded pages in fetch order.
    pub async fn pages(&self) -> Vec<FeedPage> {
        self.state.read().await.pages.clone()
    }

    pub async fn first_page(&self) -> Option<FeedPage> {
        self.state.read().await.pages.first().cloned()
    }

    /// All loaded items in server order, with pending local edits applied.
    pub async fn items(&self) -> Vec<FeedViewPost> {
        let state = self.state.read().await;
        state
            .pages
            .iter()
            .flat_map(|page| page.items.iter())
            .map(|item| match &self.posts {
                Some(posts) => FeedViewPost {
                    post: posts.shadow(&item.post),
                    reason: item.reason.clone(),
                },
                None => item.clone(),
            })
            .collect()
    }

    /// Whether another page can be requested.
    pub async fn has_next_page(&self) -> bool {
        self.state
            .read()
            .await
            .pages
            .last()
            .is_some_and(|page| page.cursor.is_some())
    }

    /// The error from the most recent fetch, cleared by the next success.
    pub async fn last_error(&self) -> Option<FeedError> {
        self.state.read().await.error.clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetches.load(Ordering::SeqCst) > 0
    }

    /// Incremented by every reload; fetches from older generations are dropped.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn view(&self) -> FeedView {
        let state = self.state.read().await;
        let fetching = self.is_fetching();
        let count: usize = state.pages.iter().map(|page| page.items.len()).sum();

        if count == 0 {
            return match &state.error {
                Some(err) if !fetching => FeedView::Failed(err.clone()),
                _ if !fetching && !state.pages.is_empty() => FeedView::Empty,
                _ => FeedView::Loading,
            };
        }

        FeedView::Items {
            count,
            tail_error: state.error.clone(),
            end_of_feed: state.pages.last().is_some_and(|page| page.cursor.is_none()),
            fetching_next: fetching,
        }
    }

    /// Whether newer content than the first page is known to exist.
    pub fn has_new(&self) -> watch::Receiver<bool> {
        self.has_new_tx.subscribe()
    }

    pub(crate) fn mark_has_new(&self) {
        self.has_new_tx.send_if_modified(|has_new| !std::mem::replace(has_new, true));
    }

    pub(crate) fn clear_has_new(&self) {
        self.has_new_tx.send_if_modified(|has_new| std::mem::replace(has_new, false));
    }

    /// Ticks each time the feed was truncated and should be shown from the top.
    pub fn scroll_epoch(&self) -> watch::Receiver<u64> {
        self.scroll_tx.subscribe()
    }
}
