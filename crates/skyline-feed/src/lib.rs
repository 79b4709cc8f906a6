//! Feed paging and staleness detection for Skyline.
//!
//! [`FeedPager`] loads a feed as an append-only sequence of pages using the
//! server's opaque cursors. [`StalenessMonitor`] watches the head of the
//! loaded feed and raises a flag when the server has newer posts, without
//! disturbing what is already on screen.

mod error;
mod pager;
mod staleness;

pub use error::FeedError;
pub use pager::{FeedPage, FeedPager, FeedView};
pub use staleness::{
    CHECK_LATEST_AFTER, CHECK_TIMEOUT, LifecycleEvent, StalenessConfig, StalenessMonitor,
};
