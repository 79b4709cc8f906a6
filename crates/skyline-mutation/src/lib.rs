//! Relationship mutations for Skyline.
//!
//! Rapid toggles of a like, repost or follow are turned into a minimal,
//! strictly ordered series of network calls. The UI sees the requested state
//! immediately through the shadow cache; the server sees at most one call per
//! entity and action at a time, and always ends up in the last requested
//! state unless a call fails.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use skyline_atproto::{CancelSignal, EntityService, PostView};
//! use skyline_cache::ShadowCache;
//! use skyline_mutation::MutationQueue;
//!
//! # async fn example(service: Arc<dyn EntityService>, post: PostView) {
//! let posts = ShadowCache::<PostView>::new();
//! posts.insert_base(post.clone());
//!
//! let likes = MutationQueue::new(Arc::clone(&posts), service);
//! let pending = likes.like(&post.uri, CancelSignal::never());
//! match pending.await {
//!     Ok(confirmed) => println!("liked: {:?}", confirmed.record),
//!     Err(e) if e.is_silent() => {}
//!     Err(e) => eprintln!("couldn't like: {e}"),
//! }
//! # }
//! ```

mod error;
mod queue;
mod toggle;

pub use error::MutationError;
pub use queue::{MutationQueue, PendingMutation};
pub use toggle::Toggleable;
