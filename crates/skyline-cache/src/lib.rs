//! Shadow cache for Skyline.
//!
//! Holds the last confirmed snapshot of each post and profile together with
//! any optimistic edits the user has made but the server hasn't confirmed.
//! Readers always see the merge of the two.
//!
//! ## Usage
//!
//! ```no_run
//! use skyline_atproto::PostView;
//! use skyline_cache::{PostShadow, ShadowCache};
//!
//! # fn example(post: PostView) {
//! let cache = ShadowCache::<PostView>::new();
//! cache.insert_base(post.clone());
//!
//! let version = cache.apply_optimistic(&post.uri, PostShadow::liked(true));
//! assert!(cache.read(&post.uri).unwrap().viewer.like.is_some());
//!
//! // Server said no; roll back.
//! cache.revert(&post.uri);
//! # let _ = version;
//! # }
//! ```

mod post;
mod profile;
mod shadow;

pub use post::{PENDING_RECORD, PostField, PostShadow};
pub use profile::{ProfileField, ProfileShadow};
pub use shadow::{
    EntityChange, EntityWatcher, Reconciliation, ShadowCache, ShadowPatch, ShadowUpdate,
    Shadowable,
};

/// Shadow cache of posts keyed by AT URI.
pub type PostCache = ShadowCache<skyline_atproto::PostView>;
/// Shadow cache of profiles keyed by DID.
pub type ProfileCache = ShadowCache<skyline_atproto::ProfileView>;
