//! Optimistic overlay for posts.

use skyline_atproto::PostView;

use crate::shadow::{ShadowPatch, Shadowable};

/// Placeholder record URI for a relationship the server hasn't confirmed yet.
pub const PENDING_RECORD: &str = "pending";

/// Overridable post fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostField {
    Like,
    Repost,
}

/// Pending edits to the viewer's relationship with a post.
///
/// `None` leaves the field alone; `Some(None)` clears the relationship;
/// `Some(Some(uri))` sets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostShadow {
    pub like: Option<Option<String>>,
    pub repost: Option<Option<String>>,
}

impl PostShadow {
    pub fn liked(on: bool) -> Self {
        Self {
            like: Some(on.then(|| PENDING_RECORD.to_string())),
            ..Default::default()
        }
    }

    pub fn reposted(on: bool) -> Self {
        Self {
            repost: Some(on.then(|| PENDING_RECORD.to_string())),
            ..Default::default()
        }
    }
}

impl ShadowPatch for PostShadow {
    type Field = PostField;

    fn merge(&mut self, newer: &Self) {
        if newer.like.is_some() {
            self.like = newer.like.clone();
        }
        if newer.repost.is_some() {
            self.repost = newer.repost.clone();
        }
    }

    fn clear(&mut self, field: PostField) {
        match field {
            PostField::Like => self.like = None,
            PostField::Repost => self.repost = None,
        }
    }

    fn is_empty(&self) -> bool {
        self.like.is_none() && self.repost.is_none()
    }
}

impl Shadowable for PostView {
    type Patch = PostShadow;

    fn shadow_key(&self) -> &str {
        &self.uri
    }

    fn apply_patch(&self, patch: &PostShadow) -> Self {
        let mut post = self.clone();
        if let Some(like) = &patch.like {
            post.like_count = adjust_count(
                self.like_count,
                self.viewer.like.is_some(),
                like.is_some(),
            );
            post.viewer.like = like.clone();
        }
        if let Some(repost) = &patch.repost {
            post.repost_count = adjust_count(
                self.repost_count,
                self.viewer.repost.is_some(),
                repost.is_some(),
            );
            post.viewer.repost = repost.clone();
        }
        post
    }
}

/// Shift a counter by the change in a viewer flag, never below zero.
pub(crate) fn adjust_count(count: u64, was_on: bool, is_on: bool) -> u64 {
    match (was_on, is_on) {
        (false, true) => count.saturating_add(1),
        (true, false) => count.saturating_sub(1),
        _ => count,
    }
}
