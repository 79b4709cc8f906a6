//! Core types for posts, profiles and feeds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection NSID for posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";
/// Collection NSID for likes.
pub const LIKE_COLLECTION: &str = "app.bsky.feed.like";
/// Collection NSID for reposts.
pub const REPOST_COLLECTION: &str = "app.bsky.feed.repost";
/// Collection NSID for follows.
pub const FOLLOW_COLLECTION: &str = "app.bsky.graph.follow";

/// Default number of items requested per page.
pub const DEFAULT_PAGE_LIMIT: u8 = 30;

/// Session information from authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// Response from creating a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecordResponse {
    pub uri: String,
    pub cid: String,
}

/// Minimal author information embedded in a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewBasic {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// The viewer's relationship to a post.
///
/// Each field holds the URI of the viewer's like/repost record, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostViewerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repost: Option<String>,
}

/// A hydrated post as returned by the app view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileViewBasic,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub repost_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub quote_count: u64,
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub viewer: PostViewerState,
}

impl PostView {
    /// Post text, if the record carries one.
    pub fn text(&self) -> Option<&str> {
        self.record.get("text").and_then(|t| t.as_str())
    }
}

/// The viewer's relationship to a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewerState {
    /// URI of the viewer's follow record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following: Option<String>,
    /// URI of the subject's follow record for the viewer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followed_by: Option<String>,
    #[serde(default)]
    pub muted: bool,
    /// URI of the viewer's block record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<String>,
}

/// A hydrated profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub follows_count: u64,
    #[serde(default)]
    pub viewer: ProfileViewerState,
}

/// Why a post appears in a feed when it isn't simply authored there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum FeedReason {
    #[serde(rename = "app.bsky.feed.defs#reasonRepost", rename_all = "camelCase")]
    Repost {
        by: ProfileViewBasic,
        indexed_at: DateTime<Utc>,
    },
    #[serde(rename = "app.bsky.feed.defs#reasonPin")]
    Pin,
    #[serde(other)]
    Unknown,
}

/// A single feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedViewPost {
    pub post: PostView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FeedReason>,
}

impl FeedViewPost {
    /// The timestamp the feed is ordered by: the repost time for reposts,
    /// otherwise the post's index time.
    pub fn sort_at(&self) -> DateTime<Utc> {
        match &self.reason {
            Some(FeedReason::Repost { indexed_at, .. }) => *indexed_at,
            _ => self.post.indexed_at,
        }
    }
}

/// One page as returned by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePage {
    #[serde(rename = "feed")]
    pub items: Vec<FeedViewPost>,
    /// Opaque continuation token; `None` means the feed is exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// The newest item of a first page, used to ask "anything newer?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinceMarker {
    pub uri: String,
    pub sort_at: DateTime<Utc>,
}

impl SinceMarker {
    /// Marker for the head of a list of feed items.
    pub fn from_items(items: &[FeedViewPost]) -> Option<Self> {
        items.first().map(|item| Self {
            uri: item.post.uri.clone(),
            sort_at: item.sort_at(),
        })
    }
}

/// Per-request feed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedParams {
    pub limit: u8,
}

impl Default for FeedParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Error when parsing a feed descriptor.
#[derive(Debug, thiserror::Error)]
#[error("invalid feed descriptor: {0}")]
pub struct FeedDescriptorError(String);

/// Which feed to load.
///
/// The string form is `following`, `author|<did>|<filter>`,
/// `feedgen|<uri>` or `list|<uri>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedDescriptor {
    /// The viewer's home timeline.
    Following,
    /// Posts by one actor, narrowed by an app view filter
    /// (e.g. `posts_and_author_threads`).
    Author { actor: String, filter: String },
    /// A custom feed generator.
    Generator { uri: String },
    /// A list feed.
    List { uri: String },
}

impl FeedDescriptor {
    /// Whether this is `actor`'s own author feed.
    pub fn is_author_feed_of(&self, actor: &str) -> bool {
        matches!(self, FeedDescriptor::Author { actor: a, .. } if a == actor)
    }
}

impl FromStr for FeedDescriptor {
    type Err = FeedDescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('|').collect();
        match parts.as_slice() {
            ["following"] => Ok(FeedDescriptor::Following),
            ["author", actor, filter] if !actor.is_empty() && !filter.is_empty() => {
                Ok(FeedDescriptor::Author {
                    actor: actor.to_string(),
                    filter: filter.to_string(),
                })
            }
            ["feedgen", uri] if !uri.is_empty() => Ok(FeedDescriptor::Generator {
                uri: uri.to_string(),
            }),
            ["list", uri] if !uri.is_empty() => Ok(FeedDescriptor::List {
                uri: uri.to_string(),
            }),
            _ => Err(FeedDescriptorError(s.to_string())),
        }
    }
}

impl fmt::Display for FeedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedDescriptor::Following => write!(f, "following"),
            FeedDescriptor::Author { actor, filter } => write!(f, "author|{actor}|{filter}"),
            FeedDescriptor::Generator { uri } => write!(f, "feedgen|{uri}"),
            FeedDescriptor::List { uri } => write!(f, "list|{uri}"),
        }
    }
}

/// A toggle-style viewer relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationshipAction {
    Like,
    Repost,
    Follow,
}

impl RelationshipAction {
    /// Collection the relationship record lives in.
    pub fn collection(&self) -> &'static str {
        match self {
            RelationshipAction::Like => LIKE_COLLECTION,
            RelationshipAction::Repost => REPOST_COLLECTION,
            RelationshipAction::Follow => FOLLOW_COLLECTION,
        }
    }
}

impl fmt::Display for RelationshipAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationshipAction::Like => "like",
            RelationshipAction::Repost => "repost",
            RelationshipAction::Follow => "follow",
        };
        f.write_str(name)
    }
}

/// A request to move a relationship to a desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    /// Post URI or profile DID.
    pub subject: String,
    /// Content hash of the subject (required for likes and reposts).
    pub subject_cid: Option<String>,
    pub action: RelationshipAction,
    /// `true` to create the relationship, `false` to remove it.
    pub desired: bool,
    /// The currently confirmed relationship record, needed to remove it.
    pub current_record: Option<String>,
}

/// Server-confirmed relationship state after a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfirmedRelationship {
    /// URI of the relationship record, or `None` when removed.
    pub record: Option<String>,
}

impl ConfirmedRelationship {
    pub fn is_on(&self) -> bool {
        self.record.is_some()
    }
}
