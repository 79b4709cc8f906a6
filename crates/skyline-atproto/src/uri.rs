//! AT URI parsing utilities.

use std::fmt;

use thiserror::Error;

/// Error when parsing an AT URI.
#[derive(Debug, Error)]
#[error("invalid AT URI: {0}")]
pub struct AtUriError(String);

/// A parsed AT Protocol URI.
///
/// AT URIs have the format: `at://{did}/{collection}/{rkey}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    /// The DID of the repository owner.
    pub did: String,
    /// The collection (e.g., "app.bsky.feed.like").
    pub collection: String,
    /// The record key.
    pub rkey: String,
}

impl AtUri {
    /// Build a URI from its parts.
    pub fn new(
        did: impl Into<String>,
        collection: impl Into<String>,
        rkey: impl Into<String>,
    ) -> Self {
        Self {
            did: did.into(),
            collection: collection.into(),
            rkey: rkey.into(),
        }
    }

    /// Parse an AT URI string.
    ///
    /// # Example
    ///
    /// ```
    /// use skyline_atproto::AtUri;
    ///
    /// let uri = AtUri::parse("at://did:plc:abc123/app.bsky.feed.like/3abc").unwrap();
    /// assert_eq!(uri.did, "did:plc:abc123");
    /// assert_eq!(uri.collection, "app.bsky.feed.like");
    /// assert_eq!(uri.rkey, "3abc");
    /// ```
    pub fn parse(uri: &str) -> Result<Self, AtUriError> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| AtUriError(format!("missing at:// prefix: {uri}")))?;

        let mut parts = rest.splitn(3, '/');
        let (Some(did), Some(collection), Some(rkey)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AtUriError(format!("expected did/collection/rkey: {uri}")));
        };

        if did.is_empty() || collection.is_empty() || rkey.is_empty() {
            return Err(AtUriError(format!("empty component in URI: {uri}")));
        }

        Ok(Self::new(did, collection, rkey))
    }

    /// Whether this URI names a record in `collection`.
    pub fn is_in(&self, collection: &str) -> bool {
        self.collection == collection
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}
