//! The remote entity service boundary.

use async_trait::async_trait;

use crate::{
    ConfirmedRelationship, FeedDescriptor, FeedParams, MutationRequest, RemotePage, ServiceError,
    SinceMarker,
};

/// Everything the client core needs from the network.
///
/// Implemented over XRPC by [`XrpcClient`](crate::XrpcClient); tests supply
/// scripted implementations.
#[async_trait]
pub trait EntityService: Send + Sync {
    /// Fetch one page of `feed`, continuing from `cursor` when given.
    async fn fetch_page(
        &self,
        feed: &FeedDescriptor,
        params: FeedParams,
        cursor: Option<&str>,
    ) -> Result<RemotePage, ServiceError>;

    /// Move a viewer relationship (like, repost, follow) to the requested state.
    async fn mutate_relationship(
        &self,
        request: &MutationRequest,
    ) -> Result<ConfirmedRelationship, ServiceError>;

    /// Whether `feed` has content strictly newer than `since`.
    async fn check_newer(
        &self,
        feed: &FeedDescriptor,
        since: &SinceMarker,
    ) -> Result<bool, ServiceError>;
}
