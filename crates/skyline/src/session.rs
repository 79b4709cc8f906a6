//! The signed-in session and the objects that hang off it.
//!
//! Everything is built once in [`Session::init`] and shared by the
//! commands: one XRPC client, one shadow cache per entity type and one
//! mutation queue per cache. [`Session::dispose`] ends the session's
//! lifetime, which abandons any mutation still in flight.

use std::sync::Arc;

use skyline_atproto::{
    AtprotoError, CancelSignal, EntityService, FeedDescriptor, FeedParams, Lifetime, PostView,
    ProfileView, RelationshipAction, XrpcClient,
};
use skyline_cache::{PostCache, ProfileCache};
use skyline_feed::FeedPager;
use skyline_mutation::{MutationError, MutationQueue};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Atproto(#[from] AtprotoError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("session has no DID after login")]
    MissingDid,
}

pub struct Session {
    client: Arc<XrpcClient>,
    did: String,
    posts: Arc<PostCache>,
    profiles: Arc<ProfileCache>,
    post_mutations: Arc<MutationQueue<PostView>>,
    profile_mutations: Arc<MutationQueue<ProfileView>>,
    lifetime: Lifetime,
}

impl Session {
    /// Log in and build the dependency graph.
    #[tracing::instrument(skip(app_password))]
    pub async fn init(
        pds_url: &str,
        handle: &str,
        app_password: &str,
    ) -> Result<Self, SessionError> {
        let client = XrpcClient::new(pds_url);
        client.login(handle, app_password).await?;
        let did = client.did().await.ok_or(SessionError::MissingDid)?;
        info!(did = %did, "logged in");

        Ok(Self::with_client(Arc::new(client), did))
    }

    fn with_client(client: Arc<XrpcClient>, did: String) -> Self {
        let service: Arc<dyn EntityService> = client.clone();
        let posts = PostCache::new();
        let profiles = ProfileCache::new();
        let post_mutations = MutationQueue::new(Arc::clone(&posts), Arc::clone(&service));
        let profile_mutations = MutationQueue::new(Arc::clone(&profiles), service);

        Self {
            client,
            did,
            posts,
            profiles,
            post_mutations,
            profile_mutations,
            lifetime: Lifetime::new(),
        }
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    pub fn posts(&self) -> &Arc<PostCache> {
        &self.posts
    }

    pub fn profiles(&self) -> &Arc<ProfileCache> {
        &self.profiles
    }

    /// Cancellation tied to this session.
    pub fn signal(&self) -> CancelSignal {
        self.lifetime.signal()
    }

    /// A pager whose items are read through the session's post cache.
    pub fn pager(&self, feed: FeedDescriptor, params: FeedParams) -> Arc<FeedPager> {
        let service: Arc<dyn EntityService> = self.client.clone();
        FeedPager::with_post_cache(service, feed, params, Arc::clone(&self.posts))
    }

    /// Set the like or repost relationship on a post and wait for the
    /// server. Returns the post as the cache shows it afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_post(
        &self,
        uri: &str,
        action: RelationshipAction,
        desired: bool,
    ) -> Result<PostView, SessionError> {
        if self.posts.base(uri).is_none() {
            let post = self.client.get_post(uri).await?;
            self.posts.insert_base(post);
        }

        self.post_mutations
            .enqueue(uri, action, desired, self.signal())
            .await?;
        self.posts
            .read(uri)
            .ok_or_else(|| SessionError::Mutation(MutationError::UnknownEntity(uri.to_string())))
    }

    /// Follow or unfollow an account and wait for the server.
    #[tracing::instrument(skip(self))]
    pub async fn set_following(
        &self,
        did: &str,
        desired: bool,
    ) -> Result<ProfileView, SessionError> {
        if self.profiles.base(did).is_none() {
            let profile = self.client.get_profile(did).await?;
            self.profiles.insert_base(profile);
        }

        self.profile_mutations
            .enqueue(did, RelationshipAction::Follow, desired, self.signal())
            .await?;
        self.profiles
            .read(did)
            .ok_or_else(|| SessionError::Mutation(MutationError::UnknownEntity(did.to_string())))
    }

    /// End the session: abandon outstanding work and drop credentials.
    pub async fn dispose(self) {
        self.lifetime.end();
        self.client.logout().await;
        debug!(
            posts = self.posts.len(),
            profiles = self.profiles.len(),
            calls = self.post_mutations.calls_dispatched() + self.profile_mutations.calls_dispatched(),
            "session disposed"
        );
    }
}
