//! Mutation queue behaviour against a scripted service.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use skyline_atproto::{
    CancelSignal, ConfirmedRelationship, Lifetime, PostView, ProfileView, RelationshipAction,
    ServiceError,
};
use skyline_cache::{PENDING_RECORD, ShadowCache};
use skyline_mutation::{MutationError, MutationQueue};

use common::{MockService, POST_URI, PROFILE_DID, post, profile, settle_tasks};

fn post_queue(
    service: &Arc<MockService>,
    base: PostView,
) -> (Arc<ShadowCache<PostView>>, Arc<MutationQueue<PostView>>) {
    let posts = ShadowCache::new();
    posts.insert_base(base);
    let queue = MutationQueue::new(Arc::clone(&posts), service.clone());
    (posts, queue)
}

#[tokio::test]
async fn test_like_confirms_and_settles() {
    let service = MockService::open();
    let (posts, queue) = post_queue(&service, post(3, 0));

    let pending = queue.like(POST_URI, CancelSignal::never());

    // Visible before anything reaches the network.
    let shown = posts.read(POST_URI).unwrap();
    assert_eq!(shown.viewer.like.as_deref(), Some(PENDING_RECORD));
    assert_eq!(shown.like_count, 4);

    let confirmed = pending.await.unwrap();
    assert_eq!(
        confirmed.record.as_deref(),
        Some("at://did:plc:me/app.bsky.feed.like/1")
    );

    settle_tasks().await;
    assert!(!queue.in_flight(POST_URI, RelationshipAction::Like));
    assert!(!posts.has_overlay(POST_URI));

    let read = posts.read(POST_URI).unwrap();
    assert_eq!(read.viewer.like, confirmed.record);
    assert_eq!(read.like_count, 4);

    assert_eq!(queue.calls_dispatched(), 1);
    let requests = service.requests();
    assert_eq!(requests[0].subject, POST_URI);
    assert_eq!(requests[0].subject_cid.as_deref(), Some("bafyreiqueue"));
    assert!(requests[0].desired);
    assert_eq!(requests[0].current_record, None);
}

#[tokio::test]
async fn test_burst_before_dispatch_makes_no_call() {
    let service = MockService::open();
    let (posts, queue) = post_queue(&service, post(3, 0));

    let first = queue.like(POST_URI, CancelSignal::never());
    let second = queue.unlike(POST_URI, CancelSignal::never());

    assert_eq!(first.await, Err(MutationError::Aborted));
    assert_eq!(second.await, Ok(ConfirmedRelationship { record: None }));

    settle_tasks().await;
    assert_eq!(queue.calls_dispatched(), 0);
    assert_eq!(posts.read(POST_URI), Some(post(3, 0)));
}

#[tokio::test]
async fn test_unlike_while_like_in_flight() {
    let service = MockService::gated();
    let (posts, queue) = post_queue(&service, post(3, 0));

    let first = queue.like(POST_URI, CancelSignal::never());
    service.wait_for_calls(1).await;

    let second = queue.unlike(POST_URI, CancelSignal::never());
    let shown = posts.read(POST_URI).unwrap();
    assert_eq!(shown.viewer.like, None);
    assert_eq!(shown.like_count, 3);

    service.release(2);
    let liked = first.await.unwrap();
    assert!(liked.is_on());
    assert_eq!(second.await, Ok(ConfirmedRelationship { record: None }));

    settle_tasks().await;
    assert_eq!(queue.calls_dispatched(), 2);
    assert_eq!(service.max_in_flight(), 1);

    let requests = service.requests();
    assert_eq!(requests[1].current_record, liked.record);
    assert!(!requests[1].desired);
    assert_eq!(posts.read(POST_URI), Some(post(3, 0)));
}

#[tokio::test]
async fn test_toggles_during_follow_up_call_coalesce_again() {
    let service = MockService::gated();
    let (posts, queue) = post_queue(&service, post(0, 0));

    let like = queue.like(POST_URI, CancelSignal::never());
    service.wait_for_calls(1).await;
    let unlike = queue.unlike(POST_URI, CancelSignal::never());

    service.release(1);
    assert!(like.await.unwrap().is_on());
    service.wait_for_calls(2).await;

    // Three more toggles while the follow-up unlike is outstanding.
    let relike = queue.like(POST_URI, CancelSignal::never());
    let reunlike = queue.unlike(POST_URI, CancelSignal::never());
    let last = queue.like(POST_URI, CancelSignal::never());
    assert_eq!(relike.await, Err(MutationError::Aborted));
    assert_eq!(reunlike.await, Err(MutationError::Aborted));

    service.release(1);
    assert_eq!(unlike.await, Ok(ConfirmedRelationship { record: None }));
    service.wait_for_calls(3).await;
    service.release(1);
    assert!(last.await.unwrap().is_on());

    settle_tasks().await;
    assert_eq!(queue.calls_dispatched(), 3);
    assert_eq!(service.max_in_flight(), 1);

    let read = posts.read(POST_URI).unwrap();
    assert!(read.viewer.like.is_some());
    assert_eq!(read.like_count, 1);
    assert!(!posts.has_overlay(POST_URI));
}

#[tokio::test]
async fn test_transient_failure_reverts_and_reports() {
    let service = MockService::open();
    let (posts, queue) = post_queue(&service, post(3, 0));
    let before = posts.read(POST_URI);

    service.fail_next(ServiceError::Transient("upstream timeout".into()));
    let err = queue.like(POST_URI, CancelSignal::never()).await.unwrap_err();

    assert_eq!(err, MutationError::Transient("upstream timeout".into()));
    assert!(!err.is_silent());

    settle_tasks().await;
    assert_eq!(posts.read(POST_URI), before);
    assert!(!posts.has_overlay(POST_URI));
}

#[tokio::test]
async fn test_rejected_follow_reverts_profile() {
    let service = MockService::open();
    let profiles = ShadowCache::new();
    profiles.insert_base(profile(10));
    let queue: Arc<MutationQueue<ProfileView>> =
        MutationQueue::new(Arc::clone(&profiles), service.clone());

    service.fail_next(ServiceError::Conflict("BlockedActor: blocked".into()));
    let pending = queue.follow(PROFILE_DID, CancelSignal::never());
    assert_eq!(profiles.read(PROFILE_DID).unwrap().followers_count, 11);

    let err = pending.await.unwrap_err();
    assert!(matches!(err, MutationError::Conflict(ref msg) if msg.contains("BlockedActor")));

    settle_tasks().await;
    assert_eq!(profiles.read(PROFILE_DID), Some(profile(10)));
}

#[tokio::test]
async fn test_follow_then_unfollow() {
    let service = MockService::open();
    let profiles = ShadowCache::new();
    profiles.insert_base(profile(10));
    let queue = MutationQueue::new(Arc::clone(&profiles), service.clone());

    let followed = queue.follow(PROFILE_DID, CancelSignal::never()).await.unwrap();
    settle_tasks().await;
    assert_eq!(
        profiles.read(PROFILE_DID).unwrap().viewer.following,
        followed.record
    );

    queue
        .unfollow(PROFILE_DID, CancelSignal::never())
        .await
        .unwrap();
    settle_tasks().await;

    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].subject_cid, None);
    assert_eq!(requests[1].current_record, followed.record);
    assert_eq!(profiles.read(PROFILE_DID), Some(profile(10)));
}

#[tokio::test]
async fn test_cancellation_abandons_call() {
    let service = MockService::gated();
    let (posts, queue) = post_queue(&service, post(3, 0));
    let screen = Lifetime::new();

    let first = queue.like(POST_URI, screen.signal());
    service.wait_for_calls(1).await;
    let queued = queue.unlike(POST_URI, screen.signal());
    let queued_again = queue.like(POST_URI, screen.signal());
    assert_eq!(queued.await, Err(MutationError::Aborted));

    screen.end();
    let err = first.await.unwrap_err();
    assert!(err.is_silent());
    assert_eq!(queued_again.await, Err(MutationError::Aborted));

    settle_tasks().await;
    assert_eq!(posts.read(POST_URI), Some(post(3, 0)));
    assert!(!queue.in_flight(POST_URI, RelationshipAction::Like));

    // The server answering late changes nothing.
    service.release(1);
    settle_tasks().await;
    assert_eq!(posts.read(POST_URI), Some(post(3, 0)));
    assert_eq!(queue.calls_dispatched(), 1);
}

#[tokio::test]
async fn test_queued_request_outlives_other_owner() {
    let service = MockService::gated();
    let (posts, queue) = post_queue(&service, post(3, 0));
    let feed_screen = Lifetime::new();
    let thread_screen = Lifetime::new();

    let from_feed = queue.like(POST_URI, feed_screen.signal());
    service.wait_for_calls(1).await;
    let unlike = queue.unlike(POST_URI, thread_screen.signal());
    let relike = queue.like(POST_URI, thread_screen.signal());
    assert_eq!(unlike.await, Err(MutationError::Aborted));

    feed_screen.end();
    assert_eq!(from_feed.await, Err(MutationError::Aborted));

    // The thread screen's like still shows and still goes out.
    assert!(posts.read(POST_URI).unwrap().viewer.like.is_some());
    service.wait_for_calls(2).await;
    service.release(1);
    let confirmed = relike.await.unwrap();
    assert!(confirmed.is_on());

    settle_tasks().await;
    assert_eq!(queue.calls_dispatched(), 2);
    assert_eq!(service.max_in_flight(), 1);
    let requests = service.requests();
    assert!(requests[1].desired);
    assert_eq!(requests[1].current_record, None);

    let shown = posts.read(POST_URI).unwrap();
    assert_eq!(shown.viewer.like, confirmed.record);
    assert_eq!(shown.like_count, 4);
    assert!(!posts.has_overlay(POST_URI));
    assert!(!thread_screen.is_ended());
}

#[tokio::test]
async fn test_already_cancelled_request_is_rejected() {
    let service = MockService::open();
    let (posts, queue) = post_queue(&service, post(3, 0));
    let screen = Lifetime::new();
    screen.end();

    let err = queue.like(POST_URI, screen.signal()).await.unwrap_err();
    assert_eq!(err, MutationError::Aborted);
    assert!(!posts.has_overlay(POST_URI));
}

#[tokio::test]
async fn test_unknown_and_unsupported() {
    let service = MockService::open();
    let (_posts, queue) = post_queue(&service, post(3, 0));

    let err = queue
        .like("at://did:plc:alice/app.bsky.feed.post/missing", CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::UnknownEntity(_)));

    let err = queue
        .enqueue(POST_URI, RelationshipAction::Follow, true, CancelSignal::never())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        MutationError::UnsupportedAction {
            key: POST_URI.to_string(),
            action: RelationshipAction::Follow,
        }
    );
    assert_eq!(queue.calls_dispatched(), 0);
}

#[tokio::test]
async fn test_failure_still_runs_differing_queued_target() {
    let service = MockService::gated();
    let (posts, queue) = post_queue(&service, post(3, 0));

    let first = queue.like(POST_URI, CancelSignal::never());
    service.wait_for_calls(1).await;
    let _superseded = queue.unlike(POST_URI, CancelSignal::never());
    let last = queue.like(POST_URI, CancelSignal::never());

    service.fail_next(ServiceError::Transient("503".into()));
    service.release(2);

    assert_eq!(first.await, Err(MutationError::Transient("503".into())));
    assert!(last.await.unwrap().is_on());

    settle_tasks().await;
    assert_eq!(queue.calls_dispatched(), 2);
    assert_eq!(posts.read(POST_URI).unwrap().like_count, 4);
}

#[tokio::test]
async fn test_like_and_repost_are_independent() {
    let service = MockService::gated();
    let (posts, queue) = post_queue(&service, post(3, 1));

    let like = queue.like(POST_URI, CancelSignal::never());
    let repost = queue.repost(POST_URI, CancelSignal::never());
    service.wait_for_calls(2).await;
    assert_eq!(service.max_in_flight(), 2);

    service.release(1);
    let liked = like.await.unwrap();
    settle_tasks().await;

    // The like settled without touching the pending repost.
    let shown = posts.read(POST_URI).unwrap();
    assert_eq!(shown.viewer.like, liked.record);
    assert_eq!(shown.viewer.repost.as_deref(), Some(PENDING_RECORD));
    assert_eq!(shown.repost_count, 2);

    service.release(1);
    let reposted = repost.await.unwrap();
    settle_tasks().await;

    let read = posts.read(POST_URI).unwrap();
    assert_eq!(read.viewer.repost, reposted.record);
    assert_eq!(read.like_count, 4);
    assert_eq!(read.repost_count, 2);
    assert!(!posts.has_overlay(POST_URI));
}

#[tokio::test]
async fn test_watcher_sees_optimistic_state() {
    let service = MockService::gated();
    let (posts, queue) = post_queue(&service, post(3, 0));
    let mut watcher = posts.on_entity_changed(POST_URI);

    let _pending = queue.like(POST_URI, CancelSignal::never());
    match watcher.changed().await {
        skyline_cache::EntityChange::Updated(post) => {
            assert_eq!(post.viewer.like.as_deref(), Some(PENDING_RECORD));
        }
        skyline_cache::EntityChange::Removed => panic!("expected update"),
    }
}
