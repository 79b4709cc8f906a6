//! `timeline` command: page through a feed and print it.

use skyline_atproto::{FeedDescriptor, FeedParams, FeedReason, FeedViewPost};
use skyline_feed::{FeedError, FeedView};
use tracing::{debug, warn};

use crate::session::Session;

pub async fn run(session: &Session, feed: FeedDescriptor, pages: usize) -> miette::Result<()> {
    let pager = session.pager(feed, FeedParams::default());
    let cancel = session.signal();

    pager
        .fetch_first_page(&cancel)
        .await
        .map_err(|e| miette::miette!("failed to load {}: {}", pager.feed(), e))?;

    for _ in 1..pages {
        match pager.fetch_next_page(&cancel).await {
            Ok(page) => debug!(items = page.items.len(), "loaded next page"),
            Err(FeedError::Exhausted) => break,
            Err(e) => {
                // Keep what we have and show it.
                warn!(error = %e, "stopped paging");
                break;
            }
        }
    }

    for item in pager.items().await {
        println!("{}", render_item(&item));
    }
    println!("{}", render_footer(&pager.view().await));
    Ok(())
}

/// One line per post: author, engagement counts with viewer markers, text.
pub fn render_item(item: &FeedViewPost) -> String {
    let post = &item.post;
    let liked = if post.viewer.like.is_some() { "*" } else { "" };
    let reposted = if post.viewer.repost.is_some() { "*" } else { "" };
    let text = post.text().unwrap_or("").replace('\n', " ");

    let mut line = format!(
        "@{} [{} likes{}, {} reposts{}] {}",
        post.author.handle, post.like_count, liked, post.repost_count, reposted, text
    );
    if let Some(FeedReason::Repost { by, .. }) = &item.reason {
        line.push_str(&format!(" (reposted by @{})", by.handle));
    }
    line
}

pub fn render_footer(view: &FeedView) -> String {
    match view {
        FeedView::Loading => "loading...".to_string(),
        FeedView::Failed(e) => format!("failed to load feed: {e}"),
        FeedView::Empty => "nothing here yet".to_string(),
        FeedView::Items {
            count,
            tail_error: Some(e),
            ..
        } => format!("{count} posts, more unavailable: {e}"),
        FeedView::Items {
            count,
            end_of_feed: true,
            ..
        } => format!("{count} posts, end of feed"),
        FeedView::Items { count, .. } => format!("{count} posts"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use skyline_atproto::{PostView, PostViewerState, ProfileViewBasic};

    fn author(handle: &str) -> ProfileViewBasic {
        ProfileViewBasic {
            did: format!("did:plc:{handle}"),
            handle: format!("{handle}.test"),
            display_name: None,
        }
    }

    fn item(text: &str) -> FeedViewPost {
        FeedViewPost {
            post: PostView {
                uri: "at://did:plc:alice/app.bsky.feed.post/1".into(),
                cid: "bafy".into(),
                author: author("alice"),
                record: serde_json::json!({ "text": text }),
                reply_count: 0,
                repost_count: 1,
                like_count: 3,
                quote_count: 0,
                indexed_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
                viewer: PostViewerState::default(),
            },
            reason: None,
        }
    }

    #[test]
    fn test_render_item_marks_viewer_state() {
        let mut item = item("line one\nline two");
        item.post.viewer.like = Some("at://did:plc:me/app.bsky.feed.like/1".into());

        assert_eq!(
            render_item(&item),
            "@alice.test [3 likes*, 1 reposts] line one line two"
        );
    }

    #[test]
    fn test_render_item_names_reposter() {
        let mut item = item("hi");
        item.reason = Some(FeedReason::Repost {
            by: author("bob"),
            indexed_at: Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap(),
        });

        assert!(render_item(&item).ends_with("hi (reposted by @bob.test)"));
    }

    #[test]
    fn test_render_footer() {
        assert_eq!(render_footer(&FeedView::Empty), "nothing here yet");
        assert_eq!(
            render_footer(&FeedView::Items {
                count: 12,
                tail_error: None,
                end_of_feed: true,
                fetching_next: false,
            }),
            "12 posts, end of feed"
        );
        assert_eq!(
            render_footer(&FeedView::Items {
                count: 30,
                tail_error: Some(FeedError::Transient("timeout".into())),
                end_of_feed: false,
                fetching_next: false,
            }),
            format!("30 posts, more unavailable: {}", FeedError::Transient("timeout".into()))
        );
    }
}
