//! `watch` command: load a feed, then report new posts until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use skyline_atproto::{FeedDescriptor, FeedParams};
use skyline_feed::{StalenessConfig, StalenessMonitor};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::session::Session;
use crate::timeline::render_item;

pub async fn run(
    session: &Session,
    feed: FeedDescriptor,
    poll_interval: u64,
) -> miette::Result<()> {
    let pager = session.pager(feed, FeedParams::default());
    let cancel = session.signal();

    let first = pager
        .fetch_first_page(&cancel)
        .await
        .map_err(|e| miette::miette!("failed to load {}: {}", pager.feed(), e))?;
    println!("watching {} ({} posts loaded)", pager.feed(), first.items.len());

    let config = StalenessConfig {
        poll_interval: Some(Duration::from_secs(poll_interval.max(1))),
        ..StalenessConfig::default()
    };
    let monitor = StalenessMonitor::new(Arc::clone(&pager), config);
    let mut has_new = monitor.has_new();

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    // A terminal is always focused and in the foreground; the sender only
    // keeps the channel open.
    let (_events_tx, events_rx) = mpsc::channel(1);
    let monitor_handle = {
        let monitor = Arc::clone(&monitor);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { monitor.run(events_rx, shutdown_rx).await })
    };

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            changed = has_new.changed() => {
                if changed.is_err() {
                    break;
                }
                if !*has_new.borrow_and_update() {
                    continue;
                }

                let seen = pager
                    .first_page()
                    .await
                    .and_then(|page| page.items.first().map(|item| item.post.uri.clone()));
                match monitor.load_new(&cancel).await {
                    Ok(page) => {
                        let fresh: Vec<_> = page
                            .items
                            .iter()
                            .take_while(|item| Some(&item.post.uri) != seen.as_ref())
                            .collect();
                        println!("[{}] {} new posts", Local::now().format("%H:%M:%S"), fresh.len());
                        for item in fresh {
                            println!("  {}", render_item(item));
                        }
                    }
                    Err(e) if e.is_silent() => {}
                    Err(e) => warn!(error = %e, "failed to load new posts"),
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_handle.await {
        warn!(error = %e, "staleness monitor task failed");
    }
    Ok(())
}
