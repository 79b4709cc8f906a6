//! Skyline: optimistic AT Protocol feed client
//!
//! Main binary with subcommands:
//! - `timeline`: Print one or more pages of a feed
//! - `watch`: Report new posts at the head of a feed until Ctrl-C
//! - `like` / `unlike` / `repost` / `unrepost`: Toggle a post relationship
//! - `follow` / `unfollow`: Toggle following an account

use clap::{Parser, Subcommand};
use miette::Result;
use skyline_atproto::{FeedDescriptor, RelationshipAction};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod session;
mod timeline;
mod watch;

use session::Session;

#[derive(Parser)]
#[command(name = "skyline")]
#[command(about = "Optimistic AT Protocol feed client", long_about = None)]
struct Cli {
    /// PDS URL
    #[arg(long, global = true, env = "SKYLINE_PDS_URL", default_value = "https://bsky.social")]
    pds_url: String,

    /// Account handle
    #[arg(long, global = true, env = "SKYLINE_HANDLE")]
    handle: Option<String>,

    /// App password
    #[arg(long, global = true, env = "SKYLINE_APP_PASSWORD", hide_env_values = true)]
    app_password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a feed
    Timeline {
        /// Feed to load: `following`, `author|<did>|<filter>`,
        /// `feedgen|<uri>` or `list|<uri>`
        #[arg(long, default_value = "following")]
        feed: FeedDescriptor,

        /// Number of pages to load
        #[arg(long, default_value = "1")]
        pages: usize,
    },

    /// Load a feed and report new posts until interrupted
    Watch {
        /// Feed to watch
        #[arg(long, default_value = "following")]
        feed: FeedDescriptor,

        /// Seconds between freshness checks
        #[arg(long, default_value = "60")]
        poll_interval: u64,
    },

    /// Like a post
    Like {
        #[arg(value_name = "POST_URI")]
        uri: String,
    },

    /// Remove a like from a post
    Unlike {
        #[arg(value_name = "POST_URI")]
        uri: String,
    },

    /// Repost a post
    Repost {
        #[arg(value_name = "POST_URI")]
        uri: String,
    },

    /// Undo a repost
    Unrepost {
        #[arg(value_name = "POST_URI")]
        uri: String,
    },

    /// Follow an account
    Follow {
        #[arg(value_name = "DID")]
        did: String,
    },

    /// Unfollow an account
    Unfollow {
        #[arg(value_name = "DID")]
        did: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "skyline=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let handle = cli
        .handle
        .ok_or_else(|| miette::miette!("missing --handle (or SKYLINE_HANDLE)"))?;
    let app_password = cli
        .app_password
        .ok_or_else(|| miette::miette!("missing --app-password (or SKYLINE_APP_PASSWORD)"))?;

    let session = Session::init(&cli.pds_url, &handle, &app_password)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let result = match cli.command {
        Commands::Timeline { feed, pages } => timeline::run(&session, feed, pages.max(1)).await,
        Commands::Watch {
            feed,
            poll_interval,
        } => watch::run(&session, feed, poll_interval).await,
        Commands::Like { uri } => toggle_post(&session, &uri, RelationshipAction::Like, true).await,
        Commands::Unlike { uri } => {
            toggle_post(&session, &uri, RelationshipAction::Like, false).await
        }
        Commands::Repost { uri } => {
            toggle_post(&session, &uri, RelationshipAction::Repost, true).await
        }
        Commands::Unrepost { uri } => {
            toggle_post(&session, &uri, RelationshipAction::Repost, false).await
        }
        Commands::Follow { did } => set_following(&session, &did, true).await,
        Commands::Unfollow { did } => set_following(&session, &did, false).await,
    };

    session.dispose().await;
    result
}

async fn toggle_post(
    session: &Session,
    uri: &str,
    action: RelationshipAction,
    desired: bool,
) -> Result<()> {
    let post = session
        .toggle_post(uri, action, desired)
        .await
        .map_err(|e| miette::miette!("failed to {} {}: {}", verb(action, desired), uri, e))?;
    println!(
        "{} {} ({} likes, {} reposts)",
        past_tense(action, desired),
        post.uri,
        post.like_count,
        post.repost_count
    );
    Ok(())
}

async fn set_following(session: &Session, did: &str, desired: bool) -> Result<()> {
    let profile = session.set_following(did, desired).await.map_err(|e| {
        miette::miette!(
            "failed to {} {}: {}",
            verb(RelationshipAction::Follow, desired),
            did,
            e
        )
    })?;
    println!(
        "{} @{} ({} followers)",
        past_tense(RelationshipAction::Follow, desired),
        profile.handle,
        profile.followers_count
    );
    Ok(())
}

fn verb(action: RelationshipAction, desired: bool) -> &'static str {
    match (action, desired) {
        (RelationshipAction::Like, true) => "like",
        (RelationshipAction::Like, false) => "unlike",
        (RelationshipAction::Repost, true) => "repost",
        (RelationshipAction::Repost, false) => "unrepost",
        (RelationshipAction::Follow, true) => "follow",
        (RelationshipAction::Follow, false) => "unfollow",
    }
}

fn past_tense(action: RelationshipAction, desired: bool) -> &'static str {
    match (action, desired) {
        (RelationshipAction::Like, true) => "liked",
        (RelationshipAction::Like, false) => "unliked",
        (RelationshipAction::Repost, true) => "reposted",
        (RelationshipAction::Repost, false) => "unreposted",
        (RelationshipAction::Follow, true) => "followed",
        (RelationshipAction::Follow, false) => "unfollowed",
    }
}
