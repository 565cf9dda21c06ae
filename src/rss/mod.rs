//! Feed subscription and reconciliation.
//!
//! Feeds are registered through [`FeedService`]; [`Reconciler`] imports
//! their items, and [`RssUpdater`] runs it on a schedule.

pub mod fetcher;
pub mod parser;
pub mod reconciler;
pub mod repository;
pub mod service;
pub mod types;
pub mod updater;

pub use fetcher::{validate_url, FeedFetcher, HttpFetcher};
pub use parser::parse_feed;
pub use reconciler::{decide, Decision, PassReport, Reconciler, SkipReason};
pub use repository::{
    import_posts, FeedRepository, ImportClaim, ImportResult, PostRepository, SubscriptionRepository,
};
pub use service::{FeedService, RegisterFeedRequest};
pub use types::{
    Feed, FeedState, FetchOutcome, FetchedFeed, NewFeed, NewPost, Post, RemoteFeedDocument,
    RemoteItem, Subscription,
};
pub use updater::{start_rss_updater, RssUpdater, DEFAULT_UPDATE_INTERVAL_SECS};
