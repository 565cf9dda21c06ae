//! Aggregator - RSS feed aggregation backend
//!
//! Registers remote feeds and reconciles their items into a relational store.

pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod logging;
pub mod rss;

pub use config::Config;
pub use db::Database;
pub use error::{AggregatorError, Result};
pub use rss::{
    FeedFetcher, FeedService, HttpFetcher, PassReport, Reconciler, RegisterFeedRequest, RssUpdater,
};
