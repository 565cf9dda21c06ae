//! Feed service.
//!
//! Registration and read access to feeds and their posts, plus reader
//! subscriptions. Registration only records the feed; its items are imported
//! by the next reconciliation pass.

use tracing::info;

use crate::db::Database;
use crate::rss::fetcher::{validate_url, FeedFetcher};
use crate::rss::parser::parse_feed;
use crate::rss::repository::{FeedRepository, PostRepository, SubscriptionRepository};
use crate::rss::types::{Feed, FetchOutcome, NewFeed, Post, Subscription};
use crate::{AggregatorError, Result};

/// Request to register a new feed.
#[derive(Debug, Clone)]
pub struct RegisterFeedRequest {
    /// Feed URL.
    pub link: String,
    /// Custom title (optional, taken from the channel if not provided).
    pub title: Option<String>,
}

impl RegisterFeedRequest {
    /// Create a new registration request.
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: None,
        }
    }

    /// Set a custom title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Service for feed operations.
pub struct FeedService<'a> {
    db: &'a Database,
    fetcher: &'a dyn FeedFetcher,
    allow_private_hosts: bool,
}

impl<'a> FeedService<'a> {
    /// Create a new FeedService.
    pub fn new(db: &'a Database, fetcher: &'a dyn FeedFetcher) -> Self {
        Self {
            db,
            fetcher,
            allow_private_hosts: false,
        }
    }

    /// Accept loopback and private-network feed links.
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Register a new feed.
    ///
    /// Fetches the document once to validate it and read the channel title
    /// and description.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The link is not an acceptable http(s) URL
    /// - A feed with the same link already exists
    /// - The document cannot be fetched or parsed
    pub async fn register_feed(&self, request: &RegisterFeedRequest) -> Result<Feed> {
        let link = request.link.trim();
        validate_url(link, self.allow_private_hosts)?;

        let feed_repo = FeedRepository::new(self.db.pool());
        if feed_repo.get_by_link(link).await?.is_some() {
            return Err(AggregatorError::Validation(format!(
                "feed already registered: {}",
                link
            )));
        }

        let fetched = match self.fetcher.fetch(link, None).await? {
            FetchOutcome::Fetched(fetched) => fetched,
            FetchOutcome::NotModified => {
                return Err(AggregatorError::Fetch(format!(
                    "unexpected 304 Not Modified from {}",
                    link
                )))
            }
        };
        let document = parse_feed(&fetched.body)?;

        let title = request
            .title
            .clone()
            .or(document.title)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| link.to_string());

        let mut new_feed = NewFeed::new(link, title);
        if let Some(description) = document.description {
            new_feed = new_feed.with_description(description.trim());
        }

        let feed = feed_repo.create(&new_feed).await?;
        info!("Registered feed {} ({})", feed.id, feed.link);
        Ok(feed)
    }

    /// Get a feed by ID.
    pub async fn get_feed(&self, feed_id: &str) -> Result<Feed> {
        FeedRepository::new(self.db.pool())
            .get_by_id(feed_id)
            .await?
            .ok_or_else(|| AggregatorError::NotFound("feed".to_string()))
    }

    /// List all feeds in registration order.
    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        FeedRepository::new(self.db.pool()).list_all().await
    }

    /// Delete a feed together with its posts.
    pub async fn delete_feed(&self, feed_id: &str) -> Result<()> {
        if !FeedRepository::new(self.db.pool()).delete(feed_id).await? {
            return Err(AggregatorError::NotFound("feed".to_string()));
        }
        Ok(())
    }

    /// List posts for a feed (newest first).
    pub async fn list_posts(
        &self,
        feed_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Post>> {
        // Check if feed exists
        let _ = self.get_feed(feed_id).await?;

        PostRepository::new(self.db.pool())
            .list_by_feed(feed_id, limit, offset)
            .await
    }

    /// List posts from every feed (newest first).
    pub async fn list_all_posts(&self, limit: usize, offset: usize) -> Result<Vec<Post>> {
        PostRepository::new(self.db.pool())
            .list_all(limit, offset)
            .await
    }

    /// Get a post by ID.
    pub async fn get_post(&self, post_id: &str) -> Result<Post> {
        PostRepository::new(self.db.pool())
            .get_by_id(post_id)
            .await?
            .ok_or_else(|| AggregatorError::NotFound("post".to_string()))
    }

    /// Subscribe a reader to a feed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The subscriber id is blank
    /// - The feed does not exist
    /// - The reader is already subscribed to it
    pub async fn subscribe(&self, subscriber_id: &str, feed_id: &str) -> Result<Subscription> {
        let subscriber_id = require_subscriber(subscriber_id)?;
        let _ = self.get_feed(feed_id).await?;

        let subscription = SubscriptionRepository::new(self.db.pool())
            .subscribe(subscriber_id, feed_id)
            .await?;
        info!("Subscriber {} follows feed {}", subscriber_id, feed_id);
        Ok(subscription)
    }

    /// Remove a reader's subscription to a feed.
    pub async fn unsubscribe(&self, subscriber_id: &str, feed_id: &str) -> Result<()> {
        let subscriber_id = require_subscriber(subscriber_id)?;
        if !SubscriptionRepository::new(self.db.pool())
            .unsubscribe(subscriber_id, feed_id)
            .await?
        {
            return Err(AggregatorError::NotFound("subscription".to_string()));
        }
        Ok(())
    }

    /// List the feeds a reader follows.
    pub async fn list_subscriptions(&self, subscriber_id: &str) -> Result<Vec<Feed>> {
        let subscriber_id = require_subscriber(subscriber_id)?;
        SubscriptionRepository::new(self.db.pool())
            .list_feeds(subscriber_id)
            .await
    }

    /// List posts from the feeds a reader follows (newest first).
    pub async fn list_subscribed_posts(
        &self,
        subscriber_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Post>> {
        let subscriber_id = require_subscriber(subscriber_id)?;
        PostRepository::new(self.db.pool())
            .list_by_subscriber(subscriber_id, limit, offset)
            .await
    }
}

fn require_subscriber(subscriber_id: &str) -> Result<&str> {
    let subscriber_id = subscriber_id.trim();
    if subscriber_id.is_empty() {
        return Err(AggregatorError::Validation(
            "subscriber id must not be empty".to_string(),
        ));
    }
    Ok(subscriber_id)
}
