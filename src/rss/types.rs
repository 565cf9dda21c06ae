//! Feed and post types.

use chrono::{DateTime, Utc};

/// A registered remote feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    /// Opaque feed ID, assigned at creation.
    pub id: String,
    /// Feed title.
    pub title: String,
    /// Remote URL of the feed document.
    pub link: String,
    /// Feed description.
    pub description: String,
    /// Whether the initial import has happened. Never reverts to false.
    pub fetched: bool,
    /// Newest modification signal that produced an import.
    pub last_modified: Option<DateTime<Utc>>,
    /// When the feed was created.
    pub created_at: DateTime<Utc>,
    /// When the feed was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Feed {
    /// Which reconciliation path applies to this feed.
    pub fn state(&self) -> FeedState {
        if self.fetched {
            FeedState::Fetched
        } else {
            FeedState::NeverFetched
        }
    }
}

/// Reconciliation state of a feed before it is fetched.
///
/// Whether a fetched feed is stale or up to date is only known after the
/// remote modification signal has been compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// No post has ever been imported.
    NeverFetched,
    /// The initial import happened; refreshes are gated by `last_modified`.
    Fetched,
}

/// New feed for creation.
#[derive(Debug, Clone)]
pub struct NewFeed {
    /// Feed title.
    pub title: String,
    /// Remote URL.
    pub link: String,
    /// Feed description.
    pub description: String,
}

impl NewFeed {
    /// Create a new feed.
    pub fn new(link: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            description: String::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// One item imported from a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    /// Opaque post ID.
    pub id: String,
    /// Owning feed.
    pub feed_id: String,
    /// Item title.
    pub title: String,
    /// Item description.
    pub description: String,
    /// Link to the original article (empty when the item had none).
    pub link: String,
    /// Publication date exactly as the source wrote it.
    pub pub_date: String,
    /// Index of the item in the document it was imported from.
    pub position: i64,
    /// When the post was created.
    pub created_at: DateTime<Utc>,
    /// When the post was last updated.
    pub updated_at: DateTime<Utc>,
}

/// New post for creation.
#[derive(Debug, Clone)]
pub struct NewPost {
    /// Owning feed.
    pub feed_id: String,
    /// Item title.
    pub title: String,
    /// Item description.
    pub description: String,
    /// Link to the original article.
    pub link: String,
    /// Publication date, verbatim.
    pub pub_date: String,
    /// Index of the item within its document.
    pub position: i64,
}

impl NewPost {
    /// Create a new post.
    pub fn new(
        feed_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            feed_id: feed_id.into(),
            title: title.into(),
            description: description.into(),
            link: String::new(),
            pub_date: String::new(),
            position: 0,
        }
    }

    /// Build a post for `feed_id` from a parsed item.
    pub fn from_item(feed_id: impl Into<String>, item: &RemoteItem) -> Self {
        Self {
            feed_id: feed_id.into(),
            title: item.title.clone(),
            description: item.description.clone(),
            link: item.link.clone(),
            pub_date: item.pub_date.clone(),
            position: 0,
        }
    }

    /// Set the link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }

    /// Set the raw publication date.
    pub fn with_pub_date(mut self, pub_date: impl Into<String>) -> Self {
        self.pub_date = pub_date.into();
        self
    }

    /// Set the document position.
    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }
}

/// A reader's subscription to a feed.
///
/// Subscribers are identified by an opaque id supplied by the caller; who
/// they are and how they authenticate is not tracked here.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Opaque subscription ID.
    pub id: String,
    /// Who subscribed.
    pub subscriber_id: String,
    /// The subscribed feed.
    pub feed_id: String,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
}

/// Parsed feed document. Transient, never persisted as such.
#[derive(Debug, Clone, Default)]
pub struct RemoteFeedDocument {
    /// Channel title.
    pub title: Option<String>,
    /// Channel description.
    pub description: Option<String>,
    /// Channel site link.
    pub link: Option<String>,
    /// Channel `lastBuildDate`, verbatim.
    pub last_build_date: Option<String>,
    /// Well-formed items in document order.
    pub items: Vec<RemoteItem>,
    /// Number of items dropped for missing a required field.
    pub skipped_items: usize,
}

/// One item descriptor from a feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    /// Item title.
    pub title: String,
    /// Item description.
    pub description: String,
    /// Item link (empty when absent).
    pub link: String,
    /// Publication date, verbatim (empty when absent).
    pub pub_date: String,
}

/// Raw result of one successful HTTP fetch.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    /// Response body.
    pub body: Vec<u8>,
    /// `Last-Modified` response header, if the server sent one.
    pub last_modified: Option<String>,
    /// HTTP status code.
    pub status: u16,
}

/// Outcome of a fetch that did not fail.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The server returned a document.
    Fetched(FetchedFeed),
    /// The server answered a conditional request with `304 Not Modified`.
    NotModified,
}
