//! Feed and post repositories.

use chrono::{DateTime, Utc};
use sqlx::Connection;
use tracing::warn;
use uuid::Uuid;

use super::types::{Feed, NewFeed, NewPost, Post, RemoteItem, Subscription};
use crate::datetime::{parse_db_timestamp, to_db_timestamp};
use crate::db::{DbConnection, DbPool, Database};
use crate::{AggregatorError, Result};

/// Row type for a feed from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: String,
    title: String,
    link: String,
    description: String,
    fetched: bool,
    last_modified: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            title: row.title,
            link: row.link,
            description: row.description,
            fetched: row.fetched,
            last_modified: row.last_modified.and_then(|s| parse_db_timestamp(&s)),
            created_at: parse_db_timestamp(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_db_timestamp(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Row type for a post from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct PostRow {
    id: String,
    feed_id: String,
    title: String,
    description: String,
    link: String,
    pub_date: String,
    position: i64,
    created_at: String,
    updated_at: String,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            feed_id: row.feed_id,
            title: row.title,
            description: row.description,
            link: row.link,
            pub_date: row.pub_date,
            position: row.position,
            created_at: parse_db_timestamp(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_db_timestamp(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

const FEED_COLUMNS: &str =
    "id, title, link, description, fetched, last_modified, created_at, updated_at";

const POST_COLUMNS: &str =
    "id, feed_id, title, description, link, pub_date, position, created_at, updated_at";

/// Newest import first, then document order within one import.
const POST_ORDER: &str = "ORDER BY created_at DESC, position ASC, id DESC";

/// Row type for a subscription from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    id: String,
    subscriber_id: String,
    feed_id: String,
    created_at: String,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.id,
            subscriber_id: row.subscriber_id,
            feed_id: row.feed_id,
            created_at: parse_db_timestamp(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, subscriber_id, feed_id, created_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Repository for feed operations.
pub struct FeedRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new feed.
    ///
    /// The feed starts unfetched with `last_modified` set to the creation time.
    /// A link that is already registered is a `Validation` error.
    pub async fn create(&self, feed: &NewFeed) -> Result<Feed> {
        let id = Uuid::new_v4().to_string();
        let now = to_db_timestamp(&Utc::now());

        sqlx::query(
            r#"
            INSERT INTO feeds (id, title, link, description, fetched, last_modified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&id)
        .bind(&feed.title)
        .bind(&feed.link)
        .bind(&feed.description)
        .bind(false)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AggregatorError::Validation(format!("feed already registered: {}", feed.link))
            } else {
                AggregatorError::Database(e.to_string())
            }
        })?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| AggregatorError::NotFound("feed".into()))
    }

    /// Get a feed by ID.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Feed>> {
        let query = format!("SELECT {} FROM feeds WHERE id = $1", FEED_COLUMNS);
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(Feed::from))
    }

    /// Get a feed by its remote link.
    pub async fn get_by_link(&self, link: &str) -> Result<Option<Feed>> {
        let query = format!("SELECT {} FROM feeds WHERE link = $1", FEED_COLUMNS);
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(link)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(Feed::from))
    }

    /// List all feeds in registration order.
    pub async fn list_all(&self) -> Result<Vec<Feed>> {
        let query = format!(
            "SELECT {} FROM feeds ORDER BY created_at ASC, id ASC",
            FEED_COLUMNS
        );
        let rows = sqlx::query_as::<_, FeedRow>(&query)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Mark a feed as fetched. Marking an already fetched feed is a no-op.
    pub async fn mark_fetched(&self, id: &str) -> Result<Feed> {
        let mut conn = self.pool.acquire().await?;
        claim_first_fetch(&mut conn, id, Utc::now()).await?;
        drop(conn);

        self.get_by_id(id)
            .await?
            .ok_or_else(|| AggregatorError::NotFound(format!("feed {}", id)))
    }

    /// Advance `last_modified` to `timestamp`.
    ///
    /// The stored value never moves backwards: an older or equal timestamp
    /// leaves the feed unchanged.
    pub async fn update_last_modified(&self, id: &str, timestamp: DateTime<Utc>) -> Result<Feed> {
        let mut conn = self.pool.acquire().await?;
        advance_last_modified(&mut conn, id, timestamp, Utc::now()).await?;
        drop(conn);

        self.get_by_id(id)
            .await?
            .ok_or_else(|| AggregatorError::NotFound(format!("feed {}", id)))
    }

    /// Delete a feed and, through the foreign key, all of its posts.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count registered feeds.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(self.pool)
            .await?;

        Ok(count.0)
    }
}

/// Repository for post operations.
pub struct PostRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> PostRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new post.
    pub async fn create(&self, post: &NewPost) -> Result<Post> {
        let mut conn = self.pool.acquire().await?;
        let created = insert_post(&mut conn, post, Utc::now()).await?;
        Ok(created)
    }

    /// Get a post by ID.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Post>> {
        let query = format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS);
        let row = sqlx::query_as::<_, PostRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(Post::from))
    }

    /// List posts for a feed (newest first).
    pub async fn list_by_feed(
        &self,
        feed_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Post>> {
        let query = format!(
            r#"
            SELECT {}
            FROM posts
            WHERE feed_id = $1
            {}
            LIMIT $2 OFFSET $3
            "#,
            POST_COLUMNS, POST_ORDER
        );
        let rows = sqlx::query_as::<_, PostRow>(&query)
            .bind(feed_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    /// List posts across every feed (newest first).
    pub async fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Post>> {
        let query = format!(
            "SELECT {} FROM posts {} LIMIT $1 OFFSET $2",
            POST_COLUMNS, POST_ORDER
        );
        let rows = sqlx::query_as::<_, PostRow>(&query)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    /// List posts from every feed a subscriber follows (newest first).
    pub async fn list_by_subscriber(
        &self,
        subscriber_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Post>> {
        let query = format!(
            r#"
            SELECT {}
            FROM posts
            WHERE feed_id IN (SELECT feed_id FROM subscriptions WHERE subscriber_id = $1)
            {}
            LIMIT $2 OFFSET $3
            "#,
            POST_COLUMNS, POST_ORDER
        );
        let rows = sqlx::query_as::<_, PostRow>(&query)
            .bind(subscriber_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    /// Count posts for a feed.
    pub async fn count_by_feed(&self, feed_id: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = $1")
            .bind(feed_id)
            .fetch_one(self.pool)
            .await?;

        Ok(count.0)
    }
}

/// Repository for reader subscriptions.
pub struct SubscriptionRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> SubscriptionRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Subscribe `subscriber_id` to a feed.
    ///
    /// Subscribing twice to the same feed is a `Validation` error.
    pub async fn subscribe(&self, subscriber_id: &str, feed_id: &str) -> Result<Subscription> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, subscriber_id, feed_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&id)
        .bind(subscriber_id)
        .bind(feed_id)
        .bind(to_db_timestamp(&Utc::now()))
        .execute(self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AggregatorError::Validation(format!("already subscribed to feed {}", feed_id))
            } else {
                AggregatorError::Database(e.to_string())
            }
        })?;

        self.get(subscriber_id, feed_id)
            .await?
            .ok_or_else(|| AggregatorError::NotFound("subscription".into()))
    }

    /// Remove a subscription. Returns whether one existed.
    pub async fn unsubscribe(&self, subscriber_id: &str, feed_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM subscriptions WHERE subscriber_id = $1 AND feed_id = $2")
                .bind(subscriber_id)
                .bind(feed_id)
                .execute(self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the subscription of `subscriber_id` to a feed.
    pub async fn get(&self, subscriber_id: &str, feed_id: &str) -> Result<Option<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions WHERE subscriber_id = $1 AND feed_id = $2",
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(subscriber_id)
            .bind(feed_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(Subscription::from))
    }

    /// List a subscriber's subscriptions, oldest first.
    pub async fn list_by_subscriber(&self, subscriber_id: &str) -> Result<Vec<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions WHERE subscriber_id = $1 ORDER BY created_at ASC, id ASC",
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(subscriber_id)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    /// List the feeds a subscriber follows, in registration order.
    pub async fn list_feeds(&self, subscriber_id: &str) -> Result<Vec<Feed>> {
        let query = format!(
            r#"
            SELECT {}
            FROM feeds
            WHERE id IN (SELECT feed_id FROM subscriptions WHERE subscriber_id = $1)
            ORDER BY created_at ASC, id ASC
            "#,
            FEED_COLUMNS
        );
        let rows = sqlx::query_as::<_, FeedRow>(&query)
            .bind(subscriber_id)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }
}

/// Set `fetched` if it is still false. Returns whether this call flipped it.
async fn claim_first_fetch(conn: &mut DbConnection, id: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE feeds SET fetched = $1, updated_at = $2 WHERE id = $3 AND fetched = $4",
    )
    .bind(true)
    .bind(to_db_timestamp(&now))
    .bind(id)
    .bind(false)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        ensure_feed_exists(conn, id).await?;
        return Ok(false);
    }
    Ok(true)
}

/// Move `last_modified` forward to `timestamp` if it is strictly newer.
/// Returns whether the row changed.
async fn advance_last_modified(
    conn: &mut DbConnection,
    id: &str,
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE feeds
        SET last_modified = $1, updated_at = $2
        WHERE id = $3 AND (last_modified IS NULL OR last_modified < $1)
        "#,
    )
    .bind(to_db_timestamp(&timestamp))
    .bind(to_db_timestamp(&now))
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        ensure_feed_exists(conn, id).await?;
        return Ok(false);
    }
    Ok(true)
}

async fn ensure_feed_exists(conn: &mut DbConnection, id: &str) -> Result<()> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds WHERE id = $1")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

    if count.0 == 0 {
        return Err(AggregatorError::NotFound(format!("feed {}", id)));
    }
    Ok(())
}

async fn insert_post(conn: &mut DbConnection, post: &NewPost, now: DateTime<Utc>) -> Result<Post> {
    let id = Uuid::new_v4().to_string();
    let now = to_db_timestamp(&now);

    sqlx::query(
        r#"
        INSERT INTO posts (id, feed_id, title, description, link, pub_date, position, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&id)
    .bind(&post.feed_id)
    .bind(&post.title)
    .bind(&post.description)
    .bind(&post.link)
    .bind(&post.pub_date)
    .bind(post.position)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let query = format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS);
    let row = sqlx::query_as::<_, PostRow>(&query)
        .bind(&id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Post::from(row))
}

/// Which state transition an import claims for its feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportClaim {
    /// `fetched: false -> true`. A parseable modification signal seen on the
    /// same response is recorded too, so the next pass can compare against it.
    FirstFetch {
        /// Modification signal from the response, if any.
        last_modified: Option<DateTime<Utc>>,
    },
    /// `last_modified: T -> T'` with `T' > T`.
    Refresh {
        /// The newer modification signal.
        last_modified: DateTime<Utc>,
    },
}

/// Result of a committed import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportResult {
    /// Posts written.
    pub created: usize,
    /// Items whose insert failed and was rolled back on its own.
    pub failed: usize,
}

/// Persist one feed's import atomically.
///
/// The claim runs first, inside the same transaction as the inserts. If it
/// matches no row another pass got there first: everything is rolled back and
/// `Ok(None)` is returned. Each post goes through its own savepoint, so a
/// failed insert only drops that item.
pub async fn import_posts(
    db: &Database,
    feed_id: &str,
    claim: ImportClaim,
    items: &[RemoteItem],
) -> Result<Option<ImportResult>> {
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let claimed = match claim {
        ImportClaim::FirstFetch { last_modified } => {
            let claimed = claim_first_fetch(&mut tx, feed_id, now).await?;
            if claimed {
                if let Some(ts) = last_modified {
                    advance_last_modified(&mut tx, feed_id, ts, now).await?;
                }
            }
            claimed
        }
        ImportClaim::Refresh { last_modified } => {
            advance_last_modified(&mut tx, feed_id, last_modified, now).await?
        }
    };

    if !claimed {
        tx.rollback().await?;
        return Ok(None);
    }

    let mut result = ImportResult::default();
    for (position, item) in items.iter().enumerate() {
        let post = NewPost::from_item(feed_id, item).with_position(position as i64);
        let mut savepoint = tx.begin().await?;
        match insert_post(&mut savepoint, &post, now).await {
            Ok(_) => {
                savepoint.commit().await?;
                result.created += 1;
            }
            Err(e) => {
                warn!(
                    "Failed to store post {:?} for feed {}: {}",
                    item.title, feed_id, e
                );
                savepoint.rollback().await?;
                result.failed += 1;
            }
        }
    }

    tx.commit().await?;
    Ok(Some(result))
}
