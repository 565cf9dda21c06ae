//! Database schema and migrations.
//!
//! Migrations are applied in order; the `schema_version` table records how
//! many have run. Timestamps are TEXT in the normalized form produced by
//! `datetime::to_db_timestamp`.

/// Database migrations (SQLite).
#[cfg(feature = "sqlite")]
pub const MIGRATIONS: &[&str] = &[
    // v1: registered feeds
    r#"
CREATE TABLE feeds (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    link            TEXT NOT NULL UNIQUE,
    description     TEXT NOT NULL DEFAULT '',
    fetched         INTEGER NOT NULL DEFAULT 0,
    last_modified   TEXT,                   -- newest imported Last-Modified
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
"#,
    // v2: posts imported from feeds
    r#"
CREATE TABLE posts (
    id              TEXT PRIMARY KEY,
    feed_id         TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL,
    link            TEXT NOT NULL DEFAULT '',
    pub_date        TEXT NOT NULL DEFAULT '',  -- verbatim from the source
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX idx_posts_feed_id ON posts(feed_id);
CREATE INDEX idx_posts_created_at ON posts(created_at);
"#,
    // v3: document order of posts written by one import
    r#"
ALTER TABLE posts ADD COLUMN position INTEGER NOT NULL DEFAULT 0;
"#,
    // v4: reader subscriptions, keyed by an opaque subscriber id
    r#"
CREATE TABLE subscriptions (
    id              TEXT PRIMARY KEY,
    subscriber_id   TEXT NOT NULL,
    feed_id         TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    created_at      TEXT NOT NULL,
    UNIQUE (subscriber_id, feed_id)
);

CREATE INDEX idx_subscriptions_subscriber_id ON subscriptions(subscriber_id);
"#,
];

/// Database migrations (PostgreSQL).
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub const MIGRATIONS: &[&str] = &[
    // v1: registered feeds
    r#"
CREATE TABLE feeds (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    link            TEXT NOT NULL UNIQUE,
    description     TEXT NOT NULL DEFAULT '',
    fetched         BOOLEAN NOT NULL DEFAULT FALSE,
    last_modified   TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
"#,
    // v2: posts imported from feeds
    r#"
CREATE TABLE posts (
    id              TEXT PRIMARY KEY,
    feed_id         TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL,
    link            TEXT NOT NULL DEFAULT '',
    pub_date        TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX idx_posts_feed_id ON posts(feed_id);
CREATE INDEX idx_posts_created_at ON posts(created_at);
"#,
    // v3: document order of posts written by one import
    r#"
ALTER TABLE posts ADD COLUMN position BIGINT NOT NULL DEFAULT 0;
"#,
    // v4: reader subscriptions, keyed by an opaque subscriber id
    r#"
CREATE TABLE subscriptions (
    id              TEXT PRIMARY KEY,
    subscriber_id   TEXT NOT NULL,
    feed_id         TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    created_at      TEXT NOT NULL,
    UNIQUE (subscriber_id, feed_id)
);

CREATE INDEX idx_subscriptions_subscriber_id ON subscriptions(subscriber_id);
"#,
];
