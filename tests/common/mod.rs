//! Test helpers for reconciliation tests.
//!
//! Provides a scripted in-memory fetcher and helpers for building feed
//! documents and seeding feed state.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use aggregator::datetime::to_db_timestamp;
use aggregator::rss::{
    Feed, FeedFetcher, FeedRepository, FetchOutcome, FetchedFeed, NewFeed, PostRepository,
    Reconciler,
};
use aggregator::{AggregatorError, Database, Result};

/// What the scripted fetcher answers for a URL.
#[derive(Debug, Clone)]
pub enum Response {
    /// A 200 response with a body and optional `Last-Modified` header.
    Document {
        body: String,
        last_modified: Option<String>,
    },
    /// `304 Not Modified`, only when the request was conditional.
    NotModified,
    /// A fetch error.
    Fail(String),
}

impl Response {
    pub fn document(body: impl Into<String>) -> Self {
        Response::Document {
            body: body.into(),
            last_modified: None,
        }
    }

    pub fn document_modified(body: impl Into<String>, last_modified: &str) -> Self {
        Response::Document {
            body: body.into(),
            last_modified: Some(last_modified.to_string()),
        }
    }
}

/// One recorded fetch call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub url: String,
    pub if_modified_since: Option<DateTime<Utc>>,
}

/// Fetcher that answers from a per-URL script. Responses persist until replaced.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Response>>,
    calls: Mutex<Vec<FetchCall>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, url: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        url: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome> {
        self.calls.lock().unwrap().push(FetchCall {
            url: url.to_string(),
            if_modified_since,
        });
        let response = self.responses.lock().unwrap().get(url).cloned();

        // Give concurrent passes a chance to interleave.
        tokio::task::yield_now().await;

        match response {
            Some(Response::Document {
                body,
                last_modified,
            }) => Ok(FetchOutcome::Fetched(FetchedFeed {
                body: body.into_bytes(),
                last_modified,
                status: 200,
            })),
            Some(Response::NotModified) if if_modified_since.is_some() => {
                Ok(FetchOutcome::NotModified)
            }
            Some(Response::NotModified) => Err(AggregatorError::Fetch(
                "HTTP error: 304 Not Modified".to_string(),
            )),
            Some(Response::Fail(message)) => Err(AggregatorError::Fetch(message)),
            None => Err(AggregatorError::Fetch(format!("no route to {}", url))),
        }
    }
}

/// Build an RSS 2.0 document from (title, description) pairs.
pub fn rss(items: &[(&str, &str)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Test</title><description>Test feed</description>"#,
    );
    for (i, (title, description)) in items.iter().enumerate() {
        body.push_str(&format!(
            "<item><title>{}</title><description>{}</description><link>https://example.com/{}</link><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>",
            title, description, i
        ));
    }
    body.push_str("</channel></rss>");
    body
}

/// Midnight UTC on the given day of January 2024.
pub fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

pub async fn setup() -> (Database, Arc<ScriptedFetcher>, Reconciler) {
    let db = Database::open_in_memory().await.unwrap();
    let fetcher = ScriptedFetcher::new();
    let reconciler = Reconciler::new(db.clone(), fetcher.clone());
    (db, fetcher, reconciler)
}

pub async fn register(db: &Database, link: &str) -> Feed {
    FeedRepository::new(db.pool())
        .create(&NewFeed::new(link, "Test"))
        .await
        .unwrap()
}

/// Force a feed into a given state, bypassing the monotonic update path.
pub async fn set_state(
    db: &Database,
    feed_id: &str,
    fetched: bool,
    last_modified: Option<DateTime<Utc>>,
) {
    sqlx::query("UPDATE feeds SET fetched = $1, last_modified = $2 WHERE id = $3")
        .bind(fetched)
        .bind(last_modified.map(|ts| to_db_timestamp(&ts)))
        .bind(feed_id)
        .execute(db.pool())
        .await
        .unwrap();
}

pub async fn feed(db: &Database, feed_id: &str) -> Feed {
    FeedRepository::new(db.pool())
        .get_by_id(feed_id)
        .await
        .unwrap()
        .unwrap()
}

pub async fn post_count(db: &Database, feed_id: &str) -> i64 {
    PostRepository::new(db.pool())
        .count_by_feed(feed_id)
        .await
        .unwrap()
}
