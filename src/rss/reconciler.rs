//! Feed reconciliation.
//!
//! One pass walks every registered feed, fetches it, and decides whether its
//! items must be imported. A feed that has never been fetched is imported in
//! full once. After that, only a modification signal strictly newer than the
//! stored `last_modified` triggers another import. Changes that arrive without
//! a newer signal are not detected.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::datetime::parse_http_date;
use crate::db::Database;
use crate::error::{AggregatorError, Result};
use crate::rss::fetcher::{validate_url, FeedFetcher};
use crate::rss::parser::parse_feed;
use crate::rss::repository::{import_posts, FeedRepository, ImportClaim};
use crate::rss::types::{Feed, FeedState, FetchOutcome};

/// What a pass does with a feed once its response headers are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Parse the body and import every item under the given claim.
    Import(ImportClaim),
    /// The remote signal is not newer than what was last imported.
    Unchanged,
    /// Nothing can be concluded this pass.
    Skip(SkipReason),
}

/// Why a fetched feed was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The response carried no `Last-Modified` header.
    NoModificationSignal,
    /// The `Last-Modified` header is not an HTTP-date.
    UnparseableSignal(String),
    /// A concurrent pass claimed the feed first.
    ClaimLost,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoModificationSignal => write!(f, "no Last-Modified header"),
            SkipReason::UnparseableSignal(value) => {
                write!(f, "unparseable Last-Modified header {:?}", value)
            }
            SkipReason::ClaimLost => write!(f, "already handled by a concurrent pass"),
        }
    }
}

/// Decide what to do with `feed` given the `Last-Modified` header of a
/// successful fetch.
pub fn decide(feed: &Feed, last_modified_header: Option<&str>) -> Decision {
    let signal = last_modified_header.map(|raw| (raw, parse_http_date(raw)));

    match feed.state() {
        FeedState::NeverFetched => Decision::Import(ImportClaim::FirstFetch {
            last_modified: signal.and_then(|(_, parsed)| parsed),
        }),
        FeedState::Fetched => match signal {
            None => Decision::Skip(SkipReason::NoModificationSignal),
            Some((raw, None)) => Decision::Skip(SkipReason::UnparseableSignal(raw.to_string())),
            Some((_, Some(remote))) => match feed.last_modified {
                Some(stored) if remote <= stored => Decision::Unchanged,
                _ => Decision::Import(ImportClaim::Refresh {
                    last_modified: remote,
                }),
            },
        },
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Feeds listed at the start of the pass.
    pub feeds_seen: usize,
    /// Feeds imported for the first time.
    pub initial_imports: usize,
    /// Fetched feeds re-imported after a newer modification signal.
    pub refreshes: usize,
    /// Fetched feeds whose signal was not newer, or that answered 304.
    pub unchanged: usize,
    /// Feeds skipped for lack of a usable signal or a lost claim.
    pub skipped: usize,
    /// Feeds whose fetch, parse or store step failed.
    pub failed: usize,
    /// Posts written during the pass.
    pub posts_created: usize,
    /// Items dropped as malformed or rejected by the store.
    pub items_dropped: usize,
}

/// Outcome for one feed within a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FeedOutcome {
    Imported {
        initial: bool,
        created: usize,
        dropped: usize,
    },
    Unchanged,
    Skipped(SkipReason),
}

impl PassReport {
    fn record(&mut self, outcome: &FeedOutcome) {
        match outcome {
            FeedOutcome::Imported {
                initial,
                created,
                dropped,
            } => {
                if *initial {
                    self.initial_imports += 1;
                } else {
                    self.refreshes += 1;
                }
                self.posts_created += created;
                self.items_dropped += dropped;
            }
            FeedOutcome::Unchanged => self.unchanged += 1,
            FeedOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Runs reconciliation passes against a database with a given fetcher.
#[derive(Clone)]
pub struct Reconciler {
    db: Database,
    fetcher: Arc<dyn FeedFetcher>,
    conditional_requests: bool,
    allow_private_hosts: bool,
}

impl Reconciler {
    /// Create a reconciler. Conditional requests and private hosts are off
    /// by default.
    pub fn new(db: Database, fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self {
            db,
            fetcher,
            conditional_requests: false,
            allow_private_hosts: false,
        }
    }

    /// Fetch feeds whose link points at a loopback or private-network host.
    pub fn with_allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Send `If-Modified-Since` for feeds that have already been fetched.
    pub fn with_conditional_requests(mut self, enabled: bool) -> Self {
        self.conditional_requests = enabled;
        self
    }

    /// Run one pass over every registered feed.
    ///
    /// Only failing to list the feeds is an error. Per-feed failures are
    /// logged and counted in the report.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let feeds = FeedRepository::new(self.db.pool()).list_all().await?;

        let mut report = PassReport {
            feeds_seen: feeds.len(),
            ..PassReport::default()
        };

        for feed in &feeds {
            match self.reconcile_feed(feed).await {
                Ok(outcome) => {
                    if let FeedOutcome::Skipped(reason) = &outcome {
                        debug!("Skipping feed {} ({}): {}", feed.id, feed.link, reason);
                    }
                    report.record(&outcome);
                }
                Err(e @ AggregatorError::Database(_)) => {
                    error!("Store failure for feed {} ({}): {}", feed.id, feed.link, e);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("Failed to reconcile feed {} ({}): {}", feed.id, feed.link, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Reconciliation pass done: {} feed(s), {} initial, {} refreshed, {} unchanged, {} skipped, {} failed, {} post(s) created",
            report.feeds_seen,
            report.initial_imports,
            report.refreshes,
            report.unchanged,
            report.skipped,
            report.failed,
            report.posts_created
        );

        Ok(report)
    }

    async fn reconcile_feed(&self, feed: &Feed) -> Result<FeedOutcome> {
        // Links are checked again on every pass, not only at registration.
        validate_url(&feed.link, self.allow_private_hosts)?;

        let if_modified_since = if self.conditional_requests && feed.fetched {
            feed.last_modified
        } else {
            None
        };

        let fetched = match self.fetcher.fetch(&feed.link, if_modified_since).await? {
            FetchOutcome::Fetched(fetched) => fetched,
            FetchOutcome::NotModified => {
                debug!("Feed {} not modified", feed.id);
                return Ok(FeedOutcome::Unchanged);
            }
        };

        let claim = match decide(feed, fetched.last_modified.as_deref()) {
            Decision::Import(claim) => claim,
            Decision::Unchanged => {
                debug!("Feed {} unchanged since {:?}", feed.id, feed.last_modified);
                return Ok(FeedOutcome::Unchanged);
            }
            Decision::Skip(reason) => return Ok(FeedOutcome::Skipped(reason)),
        };

        let document = parse_feed(&fetched.body)?;
        if document.skipped_items > 0 {
            warn!(
                "Feed {}: dropped {} malformed item(s)",
                feed.id, document.skipped_items
            );
        }

        let Some(result) = import_posts(&self.db, &feed.id, claim, &document.items).await? else {
            return Ok(FeedOutcome::Skipped(SkipReason::ClaimLost));
        };

        let initial = matches!(claim, ImportClaim::FirstFetch { .. });
        info!(
            "Feed {} {}: {} new post(s)",
            feed.id,
            if initial { "imported" } else { "refreshed" },
            result.created
        );

        Ok(FeedOutcome::Imported {
            initial,
            created: result.created,
            dropped: document.skipped_items + result.failed,
        })
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("conditional_requests", &self.conditional_requests)
            .field("allow_private_hosts", &self.allow_private_hosts)
            .finish()
    }
}
