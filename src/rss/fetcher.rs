//! Feed fetcher.
//!
//! One HTTP GET per call with a bounded timeout and a response size limit.
//! The `FeedFetcher` trait is the seam the reconciliation job depends on.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::RssConfig;
use crate::datetime::format_http_date;
use crate::error::{AggregatorError, Result};
use crate::rss::types::{FetchOutcome, FetchedFeed};

/// Retrieves feed documents.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the document at `url`.
    ///
    /// With `if_modified_since` set the request is conditional and may
    /// resolve to [`FetchOutcome::NotModified`]. Network failures, timeouts,
    /// oversized bodies and other non-2xx statuses are `AggregatorError::Fetch`.
    async fn fetch(
        &self,
        url: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome>;
}

/// Production fetcher built on reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_feed_size: u64,
}

impl HttpFetcher {
    /// Create a fetcher from the feed configuration.
    pub fn new(config: &RssConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| AggregatorError::Fetch(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
        })
    }

    fn too_large(&self, size: u64) -> AggregatorError {
        AggregatorError::Fetch(format!(
            "feed too large: {} bytes (max {} bytes)",
            size, self.max_feed_size
        ))
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome> {
        let mut request = self.client.get(url);
        if let Some(since) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, format_http_date(&since));
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| AggregatorError::Fetch(format!("failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED && if_modified_since.is_some() {
            debug!("{} answered 304 Not Modified", url);
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(AggregatorError::Fetch(format!("HTTP error: {}", status)));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(self.too_large(content_length));
            }
        }

        // Non-ASCII header values are treated as absent.
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        // Chunked read so a missing or lying Content-Length cannot exceed the limit.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AggregatorError::Fetch(format!("failed to read response: {}", e)))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_feed_size {
                return Err(self.too_large(body.len() as u64));
            }
        }

        Ok(FetchOutcome::Fetched(FetchedFeed {
            body,
            last_modified,
            status: status.as_u16(),
        }))
    }
}

/// Validate a feed link before registration.
///
/// Only http and https links with a host are accepted. Unless
/// `allow_private_hosts` is set, loopback, private and link-local addresses
/// and local-only hostnames are refused.
pub fn validate_url(url: &str, allow_private_hosts: bool) -> Result<url::Url> {
    let parsed =
        url::Url::parse(url).map_err(|e| AggregatorError::Validation(format!("invalid URL: {}", e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AggregatorError::Validation(format!(
            "unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host()
        .ok_or_else(|| AggregatorError::Validation("URL has no host".to_string()))?;

    if allow_private_hosts {
        return Ok(parsed);
    }

    let refused = match host {
        url::Host::Domain(domain) => is_local_hostname(domain),
        url::Host::Ipv4(ip) => is_non_public_ip(IpAddr::V4(ip)),
        url::Host::Ipv6(ip) => is_non_public_ip(IpAddr::V6(ip)),
    };
    if refused {
        return Err(AggregatorError::Validation(format!(
            "non-public host not allowed: {}",
            host
        )));
    }

    Ok(parsed)
}

fn is_local_hostname(host: &str) -> bool {
    let host = host.to_lowercase();
    host == "localhost"
        || [".localhost", ".local", ".internal", ".lan", ".home"]
            .iter()
            .any(|suffix| host.ends_with(suffix))
}

fn is_non_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_documentation()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // unique local fc00::/7
                || (first & 0xfe00) == 0xfc00
                // link-local fe80::/10
                || (first & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_non_public_ip(IpAddr::V4(v4)))
        }
    }
}
