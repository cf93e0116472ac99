//! HTTP client for the download-count API
//!
//! This module handles:
//! - Building the HTTP client with the configured user agent and timeouts
//! - Building point-query URLs for one or many packages
//! - Capturing replies (status, Retry-After, body) for classification
//! - Parsing bulk and single reply bodies

use crate::config::ApiConfig;
use crate::fetcher::gate::{parse_retry_after, Backoff, RateLimited};
use crate::CensusError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use url::Url;

/// A fully read API reply
#[derive(Debug, Clone)]
pub struct ApiReply {
    /// HTTP status code
    pub status: StatusCode,

    /// Raw `Retry-After` header value
    pub retry_after: Option<String>,

    /// Response body
    pub body: String,
}

impl ApiReply {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }
}

impl RateLimited for ApiReply {
    fn backoff(&self) -> Backoff {
        if self.status != StatusCode::TOO_MANY_REQUESTS {
            return Backoff::None;
        }
        match parse_retry_after(self.retry_after.as_deref()) {
            Some(delay) => Backoff::After(delay),
            None => Backoff::Unspecified,
        }
    }
}

/// One package entry of a point reply
#[derive(Debug, Clone, Deserialize)]
struct PointEntry {
    downloads: u64,
}

/// Builds an HTTP client with proper configuration
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Client for `GET /downloads/point/<range>/<names>`
#[derive(Debug, Clone)]
pub struct DownloadsClient {
    http: Client,
    base_url: String,
    range: String,
}

impl DownloadsClient {
    /// Creates a client from the API configuration
    pub fn new(config: &ApiConfig) -> Result<Self, CensusError> {
        // Reject a malformed base URL up front rather than on every request
        Url::parse(&config.base_url)?;

        Ok(Self {
            http: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            range: config.range.clone(),
        })
    }

    /// Builds the point-query URL for the given names
    ///
    /// Names are joined with commas and placed in the path as-is, so a scoped
    /// name keeps its `/`.
    pub fn point_url(&self, names: &[String]) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}/downloads/point/{}/{}",
            self.base_url,
            self.range,
            names.join(",")
        ))
    }

    /// Queries the download counts of one or many names
    ///
    /// Only transport failures are returned as errors; every HTTP status is
    /// captured in the reply.
    pub async fn get_point(&self, names: &[String]) -> Result<ApiReply, CensusError> {
        let url = self.point_url(names)?;
        tracing::debug!("GET {} ({} names)", url, names.len());

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(ApiReply {
            status,
            retry_after,
            body,
        })
    }
}

/// Parses a bulk reply into counts for the queried names
///
/// Names missing from the body or mapped to `null` have no data and are
/// omitted. Keys that were not asked for are ignored.
pub fn parse_bulk_counts(
    body: &str,
    names: &[String],
) -> Result<BTreeMap<String, u64>, serde_json::Error> {
    let entries: HashMap<String, Option<PointEntry>> = serde_json::from_str(body)?;

    Ok(names
        .iter()
        .filter_map(|name| match entries.get(name) {
            Some(Some(entry)) => Some((name.clone(), entry.downloads)),
            _ => None,
        })
        .collect())
}

/// Parses a single-name reply
///
/// A `null` body means the registry has no data for the name.
pub fn parse_single_count(body: &str) -> Result<Option<u64>, serde_json::Error> {
    let entry: Option<PointEntry> = serde_json::from_str(body)?;
    Ok(entry.map(|e| e.downloads))
}
