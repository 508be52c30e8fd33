//! Plain HTTP page fetcher with browser-like headers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use super::ContentFetcher;
use crate::error::EnrichmentError;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Pages shorter than this are treated as blocked or empty shells.
pub const MIN_PAGE_BYTES: usize = 500;

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, EnrichmentError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-ZA,en;q=0.9"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| EnrichmentError::Fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, EnrichmentError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EnrichmentError::Fetch(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = %status, "Reference page fetch failed");
            return Err(EnrichmentError::Fetch(format!("HTTP {}", status.as_u16())));
        }

        let html = response
            .text()
            .await
            .map_err(|e| EnrichmentError::Fetch(format!("body read failed: {e}")))?;
        if html.len() < MIN_PAGE_BYTES {
            warn!(url, bytes = html.len(), "Reference page too small");
            return Err(EnrichmentError::Fetch("response too small or empty".into()));
        }

        debug!(url, bytes = html.len(), "Reference page fetched");
        Ok(html)
    }
}
