//! Context enrichment: fetch a reference page and turn it into full listing text.
//! The same generative service also judges call transcripts.

pub mod fetch;
pub mod gemini;

use async_trait::async_trait;

use crate::error::EnrichmentError;

pub use fetch::HttpFetcher;
pub use gemini::GeminiExtractor;

/// Downloads the raw HTML of a reference page.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, EnrichmentError>;
}

/// Generative extraction of lossless listing context.
#[async_trait]
pub trait ContextExtractor: Send + Sync {
    /// Extract context from a page we already downloaded.
    async fn extract_from_html(&self, url: &str, html: &str) -> Result<String, EnrichmentError>;

    /// Extract context by letting the service read `url` itself.
    async fn extract_from_url(&self, url: &str) -> Result<String, EnrichmentError>;
}

/// Yes/no reading of a finished call's transcript.
#[async_trait]
pub trait BookingJudge: Send + Sync {
    /// `Some(true)` when the customer clearly agreed to a viewing or test
    /// drive, `Some(false)` when they clearly did not, `None` when unclear.
    async fn customer_booked(&self, transcript: &str) -> Result<Option<bool>, EnrichmentError>;
}
