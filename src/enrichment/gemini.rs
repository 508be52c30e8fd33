//! Gemini `generateContent` extractor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error};

use super::{BookingJudge, ContextExtractor};
use crate::config::GeminiConfig;
use crate::error::EnrichmentError;
use crate::html;

/// Upper bound on page text sent for extraction.
const MAX_PAGE_CHARS: usize = 60_000;

const EXTRACTION_PROMPT: &str = "You are given a vehicle listing page. Reproduce every fact on the \
page that a salesperson could be asked about on a call: title, price, year, mileage, \
transmission, fuel type, colour, body type, engine, features, condition notes, warranty, \
service history, location, and seller details. Do not summarise and do not drop details. \
Ignore navigation, adverts, cookie banners, and unrelated listings. Output plain text with \
one fact per line as 'Label: value'.";

/// Upper bound on transcript text sent for a booking judgement.
const MAX_TRANSCRIPT_CHARS: usize = 15_000;

const BOOKING_PROMPT: &str = "You are analyzing a phone call transcript between an AI agent and a \
customer. The agent likely asked if the customer wants to book a viewing or test drive of a vehicle.";

const BOOKING_QUESTION: &str = "Did the customer clearly agree to book a viewing or test drive? \
(e.g. said \"yes\", \"sure\", \"I'd like to\", \"book me in\", \"let's do it\")\n\
Answer with exactly one word: YES or NO.";

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone)]
pub struct GeminiExtractor {
    client: reqwest::Client,
    endpoint: String,
}

impl GeminiExtractor {
    pub fn new(config: &GeminiConfig) -> Result<Self, EnrichmentError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(config.api_key.expose_secret())
                .map_err(|e| EnrichmentError::Extract(format!("invalid API key header value: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EnrichmentError::Extract(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
        })
    }

    async fn generate(&self, prompt: String, tools: Vec<Value>) -> Result<String, EnrichmentError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: Some(prompt) }],
            }],
            tools,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| EnrichmentError::Extract(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = %status, body = %body, "Gemini request failed");
            return Err(EnrichmentError::Extract(format!("HTTP {}", status.as_u16())));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| EnrichmentError::Extract(format!("invalid response: {e}")))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(EnrichmentError::Extract("empty response".into()));
        }
        debug!(chars = text.len(), "Gemini extraction complete");
        Ok(text.to_string())
    }
}

#[async_trait]
impl ContextExtractor for GeminiExtractor {
    async fn extract_from_html(&self, url: &str, page: &str) -> Result<String, EnrichmentError> {
        let text: String = html::to_text(page).chars().take(MAX_PAGE_CHARS).collect();
        let prompt = format!("{EXTRACTION_PROMPT}\n\nSource URL: {url}\n\nPAGE TEXT:\n{text}");
        self.generate(prompt, Vec::new()).await
    }

    async fn extract_from_url(&self, url: &str) -> Result<String, EnrichmentError> {
        let prompt = format!("{EXTRACTION_PROMPT}\n\nRead the page at: {url}");
        self.generate(prompt, vec![json!({ "url_context": {} })]).await
    }
}

#[async_trait]
impl BookingJudge for GeminiExtractor {
    async fn customer_booked(&self, transcript: &str) -> Result<Option<bool>, EnrichmentError> {
        let mut text: String = transcript.chars().take(MAX_TRANSCRIPT_CHARS).collect();
        if text.len() < transcript.len() {
            text.push_str("\n\n[... truncated ...]");
        }
        let prompt = format!("{BOOKING_PROMPT}\n\nTranscript:\n---\n{text}\n---\n\n{BOOKING_QUESTION}");
        let answer = self.generate(prompt, Vec::new()).await?;
        Ok(parse_yes_no(&answer))
    }
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    let answer = answer.trim().to_ascii_lowercase();
    if answer.starts_with("yes") {
        Some(true)
    } else if answer.starts_with("no") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn extractor(server: &MockServer) -> GeminiExtractor {
        GeminiExtractor::new(&GeminiConfig {
            api_key: SecretString::from("g-key".to_string()),
            model: "gemini-2.0-flash".into(),
            base_url: server.uri(),
        })
        .unwrap()
    }

    fn reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}]
        }))
    }

    #[tokio::test]
    async fn html_is_stripped_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_string_contains("Price: R 350 000"))
            .respond_with(reply("  Title: 2019 Toyota Hilux\nPrice: R350000  "))
            .expect(1)
            .mount(&server)
            .await;

        let page = "<html><script>track()</script><p>Price: R 350 000</p></html>";
        let text = extractor(&server)
            .extract_from_html("https://autotrader.co.za/listing/1", page)
            .await
            .unwrap();
        assert_eq!(text, "Title: 2019 Toyota Hilux\nPrice: R350000");
    }

    #[tokio::test]
    async fn url_mode_enables_url_context_tool() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("url_context"))
            .respond_with(reply("Title: Polo"))
            .expect(1)
            .mount(&server)
            .await;

        let text = extractor(&server)
            .extract_from_url("https://cars.co.za/1")
            .await
            .unwrap();
        assert_eq!(text, "Title: Polo");
    }

    #[tokio::test]
    async fn booking_judgement_reads_the_first_word() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("book me in"))
            .and(body_string_contains("Customer: yes please"))
            .respond_with(reply("YES."))
            .expect(1)
            .mount(&server)
            .await;

        let booked = extractor(&server)
            .customer_booked("AI: Shall I book a test drive?\nCustomer: yes please")
            .await
            .unwrap();
        assert_eq!(booked, Some(true));
    }

    #[test]
    fn yes_no_answers() {
        assert_eq!(parse_yes_no(" Yes"), Some(true));
        assert_eq!(parse_yes_no("NO"), Some(false));
        assert_eq!(parse_yes_no("Maybe"), None);
    }

    #[tokio::test]
    async fn empty_candidates_are_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let err = extractor(&server).extract_from_url("https://x").await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Extract(_)));
    }

    #[tokio::test]
    async fn http_errors_do_not_leak_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exhausted for key g-key"))
            .mount(&server)
            .await;

        let err = extractor(&server).extract_from_url("https://x").await.unwrap_err();
        assert_eq!(err.to_string(), "Context extraction failed: HTTP 429");
    }
}
