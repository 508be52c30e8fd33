//! Inbound enquiry email events and the source their bodies are fetched from.
//!
//! The same Resend account also sends the call-summary emails.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{InboundError, MailError};

pub const EMAIL_RECEIVED: &str = "email.received";

/// Webhook event announcing a received email. The body is not included.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: Option<InboundEventData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEventData {
    #[serde(default)]
    pub email_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

/// A received email as returned by the email source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceivedEmail {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl ReceivedEmail {
    pub fn subject(&self) -> &str {
        self.subject.as_deref().map(str::trim).unwrap_or("")
    }
}

/// Lower-cased, trimmed, non-empty recipient addresses. Event addresses win
/// over the fetched email's; `"Name <addr>"` forms are reduced to `addr`.
pub fn recipient_addresses(event: &InboundEventData, email: &ReceivedEmail) -> Vec<String> {
    let source = if event.to.is_empty() { &email.to } else { &event.to };
    source
        .iter()
        .map(|raw| {
            let raw = raw.trim();
            let addr = match (raw.find('<'), raw.rfind('>')) {
                (Some(start), Some(end)) if start < end => &raw[start + 1..end],
                _ => raw,
            };
            addr.trim().to_ascii_lowercase()
        })
        .filter(|a| !a.is_empty())
        .collect()
}

/// Fetches full email bodies by id.
#[async_trait]
pub trait EmailSource: Send + Sync {
    async fn fetch_email(&self, email_id: &str) -> Result<ReceivedEmail, InboundError>;
}

/// An email to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Sends emails. Returns the provider's message id.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<String, MailError>;
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Resend receiving and sending API.
#[derive(Debug, Clone)]
pub struct ResendClient {
    client: reqwest::Client,
    base_url: String,
}

impl ResendClient {
    pub fn new(api_key: &SecretString, base_url: impl Into<String>) -> Result<Self, InboundError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
                .map_err(|e| InboundError::Fetch(format!("invalid API key header value: {e}")))?,
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| InboundError::Fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EmailSource for ResendClient {
    async fn fetch_email(&self, email_id: &str) -> Result<ReceivedEmail, InboundError> {
        let response = self
            .client
            .get(format!("{}/emails/receiving/{email_id}", self.base_url))
            .send()
            .await
            .map_err(|e| InboundError::Fetch(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(email_id, status = %status, body = %body, "Email fetch failed");
            return Err(InboundError::Fetch(format!("HTTP {}", status.as_u16())));
        }
        serde_json::from_str(&body).map_err(|e| InboundError::Fetch(format!("invalid response: {e}")))
    }
}

#[async_trait]
impl EmailSender for ResendClient {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<String, MailError> {
        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .json(email)
            .send()
            .await
            .map_err(|e| MailError::Send(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = %status, body = %body, "Email send failed");
            return Err(MailError::Send(format!("HTTP {}", status.as_u16())));
        }
        let sent: SendResponse = serde_json::from_str(&body)
            .map_err(|e| MailError::Send(format!("invalid response: {e}")))?;
        let id = sent.id.unwrap_or_default();
        debug!(message_id = %id, "Email sent");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn event_parses_with_missing_fields() {
        let event: InboundEvent = serde_json::from_value(json!({
            "type": "email.received",
            "data": {"email_id": "em_1", "to": ["Leads@Dealer.co.za"]}
        }))
        .unwrap();
        assert_eq!(event.kind, EMAIL_RECEIVED);
        let data = event.data.unwrap();
        assert_eq!(data.email_id.as_deref(), Some("em_1"));
        assert!(data.subject.is_none());
    }

    #[test]
    fn recipients_prefer_event_and_strip_display_names() {
        let event = InboundEventData {
            to: vec!["Sales <Leads@Dealer.co.za>".into(), "  ".into()],
            ..Default::default()
        };
        let email = ReceivedEmail {
            to: vec!["other@x.com".into()],
            ..Default::default()
        };
        assert_eq!(recipient_addresses(&event, &email), vec!["leads@dealer.co.za"]);

        let empty = InboundEventData::default();
        assert_eq!(recipient_addresses(&empty, &email), vec!["other@x.com"]);
    }

    #[tokio::test]
    async fn resend_fetch_parses_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emails/receiving/em_1"))
            .and(header("authorization", "Bearer re_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "em_1",
                "subject": " AutoTrader enquiry ",
                "text": "Name: John",
                "html": null,
                "to": ["leads@dealer.co.za"]
            })))
            .mount(&server)
            .await;

        let client = ResendClient::new(&SecretString::from("re_key".to_string()), server.uri()).unwrap();
        let email = client.fetch_email("em_1").await.unwrap();
        assert_eq!(email.subject(), "AutoTrader enquiry");
        assert_eq!(email.text.as_deref(), Some("Name: John"));
        assert!(email.html.is_none());
    }

    #[tokio::test]
    async fn resend_send_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_key"))
            .and(body_json(json!({
                "from": "Intellidial <calls@intellidial.example>",
                "to": ["sales@dealer.example"],
                "subject": "Hello",
                "html": "<p>Hi</p>"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ResendClient::new(&SecretString::from("re_key".to_string()), server.uri()).unwrap();
        let id = client
            .send_email(&OutgoingEmail {
                from: "Intellidial <calls@intellidial.example>".into(),
                to: vec!["sales@dealer.example".into()],
                subject: "Hello".into(),
                html: "<p>Hi</p>".into(),
            })
            .await
            .unwrap();
        assert_eq!(id, "msg_1");
    }

    #[tokio::test]
    async fn resend_send_error_hides_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid from address re_key"))
            .mount(&server)
            .await;

        let client = ResendClient::new(&SecretString::from("re_key".to_string()), server.uri()).unwrap();
        let err = client
            .send_email(&OutgoingEmail {
                from: "x".into(),
                to: vec!["y".into()],
                subject: "s".into(),
                html: String::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email send failed: HTTP 422");
    }

    #[tokio::test]
    async fn resend_error_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ResendClient::new(&SecretString::from("re_key".to_string()), server.uri()).unwrap();
        assert!(matches!(client.fetch_email("em_1").await, Err(InboundError::Fetch(_))));
    }
}
