//! Voice-calling platform client.
//!
//! [`VoicePlatform`] is the seam the agent manager, dispatcher, and call sync
//! talk to; [`VapiClient`] is the HTTP implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::VoiceError;

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    pub name: String,
    pub model: ModelConfig,
    pub voice: VoiceConfig,
    pub first_message: String,
    pub transcriber: TranscriberConfig,
    pub max_duration_seconds: u64,
    pub silence_timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub server_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_plan: Option<ArtifactPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub provider: String,
    pub voice_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriberConfig {
    pub provider: String,
    pub model: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub structured_output_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredOutputRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub assistant_id: String,
    pub phone_number_id: String,
    pub customer: CallCustomer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_overrides: Option<AssistantOverrides>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallCustomer {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantOverrides {
    pub variable_values: BTreeMap<String, String>,
}

/// Recording reference: a bare URL or `{url}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RecordingRef {
    Url(String),
    Object {
        #[serde(default)]
        url: Option<String>,
    },
}

impl RecordingRef {
    pub fn url(&self) -> Option<&str> {
        let raw = match self {
            Self::Url(u) => Some(u.as_str()),
            Self::Object { url } => url.as_deref(),
        };
        raw.map(str::trim).filter(|u| !u.is_empty())
    }
}

/// One structured-output result, keyed by output handle in the artifact.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StructuredOutputResult {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

/// Call artifacts attached to an ended call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub recording: Option<RecordingRef>,
    /// Legacy flat field some payloads carry instead of `recording`.
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub structured_outputs: Option<BTreeMap<String, StructuredOutputResult>>,
}

impl Artifact {
    pub fn recording_url(&self) -> Option<String> {
        self.recording
            .as_ref()
            .and_then(RecordingRef::url)
            .or(self.recording_url.as_deref())
            .map(str::to_string)
    }
}

/// A call as reported by the platform (`GET /call/{id}`, or `call` in a report).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ended_reason: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub customer: Option<CallCustomer>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub artifact: Option<Artifact>,
}

impl CallRecord {
    pub fn is_ended(&self) -> bool {
        self.status.as_deref() == Some("ended") || self.ended_at.is_some()
    }
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

// ── Trait ───────────────────────────────────────────────────────────

/// Operations against the voice-calling platform.
#[async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Create a voice agent; returns its handle.
    async fn create_assistant(&self, config: &AssistantConfig) -> Result<String, VoiceError>;

    async fn update_assistant(&self, id: &str, config: &AssistantConfig) -> Result<(), VoiceError>;

    /// Create a capture schema; returns its handle.
    async fn create_structured_output(
        &self,
        request: &StructuredOutputRequest,
    ) -> Result<String, VoiceError>;

    async fn update_structured_output(&self, id: &str, schema: &Value) -> Result<(), VoiceError>;

    /// Place an outbound call; returns the call handle.
    async fn create_call(&self, request: &CallRequest) -> Result<String, VoiceError>;

    /// Fetch a call. `None` when the platform does not know it.
    async fn get_call(&self, id: &str) -> Result<Option<CallRecord>, VoiceError>;
}

// ── HTTP implementation ─────────────────────────────────────────────

/// VAPI REST client.
#[derive(Debug, Clone)]
pub struct VapiClient {
    client: reqwest::Client,
    base_url: String,
}

impl VapiClient {
    pub fn new(api_key: &SecretString, base_url: impl Into<String>) -> Result<Self, VoiceError> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", api_key.expose_secret());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| VoiceError::RequestFailed(format!("invalid API key header value: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::RequestFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and return the body on 2xx, or a translated error.
    async fn send(&self, op: &str, request: reqwest::RequestBuilder) -> Result<String, VoiceError> {
        let response = request
            .send()
            .await
            .map_err(|e| VoiceError::RequestFailed(format!("{op}: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(op, status = %status, "voice platform response");

        if status.is_success() {
            return Ok(body);
        }

        error!(op, status = %status, body = %body, "voice platform request failed");
        Err(VoiceError::Api {
            status: status.as_u16(),
            message: translate_error(op, status.as_u16(), &body),
        })
    }

    async fn send_for_id(&self, op: &str, request: reqwest::RequestBuilder) -> Result<String, VoiceError> {
        let body = self.send(op, request).await?;
        let parsed: IdResponse = serde_json::from_str(&body)
            .map_err(|e| VoiceError::InvalidResponse(format!("{op}: {e}")))?;
        Ok(parsed.id)
    }
}

#[async_trait]
impl VoicePlatform for VapiClient {
    async fn create_assistant(&self, config: &AssistantConfig) -> Result<String, VoiceError> {
        let request = self.client.post(self.url("/assistant")).json(config);
        self.send_for_id("create assistant", request).await
    }

    async fn update_assistant(&self, id: &str, config: &AssistantConfig) -> Result<(), VoiceError> {
        let request = self
            .client
            .patch(self.url(&format!("/assistant/{id}")))
            .json(config);
        self.send("update assistant", request).await.map(|_| ())
    }

    async fn create_structured_output(
        &self,
        request: &StructuredOutputRequest,
    ) -> Result<String, VoiceError> {
        let request = self.client.post(self.url("/structured-output")).json(request);
        self.send_for_id("create structured output", request).await
    }

    async fn update_structured_output(&self, id: &str, schema: &Value) -> Result<(), VoiceError> {
        let request = self
            .client
            .patch(self.url(&format!("/structured-output/{id}")))
            .query(&[("schemaOverride", "true")])
            .json(&serde_json::json!({ "schema": schema }));
        self.send("update structured output", request).await.map(|_| ())
    }

    async fn create_call(&self, request: &CallRequest) -> Result<String, VoiceError> {
        let http = self.client.post(self.url("/call/phone")).json(request);
        let body = self.send("create call", http).await?;

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| VoiceError::InvalidResponse(format!("create call: {e}")))?;
        if value.get("error").is_some() || value.get("message").is_some() {
            warn!(
                error = ?value.get("error"),
                message = ?value.get("message"),
                "create call succeeded with a warning"
            );
        }
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| VoiceError::InvalidResponse("create call: response has no id".into()))
    }

    async fn get_call(&self, id: &str) -> Result<Option<CallRecord>, VoiceError> {
        let response = self
            .client
            .get(self.url(&format!("/call/{id}")))
            .send()
            .await
            .map_err(|e| VoiceError::RequestFailed(format!("get call: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            warn!(call_id = id, "call not found on voice platform");
            return Ok(None);
        }

        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(call_id = id, status = %status, body = %body, "get call failed");
            return Err(VoiceError::Api {
                status: status.as_u16(),
                message: translate_error("get call", status.as_u16(), &body),
            });
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| VoiceError::InvalidResponse(format!("get call: {e}")))
    }
}

/// Build a short message from an error body.
///
/// Prefers `message` (string, or array of strings joined), then `error`;
/// appends `details` when present. Non-JSON bodies yield
/// `"{op} failed: {status}"` plus the first 200 characters of the body.
pub fn translate_error(op: &str, status: u16, body: &str) -> String {
    let fallback = format!("{op} failed: {status}");

    match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            let message = match json.get("message") {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Array(items)) => {
                    let joined = items
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("; ");
                    (!joined.is_empty()).then_some(joined)
                }
                _ => None,
            }
            .or_else(|| match json.get("error") {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Object(o)) => o.get("message").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .unwrap_or(fallback);

            match json.get("details").and_then(Value::as_str) {
                Some(details) if !details.trim().is_empty() => {
                    format!("{message} ({})", details.trim())
                }
                _ => message,
            }
        }
        Err(_) => {
            let snippet: String = body.trim().chars().take(200).collect();
            if snippet.is_empty() {
                fallback
            } else {
                format!("{fallback}: {snippet}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> VapiClient {
        VapiClient::new(&SecretString::from("test-key".to_string()), server.uri()).unwrap()
    }

    fn call_request() -> CallRequest {
        CallRequest {
            assistant_id: "asst-1".into(),
            phone_number_id: "pn-1".into(),
            customer: CallCustomer {
                number: Some("+27821234567".into()),
                name: Some("John".into()),
            },
            assistant_overrides: None,
        }
    }

    #[test]
    fn translate_prefers_message_then_error() {
        assert_eq!(translate_error("create call", 400, r#"{"message":"bad number"}"#), "bad number");
        assert_eq!(
            translate_error("create call", 400, r#"{"message":["a must be set","b too long"]}"#),
            "a must be set; b too long"
        );
        assert_eq!(translate_error("create call", 401, r#"{"error":"Unauthorized"}"#), "Unauthorized");
        assert_eq!(
            translate_error("create call", 400, r#"{"message":"bad","details":"number invalid"}"#),
            "bad (number invalid)"
        );
    }

    #[test]
    fn translate_non_json_body_is_truncated() {
        let body = "x".repeat(500);
        let msg = translate_error("create call", 502, &body);
        assert!(msg.starts_with("create call failed: 502: "));
        assert_eq!(msg.len(), "create call failed: 502: ".len() + 200);
        assert_eq!(translate_error("get call", 500, ""), "get call failed: 500");
    }

    #[test]
    fn recording_accepts_string_or_object() {
        let a: Artifact = serde_json::from_str(r#"{"recording":"https://r/1.wav"}"#).unwrap();
        assert_eq!(a.recording_url().as_deref(), Some("https://r/1.wav"));
        let b: Artifact = serde_json::from_str(r#"{"recording":{"url":"https://r/2.wav"}}"#).unwrap();
        assert_eq!(b.recording_url().as_deref(), Some("https://r/2.wav"));
        let c: Artifact = serde_json::from_str(r#"{"recordingUrl":"https://r/3.wav"}"#).unwrap();
        assert_eq!(c.recording_url().as_deref(), Some("https://r/3.wav"));
        let d: Artifact = serde_json::from_str(r#"{"recording":{}}"#).unwrap();
        assert!(d.recording_url().is_none());
    }

    #[tokio::test]
    async fn create_call_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call/phone"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "assistantId": "asst-1",
                "phoneNumberId": "pn-1",
                "customer": {"number": "+27821234567", "name": "John"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "call-9", "status": "queued"})))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).create_call(&call_request()).await.unwrap();
        assert_eq!(id, "call-9");
    }

    #[tokio::test]
    async fn create_call_error_is_translated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call/phone"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "message": "Couldn't get number",
                "details": "phoneNumberId not found"
            })))
            .mount(&server)
            .await;

        let err = client(&server).create_call(&call_request()).await.unwrap_err();
        match err {
            VoiceError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Couldn't get number (phoneNumberId not found)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_structured_output_sets_schema_override() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/structured-output/so-1"))
            .and(query_param("schemaOverride", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "so-1"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .update_structured_output("so-1", &serde_json::json!({"type": "object"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_call_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/call/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client(&server).get_call("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_call_parses_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/call/call-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "call-1",
                "status": "ended",
                "endedReason": "customer-ended-call",
                "assistantId": "asst-1",
                "customer": {"number": "+27821234567"},
                "artifact": {"transcript": "hi", "recording": {"url": "https://r/1"}}
            })))
            .mount(&server)
            .await;

        let record = client(&server).get_call("call-1").await.unwrap().unwrap();
        assert!(record.is_ended());
        assert_eq!(record.ended_reason.as_deref(), Some("customer-ended-call"));
        assert_eq!(
            record.artifact.unwrap().recording_url().as_deref(),
            Some("https://r/1")
        );
    }
}
