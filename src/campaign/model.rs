//! Campaign data model: projects, contacts, call results, and notifications.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Capture fields ──────────────────────────────────────────────────

/// Declared type of a capture field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureType {
    Number,
    /// Free text (the default for unknown types too).
    #[default]
    #[serde(other)]
    Text,
}

impl CaptureType {
    /// JSON-schema type this capture type maps to.
    pub fn json_type(self) -> &'static str {
        match self {
            Self::Text => "string",
            Self::Number => "number",
        }
    }
}

/// A named, typed datum the agent must extract during a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureField {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub field_type: CaptureType,
}

impl CaptureField {
    pub fn new(key: impl Into<String>, label: impl Into<String>, field_type: CaptureType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type,
        }
    }
}

// ── Project ─────────────────────────────────────────────────────────

/// Per-project free-text replacements for the built-in prompt sections.
///
/// `None` means "use the default"; an override is used verbatim (trimmed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptOverrides {
    pub call_context: Option<String>,
    pub identity: Option<String>,
    pub ending_call: Option<String>,
    pub compliance: Option<String>,
    pub voice_output: Option<String>,
    pub business_context_header: Option<String>,
    pub scheduling: Option<String>,
    pub context_header: Option<String>,
    pub context_reference: Option<String>,
    pub context_intro: Option<String>,
    pub context_placeholder: Option<String>,
}

/// One calling campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub dealer_id: Option<String>,

    // Identity
    pub agent_name: Option<String>,
    pub agent_company: Option<String>,
    pub agent_number: Option<String>,

    // Behaviour
    pub business_context: Option<String>,
    pub agent_instructions: Option<String>,
    pub goal: Option<String>,
    pub tone: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub capture_fields: Vec<CaptureField>,
    #[serde(default)]
    pub prompt_overrides: PromptOverrides,

    // Enrichment
    pub full_context_text: Option<String>,
    pub context_refreshed_at: Option<DateTime<Utc>>,

    // Lazily provisioned external handles
    pub assistant_id: Option<String>,
    pub structured_output_id: Option<String>,

    /// Recipient of call-summary emails after successful calls.
    pub email_update: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// A blank project owned by `org_id`.
    pub fn new(org_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.into(),
            name: name.into(),
            dealer_id: None,
            agent_name: None,
            agent_company: None,
            agent_number: None,
            business_context: None,
            agent_instructions: None,
            goal: None,
            tone: None,
            questions: Vec::new(),
            capture_fields: Vec::new(),
            prompt_overrides: PromptOverrides::default(),
            full_context_text: None,
            context_refreshed_at: None,
            assistant_id: None,
            structured_output_id: None,
            email_update: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Non-blank capture keys, in declaration order.
    pub fn capture_keys(&self) -> Vec<String> {
        self.capture_fields
            .iter()
            .map(|f| f.key.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }
}

// ── Dealer / organization ───────────────────────────────────────────

/// A dealership: routes a forwarding inbox to a project and supplies
/// contact details for the agent's business context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dealer {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub forwarding_email: Option<String>,
    pub project_id: Option<String>,
    pub address: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub operation_hours: Option<String>,
    pub address_pronunciation_notes: Option<String>,
    /// Overrides the project's `email_update` for the dealer's call summaries.
    pub call_updates_email: Option<String>,
}

impl Dealer {
    pub fn new(org_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.into(),
            name: name.into(),
            forwarding_email: None,
            project_id: None,
            address: None,
            phone_number: None,
            email: None,
            operation_hours: None,
            address_pronunciation_notes: None,
            call_updates_email: None,
        }
    }
}

/// Organization settings and usage counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    /// Voice-platform handle of the number outbound calls are placed from.
    pub caller_number_id: Option<String>,
    pub calls_used: i64,
    pub minutes_used: f64,
}

// ── Contact ─────────────────────────────────────────────────────────

/// Call lifecycle of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    #[default]
    Pending,
    Calling,
    Success,
    Failed,
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Calling => write!(f, "calling"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "calling" => Ok(Self::Calling),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown contact status: {}", s)),
        }
    }
}

/// One phone number within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub project_id: String,
    /// Phone as supplied (whitespace stripped).
    pub phone: String,
    /// Normalized E.164 form; unique within a project.
    pub phone_key: String,
    pub name: Option<String>,
    pub status: ContactStatus,
    pub call_result: Option<CallResult>,
    #[serde(default)]
    pub call_history: Vec<CallHistoryEntry>,
    /// Last call handle whose end-of-call report was applied.
    pub last_vapi_call_id: Option<String>,
    /// Call handle currently in flight.
    pub vapi_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Whether a report for `call_id` has already been applied, either as the
    /// latest result or anywhere in the call history.
    pub fn has_applied(&self, call_id: &str) -> bool {
        self.last_vapi_call_id.as_deref() == Some(call_id)
            || self
                .call_history
                .iter()
                .any(|entry| entry.vapi_call_id.as_deref() == Some(call_id))
    }
}

/// Result of a contact insert that deduplicates on the normalized phone.
#[derive(Debug, Clone)]
pub struct ContactInsert {
    pub contact: Contact,
    /// `false` when an existing contact was reused.
    pub created: bool,
}

// ── Call results ────────────────────────────────────────────────────

/// A scalar captured during a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapturedValue {
    Number(f64),
    Text(String),
    Null,
}

impl CapturedValue {
    /// Null or blank text counts as "not captured".
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(_) => false,
        }
    }
}

/// Outcome of one call attempt. Immutable once attached to a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub duration_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub captured_data: BTreeMap<String, CapturedValue>,
    pub attempted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl CallResult {
    /// A zero-duration failure with the given reason.
    pub fn failure(attempted_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            duration_seconds: 0,
            transcript: None,
            recording_url: None,
            captured_data: BTreeMap::new(),
            attempted_at,
            ended_reason: None,
            failure_reason: Some(reason.into()),
        }
    }

    /// Declared keys that are absent, null, or blank in `captured_data`.
    pub fn missing_fields(&self, keys: &[String]) -> Vec<String> {
        keys.iter()
            .filter(|k| self.captured_data.get(*k).is_none_or(CapturedValue::is_empty))
            .cloned()
            .collect()
    }
}

/// A call result plus the call handle it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryEntry {
    #[serde(flatten)]
    pub result: CallResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vapi_call_id: Option<String>,
}

// ── Notifications ───────────────────────────────────────────────────

/// Org-visible event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CallCompleted,
    CallFailed,
    DataMissing,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CallCompleted => write!(f, "call_completed"),
            Self::CallFailed => write!(f, "call_failed"),
            Self::DataMissing => write!(f, "data_missing"),
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call_completed" => Ok(Self::CallCompleted),
            "call_failed" => Ok(Self::CallFailed),
            "data_missing" => Ok(Self::DataMissing),
            _ => Err(format!("Unknown notification kind: {}", s)),
        }
    }
}

/// One org-visible event. Append-only; `read` is flipped elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub org_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        org_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            read: false,
            metadata,
            created_at: Utc::now(),
        }
    }
}
