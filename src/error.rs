//! Error types for Intellidial.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Voice platform error: {0}")]
    Voice(#[from] VoiceError),

    #[error("Enrichment error: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("Agent configuration error: {0}")]
    AgentConfig(#[from] AgentConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Webhook signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Inbound error: {0}")]
    Inbound(#[from] InboundError),

    #[error("Call sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Call launch error: {0}")]
    Launch(#[from] LaunchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the voice-calling platform.
///
/// `Api` carries a message already translated from the provider body; the raw
/// body is logged at the call site and never stored here.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("Voice platform request failed: {0}")]
    RequestFailed(String),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Invalid response from voice platform: {0}")]
    InvalidResponse(String),
}

/// Context enrichment errors (page fetch + generative extraction).
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("Extraction service is not configured")]
    NotConfigured,

    #[error("Could not load page: {0}")]
    Fetch(String),

    #[error("Context extraction failed: {0}")]
    Extract(String),
}

/// Agent configuration provisioning errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentConfigError {
    /// Single user-facing failure for any provisioning or persistence step.
    #[error("Failed to create agent. Try again.")]
    ProvisionFailed,
}

/// Intake pipeline failures. Display strings are short and safe to surface.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Project not found")]
    ProjectNotFound,

    #[error("Failed to create contact")]
    ContactCreate,

    #[error("Context extraction service is not configured")]
    EnrichmentNotConfigured,

    #[error("Could not load listing context")]
    Context,

    #[error("Failed to save listing context")]
    ContextPersist,

    #[error("Caller number not configured")]
    CallerNumberMissing,

    #[error(transparent)]
    AgentConfig(#[from] AgentConfigError),

    #[error("Call dispatch failed")]
    Dispatch,
}

/// Failures placing calls to existing contacts. Display strings are short and
/// safe to surface.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Project not found")]
    ProjectNotFound,

    #[error("No contacts to call")]
    NoContacts,

    #[error("Caller number not configured")]
    CallerNumberMissing,

    #[error(transparent)]
    AgentConfig(#[from] AgentConfigError),

    #[error("Failed to create any calls. Check phone numbers and voice configuration.")]
    NoCallPlaced,

    #[error("Storage failure")]
    Database(#[from] DatabaseError),
}

/// Signed-webhook verification failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing webhook signature headers")]
    MissingHeaders,

    #[error("Invalid webhook timestamp")]
    InvalidTimestamp,

    #[error("Webhook timestamp outside tolerance")]
    Expired,

    #[error("Invalid webhook secret")]
    InvalidSecret,

    #[error("Invalid webhook signature")]
    Mismatch,

    #[error("Unsigned webhooks are not accepted")]
    Unsigned,
}

/// Inbound enquiry event errors.
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("Email source is not configured")]
    NotConfigured,

    #[error("Email fetch failed: {0}")]
    Fetch(String),
}

/// Outbound email errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Email send failed: {0}")]
    Send(String),
}

/// Call status backfill errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
