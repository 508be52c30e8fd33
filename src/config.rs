//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub vapi: VapiConfig,
    pub gemini: Option<GeminiConfig>,
    pub inbound: InboundConfig,
    pub phone: PhoneConfig,
    pub webhooks: WebhookConfig,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// Only `VAPI_API_KEY` is required; every other section has defaults or is
    /// optional (missing Gemini/Resend keys disable those collaborators).
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            vapi: VapiConfig::from_env()?,
            gemini: GeminiConfig::from_env(),
            inbound: InboundConfig::from_env(),
            phone: PhoneConfig::from_env()?,
            webhooks: WebhookConfig::from_env(),
        })
    }
}

/// HTTP server + database location.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_env("INTELLIDIAL_PORT", 8080)?,
            db_path: env_opt("INTELLIDIAL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/intellidial.db")),
        })
    }
}

/// Voice-calling platform settings.
#[derive(Debug, Clone)]
pub struct VapiConfig {
    pub api_key: SecretString,
    pub base_url: String,
    /// Fallback caller-number handle when the organization has none.
    pub phone_number_id: Option<String>,
    /// Public base URL the platform posts end-of-call reports to.
    pub webhook_base_url: Option<String>,
    /// Shared secret for signed end-of-call webhooks.
    pub webhook_secret: Option<SecretString>,
    pub agent: AgentSettings,
}

impl VapiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env_opt("VAPI_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("VAPI_API_KEY".into()))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url: env_opt("VAPI_BASE_URL").unwrap_or_else(|| "https://api.vapi.ai".into()),
            phone_number_id: env_opt("VAPI_PHONE_NUMBER_ID"),
            webhook_base_url: env_opt("VAPI_WEBHOOK_BASE_URL"),
            webhook_secret: env_opt("VAPI_WEBHOOK_SECRET").map(SecretString::from),
            agent: AgentSettings::from_env()?,
        })
    }
}

/// Knobs baked into every provisioned voice agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub voice_provider: String,
    pub voice_id: String,
    pub first_message: String,
    pub max_duration: Duration,
    pub silence_timeout: Duration,
    /// Result callback URL, derived from `VAPI_WEBHOOK_BASE_URL`.
    pub callback_url: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            voice_provider: "11labs".to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            first_message: "Hi, good day!".to_string(),
            max_duration: Duration::from_secs(180),
            silence_timeout: Duration::from_secs(30),
            callback_url: None,
        }
    }
}

impl AgentSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let callback_url = env_opt("VAPI_WEBHOOK_BASE_URL")
            .map(|base| format!("{}/api/webhooks/vapi/call-ended", base.trim_end_matches('/')));

        Ok(Self {
            model: env_opt("VAPI_MODEL").unwrap_or(defaults.model),
            voice_provider: env_opt("VAPI_VOICE_PROVIDER").unwrap_or(defaults.voice_provider),
            voice_id: env_opt("VAPI_VOICE_ID").unwrap_or(defaults.voice_id),
            first_message: env_opt("VAPI_FIRST_MESSAGE").unwrap_or(defaults.first_message),
            max_duration: Duration::from_secs(parse_env("VAPI_MAX_DURATION_SECS", 180)?),
            silence_timeout: Duration::from_secs(parse_env("VAPI_SILENCE_TIMEOUT_SECS", 30)?),
            callback_url,
        })
    }
}

/// Generative extraction service. `None` when `GEMINI_API_KEY` is unset.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
}

impl GeminiConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = env_opt("GEMINI_API_KEY")?;
        Some(Self {
            api_key: SecretString::from(api_key),
            model: env_opt("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".into()),
            base_url: env_opt("GEMINI_BASE_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
        })
    }
}

/// Inbound enquiry email settings.
#[derive(Debug, Clone)]
pub struct InboundConfig {
    pub resend_api_key: Option<SecretString>,
    pub resend_base_url: String,
    pub webhook_secret: Option<SecretString>,
    /// Sender address for call-summary emails.
    pub from_email: String,
    /// Case-insensitive keyword the subject must contain.
    pub subject_keyword: String,
    /// Project used when no dealer inbox matches the to-addresses.
    pub default_project_id: Option<String>,
}

impl InboundConfig {
    pub fn from_env() -> Self {
        Self {
            resend_api_key: env_opt("RESEND_API_KEY").map(SecretString::from),
            resend_base_url: env_opt("RESEND_BASE_URL")
                .unwrap_or_else(|| "https://api.resend.com".into()),
            webhook_secret: env_opt("RESEND_WEBHOOK_SECRET").map(SecretString::from),
            from_email: env_opt("RESEND_FROM_EMAIL")
                .unwrap_or_else(|| "Intellidial <onboarding@resend.dev>".into()),
            subject_keyword: env_opt("INBOUND_SUBJECT_KEYWORD")
                .unwrap_or_else(|| "autotrader".into()),
            default_project_id: env_opt("INBOUND_DEFAULT_PROJECT_ID"),
        }
    }
}

/// Phone normalization settings.
#[derive(Debug, Clone)]
pub struct PhoneConfig {
    /// E.164 country prefix including the `+`, e.g. `+27`.
    pub country_prefix: String,
    pub national_min_digits: usize,
    pub national_max_digits: usize,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            country_prefix: "+27".to_string(),
            national_min_digits: 8,
            national_max_digits: 9,
        }
    }
}

impl PhoneConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let country_prefix = env_opt("PHONE_COUNTRY_PREFIX").unwrap_or_else(|| "+27".into());
        let digits = country_prefix.trim_start_matches('+');
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidValue {
                key: "PHONE_COUNTRY_PREFIX".into(),
                message: format!("expected '+' followed by digits, got '{country_prefix}'"),
            });
        }

        Ok(Self {
            country_prefix: format!("+{digits}"),
            national_min_digits: parse_env("PHONE_NATIONAL_MIN_DIGITS", 8)?,
            national_max_digits: parse_env("PHONE_NATIONAL_MAX_DIGITS", 9)?,
        })
    }
}

/// Webhook trust policy.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    /// Accept unsigned payloads when no secret is configured (development only).
    pub allow_unsigned: bool,
}

impl WebhookConfig {
    pub fn from_env() -> Self {
        let allow_unsigned = env_opt("INTELLIDIAL_ALLOW_UNSIGNED_WEBHOOKS")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self { allow_unsigned }
    }
}

/// Read a trimmed, non-empty environment variable.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_settings_defaults() {
        let settings = AgentSettings::default();
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.max_duration, Duration::from_secs(180));
        assert_eq!(settings.silence_timeout, Duration::from_secs(30));
        assert!(settings.callback_url.is_none());
    }

    #[test]
    fn phone_config_defaults() {
        let phone = PhoneConfig::default();
        assert_eq!(phone.country_prefix, "+27");
        assert_eq!(phone.national_min_digits, 8);
        assert_eq!(phone.national_max_digits, 9);
    }

    #[test]
    fn webhook_config_defaults_to_signed_only() {
        assert!(!WebhookConfig::default().allow_unsigned);
    }
}
