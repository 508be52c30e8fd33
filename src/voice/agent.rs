//! Agent configuration manager: keeps a project's voice agent in step with
//! the project's prompt and capture fields.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::campaign::model::Project;
use crate::config::AgentSettings;
use crate::error::AgentConfigError;
use crate::store::Store;
use crate::voice::client::{
    ArtifactPlan, AssistantConfig, ChatMessage, ModelConfig, ServerConfig,
    StructuredOutputRequest, TranscriberConfig, VoiceConfig, VoicePlatform,
};
use crate::voice::prompt::{build_prompt, enrich_business_context};
use crate::voice::schema::build_schema;

/// Platform limit on agent and schema names.
const NAME_LIMIT: usize = 40;

const STRUCTURED_OUTPUT_DESCRIPTION: &str = "Extract the answers to the project's questions from the call.";

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

/// Build the platform payload for `project`.
///
/// `project` should already carry any dealer enrichment; see
/// [`AgentConfigManager::ensure`].
pub fn build_assistant_config(project: &Project, settings: &AgentSettings) -> AssistantConfig {
    let name = match project.name.trim() {
        "" => "Agent",
        n => n,
    };

    let structured_output_ids: Vec<String> = project
        .structured_output_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| vec![id.to_string()])
        .unwrap_or_default();

    let server = settings
        .callback_url
        .as_ref()
        .map(|url| ServerConfig { url: url.clone() });

    let artifact_plan = if server.is_some() || !structured_output_ids.is_empty() {
        Some(ArtifactPlan {
            recording_enabled: server.is_some().then_some(true),
            structured_output_ids,
        })
    } else {
        None
    };

    AssistantConfig {
        name: truncate_chars(name, NAME_LIMIT),
        model: ModelConfig {
            provider: "openai".into(),
            model: settings.model.clone(),
            messages: vec![ChatMessage {
                role: "system".into(),
                content: build_prompt(project),
            }],
        },
        voice: VoiceConfig {
            provider: settings.voice_provider.clone(),
            voice_id: settings.voice_id.clone(),
        },
        first_message: settings.first_message.clone(),
        transcriber: TranscriberConfig {
            provider: "deepgram".into(),
            model: "nova-2".into(),
            language: "en".into(),
        },
        max_duration_seconds: settings.max_duration.as_secs(),
        silence_timeout_seconds: settings.silence_timeout.as_secs(),
        server_messages: if server.is_some() {
            vec!["end-of-call-report".to_string()]
        } else {
            Vec::new()
        },
        server,
        artifact_plan,
    }
}

/// Creates or updates the external voice agent (and capture schema) for a project.
pub struct AgentConfigManager {
    platform: Arc<dyn VoicePlatform>,
    store: Arc<dyn Store>,
    settings: AgentSettings,
}

impl AgentConfigManager {
    pub fn new(platform: Arc<dyn VoicePlatform>, store: Arc<dyn Store>, settings: AgentSettings) -> Self {
        Self {
            platform,
            store,
            settings,
        }
    }

    /// Make the platform's agent reflect the current project; returns its handle.
    ///
    /// Existing handles are always patched, never skipped. New handles are
    /// persisted onto the project. Any failure maps to
    /// [`AgentConfigError::ProvisionFailed`]; details are logged.
    pub async fn ensure(&self, project: &Project) -> Result<String, AgentConfigError> {
        let mut project = project.clone();
        self.apply_dealer_context(&mut project).await;

        if let Some(id) = self.ensure_structured_output(&project).await? {
            project.structured_output_id = Some(id);
        }

        let config = build_assistant_config(&project, &self.settings);

        match project.assistant_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            Some(assistant_id) => {
                self.platform
                    .update_assistant(assistant_id, &config)
                    .await
                    .map_err(|e| {
                        error!(project_id = %project.id, assistant_id, error = %e, "Failed to update assistant");
                        AgentConfigError::ProvisionFailed
                    })?;
                info!(project_id = %project.id, assistant_id, "Assistant updated");
                Ok(assistant_id.to_string())
            }
            None => {
                let assistant_id = self.platform.create_assistant(&config).await.map_err(|e| {
                    error!(project_id = %project.id, error = %e, "Failed to create assistant");
                    AgentConfigError::ProvisionFailed
                })?;
                self.store
                    .set_project_assistant_id(&project.id, &assistant_id)
                    .await
                    .map_err(|e| {
                        error!(project_id = %project.id, %assistant_id, error = %e, "Failed to persist assistant id");
                        AgentConfigError::ProvisionFailed
                    })?;
                info!(project_id = %project.id, %assistant_id, "Assistant created");
                Ok(assistant_id)
            }
        }
    }

    /// Sync the capture schema. `None` when the project declares no capture fields.
    async fn ensure_structured_output(
        &self,
        project: &Project,
    ) -> Result<Option<String>, AgentConfigError> {
        if project.capture_keys().is_empty() {
            return Ok(None);
        }
        let schema = build_schema(&project.capture_fields);

        if let Some(id) = project
            .structured_output_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            self.platform
                .update_structured_output(id, &schema)
                .await
                .map_err(|e| {
                    error!(project_id = %project.id, structured_output_id = id, error = %e, "Failed to update capture schema");
                    AgentConfigError::ProvisionFailed
                })?;
            return Ok(Some(id.to_string()));
        }

        let label = match project.name.trim() {
            "" => project.id.as_str(),
            n => n,
        };
        let request = StructuredOutputRequest {
            name: truncate_chars(&format!("Intellidial {}", truncate_chars(label, 25)), NAME_LIMIT),
            kind: "ai".into(),
            schema,
            description: Some(STRUCTURED_OUTPUT_DESCRIPTION.into()),
        };
        let id = self
            .platform
            .create_structured_output(&request)
            .await
            .map_err(|e| {
                error!(project_id = %project.id, error = %e, "Failed to create capture schema");
                AgentConfigError::ProvisionFailed
            })?;
        self.store
            .set_project_structured_output_id(&project.id, &id)
            .await
            .map_err(|e| {
                error!(project_id = %project.id, structured_output_id = %id, error = %e, "Failed to persist capture schema id");
                AgentConfigError::ProvisionFailed
            })?;
        info!(project_id = %project.id, structured_output_id = %id, "Capture schema created");
        Ok(Some(id))
    }

    /// Fold the project's dealer contact details into its business context.
    async fn apply_dealer_context(&self, project: &mut Project) {
        let Some(dealer_id) = project.dealer_id.clone() else {
            return;
        };
        match self.store.get_dealer(&dealer_id).await {
            Ok(Some(dealer)) => {
                project.business_context = Some(enrich_business_context(
                    project.business_context.as_deref(),
                    &dealer,
                ));
            }
            Ok(None) => warn!(project_id = %project.id, %dealer_id, "Project dealer not found"),
            Err(e) => warn!(project_id = %project.id, %dealer_id, error = %e, "Dealer lookup failed"),
        }
    }
}
