//! Outbound call dispatcher.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::VoiceError;
use crate::phone::PhoneNormalizer;
use crate::store::Store;
use crate::voice::client::{AssistantOverrides, CallCustomer, CallRequest, VoicePlatform};

/// Platform limit on the customer display name.
const CUSTOMER_NAME_LIMIT: usize = 40;

/// Places outbound calls with normalized customer numbers.
pub struct Dispatcher {
    platform: Arc<dyn VoicePlatform>,
    normalizer: PhoneNormalizer,
}

impl Dispatcher {
    pub fn new(platform: Arc<dyn VoicePlatform>, normalizer: PhoneNormalizer) -> Self {
        Self {
            platform,
            normalizer,
        }
    }

    pub fn normalizer(&self) -> &PhoneNormalizer {
        &self.normalizer
    }

    /// Place a call from `caller_number_id` to `raw_phone` using the agent
    /// `assistant_id`. Returns the call handle.
    ///
    /// Suspicious numbers are logged and dialled anyway.
    pub async fn dispatch(
        &self,
        assistant_id: &str,
        caller_number_id: &str,
        raw_phone: &str,
        name: Option<&str>,
    ) -> Result<String, VoiceError> {
        let number = self.normalizer.normalize_checked(raw_phone);
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| n.chars().take(CUSTOMER_NAME_LIMIT).collect::<String>());

        // Resolved by the platform into the prompt's call-context line.
        let mut variables = BTreeMap::new();
        variables.insert("customerNumber".to_string(), number.clone());
        if let Some(name) = &name {
            variables.insert("customerName".to_string(), name.clone());
        }

        let request = CallRequest {
            assistant_id: assistant_id.to_string(),
            phone_number_id: caller_number_id.to_string(),
            customer: CallCustomer {
                number: Some(number.clone()),
                name,
            },
            assistant_overrides: Some(AssistantOverrides {
                variable_values: variables,
            }),
        };

        let call_id = self.platform.create_call(&request).await?;
        info!(%call_id, assistant_id, customer = %number, "Call placed");
        Ok(call_id)
    }
}

/// The organization's caller number, else `fallback`. Blank ids count as unset.
pub async fn resolve_caller_number(
    store: &dyn Store,
    org_id: &str,
    fallback: Option<&str>,
) -> Option<String> {
    let from_org = match store.get_organization(org_id).await {
        Ok(org) => org.and_then(|o| o.caller_number_id),
        Err(e) => {
            warn!(org_id, error = %e, "Organization lookup failed");
            None
        }
    };
    from_org
        .as_deref()
        .and_then(non_blank)
        .or_else(|| fallback.and_then(non_blank))
        .map(str::to_string)
}

fn non_blank(id: &str) -> Option<&str> {
    Some(id.trim()).filter(|id| !id.is_empty())
}
