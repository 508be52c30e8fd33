//! Calls to contacts that already exist in a project.
//!
//! Same agent provisioning and dispatch as the intake pipeline, without the
//! enquiry parsing and enrichment in front of it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::campaign::model::{CallResult, Contact, ContactStatus};
use crate::error::LaunchError;
use crate::store::Store;
use crate::voice::agent::AgentConfigManager;
use crate::voice::dispatch::{Dispatcher, resolve_caller_number};

/// Failure reason stored on a contact whose call could not be placed.
const DISPATCH_FAILED: &str = "Call dispatch failed";

/// Calls placed by one launch, plus the contacts that could not be dialled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    pub call_ids: Vec<String>,
    pub failed_contact_ids: Vec<String>,
}

pub struct CallLauncher {
    store: Arc<dyn Store>,
    agents: Arc<AgentConfigManager>,
    dispatcher: Arc<Dispatcher>,
    fallback_caller_id: Option<String>,
}

impl CallLauncher {
    pub fn new(
        store: Arc<dyn Store>,
        agents: Arc<AgentConfigManager>,
        dispatcher: Arc<Dispatcher>,
        fallback_caller_id: Option<String>,
    ) -> Self {
        Self {
            store,
            agents,
            dispatcher,
            fallback_caller_id,
        }
    }

    /// Call each listed contact of `project_id` in order.
    ///
    /// Unknown ids, contacts of other projects, and contacts with a call in
    /// flight are skipped. One failed dispatch does not stop the rest; the
    /// launch fails only when no call was placed.
    pub async fn call_contacts(
        &self,
        project_id: &str,
        contact_ids: &[String],
    ) -> Result<LaunchReport, LaunchError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or(LaunchError::ProjectNotFound)?;

        let contacts = self.callable_contacts(project_id, contact_ids).await?;
        if contacts.is_empty() {
            return Err(LaunchError::NoContacts);
        }

        let caller_number_id = resolve_caller_number(
            self.store.as_ref(),
            &project.org_id,
            self.fallback_caller_id.as_deref(),
        )
        .await
        .ok_or(LaunchError::CallerNumberMissing)?;

        let assistant_id = self.agents.ensure(&project).await?;

        let mut report = LaunchReport::default();
        for contact in &contacts {
            match self
                .dispatcher
                .dispatch(
                    &assistant_id,
                    &caller_number_id,
                    &contact.phone,
                    contact.name.as_deref(),
                )
                .await
            {
                Ok(call_id) => {
                    if let Err(e) = self.store.mark_contact_calling(&contact.id, &call_id).await {
                        warn!(contact_id = %contact.id, %call_id, error = %e, "Failed to mark contact as calling");
                    }
                    report.call_ids.push(call_id);
                }
                Err(e) => {
                    error!(contact_id = %contact.id, error = %e, "Call dispatch failed");
                    let result = CallResult::failure(Utc::now(), DISPATCH_FAILED);
                    if let Err(e) = self.store.record_dispatch_failure(&contact.id, &result).await {
                        warn!(contact_id = %contact.id, error = %e, "Failed to record dispatch failure");
                    }
                    report.failed_contact_ids.push(contact.id.clone());
                }
            }
        }

        info!(
            project_id,
            placed = report.call_ids.len(),
            failed = report.failed_contact_ids.len(),
            "Contact calls launched"
        );
        if report.call_ids.is_empty() {
            return Err(LaunchError::NoCallPlaced);
        }
        Ok(report)
    }

    async fn callable_contacts(
        &self,
        project_id: &str,
        contact_ids: &[String],
    ) -> Result<Vec<Contact>, LaunchError> {
        let mut contacts: Vec<Contact> = Vec::new();
        for id in contact_ids {
            if contacts.iter().any(|c| &c.id == id) {
                continue;
            }
            match self.store.get_contact(id).await? {
                Some(c) if c.project_id == project_id && c.status != ContactStatus::Calling => {
                    contacts.push(c)
                }
                Some(c) if c.status == ContactStatus::Calling => {
                    info!(contact_id = %id, "Skipping contact with a call in flight");
                }
                _ => warn!(project_id, contact_id = %id, "Skipping unknown contact"),
            }
        }
        Ok(contacts)
    }
}
