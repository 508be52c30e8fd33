//! Intake pipeline: one parsed enquiry in, one outbound call (or a structured
//! failure) out.
//!
//! Steps run strictly in order and every step is timed. A failing step ends
//! the run with a [`PipelineError`]; nothing is retried here. Re-delivery is
//! the event source's job.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::campaign::model::Project;
use crate::enrichment::{ContentFetcher, ContextExtractor};
use crate::error::PipelineError;
use crate::intake::parser::Enquiry;
use crate::intake::timing::{Step, StepTimings};
use crate::store::Store;
use crate::voice::{AgentConfigManager, Dispatcher, resolve_caller_number};

/// A call the pipeline placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCall {
    pub call_id: String,
    pub contact_id: String,
}

/// Result of one run plus the per-step timings.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub result: Result<PlacedCall, PipelineError>,
    pub timings: StepTimings,
}

/// Runs the intake pipeline. The inbound handler depends on this rather than
/// on [`Pipeline`] directly.
#[async_trait]
pub trait IntakeRunner: Send + Sync {
    async fn run(&self, project_id: &str, enquiry: &Enquiry) -> PipelineOutcome;
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn ContentFetcher>,
    extractor: Option<Arc<dyn ContextExtractor>>,
    agents: Arc<AgentConfigManager>,
    dispatcher: Arc<Dispatcher>,
    /// Caller number used when the organization has none.
    fallback_caller_id: Option<String>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn ContentFetcher>,
        extractor: Option<Arc<dyn ContextExtractor>>,
        agents: Arc<AgentConfigManager>,
        dispatcher: Arc<Dispatcher>,
        fallback_caller_id: Option<String>,
    ) -> Self {
        Self {
            store,
            fetcher,
            extractor,
            agents,
            dispatcher,
            fallback_caller_id,
        }
    }

    async fn execute(
        &self,
        project_id: &str,
        enquiry: &Enquiry,
        timings: &mut StepTimings,
    ) -> Result<PlacedCall, PipelineError> {
        // Project
        let mut project = timings
            .time(Step::LoadProject, self.store.get_project(project_id))
            .await
            .map_err(|e| {
                error!(project_id, error = %e, "Project lookup failed");
                PipelineError::ProjectNotFound
            })?
            .ok_or(PipelineError::ProjectNotFound)?;

        // Contact, deduplicated on the normalized number
        let phone_key = self.dispatcher.normalizer().normalize(&enquiry.phone);
        let insert = timings
            .time(
                Step::CreateContact,
                self.store.create_contact(
                    project_id,
                    enquiry.phone.trim(),
                    &phone_key,
                    Some(enquiry.name.as_str()),
                ),
            )
            .await
            .map_err(|e| {
                error!(project_id, error = %e, "Contact create failed");
                PipelineError::ContactCreate
            })?;
        let contact_id = insert.contact.id;
        if !insert.created {
            info!(project_id, %contact_id, "Reusing existing contact for this number");
        }

        // Enrichment
        let extractor = timings
            .time(Step::CheckEnrichment, async { self.extractor.clone() })
            .await
            .ok_or(PipelineError::EnrichmentNotConfigured)?;

        let url = enquiry.reference_link.as_str();
        let page = timings
            .time(Step::FetchContent, self.fetcher.fetch(url))
            .await;

        let context = timings
            .time(Step::ExtractContext, async {
                match &page {
                    Ok(html) => extractor.extract_from_html(url, html).await,
                    Err(fetch_err) => {
                        warn!(url, error = %fetch_err, "Page fetch failed, extracting from URL");
                        extractor.extract_from_url(url).await
                    }
                }
            })
            .await
            .map_err(|e| {
                error!(project_id, url, error = %e, "Context extraction failed");
                PipelineError::Context
            })?;

        let refreshed_at = Utc::now();
        timings
            .time(
                Step::PersistContext,
                self.store.update_project_context(project_id, &context, refreshed_at),
            )
            .await
            .map_err(|e| {
                error!(project_id, error = %e, "Context persist failed");
                PipelineError::ContextPersist
            })?;
        project.full_context_text = Some(context);
        project.context_refreshed_at = Some(refreshed_at);

        // Caller number
        let caller_number_id = timings
            .time(Step::ResolveCaller, self.resolve_caller(&project))
            .await
            .ok_or(PipelineError::CallerNumberMissing)?;

        // Agent
        let assistant_id = timings
            .time(Step::ProvisionAgent, self.agents.ensure(&project))
            .await?;

        // Call
        let call_id = timings
            .time(
                Step::Dispatch,
                self.dispatcher.dispatch(
                    &assistant_id,
                    &caller_number_id,
                    &enquiry.phone,
                    Some(enquiry.name.as_str()),
                ),
            )
            .await
            .map_err(|e| {
                error!(project_id, %contact_id, error = %e, "Call dispatch failed");
                PipelineError::Dispatch
            })?;

        // The call is live; a failed status write only delays sync.
        if let Err(e) = timings
            .time(
                Step::MarkCalling,
                self.store.mark_contact_calling(&contact_id, &call_id),
            )
            .await
        {
            warn!(%contact_id, %call_id, error = %e, "Failed to mark contact as calling");
        }

        Ok(PlacedCall {
            call_id,
            contact_id,
        })
    }

    async fn resolve_caller(&self, project: &Project) -> Option<String> {
        resolve_caller_number(
            self.store.as_ref(),
            &project.org_id,
            self.fallback_caller_id.as_deref(),
        )
        .await
    }
}

#[async_trait]
impl IntakeRunner for Pipeline {
    async fn run(&self, project_id: &str, enquiry: &Enquiry) -> PipelineOutcome {
        let mut timings = StepTimings::start();
        debug!(project_id, "Intake pipeline started");
        let result = self.execute(project_id, enquiry, &mut timings).await;

        let total_ms = timings.total().as_millis() as u64;
        match &result {
            Ok(placed) => info!(
                project_id,
                contact_id = %placed.contact_id,
                call_id = %placed.call_id,
                total_ms,
                timings = %timings,
                "Intake pipeline completed"
            ),
            Err(e) => error!(
                project_id,
                error = %e,
                total_ms,
                timings = %timings,
                "Intake pipeline failed"
            ),
        }

        PipelineOutcome { result, timings }
    }
}
