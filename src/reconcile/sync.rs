//! Call status backfill for contacts stuck in `calling`.
//!
//! Used when end-of-call reports never arrived. Each in-flight call is looked
//! up on the platform; ended calls go through the reconciler, calls that can
//! no longer finish are marked failed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::campaign::model::{CallResult, Contact, ContactStatus, Project};
use crate::error::SyncError;
use crate::reconcile::payload::CallReport;
use crate::reconcile::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::Store;
use crate::voice::client::{CallRecord, VoicePlatform};

const QUEUED_TIMEOUT: Duration = Duration::seconds(15);
const NEVER_CONNECTED: Duration = Duration::minutes(10);
const STALE_CALL: Duration = Duration::hours(2);

const NO_CALL_ID: &str = "Result unavailable: the call may have completed, but no call ID was saved.";
const PURGED: &str =
    "Result unavailable: the call may have completed, but the provider no longer has it.";
const DID_NOT_CONNECT: &str =
    "Call did not connect (no answer or provider issue). Check the phone number format.";
const TOO_OLD: &str =
    "Result unavailable: the call may have completed, but it was too old to sync.";

pub struct CallSync {
    store: Arc<dyn Store>,
    platform: Arc<dyn VoicePlatform>,
    reconciler: Arc<Reconciler>,
}

impl CallSync {
    pub fn new(
        store: Arc<dyn Store>,
        platform: Arc<dyn VoicePlatform>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            store,
            platform,
            reconciler,
        }
    }

    /// Resolve every `calling` contact of a project. Returns how many changed.
    pub async fn sync_project(&self, project_id: &str) -> Result<usize, SyncError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| SyncError::ProjectNotFound(project_id.to_string()))?;

        let calling = self
            .store
            .list_contacts_by_status(&project.id, ContactStatus::Calling)
            .await?;

        let mut synced = 0;
        for contact in &calling {
            match self.sync_contact(&project, contact).await {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(contact_id = %contact.id, error = %e, "Contact sync failed");
                }
            }
        }

        info!(project_id, checked = calling.len(), synced, "Call sync finished");
        Ok(synced)
    }

    async fn sync_contact(&self, project: &Project, contact: &Contact) -> Result<bool, SyncError> {
        let Some(call_id) = contact
            .vapi_call_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            return self.fail(contact, contact.updated_at, NO_CALL_ID.to_string()).await;
        };

        let call = match self.platform.get_call(call_id).await {
            Ok(Some(call)) => call,
            Ok(None) => return self.fail(contact, Utc::now(), PURGED.to_string()).await,
            Err(e) => {
                warn!(call_id, contact_id = %contact.id, error = %e, "Call lookup failed");
                return Ok(false);
            }
        };

        if call.is_ended() {
            let report = CallReport::from_call(call);
            let outcome = self
                .reconciler
                .apply_to_contact(project, contact, call_id, &report)
                .await?;
            return Ok(matches!(outcome, ReconcileOutcome::Applied { .. }));
        }

        match unfinished_failure(&call, contact.updated_at, Utc::now()) {
            Some((attempted_at, reason)) => {
                info!(call_id, contact_id = %contact.id, %reason, "Giving up on unfinished call");
                self.fail(contact, attempted_at, reason).await
            }
            None => Ok(false),
        }
    }

    /// Give up on the call seen in `contact`. A result that landed since the
    /// contact was listed is left in place.
    async fn fail(
        &self,
        contact: &Contact,
        attempted_at: DateTime<Utc>,
        reason: String,
    ) -> Result<bool, SyncError> {
        let result = CallResult::failure(attempted_at, reason);
        let written = self
            .store
            .mark_contact_failed(&contact.id, contact.vapi_call_id.as_deref(), &result)
            .await?;
        if !written {
            info!(contact_id = %contact.id, "Contact settled before sync could fail it");
        }
        Ok(written)
    }
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Failure to record for a call that has not ended, or `None` while it may
/// still finish.
fn unfinished_failure(
    call: &CallRecord,
    contact_updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, String)> {
    let started = parse_time(call.started_at.as_deref());
    let created = parse_time(call.created_at.as_deref());

    if call.status.as_deref() == Some("queued") {
        let queued_for = now - created.unwrap_or(contact_updated_at);
        if queued_for > QUEUED_TIMEOUT {
            let reason = format!(
                "Call never started: still queued after {}s. Check the caller number and provider balance.",
                queued_for.num_seconds()
            );
            return Some((contact_updated_at, reason));
        }
        return None;
    }

    if let Some(started) = started.filter(|s| now - *s > NEVER_CONNECTED) {
        return Some((started, DID_NOT_CONNECT.to_string()));
    }

    let reference = started.or(created).unwrap_or(contact_updated_at);
    (now - reference > STALE_CALL).then(|| (now, TOO_OLD.to_string()))
}
