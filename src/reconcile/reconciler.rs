//! Call-completion reconciler.
//!
//! Applies end-of-call reports to contacts exactly once per call handle, then
//! records usage, emits one notification, and mails a summary of successful
//! calls. The status write is the only step that must succeed; the side
//! effects after it are best-effort and independent of each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::campaign::model::{
    CallResult, CapturedValue, Contact, ContactStatus, Notification, NotificationKind, Project,
};
use crate::enrichment::BookingJudge;
use crate::error::DatabaseError;
use crate::phone::PhoneNormalizer;
use crate::reconcile::booking::{INFERRED_BOOKING_KEY, is_call_booking};
use crate::reconcile::payload::{CallReport, map_structured_outputs};
use crate::reconcile::summary::{SummaryMailer, summary_recipient};
use crate::store::Store;
use crate::voice::client::CallRecord;

/// Ended reasons that mean the call never properly happened.
pub const FAILED_END_REASONS: &[&str] = &[
    "no-answer",
    "busy",
    "failed",
    "error",
    "canceled",
    "rejected",
    "timeout",
    "no-answer-timeout",
    "customer-did-not-answer",
    "customer-busy",
];

pub fn is_failed_reason(reason: Option<&str>) -> bool {
    reason.is_some_and(|r| {
        let r = r.trim().to_ascii_lowercase();
        FAILED_END_REASONS.contains(&r.as_str())
    })
}

/// Why a report was acknowledged without any write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotEndOfCall,
    MissingCall,
    UnknownProject,
    MissingNumber,
    UnknownContact,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Ignored(IgnoreReason),
    /// This call handle was already applied to the contact.
    AlreadyProcessed,
    Applied {
        contact_id: String,
        status: ContactStatus,
        notification: NotificationKind,
    },
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    normalizer: PhoneNormalizer,
    judge: Option<Arc<dyn BookingJudge>>,
    mailer: Option<SummaryMailer>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, normalizer: PhoneNormalizer) -> Self {
        Self {
            store,
            normalizer,
            judge: None,
            mailer: None,
        }
    }

    /// Read transcripts for bookings the structured capture missed.
    pub fn with_booking_judge(mut self, judge: Arc<dyn BookingJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Mail a summary of every successful call to the project's recipient.
    pub fn with_summary_mailer(mut self, mailer: SummaryMailer) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Handle one end-of-call report.
    ///
    /// `Err` only when the contact's status write fails.
    pub async fn on_call_ended(&self, report: &CallReport) -> Result<ReconcileOutcome, DatabaseError> {
        if !report.is_end_of_call() {
            debug!(kind = ?report.kind, "Ignoring non end-of-call message");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::NotEndOfCall));
        }

        let Some(call) = report.call.as_ref() else {
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::MissingCall));
        };
        let (Some(call_id), Some(assistant_id)) = (non_blank(&call.id), non_blank(&call.assistant_id))
        else {
            warn!("End-of-call report without call or assistant id");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::MissingCall));
        };

        let Some(project) = self.store.find_project_by_assistant_id(assistant_id).await? else {
            warn!(call_id, assistant_id, "No project for assistant");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::UnknownProject));
        };

        let Some(number) = call.customer.as_ref().and_then(|c| non_blank(&c.number)) else {
            warn!(call_id, project_id = %project.id, "End-of-call report without customer number");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::MissingNumber));
        };
        let phone_key = self.normalizer.normalize(number);

        let Some(contact) = self
            .store
            .find_contact_by_phone_key(&project.id, &phone_key)
            .await?
        else {
            warn!(call_id, project_id = %project.id, phone = %phone_key, "No contact for number");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::UnknownContact));
        };

        self.apply_to_contact(&project, &contact, call_id, report).await
    }

    /// Apply a report for `call_id` to a resolved contact.
    pub async fn apply_to_contact(
        &self,
        project: &Project,
        contact: &Contact,
        call_id: &str,
        report: &CallReport,
    ) -> Result<ReconcileOutcome, DatabaseError> {
        if contact.has_applied(call_id) {
            info!(call_id, contact_id = %contact.id, "Call already processed");
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let keys = project.capture_keys();
        let mut result = build_result(report, &keys);
        let failed = result.failure_reason.is_some();
        if !failed {
            self.infer_booking(call_id, &mut result).await;
        }
        let status = if failed {
            ContactStatus::Failed
        } else {
            ContactStatus::Success
        };

        let applied = self
            .store
            .apply_call_result(&contact.id, call_id, status, &result)
            .await
            .inspect_err(|e| {
                error!(call_id, contact_id = %contact.id, error = %e, "Failed to apply call result");
            })?;
        if !applied {
            info!(call_id, contact_id = %contact.id, "Call applied concurrently");
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let notification = build_notification(project, contact, call_id, &result, &keys);
        let kind = notification.kind;
        tokio::join!(
            self.record_usage(project, call_id, result.duration_seconds),
            self.emit(notification, call_id),
            self.send_summary(project, contact, call_id, &result),
        );

        info!(
            call_id,
            contact_id = %contact.id,
            project_id = %project.id,
            %status,
            duration_seconds = result.duration_seconds,
            notification = %kind,
            "Call result applied"
        );
        Ok(ReconcileOutcome::Applied {
            contact_id: contact.id.clone(),
            status,
            notification: kind,
        })
    }

    async fn record_usage(&self, project: &Project, call_id: &str, duration_seconds: u32) {
        let minutes = f64::from(duration_seconds) / 60.0;
        if let Err(e) = self.store.increment_org_usage(&project.org_id, 1, minutes).await {
            warn!(call_id, org_id = %project.org_id, error = %e, "Usage increment failed");
        }
    }

    async fn emit(&self, notification: Notification, call_id: &str) {
        if let Err(e) = self.store.insert_notification(&notification).await {
            warn!(call_id, kind = %notification.kind, error = %e, "Notification insert failed");
        }
    }

    /// Mark a booking the transcript shows but the capture missed.
    async fn infer_booking(&self, call_id: &str, result: &mut CallResult) {
        let Some(judge) = &self.judge else { return };
        let Some(transcript) = result.transcript.as_deref() else {
            return;
        };
        if is_call_booking(&result.captured_data) {
            return;
        }

        let verdict = judge.customer_booked(transcript).await;
        match verdict {
            Ok(Some(true)) => {
                info!(call_id, "Booking inferred from transcript");
                result
                    .captured_data
                    .insert(INFERRED_BOOKING_KEY.to_string(), CapturedValue::Text("yes".into()));
            }
            Ok(_) => {}
            Err(e) => warn!(call_id, error = %e, "Transcript booking check failed"),
        }
    }

    async fn send_summary(
        &self,
        project: &Project,
        contact: &Contact,
        call_id: &str,
        result: &CallResult,
    ) {
        let Some(mailer) = &self.mailer else { return };
        if result.failure_reason.is_some() {
            return;
        }

        let dealer = match project.dealer_id.as_deref() {
            Some(dealer_id) => self.store.get_dealer(dealer_id).await.unwrap_or_else(|e| {
                warn!(call_id, dealer_id, error = %e, "Dealer lookup failed");
                None
            }),
            None => None,
        };
        let Some(to) = summary_recipient(project, dealer.as_ref()) else {
            debug!(call_id, project_id = %project.id, "No call summary recipient");
            return;
        };

        match mailer.send(&to, project, contact, result).await {
            Ok(message_id) => info!(call_id, %to, %message_id, "Call summary sent"),
            Err(e) => warn!(call_id, %to, error = %e, "Call summary email failed"),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_time(value: &Option<String>) -> Option<DateTime<Utc>> {
    non_blank(value)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Whole seconds between start and end, else the platform's reported duration.
fn call_duration(call: &CallRecord) -> u32 {
    match (parse_time(&call.started_at), parse_time(&call.ended_at)) {
        (Some(start), Some(end)) if end >= start => {
            ((end - start).num_milliseconds() as f64 / 1000.0).round() as u32
        }
        _ => call
            .duration_seconds
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.round() as u32)
            .unwrap_or(0),
    }
}

fn build_result(report: &CallReport, keys: &[String]) -> CallResult {
    let call = report.call.clone().unwrap_or_default();
    let reason = report.ended_reason();
    let failed = is_failed_reason(reason);
    let artifact = report.artifact();

    CallResult {
        duration_seconds: if failed { 0 } else { call_duration(&call) },
        transcript: artifact
            .and_then(|a| a.transcript.clone())
            .filter(|t| !t.trim().is_empty()),
        recording_url: artifact.and_then(|a| a.recording_url()),
        captured_data: map_structured_outputs(
            artifact.and_then(|a| a.structured_outputs.as_ref()),
            keys,
        ),
        attempted_at: parse_time(&call.ended_at)
            .or_else(|| parse_time(&call.started_at))
            .unwrap_or_else(Utc::now),
        ended_reason: reason.map(str::to_string),
        failure_reason: failed.then(|| reason.unwrap_or("Call ended").to_string()),
    }
}

fn build_notification(
    project: &Project,
    contact: &Contact,
    call_id: &str,
    result: &CallResult,
    keys: &[String],
) -> Notification {
    let display = contact
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&contact.phone);

    let mut metadata = json!({
        "projectId": project.id,
        "projectName": project.name,
        "contactId": contact.id,
        "contactPhone": contact.phone,
        "contactName": contact.name,
        "callId": call_id,
        "durationSeconds": result.duration_seconds,
    });

    if let Some(reason) = &result.failure_reason {
        metadata["failureReason"] = json!(reason);
        let shown = result.ended_reason.as_deref().unwrap_or("Unknown");
        return Notification::new(
            &project.org_id,
            NotificationKind::CallFailed,
            format!("Call failed: {display}"),
            format!("Call to {display} ({}) failed. Reason: {shown}", contact.phone),
            metadata,
        );
    }

    metadata["capturedData"] = json!(result.captured_data);
    metadata["transcript"] = json!(result.transcript);
    metadata["recordingUrl"] = json!(result.recording_url);

    let missing = result.missing_fields(keys);
    if !missing.is_empty() {
        let message = format!(
            "Call to {display} completed, but missing data for: {}",
            missing.join(", ")
        );
        metadata["missingFields"] = json!(missing);
        return Notification::new(
            &project.org_id,
            NotificationKind::DataMissing,
            format!("Missing data: {display}"),
            message,
            metadata,
        );
    }

    let d = result.duration_seconds;
    Notification::new(
        &project.org_id,
        NotificationKind::CallCompleted,
        format!("Call completed: {display}"),
        format!(
            "Successfully completed call to {display} ({}). Duration: {}m {}s",
            contact.phone,
            d / 60,
            d % 60
        ),
        metadata,
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::campaign::model::{CaptureField, CaptureType, Dealer, Organization};
    use crate::error::{EnrichmentError, MailError};
    use crate::intake::inbound::{EmailSender, OutgoingEmail};
    use crate::store::LibSqlBackend;

    pub(crate) struct Fixture {
        pub store: Arc<LibSqlBackend>,
        pub reconciler: Reconciler,
        pub project: Project,
        pub contact: Contact,
    }

    pub(crate) async fn fixture() -> Fixture {
        fixture_with(|_| {}).await
    }

    pub(crate) async fn fixture_with(edit: impl FnOnce(&mut Project)) -> Fixture {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store
            .upsert_organization(&Organization {
                id: "org-1".into(),
                name: "Org".into(),
                caller_number_id: None,
                calls_used: 0,
                minutes_used: 0.0,
            })
            .await
            .unwrap();

        let mut project = Project::new("org-1", "Leads");
        project.assistant_id = Some("asst-1".into());
        project.capture_fields = vec![
            CaptureField::new("interested", "Interested?", CaptureType::Text),
            CaptureField::new("budget", "Budget", CaptureType::Number),
        ];
        edit(&mut project);
        store.insert_project(&project).await.unwrap();

        let contact = store
            .create_contact(&project.id, "0821234567", "+27821234567", Some("John"))
            .await
            .unwrap()
            .contact;
        store.mark_contact_calling(&contact.id, "call-1").await.unwrap();

        let reconciler = Reconciler::new(store.clone(), PhoneNormalizer::default());
        Fixture {
            store,
            reconciler,
            project,
            contact,
        }
    }

    pub(crate) fn report(call_id: &str, ended_reason: &str, result: Value) -> CallReport {
        let body = json!({"message": {
            "type": "end-of-call-report",
            "endedReason": ended_reason,
            "call": {
                "id": call_id,
                "assistantId": "asst-1",
                "customer": {"number": "+27821234567"},
                "startedAt": "2026-03-01T10:00:00Z",
                "endedAt": "2026-03-01T10:02:05Z"
            },
            "artifact": {
                "transcript": "AI: Hi John...",
                "recording": {"url": "https://rec/1.wav"},
                "structuredOutputs": {"so-1": {"name": "Leads", "result": result}}
            }
        }});
        CallReport::parse(body.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn no_answer_marks_failed_with_zero_duration() {
        let f = fixture().await;
        let outcome = f
            .reconciler
            .on_call_ended(&report("call-1", "no-answer", json!(null)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                contact_id: f.contact.id.clone(),
                status: ContactStatus::Failed,
                notification: NotificationKind::CallFailed,
            }
        );

        let contact = f.store.get_contact(&f.contact.id).await.unwrap().unwrap();
        assert_eq!(contact.status, ContactStatus::Failed);
        let result = contact.call_result.unwrap();
        assert_eq!(result.duration_seconds, 0);
        assert_eq!(result.failure_reason.as_deref(), Some("no-answer"));

        let notes = f.store.list_notifications("org-1", 10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::CallFailed);
        assert_eq!(notes[0].title, "Call failed: John");
        assert_eq!(notes[0].message, "Call to John (0821234567) failed. Reason: no-answer");

        let org = f.store.get_organization("org-1").await.unwrap().unwrap();
        assert_eq!(org.calls_used, 1);
        assert_eq!(org.minutes_used, 0.0);
    }

    #[tokio::test]
    async fn missing_capture_field_is_data_missing() {
        let f = fixture().await;
        let outcome = f
            .reconciler
            .on_call_ended(&report("call-1", "customer-ended-call", json!({"interested": "yes"})))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Applied {
                status: ContactStatus::Success,
                notification: NotificationKind::DataMissing,
                ..
            }
        ));

        let contact = f.store.get_contact(&f.contact.id).await.unwrap().unwrap();
        assert_eq!(contact.status, ContactStatus::Success);
        let result = contact.call_result.unwrap();
        assert_eq!(result.duration_seconds, 125);
        assert_eq!(result.recording_url.as_deref(), Some("https://rec/1.wav"));
        assert_eq!(result.captured_data["interested"], CapturedValue::Text("yes".into()));

        let notes = f.store.list_notifications("org-1", 10).await.unwrap();
        assert_eq!(notes[0].kind, NotificationKind::DataMissing);
        assert_eq!(notes[0].message, "Call to John completed, but missing data for: budget");
        assert_eq!(notes[0].metadata["missingFields"], json!(["budget"]));
    }

    #[tokio::test]
    async fn complete_capture_is_call_completed_and_counts_minutes() {
        let f = fixture().await;
        f.reconciler
            .on_call_ended(&report(
                "call-1",
                "customer-ended-call",
                json!({"interested": "yes", "budget": 250000, "noise": 1}),
            ))
            .await
            .unwrap();

        let notes = f.store.list_notifications("org-1", 10).await.unwrap();
        assert_eq!(notes[0].kind, NotificationKind::CallCompleted);
        assert_eq!(
            notes[0].message,
            "Successfully completed call to John (0821234567). Duration: 2m 5s"
        );
        assert!(notes[0].metadata["capturedData"].get("noise").is_none());

        let org = f.store.get_organization("org-1").await.unwrap().unwrap();
        assert!((org.minutes_used - 125.0 / 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn redelivery_has_no_second_effect() {
        let f = fixture().await;
        let r = report("call-1", "customer-ended-call", json!({"interested": "yes", "budget": 1}));
        f.reconciler.on_call_ended(&r).await.unwrap();
        let again = f.reconciler.on_call_ended(&r).await.unwrap();
        assert_eq!(again, ReconcileOutcome::AlreadyProcessed);

        let before = f.store.get_contact(&f.contact.id).await.unwrap().unwrap();
        assert_eq!(before.call_history.len(), 1);
        assert_eq!(f.store.list_notifications("org-1", 10).await.unwrap().len(), 1);
        let org = f.store.get_organization("org-1").await.unwrap().unwrap();
        assert_eq!(org.calls_used, 1);
    }

    #[tokio::test]
    async fn concurrent_redelivery_applies_once() {
        let f = fixture().await;
        let r = report("call-1", "busy", json!(null));
        let (a, b) = tokio::join!(f.reconciler.on_call_ended(&r), f.reconciler.on_call_ended(&r));
        let applied = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| matches!(o, ReconcileOutcome::Applied { .. }))
            .count();
        assert_eq!(applied, 1);
        assert_eq!(f.store.list_notifications("org-1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_new_call_appends_history() {
        let f = fixture().await;
        f.reconciler
            .on_call_ended(&report("call-1", "busy", json!(null)))
            .await
            .unwrap();
        f.reconciler
            .on_call_ended(&report("call-2", "customer-ended-call", json!({"interested": "no", "budget": 0})))
            .await
            .unwrap();

        let contact = f.store.get_contact(&f.contact.id).await.unwrap().unwrap();
        assert_eq!(contact.status, ContactStatus::Success);
        assert_eq!(contact.last_vapi_call_id.as_deref(), Some("call-2"));
        let ids: Vec<_> = contact
            .call_history
            .iter()
            .map(|e| e.vapi_call_id.clone().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["call-1", "call-2"]);
    }

    #[tokio::test]
    async fn late_redelivery_of_an_older_call_is_already_processed() {
        let f = fixture().await;
        let first = report("call-1", "busy", json!(null));
        f.reconciler.on_call_ended(&first).await.unwrap();
        f.reconciler
            .on_call_ended(&report("call-2", "customer-ended-call", json!({"interested": "yes", "budget": 1})))
            .await
            .unwrap();

        assert_eq!(
            f.reconciler.on_call_ended(&first).await.unwrap(),
            ReconcileOutcome::AlreadyProcessed
        );
        // A snapshot taken before either call bypasses the in-memory check.
        assert_eq!(
            f.reconciler
                .apply_to_contact(&f.project, &f.contact, "call-1", &first)
                .await
                .unwrap(),
            ReconcileOutcome::AlreadyProcessed
        );

        let contact = f.store.get_contact(&f.contact.id).await.unwrap().unwrap();
        assert_eq!(contact.status, ContactStatus::Success);
        assert_eq!(contact.last_vapi_call_id.as_deref(), Some("call-2"));
        assert_eq!(contact.call_history.len(), 2);
        assert_eq!(f.store.list_notifications("org-1", 10).await.unwrap().len(), 2);
        let org = f.store.get_organization("org-1").await.unwrap().unwrap();
        assert_eq!(org.calls_used, 2);
    }

    #[tokio::test]
    async fn unresolvable_reports_are_ignored() {
        let f = fixture().await;
        let status_update = CallReport {
            kind: Some("status-update".into()),
            ..Default::default()
        };
        assert_eq!(
            f.reconciler.on_call_ended(&status_update).await.unwrap(),
            ReconcileOutcome::Ignored(IgnoreReason::NotEndOfCall)
        );

        let mut unknown_assistant = report("call-9", "busy", json!(null));
        if let Some(call) = unknown_assistant.call.as_mut() {
            call.assistant_id = Some("asst-other".into());
        }
        assert_eq!(
            f.reconciler.on_call_ended(&unknown_assistant).await.unwrap(),
            ReconcileOutcome::Ignored(IgnoreReason::UnknownProject)
        );

        let mut stranger = report("call-9", "busy", json!(null));
        if let Some(call) = stranger.call.as_mut() {
            call.customer = Some(crate::voice::client::CallCustomer {
                number: Some("0830000000".into()),
                name: None,
            });
        }
        assert_eq!(
            f.reconciler.on_call_ended(&stranger).await.unwrap(),
            ReconcileOutcome::Ignored(IgnoreReason::UnknownContact)
        );
        assert!(f.store.list_notifications("org-1", 10).await.unwrap().is_empty());
    }

    struct StubJudge {
        answer: Result<Option<bool>, String>,
        seen: Mutex<Vec<String>>,
    }

    impl StubJudge {
        fn answering(answer: Result<Option<bool>, String>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BookingJudge for StubJudge {
        async fn customer_booked(&self, transcript: &str) -> Result<Option<bool>, EnrichmentError> {
            self.seen.lock().unwrap().push(transcript.to_string());
            self.answer.clone().map_err(EnrichmentError::Extract)
        }
    }

    #[derive(Default)]
    struct StubSender {
        fail: bool,
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl EmailSender for StubSender {
        async fn send_email(&self, email: &OutgoingEmail) -> Result<String, MailError> {
            if self.fail {
                return Err(MailError::Send("HTTP 500".into()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok("msg-1".into())
        }
    }

    fn full_reconciler(f: &Fixture, judge: Arc<StubJudge>, sender: Arc<StubSender>) -> Reconciler {
        Reconciler::new(f.store.clone(), PhoneNormalizer::default())
            .with_booking_judge(judge)
            .with_summary_mailer(SummaryMailer::new(sender, "Intellidial <calls@x>"))
    }

    #[tokio::test]
    async fn transcript_booking_and_summary_email() {
        let f = fixture_with(|p| p.email_update = Some("sales@dealer.example".into())).await;
        let judge = StubJudge::answering(Ok(Some(true)));
        let sender = Arc::new(StubSender::default());
        let reconciler = full_reconciler(&f, judge.clone(), sender.clone());

        reconciler
            .on_call_ended(&report("call-1", "customer-ended-call", json!({"interested": "yes", "budget": 1})))
            .await
            .unwrap();

        assert_eq!(*judge.seen.lock().unwrap(), vec!["AI: Hi John..."]);
        let contact = f.store.get_contact(&f.contact.id).await.unwrap().unwrap();
        assert_eq!(
            contact.call_result.unwrap().captured_data[INFERRED_BOOKING_KEY],
            CapturedValue::Text("yes".into())
        );

        let sent = sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["sales@dealer.example"]);
        assert_eq!(sent[0].subject, "Congratulations another viewing booked!");
    }

    #[tokio::test]
    async fn captured_booking_skips_the_judge() {
        let f = fixture().await;
        let judge = StubJudge::answering(Ok(Some(false)));
        let reconciler = full_reconciler(&f, judge.clone(), Arc::new(StubSender::default()));

        reconciler
            .on_call_ended(&report(
                "call-1",
                "customer-ended-call",
                json!({"interested": "yes", "budget": 1, "meeting_booked": "yes"}),
            ))
            .await
            .unwrap();
        // Undeclared keys are dropped before the check, so the judge still runs.
        assert_eq!(judge.seen.lock().unwrap().len(), 1);

        let f = fixture_with(|p| {
            p.capture_fields
                .push(CaptureField::new("meeting_booked", "Booked?", CaptureType::Text))
        })
        .await;
        let judge = StubJudge::answering(Ok(Some(false)));
        let reconciler = full_reconciler(&f, judge.clone(), Arc::new(StubSender::default()));
        reconciler
            .on_call_ended(&report(
                "call-1",
                "customer-ended-call",
                json!({"interested": "yes", "budget": 1, "meeting_booked": "yes"}),
            ))
            .await
            .unwrap();
        assert!(judge.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_calls_skip_judge_and_summary() {
        let f = fixture_with(|p| p.email_update = Some("sales@dealer.example".into())).await;
        let judge = StubJudge::answering(Ok(Some(true)));
        let sender = Arc::new(StubSender::default());
        let reconciler = full_reconciler(&f, judge.clone(), sender.clone());

        reconciler
            .on_call_ended(&report("call-1", "no-answer", json!(null)))
            .await
            .unwrap();
        assert!(judge.seen.lock().unwrap().is_empty());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn side_effect_failures_do_not_undo_the_result() {
        let f = fixture_with(|p| p.email_update = Some("sales@dealer.example".into())).await;
        let judge = StubJudge::answering(Err("HTTP 503".into()));
        let sender = Arc::new(StubSender {
            fail: true,
            ..Default::default()
        });
        let reconciler = full_reconciler(&f, judge, sender);

        let outcome = reconciler
            .on_call_ended(&report("call-1", "customer-ended-call", json!({"interested": "no", "budget": 0})))
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Applied { status: ContactStatus::Success, .. }));

        let contact = f.store.get_contact(&f.contact.id).await.unwrap().unwrap();
        assert!(!contact.call_result.unwrap().captured_data.contains_key(INFERRED_BOOKING_KEY));
        assert_eq!(f.store.list_notifications("org-1", 10).await.unwrap().len(), 1);
        let org = f.store.get_organization("org-1").await.unwrap().unwrap();
        assert_eq!(org.calls_used, 1);
    }

    #[tokio::test]
    async fn dealer_recipient_wins() {
        let mut dealer = Dealer::new("org-1", "Sandton Motors");
        dealer.call_updates_email = Some("floor@sandton.example".into());
        let dealer_id = dealer.id.clone();
        let f = fixture_with(|p| {
            p.dealer_id = Some(dealer_id);
            p.email_update = Some("sales@dealer.example".into());
        })
        .await;
        f.store.insert_dealer(&dealer).await.unwrap();
        let sender = Arc::new(StubSender::default());
        let reconciler = full_reconciler(&f, StubJudge::answering(Ok(None)), sender.clone());

        reconciler
            .on_call_ended(&report("call-1", "customer-ended-call", json!({"interested": "no", "budget": 0})))
            .await
            .unwrap();
        let sent = sender.sent.lock().unwrap().clone();
        assert_eq!(sent[0].to, vec!["floor@sandton.example"]);
        assert_eq!(sent[0].subject, "Successful call made client serviced");
    }

    #[test]
    fn failed_reasons_are_case_insensitive() {
        assert!(is_failed_reason(Some("No-Answer")));
        assert!(is_failed_reason(Some("customer-busy")));
        assert!(!is_failed_reason(Some("customer-ended-call")));
        assert!(!is_failed_reason(None));
    }

    #[test]
    fn duration_falls_back_to_reported_seconds() {
        let call = CallRecord {
            duration_seconds: Some(41.6),
            ..Default::default()
        };
        assert_eq!(call_duration(&call), 42);
        assert_eq!(call_duration(&CallRecord::default()), 0);
    }
}
