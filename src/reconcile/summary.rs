//! Call-summary email sent to the dealer or project owner after a successful call.

use std::sync::Arc;

use crate::campaign::model::{CallResult, Contact, Dealer, Project};
use crate::error::MailError;
use crate::intake::inbound::{EmailSender, OutgoingEmail};
use crate::reconcile::booking::{is_call_booking, why_not_booked};

const MAX_TRANSCRIPT_CHARS: usize = 1_500;

const BOOKED_SUBJECT: &str = "Congratulations another viewing booked!";
const SERVICED_SUBJECT: &str = "Successful call made client serviced";

/// Who receives the summary: the dealer's call-updates address wins over the
/// project's.
pub fn summary_recipient(project: &Project, dealer: Option<&Dealer>) -> Option<String> {
    let non_blank = |s: &Option<String>| {
        s.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    dealer
        .and_then(|d| non_blank(&d.call_updates_email))
        .or_else(|| non_blank(&project.email_update))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn duration_text(seconds: u32) -> String {
    if seconds == 0 {
        "-".to_string()
    } else {
        format!("{}m {}s", seconds / 60, seconds % 60)
    }
}

fn transcript_excerpt(transcript: Option<&str>) -> String {
    match transcript.map(str::trim).filter(|t| !t.is_empty()) {
        None => "No transcript available.".to_string(),
        Some(t) if t.chars().count() > MAX_TRANSCRIPT_CHARS => {
            let head: String = t.chars().take(MAX_TRANSCRIPT_CHARS).collect();
            format!("{head}\n\n[... transcript truncated ...]")
        }
        Some(t) => t.to_string(),
    }
}

/// Build the summary email for one applied call result.
pub fn compose_summary(
    from: &str,
    to: &str,
    project: &Project,
    contact: &Contact,
    result: &CallResult,
) -> OutgoingEmail {
    let booked = is_call_booking(&result.captured_data);
    let subject = if booked { BOOKED_SUBJECT } else { SERVICED_SUBJECT };
    let heading = if booked { "Viewing booked!" } else { "Client serviced" };

    let mut details = vec![
        ("Name", contact.name.clone().unwrap_or_else(|| "-".into())),
        ("Phone", contact.phone.clone()),
        ("Duration", duration_text(result.duration_seconds)),
        ("Project", project.name.clone()),
    ];
    let reason = (!booked)
        .then(|| why_not_booked(&result.captured_data, &project.capture_fields))
        .flatten();
    if let Some(reason) = reason {
        details.push(("Why test drive not booked", reason));
    }
    let details: String = details
        .iter()
        .map(|(label, value)| format!("<p><strong>{label}:</strong> {}</p>\n", escape(value)))
        .collect();

    let recording = result
        .recording_url
        .as_deref()
        .map(|url| format!("<p><a href=\"{}\">Listen to recording</a></p>\n", escape(url)))
        .unwrap_or_default();

    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"></head>\n<body>\n\
         <h1>{heading}</h1>\n<h2>Contact details</h2>\n{details}\
         <h2>Call summary</h2>\n<pre style=\"white-space: pre-wrap\">{}</pre>\n{recording}\
         <p>Intellidial - AI-powered call follow-up</p>\n</body>\n</html>\n",
        escape(&transcript_excerpt(result.transcript.as_deref())),
    );

    OutgoingEmail {
        from: from.to_string(),
        to: vec![to.to_string()],
        subject: subject.to_string(),
        html,
    }
}

/// Sends call summaries from a fixed sender address.
pub struct SummaryMailer {
    sender: Arc<dyn EmailSender>,
    from: String,
}

impl SummaryMailer {
    pub fn new(sender: Arc<dyn EmailSender>, from: impl Into<String>) -> Self {
        Self {
            sender,
            from: from.into(),
        }
    }

    pub async fn send(
        &self,
        to: &str,
        project: &Project,
        contact: &Contact,
        result: &CallResult,
    ) -> Result<String, MailError> {
        let email = compose_summary(&self.from, to, project, contact, result);
        self.sender.send_email(&email).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::campaign::model::CapturedValue;

    fn contact() -> Contact {
        let now = Utc::now();
        Contact {
            id: "c-1".into(),
            project_id: "p-1".into(),
            phone: "0821234567".into(),
            phone_key: "+27821234567".into(),
            name: Some("John <JJ>".into()),
            status: Default::default(),
            call_result: None,
            call_history: Vec::new(),
            last_vapi_call_id: None,
            vapi_call_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn result(captured: &[(&str, &str)]) -> CallResult {
        CallResult {
            duration_seconds: 125,
            transcript: Some("AI: Hi <there>".into()),
            recording_url: Some("https://rec/1.wav".into()),
            captured_data: captured
                .iter()
                .map(|(k, v)| (k.to_string(), CapturedValue::Text(v.to_string())))
                .collect::<BTreeMap<_, _>>(),
            attempted_at: Utc::now(),
            failure_reason: None,
            ended_reason: None,
        }
    }

    #[test]
    fn dealer_address_wins_over_project() {
        let mut project = Project::new("org-1", "Leads");
        project.email_update = Some(" sales@dealer.example ".into());
        let mut dealer = Dealer::new("org-1", "Sandton Motors");
        assert_eq!(
            summary_recipient(&project, Some(&dealer)).as_deref(),
            Some("sales@dealer.example")
        );

        dealer.call_updates_email = Some("floor@sandton.example".into());
        assert_eq!(
            summary_recipient(&project, Some(&dealer)).as_deref(),
            Some("floor@sandton.example")
        );

        project.email_update = Some("  ".into());
        assert!(summary_recipient(&project, None).is_none());
    }

    #[test]
    fn booked_call_subject_and_escaping() {
        let project = Project::new("org-1", "Hilux leads");
        let email = compose_summary(
            "Intellidial <calls@x>",
            "sales@dealer.example",
            &project,
            &contact(),
            &result(&[("meeting_booked", "yes")]),
        );
        assert_eq!(email.subject, BOOKED_SUBJECT);
        assert_eq!(email.to, vec!["sales@dealer.example"]);
        assert!(email.html.contains("John &lt;JJ&gt;"));
        assert!(email.html.contains("AI: Hi &lt;there&gt;"));
        assert!(email.html.contains("2m 5s"));
        assert!(email.html.contains("href=\"https://rec/1.wav\""));
        assert!(!email.html.contains("Why test drive not booked"));
    }

    #[test]
    fn unbooked_call_carries_the_reason() {
        let project = Project::new("org-1", "Hilux leads");
        let email = compose_summary(
            "from",
            "to",
            &project,
            &contact(),
            &result(&[("why_not_booked", "Bought elsewhere")]),
        );
        assert_eq!(email.subject, SERVICED_SUBJECT);
        assert!(email.html.contains("Why test drive not booked:</strong> Bought elsewhere"));
    }

    #[test]
    fn long_transcripts_are_cut() {
        let excerpt = transcript_excerpt(Some(&"a".repeat(2_000)));
        assert!(excerpt.ends_with("[... transcript truncated ...]"));
        assert_eq!(transcript_excerpt(None), "No transcript available.");
    }
}
