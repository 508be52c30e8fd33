//! Inbound enquiry webhook.
//!
//! Decides synchronously whether an email event is in scope, resolves its
//! project, acknowledges, and only then runs the intake pipeline on a
//! deferred task.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info, warn};

use crate::deferred::DeferredExecutor;
use crate::intake::inbound::{EMAIL_RECEIVED, EmailSource, InboundEvent, recipient_addresses};
use crate::intake::parser::parse_enquiry;
use crate::intake::pipeline::IntakeRunner;
use crate::signature::WebhookAuth;
use crate::store::Store;

/// Shared state for the inbound enquiry route.
#[derive(Clone)]
pub struct InboundRouteState {
    pub store: Arc<dyn Store>,
    /// `None` when no email source is configured.
    pub emails: Option<Arc<dyn EmailSource>>,
    pub runner: Arc<dyn IntakeRunner>,
    pub deferred: DeferredExecutor,
    pub auth: Arc<WebhookAuth>,
    /// Case-insensitive keyword the subject must contain.
    pub subject_keyword: String,
    pub default_project_id: Option<String>,
}

fn reply(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

/// Terminal rejection: 200 so the sender does not retry.
fn rejected(reason: &str, email_id: &str) -> Response {
    info!(email_id, reason, "Inbound enquiry rejected");
    reply(
        StatusCode::OK,
        json!({"ok": false, "rejected": reason, "emailId": email_id}),
    )
}

/// POST /api/webhooks/inbound-email
async fn inbound_email(
    State(state): State<InboundRouteState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = state.auth.check(&headers, &body) {
        return reply(StatusCode::UNAUTHORIZED, json!({"error": e.to_string()}));
    }

    let event: InboundEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Inbound event is not valid JSON");
            return reply(StatusCode::BAD_REQUEST, json!({"error": "Invalid JSON body"}));
        }
    };

    if event.kind != EMAIL_RECEIVED {
        return reply(StatusCode::OK, json!({"ok": true, "ignored": event.kind}));
    }

    let data = event.data.unwrap_or_default();
    let Some(email_id) = data
        .email_id
        .clone()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    else {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({"error": "Missing email_id in event data"}),
        );
    };

    let Some(emails) = &state.emails else {
        error!("Inbound email received but no email source is configured");
        return reply(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"error": "Server misconfiguration"}),
        );
    };

    // Transient: let the sender re-deliver.
    let email = match emails.fetch_email(&email_id).await {
        Ok(email) => email,
        Err(e) => {
            error!(%email_id, error = %e, "Could not fetch inbound email");
            return reply(
                StatusCode::BAD_GATEWAY,
                json!({"ok": false, "error": "Could not fetch email", "emailId": email_id}),
            );
        }
    };

    let subject = match email.subject() {
        "" => data.subject.as_deref().map(str::trim).unwrap_or(""),
        s => s,
    };
    let keyword = state.subject_keyword.to_lowercase();
    if !subject.to_lowercase().contains(&keyword) {
        return rejected("subject does not match", &email_id);
    }

    let text = email.text.as_deref().unwrap_or("");
    let Some(enquiry) = parse_enquiry(text, email.html.as_deref()) else {
        return rejected("could not parse phone and listing link", &email_id);
    };

    let addresses = recipient_addresses(&data, &email);
    let dealer_project = match state.store.find_dealer_by_inbox(&addresses).await {
        Ok(dealer) => dealer.and_then(|d| d.project_id),
        Err(e) => {
            error!(%email_id, error = %e, "Dealer lookup failed");
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"ok": false, "error": "Internal error", "emailId": email_id}),
            );
        }
    };
    let Some(project_id) = dealer_project.or_else(|| state.default_project_id.clone()) else {
        warn!(%email_id, ?addresses, "No dealer inbox or default project matches");
        return rejected("no project for this inbox", &email_id);
    };

    match state.store.record_inbound_event(&email_id).await {
        Ok(true) => {}
        Ok(false) => {
            info!(%email_id, "Duplicate inbound event acknowledged");
            return reply(
                StatusCode::OK,
                json!({"ok": true, "duplicate": true, "emailId": email_id}),
            );
        }
        Err(e) => {
            error!(%email_id, error = %e, "Failed to record inbound event");
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"ok": false, "error": "Internal error", "emailId": email_id}),
            );
        }
    }

    info!(%email_id, %project_id, "Inbound enquiry accepted");
    let runner = state.runner.clone();
    let deferred_project = project_id.clone();
    let deferred_email = email_id.clone();
    state.deferred.defer("intake_pipeline", async move {
        let outcome = runner.run(&deferred_project, &enquiry).await;
        if let Err(e) = outcome.result {
            warn!(email_id = %deferred_email, project_id = %deferred_project, error = %e, "Enquiry did not result in a call");
        }
    });

    reply(
        StatusCode::OK,
        json!({
            "ok": true,
            "accepted": true,
            "emailId": email_id,
            "projectId": project_id,
        }),
    )
}

/// Build the inbound enquiry routes.
pub fn inbound_routes(state: InboundRouteState) -> Router {
    Router::new()
        .route("/api/webhooks/inbound-email", post(inbound_email))
        .with_state(state)
}
