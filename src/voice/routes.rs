//! Per-contact call route.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::error;

use crate::error::LaunchError;
use crate::voice::launch::CallLauncher;

#[derive(Clone)]
pub struct LaunchRouteState {
    pub launcher: Arc<CallLauncher>,
}

/// `contactId` (string) or `contactIds` (string array). Blank ids are dropped.
fn requested_contacts(body: &Value) -> Option<Vec<String>> {
    let ids: Vec<String> = match (body.get("contactId"), body.get("contactIds")) {
        (Some(Value::String(id)), _) => vec![id.clone()],
        (_, Some(Value::Array(ids))) => ids
            .iter()
            .map(|id| id.as_str().map(str::to_string))
            .collect::<Option<_>>()?,
        _ => return None,
    };
    let ids: Vec<String> = ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    (!ids.is_empty()).then_some(ids)
}

fn reply(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

/// POST /api/projects/{id}/call
async fn call_contacts(
    State(state): State<LaunchRouteState>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let Some(contact_ids) = requested_contacts(&body) else {
        return reply(
            StatusCode::BAD_REQUEST,
            "Provide contactId (string) or contactIds (string[])",
        );
    };

    match state.launcher.call_contacts(&project_id, &contact_ids).await {
        Ok(report) => Json(json!({
            "callIds": report.call_ids,
            "failedContactIds": report.failed_contact_ids,
        }))
        .into_response(),
        Err(e @ (LaunchError::ProjectNotFound | LaunchError::NoContacts)) => {
            reply(StatusCode::NOT_FOUND, &e.to_string())
        }
        Err(e @ LaunchError::CallerNumberMissing) => {
            reply(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
        }
        Err(LaunchError::AgentConfig(_)) => {
            reply(StatusCode::BAD_GATEWAY, "Failed to create agent. Try again.")
        }
        Err(e @ LaunchError::NoCallPlaced) => reply(StatusCode::BAD_GATEWAY, &e.to_string()),
        Err(e @ LaunchError::Database(_)) => {
            error!(%project_id, error = %e, "Contact call launch failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Call launch failed")
        }
    }
}

pub fn launch_routes(state: LaunchRouteState) -> Router {
    Router::new()
        .route("/api/projects/{id}/call", post(call_contacts))
        .with_state(state)
}
