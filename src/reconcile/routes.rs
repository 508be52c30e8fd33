//! End-of-call webhook and call sync routes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::SyncError;
use crate::reconcile::payload::CallReport;
use crate::reconcile::reconciler::{ReconcileOutcome, Reconciler};
use crate::reconcile::sync::CallSync;
use crate::signature::WebhookAuth;

#[derive(Clone)]
pub struct CallRouteState {
    pub reconciler: Arc<Reconciler>,
    pub sync: Arc<CallSync>,
    pub auth: Arc<WebhookAuth>,
}

/// POST /api/webhooks/vapi/call-ended
///
/// Anything that passes verification is acknowledged with 200 so the platform
/// never retries a report that was understood.
async fn call_ended(
    State(state): State<CallRouteState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = state.auth.check(&headers, &body) {
        warn!(error = %e, "Rejected end-of-call webhook");
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": e.to_string()}))).into_response();
    }

    let Some(report) = CallReport::parse(&body) else {
        warn!(bytes = body.len(), "End-of-call webhook body is not a JSON object");
        return Json(json!({"received": true})).into_response();
    };

    match state.reconciler.on_call_ended(&report).await {
        Ok(ReconcileOutcome::AlreadyProcessed) => {
            Json(json!({"received": true, "idempotent": true})).into_response()
        }
        Ok(outcome) => {
            debug!(?outcome, "End-of-call webhook handled");
            Json(json!({"received": true})).into_response()
        }
        Err(e) => {
            error!(error = %e, "End-of-call webhook could not be applied");
            Json(json!({"received": true})).into_response()
        }
    }
}

/// POST /api/projects/{id}/sync-calls
async fn sync_calls(State(state): State<CallRouteState>, Path(project_id): Path<String>) -> Response {
    match state.sync.sync_project(&project_id).await {
        Ok(synced) => Json(json!({"synced": synced})).into_response(),
        Err(SyncError::ProjectNotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(json!({"error": "Project not found"}))).into_response()
        }
        Err(e) => {
            error!(%project_id, error = %e, "Call sync failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Call sync failed"})),
            )
                .into_response()
        }
    }
}

pub fn call_routes(state: CallRouteState) -> Router {
    Router::new()
        .route("/api/webhooks/vapi/call-ended", post(call_ended))
        .route("/api/projects/{id}/sync-calls", post(sync_calls))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;
    use crate::phone::PhoneNormalizer;
    use crate::reconcile::reconciler::tests::{Fixture, fixture};
    use crate::signature::WebhookVerifier;
    use crate::store::Store;
    use crate::voice::agent::tests::StubPlatform;

    fn app(f: &Fixture, auth: WebhookAuth) -> Router {
        let reconciler = Arc::new(Reconciler::new(f.store.clone(), PhoneNormalizer::default()));
        let sync = Arc::new(CallSync::new(
            f.store.clone(),
            Arc::new(StubPlatform::default()),
            reconciler.clone(),
        ));
        call_routes(CallRouteState {
            reconciler,
            sync,
            auth: Arc::new(auth),
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn report_body() -> String {
        json!({"message": {
            "type": "end-of-call-report",
            "endedReason": "customer-busy",
            "call": {"id": "call-1", "assistantId": "asst-1", "customer": {"number": "0821234567"}}
        }})
        .to_string()
    }

    fn ended(body: String) -> Request<Body> {
        Request::post("/api/webhooks/vapi/call-ended")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn second_delivery_is_marked_idempotent() {
        let f = fixture().await;
        let app = app(&f, WebhookAuth::Unsigned);

        let (status, body) = send(&app, ended(report_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"received": true}));

        let (status, body) = send(&app, ended(report_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"received": true, "idempotent": true}));
        assert_eq!(f.store.list_notifications("org-1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn uninteresting_payloads_are_acknowledged() {
        let f = fixture().await;
        let app = app(&f, WebhookAuth::Unsigned);

        for body in [
            "garbage".to_string(),
            json!({"message": {"type": "status-update"}}).to_string(),
            json!({"message": {"type": "end-of-call-report", "call": {"id": "x", "assistantId": "unknown"}}})
                .to_string(),
        ] {
            let (status, reply) = send(&app, ended(body)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(reply, json!({"received": true}));
        }
        assert!(f.store.list_notifications("org-1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let f = fixture().await;
        let verifier = WebhookVerifier::new(&SecretString::from("whsec_c2VjcmV0LWtleQ==")).unwrap();
        let app = app(&f, WebhookAuth::Signed(verifier.clone()));

        let request = Request::post("/api/webhooks/vapi/call-ended")
            .header("webhook-id", "msg_1")
            .header("webhook-timestamp", chrono::Utc::now().timestamp().to_string())
            .header("webhook-signature", "v1,AAAA")
            .body(Body::from(report_body()))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let ts = chrono::Utc::now().timestamp();
        let body = report_body();
        let signature = verifier.sign("msg_2", ts, body.as_bytes()).unwrap();
        let request = Request::post("/api/webhooks/vapi/call-ended")
            .header("webhook-id", "msg_2")
            .header("webhook-timestamp", ts.to_string())
            .header("webhook-signature", signature)
            .body(Body::from(body))
            .unwrap();
        let (status, reply) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, json!({"received": true}));
    }

    #[tokio::test]
    async fn sync_route_reports_count_and_missing_project() {
        let f = fixture().await;
        let app = app(&f, WebhookAuth::Unsigned);

        let request = Request::post(format!("/api/projects/{}/sync-calls", f.project.id))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        // Stub platform knows no calls: the in-flight call counts as purged.
        assert_eq!(body, json!({"synced": 1}));

        let request = Request::post("/api/projects/missing/sync-calls")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
