//! REST endpoints for memory queries, UI telemetry events and meeting prep.
//!
//! Request bodies are parsed leniently: a missing or malformed body reads as
//! an empty object. Failures never expose raw error text.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::error;

use super::service::{MemoryQueryRequest, MemoryQueryService};

/// Response header carrying the interaction id for follow-up events.
pub const INTERACTION_ID_HEADER: &str = "x-memory-interaction-id";

/// Shared state for memory routes.
#[derive(Clone)]
pub struct MemoryRouteState {
    pub service: Arc<MemoryQueryService>,
}

fn parse_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or_else(|_| json!({}))
}

/// String field, accepting numbers as well.
fn string_field(body: &Value, key: &str) -> String {
    match body.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// POST /api/memory/query
///
/// Runs one memory query. Empty input yields a low-confidence envelope.
async fn post_query(State(state): State<MemoryRouteState>, body: Bytes) -> Response {
    let body = parse_body(&body);
    let request = MemoryQueryRequest {
        user_id: string_field(&body, "user_id"),
        user_input: string_field(&body, "user_input"),
        session_id: string_field(&body, "session_id"),
    };

    match state.service.run_memory_query(request).await {
        Ok(result) => (
            [(INTERACTION_ID_HEADER, result.interaction_id.to_string())],
            Json(result.response),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Memory query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "memory query failed")
        }
    }
}

/// POST /api/memory/event
///
/// Records a UI engagement event (`item_opened`, `followup_prompt`,
/// `no_interaction_timeout`).
async fn post_event(State(state): State<MemoryRouteState>, body: Bytes) -> Response {
    let body = parse_body(&body);
    let event_type = string_field(&body, "event_type");
    if event_type.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "event_type is required");
    }

    if state
        .service
        .telemetry()
        .log_raw_event(&event_type, &body)
        .await
    {
        Json(json!({ "ok": true })).into_response()
    } else {
        error_response(StatusCode::BAD_REQUEST, "unsupported event_type")
    }
}

/// POST /api/memory/meeting-prep
async fn post_meeting_prep(State(state): State<MemoryRouteState>) -> Response {
    match state.service.meeting_prep().await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => {
            error!(error = %e, "Meeting prep failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "meeting prep failed")
        }
    }
}

/// GET /api/memory/health
async fn get_health(State(state): State<MemoryRouteState>) -> impl IntoResponse {
    Json(state.service.telemetry().health_snapshot().await)
}

/// Build the memory REST routes.
pub fn memory_routes(state: MemoryRouteState) -> Router {
    Router::new()
        .route("/api/memory/query", post(post_query))
        .route("/api/memory/event", post(post_event))
        .route("/api/memory/meeting-prep", post(post_meeting_prep))
        .route("/api/memory/health", get(get_health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::memory::connectors::{InMemoryCalendarSearch, InMemoryEmailSearch};
    use crate::memory::telemetry::TelemetryStore;

    fn app(email: InMemoryEmailSearch, calendar: InMemoryCalendarSearch) -> Router {
        let service = MemoryQueryService::new(
            Arc::new(email),
            Arc::new(calendar),
            TelemetryStore::new(),
        );
        memory_routes(MemoryRouteState {
            service: Arc::new(service),
        })
    }

    fn empty_app() -> Router {
        app(
            InMemoryEmailSearch::new(vec![]),
            InMemoryCalendarSearch::new(vec![]),
        )
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn query_returns_envelope_with_interaction_header() {
        let resp = empty_app()
            .oneshot(post_json(
                "/api/memory/query",
                r#"{"user_id": 42, "user_input": "budget from Dana"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let header = resp.headers().get(INTERACTION_ID_HEADER).unwrap();
        assert!(uuid::Uuid::parse_str(header.to_str().unwrap()).is_ok());

        let body = body_json(resp).await;
        assert_eq!(body["confidence"], "low");
        assert_eq!(body["items"], json!([]));
        assert!(body["fallback_message"].is_string());
    }

    #[tokio::test]
    async fn malformed_query_body_is_treated_as_empty_input() {
        let resp = empty_app()
            .oneshot(post_json("/api/memory/query", "not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["confidence"], "low");
    }

    #[tokio::test]
    async fn backend_outage_returns_opaque_500() {
        let resp = app(
            InMemoryEmailSearch::failing(),
            InMemoryCalendarSearch::failing(),
        )
        .oneshot(post_json("/api/memory/query", r#"{"user_input": "budget"}"#))
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(resp).await,
            json!({"error": "memory query failed"})
        );
    }

    #[tokio::test]
    async fn event_validation() {
        let app = empty_app();

        let missing = app
            .clone()
            .oneshot(post_json("/api/memory/event", r#"{"interaction_id": "x"}"#))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(missing).await["error"],
            "event_type is required"
        );

        let unsupported = app
            .clone()
            .oneshot(post_json("/api/memory/event", r#"{"event_type": "scrolled"}"#))
            .await
            .unwrap();
        assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);

        let ok = app
            .oneshot(post_json(
                "/api/memory/event",
                r#"{"event_type": "item_opened", "interaction_id": "x", "source_id": "m1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body_json(ok).await, json!({"ok": true}));
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let app = empty_app();
        app.clone()
            .oneshot(post_json(
                "/api/memory/event",
                r#"{"event_type": "no_interaction_timeout", "interaction_id": "x", "timeout_s": 30}"#,
            ))
            .await
            .unwrap();

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/memory/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!({
                "connector": "ok",
                "orchestrator": "ok",
                "interactions_logged": 0,
                "events_logged": 1
            })
        );
    }

    #[tokio::test]
    async fn meeting_prep_without_events_is_low_confidence() {
        let resp = empty_app()
            .oneshot(post_json("/api/memory/meeting-prep", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["summary"], "No upcoming meeting found to prepare for.");
        assert_eq!(body["confidence"], "low");
    }
}
