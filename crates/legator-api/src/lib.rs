//! HTTP surface: webhook trigger ingestion and health.
//!
//! `POST /webhook/{source}` accepts any payload up to 1MB (content type is
//! not required) and forwards it to the trigger hub as an opaque string.
//! The response is always 202 for a well-formed request; whether agents
//! fired is reported in the body.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use legator_kernel::triggers::TriggerHub;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Webhook payloads are capped at 1MB.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state for the HTTP layer.
pub struct ApiState {
    pub triggers: Arc<TriggerHub>,
}

/// Build the router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook/{source}", post(handle_webhook))
        .route("/webhook", post(missing_source))
        .route("/webhook/", post(missing_source))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[derive(Serialize)]
struct WebhookResponse {
    status: &'static str,
    agents: usize,
    triggered: usize,
}

async fn handle_webhook(
    State(state): State<Arc<ApiState>>,
    Path(source): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    if source.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "missing source in path"})),
        )
            .into_response();
    }

    info!(
        source = %source,
        content_length = body.len(),
        "webhook received"
    );

    let payload = String::from_utf8_lossy(&body).into_owned();
    let outcome = state.triggers.handle(&source, &payload);

    (
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            status: "accepted",
            agents: outcome.agents,
            triggered: outcome.triggered,
        }),
    )
        .into_response()
}

async fn missing_source() -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": "missing source in path"})),
    )
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use legator_types::meta::NamespacedName;
    use std::time::Duration;
    use tower::ServiceExt;

    fn make_app() -> (Router, Arc<TriggerHub>, tokio::sync::mpsc::Receiver<legator_kernel::triggers::TriggerEvent>) {
        let (hub, rx) = TriggerHub::new(Duration::from_millis(1));
        let hub = Arc::new(hub);
        let app = router(Arc::new(ApiState {
            triggers: Arc::clone(&hub),
        }));
        (app, hub, rx)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn webhook_triggers_registered_agent() {
        let (app, hub, mut rx) = make_app();
        hub.register_agent("alertmanager", NamespacedName::new("default", "watchman"));

        let resp = app
            .oneshot(
                Request::post("/webhook/alertmanager")
                    .body(Body::from(r#"{"alerts":[{"status":"firing"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["agents"], 1);
        assert_eq!(json["triggered"], 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, "alertmanager");
    }

    #[tokio::test]
    async fn unknown_source_is_still_accepted() {
        let (app, _hub, mut rx) = make_app();
        let resp = app
            .oneshot(
                Request::post("/webhook/unknown")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let json = body_json(resp).await;
        assert_eq!(json["agents"], 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_source_is_bad_request() {
        let (app, _hub, _rx) = make_app();
        let resp = app
            .oneshot(Request::post("/webhook").body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_is_method_not_allowed() {
        let (app, _hub, _rx) = make_app();
        let resp = app
            .oneshot(
                Request::get("/webhook/alertmanager")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (app, _hub, _rx) = make_app();
        let resp = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
