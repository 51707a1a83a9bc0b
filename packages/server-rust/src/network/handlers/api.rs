//! The important-request endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use bytes::Bytes;
use corrlog_core::{Context, Field};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::correlation::ENTRY_ID_FIELD;

/// Route serving important requests.
pub const API_PATH: &str = "/api";

/// Wire shape of one important request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportantRequest {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Data")]
    pub data: String,
}

/// Handles `POST /api`.
///
/// Decode failures and business errors both surface as `500` with the
/// error's own description as the body; the handler logs them through the
/// request's accumulated carrier first. Success responds `200` with `ok`.
pub async fn important_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<Context>>,
    body: Bytes,
) -> Response {
    // The correlation chain binds a context into the request; fall back to
    // the server's base context when the handler runs without the chain.
    let ctx = ctx.map_or_else(|| state.base.clone(), |Extension(ctx)| ctx);

    let request: ImportantRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            ctx.logger().error(
                "unable to decode important request",
                &[Field::str("error", err.to_string())],
            );
            return error_response(&err.to_string());
        }
    };

    let ctx = ctx.with_logger(ctx.logger().with(Field::int(ENTRY_ID_FIELD, request.id)));

    if let Err(err) = state.store.important_call(&ctx, &request.data).await {
        ctx.logger().error(
            "unable to make an important call",
            &[Field::str("error", err.to_string())],
        );
        return error_response(&err.to_string());
    }

    ctx.logger().info(
        "success",
        &[Field::any(
            "req",
            serde_json::to_value(&request).unwrap_or(serde_json::Value::Null),
        )],
    );

    (StatusCode::OK, "ok").into_response()
}

fn error_response(message: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use axum::body::Body;
    use axum::extract::Request;
    use axum::routing::post;
    use axum::Router;
    use corrlog_core::{Carrier, Level, LogSink, MemorySink, SequenceCounter};
    use tower::ServiceExt;

    use crate::network::config::NetworkConfig;
    use crate::network::shutdown::ShutdownController;
    use crate::service::{FaultPolicy, ImportantStore, MAX_DATA_LENGTH};

    use super::*;

    fn test_router() -> (Router, MemorySink) {
        let (sink, handle) = LogSink::memory();
        let state = AppState {
            base: Context::background()
                .with_logger(Carrier::new("server", Level::Debug, sink)),
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(NetworkConfig::default()),
            request_ids: Arc::new(SequenceCounter::new("request")),
            store: Arc::new(ImportantStore::new(FaultPolicy::Never)),
            start_time: Instant::now(),
        };
        (
            Router::new()
                .route(API_PATH, post(important_handler))
                .with_state(state),
            handle,
        )
    }

    fn post_api(body: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri(API_PATH)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn valid_request_responds_ok() {
        let (router, handle) = test_router();
        let response = router
            .oneshot(post_api(r#"{"ID":3,"Data":"x"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");

        let line: serde_json::Value = serde_json::from_str(&handle.lines()[0]).unwrap();
        assert_eq!(line["msg"], "success");
        assert_eq!(line["entry_id"], 3);
        assert_eq!(line["req"]["ID"], 3);
        assert_eq!(line["req"]["Data"], "x");
    }

    #[tokio::test]
    async fn oversize_data_responds_500_with_description() {
        let (router, _handle) = test_router();
        let data = "x".repeat(MAX_DATA_LENGTH + 1);
        let response = router
            .oneshot(post_api(&format!(r#"{{"ID":1,"Data":"{data}"}}"#)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response).await,
            "data is too long: max length: 40, actual length: 41"
        );
    }

    #[tokio::test]
    async fn malformed_body_responds_500() {
        let (router, handle) = test_router();
        let response = router.oneshot(post_api("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body_text(response).await.is_empty());

        let line: serde_json::Value = serde_json::from_str(&handle.lines()[0]).unwrap();
        assert_eq!(line["msg"], "unable to decode important request");
        assert_eq!(line["level"], "error");
    }

    #[tokio::test]
    async fn business_error_is_logged_with_entry_id() {
        let (router, handle) = test_router();
        let data = "x".repeat(MAX_DATA_LENGTH + 1);
        let _ = router
            .oneshot(post_api(&format!(r#"{{"ID":2,"Data":"{data}"}}"#)))
            .await
            .unwrap();

        // Both the store's rejection line and the handler's error line
        // carry the derived entry_id.
        for raw in handle.lines() {
            let line: serde_json::Value = serde_json::from_str(&raw).unwrap();
            assert_eq!(line["entry_id"], 2);
        }
    }
}
