//! Correlation middleware chain for inbound requests.
//!
//! Each stage reads one correlation source (an injected counter or an
//! inbound header), derives a carrier layering in its field, and rebinds
//! the enriched context into the request's extensions before calling the
//! next stage. The next stage always sees the new context, never the
//! original. No stage rejects a request: absent headers degrade to
//! empty-string fields.

use axum::extract::{Request, State};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::Router;
use corrlog_core::{Context, Field};
use http::HeaderName;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use super::config::NetworkConfig;
use super::handlers::AppState;
use crate::correlation::{
    REQUEST_ID_FIELD, TRACE_ID_FIELD, TRACE_ID_HEADER, USER_ID_FIELD, USER_ID_HEADER,
};

/// Applies the transport layers and the correlation chain to `router`.
///
/// **Ordering (outermost to innermost):**
/// 1. `Timeout` -- bounds request processing time
/// 2. `track_in_flight` -- counts the request for the graceful drain
/// 3. `request_id_stage` -- server-issued `request_<n>`
/// 4. `trace_id_stage` -- inbound `X-TRACE-ID`
/// 5. `authentication_stage` -- inbound `X-USER-ID` (advisory)
#[must_use]
pub fn attach(router: Router, state: &AppState, config: &NetworkConfig) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(TimeoutLayer::new(config.request_timeout))
            .layer(from_fn_with_state(state.clone(), track_in_flight))
            .layer(from_fn_with_state(state.clone(), request_id_stage))
            .layer(from_fn_with_state(state.clone(), trace_id_stage))
            .layer(from_fn_with_state(state.clone(), authentication_stage)),
    )
}

/// The context an earlier stage bound, or the server's base context for
/// the outermost stage.
fn request_context(req: &Request, state: &AppState) -> Context {
    req.extensions()
        .get::<Context>()
        .cloned()
        .unwrap_or_else(|| state.base.clone())
}

/// Header value as a string; empty when absent or not valid UTF-8.
fn header_value(req: &Request, name: &HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Counts the request in the shutdown controller for the drain phase.
///
/// The guard is held across the rest of the chain and drops even when a
/// handler unwinds.
pub async fn track_in_flight(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let _guard = state.shutdown.in_flight_guard();
    next.run(req).await
}

/// Binds a server-issued `request_id` field into the request context.
pub async fn request_id_stage(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = request_context(&req, &state);
    let request_id = state.request_ids.next_label();
    let ctx = ctx.with_logger(ctx.logger().with(Field::str(REQUEST_ID_FIELD, request_id)));

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// Binds the inbound `X-TRACE-ID` header as the `trace_id` field.
pub async fn trace_id_stage(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace_id = header_value(&req, &TRACE_ID_HEADER);

    let ctx = request_context(&req, &state);
    let ctx = ctx.with_logger(ctx.logger().with(Field::str(TRACE_ID_FIELD, trace_id)));

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// Binds the inbound `X-USER-ID` header as the `user_id` field.
///
/// Advisory attribution only: the value is unverified and an absent header
/// is not an authentication failure. Access control belongs to an outer
/// layer this service does not carry.
pub async fn authentication_stage(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let user_id = header_value(&req, &USER_ID_HEADER);

    let ctx = request_context(&req, &state);
    let ctx = ctx.with_logger(ctx.logger().with(Field::str(USER_ID_FIELD, user_id)));

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use axum::body::Body;
    use axum::routing::get;
    use axum::Extension;
    use corrlog_core::{Carrier, Level, LogSink, MemorySink, SequenceCounter};
    use tower::ServiceExt;

    use crate::service::{FaultPolicy, ImportantStore};

    use super::*;

    async fn probe(Extension(ctx): Extension<Context>) -> &'static str {
        ctx.logger().info("probe", &[]);
        "ok"
    }

    async fn in_flight_probe(State(state): State<AppState>) -> String {
        state.shutdown.in_flight_count().to_string()
    }

    fn test_state() -> (AppState, MemorySink) {
        let (sink, handle) = LogSink::memory();
        let state = AppState {
            base: Context::background()
                .with_logger(Carrier::new("server", Level::Debug, sink)),
            shutdown: Arc::new(super::super::shutdown::ShutdownController::new()),
            config: Arc::new(NetworkConfig::default()),
            request_ids: Arc::new(SequenceCounter::new("request")),
            store: Arc::new(ImportantStore::new(FaultPolicy::Never)),
            start_time: Instant::now(),
        };
        (state, handle)
    }

    fn probe_router(state: &AppState) -> Router {
        let router = Router::new()
            .route("/probe", get(probe))
            .route("/inflight", get(in_flight_probe))
            .with_state(state.clone());
        attach(router, state, &NetworkConfig::default())
    }

    fn probe_request(headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/probe");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn probe_line(headers: &[(&str, &str)]) -> serde_json::Value {
        let (state, handle) = test_state();
        let response = probe_router(&state)
            .oneshot(probe_request(headers))
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        serde_json::from_str(&handle.lines()[0]).unwrap()
    }

    #[tokio::test]
    async fn chain_accumulates_all_fields() {
        let line =
            probe_line(&[("x-trace-id", "trace_42"), ("x-user-id", "user_7")]).await;

        assert_eq!(line["request_id"], "request_0");
        assert_eq!(line["trace_id"], "trace_42");
        assert_eq!(line["user_id"], "user_7");
    }

    #[tokio::test]
    async fn missing_headers_become_empty_fields() {
        let line = probe_line(&[]).await;

        assert_eq!(line["trace_id"], "");
        assert_eq!(line["user_id"], "");
        assert_eq!(line["request_id"], "request_0");
    }

    #[tokio::test]
    async fn fields_appear_in_chain_order() {
        let (state, handle) = test_state();
        let _ = probe_router(&state)
            .oneshot(probe_request(&[("x-trace-id", "t"), ("x-user-id", "u")]))
            .await
            .unwrap();

        let raw = handle.lines().remove(0);
        let request = raw.find("request_id").unwrap();
        let trace = raw.find("trace_id").unwrap();
        let user = raw.find("user_id").unwrap();
        assert!(request < trace && trace < user);
    }

    #[tokio::test]
    async fn chain_is_deterministic_across_runs() {
        let headers = [("x-trace-id", "trace_9"), ("x-user-id", "alice")];
        let first = probe_line(&headers).await;
        let second = probe_line(&headers).await;
        // Fresh state per run: identical headers yield identical fields.
        assert_eq!(first["request_id"], second["request_id"]);
        assert_eq!(first["trace_id"], second["trace_id"]);
        assert_eq!(first["user_id"], second["user_id"]);
    }

    #[tokio::test]
    async fn request_ids_increment_per_request() {
        let (state, handle) = test_state();

        for _ in 0..2 {
            let _ = probe_router(&state)
                .oneshot(probe_request(&[]))
                .await
                .unwrap();
        }

        let lines = handle.lines();
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(first["request_id"], "request_0");
        assert_eq!(second["request_id"], "request_1");
    }

    #[tokio::test]
    async fn requests_are_counted_while_in_flight() {
        let (state, _handle) = test_state();
        let response = probe_router(&state)
            .oneshot(
                Request::builder()
                    .uri("/inflight")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"1");
        assert_eq!(state.shutdown.in_flight_count(), 0);
    }
}
