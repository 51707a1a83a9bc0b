//! End-to-end exercise of the server over a real socket, driven through the
//! traced client transport.

use std::sync::Arc;

use corrlog_core::{Carrier, Context, Level, LogSink, MemorySink};
use corrlog_server::client::TracedTransport;
use corrlog_server::correlation;
use corrlog_server::network::{ImportantRequest, NetworkConfig, ServerModule};
use corrlog_server::service::{FaultPolicy, ImportantStore};
use tokio_util::sync::CancellationToken;

async fn start_server() -> (
    u16,
    tokio::task::JoinHandle<anyhow::Result<()>>,
    CancellationToken,
    MemorySink,
) {
    let (sink, logs) = LogSink::memory();
    let token = CancellationToken::new();
    let base = Context::background()
        .with_cancellation(token.clone())
        .with_logger(Carrier::new("server", Level::Debug, sink));
    let config = NetworkConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..NetworkConfig::default()
    };
    let mut module = ServerModule::new(
        config,
        base,
        Arc::new(ImportantStore::new(FaultPolicy::Never)),
    );
    let port = module.start().await.expect("bind ephemeral port");
    let serving = tokio::spawn(module.serve());
    (port, serving, token, logs)
}

#[tokio::test]
async fn api_round_trip_with_propagated_trace() {
    let (port, serving, token, logs) = start_server().await;
    let transport = TracedTransport::new();
    let url = format!("http://127.0.0.1:{port}/api");

    let ctx = correlation::with_trace_id(&Context::background(), "trace_9".to_string());

    let body = serde_json::to_vec(&ImportantRequest {
        id: 3,
        data: "x".to_string(),
    })
    .unwrap();
    let response = transport.post(&ctx, &url, body).await.expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");

    let oversize = serde_json::to_vec(&ImportantRequest {
        id: 4,
        data: "x".repeat(41),
    })
    .unwrap();
    let response = transport.post(&ctx, &url, oversize).await.expect("request");
    assert_eq!(response.status(), 500);
    assert_eq!(
        response.text().await.unwrap(),
        "data is too long: max length: 40, actual length: 41"
    );

    token.cancel();
    serving.await.expect("serve task").expect("clean shutdown");

    // Every server line in the request's lifetime carried the accumulated
    // correlation fields, including the trace id sent over the wire.
    let joined = logs.contents();
    assert!(joined.contains(r#""trace_id":"trace_9""#));
    assert!(joined.contains(r#""request_id":"request_0""#));
    assert!(joined.contains(r#""request_id":"request_1""#));
    assert!(joined.contains(r#""user_id":"""#));
    assert!(joined.contains(r#""msg":"success""#));
}

#[tokio::test]
async fn malformed_body_surfaces_as_500() {
    let (port, serving, token, _logs) = start_server().await;
    let transport = TracedTransport::new();
    let url = format!("http://127.0.0.1:{port}/api");

    let response = transport
        .post(&Context::background(), &url, b"{not json".to_vec())
        .await
        .expect("request");
    assert_eq!(response.status(), 500);
    assert!(!response.text().await.unwrap().is_empty());

    token.cancel();
    serving.await.expect("serve task").expect("clean shutdown");
}

#[tokio::test]
async fn health_endpoints_respond() {
    let (port, serving, token, _logs) = start_server().await;
    let http = reqwest::Client::new();

    let health = http
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .expect("health");
    assert_eq!(health.status(), 200);
    let body: serde_json::Value = health.json().await.expect("health json");
    assert_eq!(body["state"], "ready");

    let ready = http
        .get(format!("http://127.0.0.1:{port}/health/ready"))
        .send()
        .await
        .expect("ready");
    assert_eq!(ready.status(), 200);

    token.cancel();
    serving.await.expect("serve task").expect("clean shutdown");
}
