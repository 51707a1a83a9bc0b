//! The important-request client loop.
//!
//! Issues one `POST /api` per tick, sequentially, each under a freshly
//! derived trace context so every line the attempt logs carries its own
//! `trace_id` and `entry_id`.

pub mod transport;

pub use transport::TracedTransport;

use std::time::Duration;

use anyhow::Context as _;
use corrlog_core::{Context, CyclingCounter, Field, SequenceCounter};
use uuid::Uuid;

use crate::correlation::{self, ENTRY_ID_FIELD, TRACE_ID_FIELD};
use crate::network::{ImportantRequest, API_PATH};

/// Client-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host the server listens on.
    pub server_host: String,
    /// Port the server listens on.
    pub server_port: u16,
    /// Delay between consecutive important requests.
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8081,
            tick_interval: Duration::from_secs(2),
        }
    }
}

/// Issues important requests on a fixed interval until cancelled.
pub struct ImportantClient {
    config: ClientConfig,
    transport: TracedTransport,
    trace_ids: SequenceCounter,
    entry_ids: CyclingCounter,
}

impl ImportantClient {
    /// Client with its own transport and id counters.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: TracedTransport::new(),
            trace_ids: SequenceCounter::new("trace"),
            entry_ids: CyclingCounter::new(5),
        }
    }

    /// Runs the request loop.
    ///
    /// Cancellation of `ctx` stops the loop cleanly (the current attempt's
    /// outcome is still honored first). Any transport failure is fatal for
    /// the loop and propagates wrapped with the attempted operation.
    ///
    /// # Errors
    ///
    /// Returns the first request failure; never an error on cancellation.
    pub async fn send_important_requests(&self, ctx: &Context) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        // The first tick completes immediately; consume it so the loop
        // paces from one full interval like a wall-clock ticker.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = ctx.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let trace = self.trace_ids.next_label();
                    let ctx = correlation::with_trace_id(ctx, trace.clone());
                    let ctx =
                        ctx.with_logger(ctx.logger().with(Field::str(TRACE_ID_FIELD, trace)));

                    self.send_important_request(&ctx)
                        .await
                        .context("unable to send important request")?;
                }
            }
        }
    }

    async fn send_important_request(&self, ctx: &Context) -> anyhow::Result<()> {
        let entry_id = self.entry_ids.next_value();
        let ctx = ctx.with_logger(ctx.logger().with(Field::int(ENTRY_ID_FIELD, entry_id)));

        let request = ImportantRequest {
            id: entry_id,
            data: important_payload(),
        };
        let body = serde_json::to_vec(&request).context("unable to encode important request")?;

        let url = format!(
            "http://{}:{}{}",
            self.config.server_host, self.config.server_port, API_PATH
        );
        let response = self
            .transport
            .post(&ctx, &url, body)
            .await
            .context("unable to make a request")?;
        let body = response
            .text()
            .await
            .context("unable to read response body")?;

        ctx.logger().info("response", &[Field::str("body", body)]);
        Ok(())
    }
}

/// A UUID payload, tripled half the time so it crosses the server's length
/// limit and exercises the rejection path.
fn important_payload() -> String {
    let mut data = Uuid::new_v4().to_string();
    if rand::random::<u32>() % 2 == 0 {
        data.push_str(&Uuid::new_v4().to_string());
        data.push_str(&Uuid::new_v4().to_string());
    }
    data
}
