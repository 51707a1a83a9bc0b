//! Trace-propagating outbound transport.
//!
//! Wraps the shared `reqwest` client and sets `X-TRACE-ID` from the
//! outbound context before delegating. The wrapper is stateless besides the
//! wrapped client, so concurrent callers can share one instance freely.

use corrlog_core::Context;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};

use crate::correlation::{self, TRACE_ID_HEADER};

/// Outbound HTTP transport that propagates the context's trace id.
#[derive(Debug, Clone, Default)]
pub struct TracedTransport {
    http: reqwest::Client,
}

impl TracedTransport {
    /// Transport over a fresh `reqwest` client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport over an existing client (shared connection pool).
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// POSTs `body` as JSON to `url` with the trace id injected.
    ///
    /// # Errors
    ///
    /// Returns the underlying transport error when the request cannot be
    /// sent or the connection fails.
    pub async fn post(
        &self,
        ctx: &Context,
        url: &str,
        body: Vec<u8>,
    ) -> reqwest::Result<reqwest::Response> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        inject_trace_id(ctx, &mut headers);

        self.http.post(url).headers(headers).body(body).send().await
    }
}

/// Sets `X-TRACE-ID` on `headers` from the context's trace binding.
///
/// An unbound trace id becomes an empty header value, never an error: the
/// server accepts empty correlation fields by design.
pub fn inject_trace_id(ctx: &Context, headers: &mut HeaderMap) {
    let trace = correlation::trace_id(ctx).unwrap_or_default();
    let value = HeaderValue::from_str(trace).unwrap_or_else(|_| HeaderValue::from_static(""));
    headers.insert(TRACE_ID_HEADER.clone(), value);
}
