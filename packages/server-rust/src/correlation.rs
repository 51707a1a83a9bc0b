//! Shared correlation symbols: wire header names, log field names, and the
//! typed trace-id context binding.
//!
//! Header names live here once, as typed symbols, so the middleware chain
//! and the outbound transport can never drift apart on a literal.

use corrlog_core::{Context, ContextKey};
use http::HeaderName;

/// Carries the trace id from the client to the server.
pub static TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

/// Advisory user attribution supplied by the caller. Unverified.
pub static USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// Log field: client-issued id for one logical operation.
pub const TRACE_ID_FIELD: &str = "trace_id";

/// Log field: server-issued id for one inbound request.
pub const REQUEST_ID_FIELD: &str = "request_id";

/// Log field: caller-supplied user attribution.
pub const USER_ID_FIELD: &str = "user_id";

/// Log field: id of one business-level unit of work.
pub const ENTRY_ID_FIELD: &str = "entry_id";

/// Private key for the trace-id binding.
struct TraceIdKey;

impl ContextKey for TraceIdKey {
    type Value = String;
}

/// Derives a context carrying `trace` as its trace id.
#[must_use]
pub fn with_trace_id(ctx: &Context, trace: String) -> Context {
    ctx.with_value::<TraceIdKey>(trace)
}

/// The trace id bound to this context chain, if any.
#[must_use]
pub fn trace_id(ctx: &Context) -> Option<&str> {
    ctx.value::<TraceIdKey>().map(String::as_str)
}
