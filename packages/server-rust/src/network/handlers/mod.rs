//! HTTP handler definitions and the shared state extracted by them.

pub mod api;
pub mod health;

pub use api::{important_handler, ImportantRequest, API_PATH};
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use corrlog_core::{Context, SequenceCounter};

use super::config::NetworkConfig;
use super::shutdown::ShutdownController;
use crate::service::ImportantStore;

/// Shared application state passed to handlers and middleware via `State`.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Server-scoped context: the named server logger plus the root
    /// cancellation token. Per-request contexts derive from this.
    pub base: Context,
    /// Graceful-shutdown controller with in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, timeouts, drain grace).
    pub config: Arc<NetworkConfig>,
    /// Issues `request_<n>` ids for the correlation chain.
    pub request_ids: Arc<SequenceCounter>,
    /// The downstream business collaborator behind `POST /api`.
    pub store: Arc<ImportantStore>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
