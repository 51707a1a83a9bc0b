//! Server networking: configuration, correlation middleware, handlers, and
//! shutdown control.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::NetworkConfig;
pub use handlers::{AppState, ImportantRequest, API_PATH};
pub use module::ServerModule;
pub use shutdown::{HealthState, ShutdownController};
