//! Network configuration for the corrlog server.

use std::time::Duration;

/// Top-level network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// How long in-flight requests may keep running after shutdown is
    /// requested before the server force-closes.
    pub shutdown_grace: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}
