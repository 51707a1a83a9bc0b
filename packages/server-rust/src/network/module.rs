//! Server module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the context's cancellation token
//! fires. The split lets callers learn the bound port (OS-assigned when
//! configured as 0) before traffic starts.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::routing::{get, post};
use axum::Router;
use corrlog_core::{Carrier, Context, Field, SequenceCounter};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::config::NetworkConfig;
use super::handlers::{
    health_handler, important_handler, liveness_handler, readiness_handler, AppState, API_PATH,
};
use super::middleware;
use super::shutdown::ShutdownController;
use crate::service::ImportantStore;

/// Manages the HTTP server lifecycle.
pub struct ServerModule {
    config: NetworkConfig,
    base: Context,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    request_ids: Arc<SequenceCounter>,
    store: Arc<ImportantStore>,
}

impl ServerModule {
    /// Creates a new server module without binding any port.
    ///
    /// `base` is the server-scoped context: its bound carrier names every
    /// server log line and its cancellation token ends `serve()`.
    #[must_use]
    pub fn new(config: NetworkConfig, base: Context, store: Arc<ImportantStore>) -> Self {
        Self {
            config,
            base,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            request_ids: Arc::new(SequenceCounter::new("request")),
            store,
        }
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router: routes, correlation chain, transport
    /// layers.
    ///
    /// Routes:
    /// - `POST /api` -- the important-request endpoint
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    #[must_use]
    pub fn build_router(&self) -> Router {
        let state = AppState {
            base: self.base.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            request_ids: Arc::clone(&self.request_ids),
            store: Arc::clone(&self.store),
            start_time: Instant::now(),
        };

        let router = Router::new()
            .route(API_PATH, post(important_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(state.clone());

        middleware::attach(router, &state, &self.config)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured
    /// one when port 0 requested an OS-assigned port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("unable to bind {addr}"))?;
        let port = listener.local_addr().context("listener local address")?.port();

        self.base.logger().info(
            "listener bound",
            &[
                Field::str("host", self.config.host.clone()),
                Field::int("port", i64::from(port)),
            ],
        );

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until the base context is cancelled.
    ///
    /// After cancellation the listener stops accepting, in-flight requests
    /// get the configured grace period to drain, and the accept loop is
    /// force-closed once the grace expires. "Server already closed" races
    /// during this window are expected and suppressed.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(mut self) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .take()
            .expect("start() must be called before serve()");

        let logger = self.base.logger();
        let token = self.base.cancellation().clone();
        let shutdown = Arc::clone(&self.shutdown);
        let grace = self.config.shutdown_grace;

        shutdown.set_ready();

        let server = axum::serve(listener, router)
            .with_graceful_shutdown({
                let token = token.clone();
                async move { token.cancelled().await }
            })
            .into_future();

        tokio::select! {
            result = server => {
                result.context("unable to listen and serve")?;
                // Graceful completion won the race against the drain
                // watcher below; record the terminal state for probes.
                shutdown.trigger_shutdown();
                let _ = shutdown.wait_for_drain(grace).await;
                logger.info("server stopped", &[]);
            }
            () = drain_after_cancel(token, Arc::clone(&shutdown), grace, logger.clone()) => {}
        }

        Ok(())
    }
}

/// Waits for cancellation, then drains in-flight requests for at most
/// `grace`. Returning force-closes the accept loop held by the caller's
/// other select arm.
async fn drain_after_cancel(
    token: CancellationToken,
    shutdown: Arc<ShutdownController>,
    grace: Duration,
    logger: Carrier,
) {
    token.cancelled().await;
    shutdown.trigger_shutdown();

    if shutdown.wait_for_drain(grace).await {
        logger.info("in-flight requests drained", &[]);
    } else {
        logger.warn("shutdown grace expired with requests in flight", &[]);
    }
}
