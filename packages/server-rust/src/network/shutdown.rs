//! Graceful-shutdown coordination for the request server.
//!
//! Tracks in-flight requests through RAII guards around an atomic counter
//! and exposes a health state via `ArcSwap` for lock-free reads from the
//! probe handlers. Cancellation itself arrives through the server context's
//! token; this controller only answers "is anything still running" during
//! the bounded drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

/// Server lifecycle state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Server is initializing (not yet accepting requests).
    Starting,
    /// Server is accepting requests.
    Ready,
    /// Shutdown requested; in-flight requests are draining.
    Draining,
    /// All in-flight requests completed.
    Stopped,
}

impl HealthState {
    /// Lowercase name reported by the health endpoint.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates the drain phase of a graceful shutdown.
#[derive(Debug)]
pub struct ShutdownController {
    in_flight: Arc<AtomicU64>,
    health: ArcSwap<HealthState>,
}

impl ShutdownController {
    /// New controller in the `Starting` state with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicU64::new(0)),
            health: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    /// Marks the server ready to accept requests.
    pub fn set_ready(&self) {
        self.health.store(Arc::new(HealthState::Ready));
    }

    /// Marks the server draining. New requests should no longer be routed
    /// here (readiness turns 503); in-flight requests run to completion.
    pub fn trigger_shutdown(&self) {
        self.health.store(Arc::new(HealthState::Draining));
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health.load()
    }

    /// RAII guard counting one in-flight request.
    ///
    /// The counter decrements when the guard drops, including during an
    /// unwind, so a panicking handler never leaks an in-flight slot.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits up to `grace` for in-flight requests to complete.
    ///
    /// Returns `true` once everything drained (state becomes `Stopped`);
    /// `false` when the grace period expired first (state stays
    /// `Draining` and the caller decides whether to force-close).
    pub async fn wait_for_drain(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.health.store(Arc::new(HealthState::Stopped));
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            // 10ms poll granularity; the grace period is measured in seconds.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`ShutdownController::in_flight_guard`].
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_progression() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);

        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);

        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
    }

    #[test]
    fn guards_track_in_flight_count() {
        let controller = ShutdownController::new();
        assert_eq!(controller.in_flight_count(), 0);

        let first = controller.in_flight_guard();
        let second = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(first);
        assert_eq!(controller.in_flight_count(), 1);
        drop(second);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn drain_completes_immediately_when_idle() {
        let controller = ShutdownController::new();
        controller.set_ready();
        controller.trigger_shutdown();

        assert!(controller.wait_for_drain(Duration::from_secs(1)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn drain_waits_for_outstanding_requests() {
        let controller = ShutdownController::new();
        controller.set_ready();

        let guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn drain_gives_up_after_grace() {
        let controller = ShutdownController::new();
        controller.set_ready();

        let _guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
    }
}
