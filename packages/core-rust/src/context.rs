//! Execution context threaded by value through every call in a request's
//! lifetime.
//!
//! A [`Context`] carries type-keyed bindings (at most one bound [`Carrier`]
//! among them), a cooperative cancellation token, and an optional deadline.
//! Binding is copy-on-derive: `with_*` returns a new context and the parent
//! keeps its own bindings, so concurrent call trees branching from a common
//! ancestor never observe each other's values.

use std::any::{Any, TypeId};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::carrier::{Carrier, Level, LogSink};

/// Opaque key for a context binding.
///
/// Each binding declares its own (usually private) key type, so unrelated
/// bindings sharing one context cannot collide the way stringly-typed keys
/// would.
pub trait ContextKey: 'static {
    /// The value stored under this key.
    type Value: Send + Sync + 'static;
}

/// One link of the persistent binding chain. Prepending is O(1) and leaves
/// every previously-derived context untouched.
struct Node {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    next: Option<Arc<Node>>,
}

/// Propagatable execution context.
///
/// Cheap to clone (three pointers); pass it by value through call
/// signatures rather than storing it in globals.
#[derive(Clone)]
pub struct Context {
    head: Option<Arc<Node>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Root context: no bindings, no deadline, never cancelled unless its
    /// token is triggered.
    #[must_use]
    pub fn background() -> Self {
        Self {
            head: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derives a context with `value` bound under key `K`.
    ///
    /// The receiver is unmodified. Binding the same key again shadows the
    /// earlier value for the derived chain only.
    #[must_use]
    pub fn with_value<K: ContextKey>(&self, value: K::Value) -> Self {
        Self {
            head: Some(Arc::new(Node {
                key: TypeId::of::<K>(),
                value: Arc::new(value),
                next: self.head.clone(),
            })),
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        }
    }

    /// Resolves the value bound under key `K`, newest binding first.
    #[must_use]
    pub fn value<K: ContextKey>(&self) -> Option<&K::Value> {
        let mut node = self.head.as_deref();
        while let Some(n) = node {
            if n.key == TypeId::of::<K>() {
                return n.value.downcast_ref();
            }
            node = n.next.as_deref();
        }
        None
    }

    /// Derives a context governed by `token` instead of the inherited one.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            head: self.head.clone(),
            cancel: token,
            deadline: self.deadline,
        }
    }

    /// The cancellation token governing this context.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Derives a context that additionally carries a deadline.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            head: self.head.clone(),
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    /// The deadline, if one was set on this chain.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Derives a context with `logger` bound as its carrier.
    #[must_use]
    pub fn with_logger(&self, logger: Carrier) -> Self {
        self.with_value::<LoggerKey>(logger)
    }

    /// The bound carrier, or the process-wide default (no fields, stderr,
    /// Info threshold) when none was ever bound. Never fails.
    #[must_use]
    pub fn logger(&self) -> Carrier {
        self.value::<LoggerKey>()
            .cloned()
            .unwrap_or_else(default_logger)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Private key for the carrier binding.
struct LoggerKey;

impl ContextKey for LoggerKey {
    type Value = Carrier;
}

static DEFAULT_LOGGER: OnceLock<Carrier> = OnceLock::new();

fn default_logger() -> Carrier {
    DEFAULT_LOGGER
        .get_or_init(|| Carrier::new("default", Level::Info, LogSink::stderr()))
        .clone()
}
