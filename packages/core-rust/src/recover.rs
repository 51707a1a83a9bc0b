//! The fallible boundary: converts an abnormal termination into a normal
//! error result.
//!
//! [`catch_abort`] is the single place where an unwind becomes an error
//! value. It logs the abort with a stacktrace through the context's bound
//! carrier and hands the caller an [`AbortError`]; normal results, including
//! returned errors, pass through untouched. No retries happen here.

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use futures_util::FutureExt;

use crate::carrier::Field;
use crate::context::Context;
use crate::stacktrace::Stacktrace;

/// A recovered abnormal termination, carrying the abort payload.
#[derive(Debug, Clone, thiserror::Error)]
#[error("panic: {payload}")]
pub struct AbortError {
    /// Textual rendering of the panic payload.
    pub payload: String,
}

thread_local! {
    static ABORT_TRACE: RefCell<Option<Stacktrace>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Installs the process-wide abort-capture hook. Idempotent.
///
/// Rust unwinds the stack before `catch_unwind` observes a panic, so a
/// trace captured at the boundary would point into recovery machinery. The
/// hook runs at the panic site and records the trace into a thread-local
/// slot for [`catch_abort`] to pick up. The hook is quiet: reporting belongs
/// to the boundary, which emits exactly one error line per recovered abort.
pub fn install_panic_capture() {
    INSTALL.call_once(|| {
        panic::set_hook(Box::new(|_info| {
            ABORT_TRACE.with(|slot| *slot.borrow_mut() = Some(Stacktrace::capture()));
        }));
    });
}

fn take_abort_trace() -> Option<Stacktrace> {
    ABORT_TRACE.with(|slot| slot.borrow_mut().take())
}

fn payload_description(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `operation_future`, containing any abnormal termination.
///
/// On an abort: logs `panic` at error level through `ctx`'s carrier with the
/// payload, the attempted operation, and the stacktrace captured at the
/// panic site, then returns an [`AbortError`] converted into the caller's
/// error type. A normal `Ok`/`Err` outcome is returned unchanged.
///
/// # Errors
///
/// Propagates the wrapped operation's own error, or the converted
/// [`AbortError`] after a recovered abort.
pub async fn catch_abort<T, E, F>(ctx: &Context, operation: &str, operation_future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<AbortError>,
{
    match AssertUnwindSafe(operation_future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let payload = payload_description(payload.as_ref());
            let trace = take_abort_trace().unwrap_or_else(Stacktrace::capture);
            ctx.logger().error(
                "panic",
                &[
                    Field::str("operation", operation),
                    Field::str("panic", payload.clone()),
                    trace.field(),
                ],
            );
            Err(AbortError { payload }.into())
        }
    }
}
