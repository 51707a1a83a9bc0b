//! The "important call" business collaborator.
//!
//! Stands in for a real downstream dependency: it validates its input and
//! may abort mid-call through an injected fault. The abort is contained
//! inside [`ImportantStore::important_call`] by the panic-safe boundary, so
//! callers only ever see a normal `Result`.

use corrlog_core::{catch_abort, AbortError, Context, Field};

/// Longest accepted payload, in bytes.
pub const MAX_DATA_LENGTH: usize = 40;

/// Errors surfaced by [`ImportantStore::important_call`].
#[derive(Debug, thiserror::Error)]
pub enum ImportantCallError {
    #[error("data is too long: max length: {max}, actual length: {actual}")]
    DataTooLong { max: usize, actual: usize },
    #[error(transparent)]
    Aborted(#[from] AbortError),
}

/// Whether a call aborts through the injected fault.
///
/// A field of the store rather than a global roll, so tests hold a store
/// that never aborts.
#[derive(Debug, Clone, Copy)]
pub enum FaultPolicy {
    /// Abort roughly one call in `denominator`.
    Random { denominator: u32 },
    /// Never abort.
    Never,
}

impl FaultPolicy {
    fn roll(self) -> bool {
        match self {
            Self::Random { denominator } => rand::random::<u32>() % denominator == 0,
            Self::Never => false,
        }
    }
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self::Random { denominator: 4 }
    }
}

/// The downstream "database" the API handler calls into.
#[derive(Debug, Default)]
pub struct ImportantStore {
    fault: FaultPolicy,
}

impl ImportantStore {
    /// Store with the given fault policy.
    #[must_use]
    pub fn new(fault: FaultPolicy) -> Self {
        Self { fault }
    }

    /// Performs the important call against `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ImportantCallError::DataTooLong`] when `data` exceeds
    /// [`MAX_DATA_LENGTH`] (logged at error level before returning), or
    /// [`ImportantCallError::Aborted`] when the injected fault fired and was
    /// recovered at the boundary.
    pub async fn important_call(
        &self,
        ctx: &Context,
        data: &str,
    ) -> Result<(), ImportantCallError> {
        let fault = self.fault;
        catch_abort(ctx, "important call", async move {
            if data.len() > MAX_DATA_LENGTH {
                ctx.logger().error(
                    "data is too long",
                    &[
                        Field::int("max_length", MAX_DATA_LENGTH as i64),
                        Field::int("actual_length", data.len() as i64),
                    ],
                );
                return Err(ImportantCallError::DataTooLong {
                    max: MAX_DATA_LENGTH,
                    actual: data.len(),
                });
            }

            if fault.roll() {
                panic!("aaaaaaaaa!");
            }

            Ok(())
        })
        .await
    }
}
