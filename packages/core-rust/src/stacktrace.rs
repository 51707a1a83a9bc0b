//! On-demand stacktrace capture as structured data.
//!
//! Reserved for abnormal-termination reporting at the recovery boundary.
//! For ordinary failures, wrap errors with a description of the attempted
//! operation instead; accumulated carrier fields already say where in the
//! request the line came from.

use serde::Serialize;
use serde_json::Value;

use crate::carrier::Field;

/// Upper bound on captured frames.
pub const MAX_FRAMES: usize = 256;

/// One resolved call-stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    /// Demangled function name, `<unknown>` when symbols are unavailable.
    pub func: String,
    /// `file:line` of the call site, `<unknown>` when unavailable.
    pub caller: String,
}

/// An immutable, newest-first sequence of call-stack frames.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Stacktrace {
    frames: Vec<Frame>,
}

impl Stacktrace {
    /// Captures the current call stack, newest frame first.
    ///
    /// Frames belonging to the capture machinery itself (this function and
    /// the resolver under it) are excluded, so the first frame points at the
    /// caller. At most [`MAX_FRAMES`] frames are walked.
    #[must_use]
    pub fn capture() -> Self {
        let mut frames = Vec::new();

        backtrace::trace(|frame| {
            if frames.len() >= MAX_FRAMES {
                return false;
            }
            backtrace::resolve_frame(frame, |symbol| {
                let func = symbol
                    .name()
                    .map_or_else(|| "<unknown>".to_string(), |n| n.to_string());
                let caller = match (symbol.filename(), symbol.lineno()) {
                    (Some(file), Some(line)) => format!("{}:{line}", file.display()),
                    _ => "<unknown>".to_string(),
                };
                frames.push(Frame { func, caller });
            });
            true
        });

        let skip = frames
            .iter()
            .position(|f| !is_capture_machinery(&f.func))
            .unwrap_or(frames.len());
        Self {
            frames: frames.split_off(skip),
        }
    }

    /// Captured frames, innermost first.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Number of captured frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when no frames could be resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The trace as a structured `stacktrace` log field.
    #[must_use]
    pub fn field(&self) -> Field {
        Field::any(
            "stacktrace",
            serde_json::to_value(self).unwrap_or(Value::Null),
        )
    }
}

/// Frames introduced by the capture call itself, excluded from the result.
fn is_capture_machinery(func: &str) -> bool {
    func.starts_with("backtrace::") || func.contains("stacktrace::Stacktrace::capture")
}
