//! Immutable structured-logging carrier.
//!
//! A [`Carrier`] is a named logger holding an ordered set of accumulated
//! fields. Adding a field never mutates the carrier it was added to:
//! [`Carrier::with`] returns a new value and the original stays valid, so
//! concurrent request handlers can branch their own field chains without
//! locks or cross-talk.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Severity threshold and per-line level.
///
/// Ordered so that `Debug < Info < Warn < Error`; a carrier drops lines
/// below its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Lowercase name used in the emitted `level` field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Error returned when parsing a [`Level`] from a string fails.
#[derive(Debug, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

/// A single structured field: a name paired with a string, integer, or
/// arbitrary JSON value.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    value: FieldValue,
}

/// Value variants a [`Field`] can carry.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Json(Value),
}

impl Field {
    /// String-valued field.
    pub fn str(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Str(value.into()),
        }
    }

    /// Integer-valued field.
    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Int(value),
        }
    }

    /// Structured field carrying any JSON value.
    pub fn any(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Json(value),
        }
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn to_json(&self) -> Value {
        match &self.value {
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Json(v) => v.clone(),
        }
    }
}

/// Shared destination for emitted log lines.
///
/// Cloning a sink shares the underlying writer; a mutex serializes whole
/// lines so concurrent emitters never interleave bytes.
#[derive(Clone)]
pub struct LogSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LogSink {
    /// Sink writing to the process standard error stream.
    #[must_use]
    pub fn stderr() -> Self {
        Self::from_writer(std::io::stderr())
    }

    /// Sink writing to an arbitrary writer.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// In-memory sink plus a handle for reading back what was written.
    /// Used by tests to assert on emitted lines.
    #[must_use]
    pub fn memory() -> (Self, MemorySink) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handle = MemorySink {
            buf: Arc::clone(&buf),
        };
        (Self::from_writer(SharedBuf(buf)), handle)
    }

    fn write_line(&self, line: &str) {
        let mut writer = self.writer.lock();
        // A failed write leaves nowhere to report the failure to.
        let _ = writeln!(writer, "{line}");
        let _ = writer.flush();
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogSink")
    }
}

/// Read handle for a [`LogSink::memory`] sink.
#[derive(Clone)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Everything written so far, as UTF-8.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    /// Written content split into lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Named, immutable, field-accumulating structured logger.
///
/// Emits one JSON object per line containing `ts`, `logger`, `level`, `msg`,
/// every accumulated field (in derivation order, latest duplicate winning),
/// and any per-call extra fields.
#[derive(Debug, Clone)]
pub struct Carrier {
    name: Arc<str>,
    threshold: Level,
    fields: Arc<Vec<Field>>,
    sink: LogSink,
}

impl Carrier {
    /// New carrier with no accumulated fields.
    #[must_use]
    pub fn new(name: &str, threshold: Level, sink: LogSink) -> Self {
        Self {
            name: Arc::from(name),
            threshold,
            fields: Arc::new(Vec::new()),
            sink,
        }
    }

    /// Derives a new carrier with all of this carrier's fields plus `field`.
    ///
    /// The receiver is unaffected. A duplicate field name is not an error:
    /// lines emitted through the derived carrier observe the newer value.
    #[must_use]
    pub fn with(&self, field: Field) -> Self {
        let mut fields = Vec::with_capacity(self.fields.len() + 1);
        fields.extend(self.fields.iter().cloned());
        fields.push(field);
        Self {
            name: Arc::clone(&self.name),
            threshold: self.threshold,
            fields: Arc::new(fields),
            sink: self.sink.clone(),
        }
    }

    /// The logger name emitted on every line.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The minimum level this carrier emits.
    #[must_use]
    pub fn threshold(&self) -> Level {
        self.threshold
    }

    /// Accumulated fields, in derivation order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Emits one line at `level`, dropping it below the threshold.
    pub fn log(&self, level: Level, msg: &str, extra: &[Field]) {
        if level < self.threshold {
            return;
        }

        let mut record = Map::new();
        record.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        record.insert("logger".to_string(), Value::String(self.name.to_string()));
        record.insert(
            "level".to_string(),
            Value::String(level.as_str().to_string()),
        );
        record.insert("msg".to_string(), Value::String(msg.to_string()));

        // Insertion into the ordered map replaces the value in place, which
        // is exactly the shadowing contract: latest duplicate wins.
        for field in self.fields.iter().chain(extra) {
            record.insert(field.name.clone(), field.to_json());
        }

        match serde_json::to_string(&Value::Object(record)) {
            Ok(line) => self.sink.write_line(&line),
            Err(_) => self.sink.write_line(&format!(
                "{{\"logger\":\"{}\",\"level\":\"error\",\"msg\":\"unencodable log record\"}}",
                self.name
            )),
        }
    }

    /// Debug-level line.
    pub fn debug(&self, msg: &str, extra: &[Field]) {
        self.log(Level::Debug, msg, extra);
    }

    /// Info-level line.
    pub fn info(&self, msg: &str, extra: &[Field]) {
        self.log(Level::Info, msg, extra);
    }

    /// Warn-level line.
    pub fn warn(&self, msg: &str, extra: &[Field]) {
        self.log(Level::Warn, msg, extra);
    }

    /// Error-level line.
    pub fn error(&self, msg: &str, extra: &[Field]) {
        self.log(Level::Error, msg, extra);
    }
}
