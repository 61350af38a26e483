#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines telemetry shared across the Quipline crates.

use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Log severity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Warning indicator.
    Warn,
    /// Error indicator.
    Error,
}

impl LogLevel {
    /// Uppercase wire label for the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// Structured log record emitted by a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Service emitting the record.
    pub service: String,
    /// Severity.
    pub level: LogLevel,
    /// Dotted event name, e.g. `pipeline.generate.start`.
    pub event: String,
    /// Arbitrary JSON payload carrying event context.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, Value>,
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(service: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            service: service.into(),
            level,
            event: event.into(),
            fields: serde_json::Map::new(),
        }
    }
}

/// Append-only JSON-lines file sink.
#[derive(Debug)]
pub struct JsonLineSink {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonLineSink {
    /// Creates or opens a sink at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Appends a record as one JSON line.
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Returns the underlying file path (useful for tests).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Process-local monotonically increasing counters.
#[derive(Debug, Default)]
pub struct Counters {
    values: Mutex<BTreeMap<String, u64>>,
}

impl Counters {
    /// Increments a counter by one.
    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    /// Adds `amount` to a counter, creating it at zero if absent.
    pub fn add(&self, name: &str, amount: u64) {
        let mut values = self.values.lock();
        let entry = values.entry(name.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.values.lock().clone()
    }
}

/// Shared telemetry handle: leveled structured logs plus counters.
///
/// Cheap to clone; all clones feed the same sink and counter registry.
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    service: String,
    sink: Option<JsonLineSink>,
    echo_stderr: bool,
    counters: Counters,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("service", &self.inner.service)
            .finish()
    }
}

impl Telemetry {
    /// Returns a builder for the given service label.
    #[must_use]
    pub fn builder(service: impl Into<String>) -> TelemetryBuilder {
        TelemetryBuilder::new(service)
    }

    /// Logs a structured record to the configured sinks.
    pub fn log(&self, level: LogLevel, event: &str, fields: Value) -> Result<()> {
        let mut record = LogRecord::new(&self.inner.service, level, event);
        if let Some(object) = fields.as_object() {
            record.fields = object.clone();
        }
        if self.inner.echo_stderr {
            eprintln!(
                "[{}] {} {} {}",
                record.level.as_str(),
                record.service,
                record.event,
                Value::Object(record.fields.clone())
            );
        }
        if let Some(sink) = &self.inner.sink {
            sink.append(&record)?;
        }
        Ok(())
    }

    /// Increments a named counter.
    pub fn incr(&self, counter: &str) {
        self.inner.counters.incr(counter);
    }

    /// Snapshot of all counters.
    #[must_use]
    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.inner.counters.snapshot()
    }

    /// Service label this handle was built for.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.inner.service
    }
}

/// Builder configuring telemetry sinks.
pub struct TelemetryBuilder {
    service: String,
    log_path: Option<PathBuf>,
    echo_stderr: bool,
}

impl TelemetryBuilder {
    /// Creates a new builder for the given service label.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            log_path: None,
            echo_stderr: false,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Echoes every record to stderr in addition to the file sink.
    #[must_use]
    pub const fn echo_stderr(mut self) -> Self {
        self.echo_stderr = true;
        self
    }

    /// Finalizes the builder.
    pub fn build(self) -> Result<Telemetry> {
        let sink = match self.log_path {
            Some(path) => Some(JsonLineSink::new(path)?),
            None => None,
        };
        Ok(Telemetry {
            inner: Arc::new(TelemetryInner {
                service: self.service,
                sink,
                echo_stderr: self.echo_stderr,
                counters: Counters::default(),
            }),
        })
    }
}
