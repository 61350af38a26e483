use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use serde_json::json;
use shared_telemetry::{LogLevel, Telemetry};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::contracts::{AuditRecord, JokeRequest, JokeResponse};

/// Errors emitted by the audit storage subsystem.
#[derive(Debug, Error)]
pub enum AuditStoreError {
    /// Filesystem I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The session pool stopped admitting sessions.
    #[error("audit session pool is closed")]
    PoolClosed,
}

#[derive(Debug)]
struct StoreInner {
    path: PathBuf,
    writer: Mutex<File>,
    sessions: Arc<Semaphore>,
}

/// Append-only audit log with a bounded session pool.
#[derive(Debug, Clone)]
pub struct AuditStore {
    inner: Arc<StoreInner>,
}

impl AuditStore {
    /// Opens (or creates) the log at `path`, bounding concurrent
    /// sessions to `max_sessions`.
    pub fn open(path: impl Into<PathBuf>, max_sessions: usize) -> Result<Self, AuditStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                writer: Mutex::new(file),
                sessions: Arc::new(Semaphore::new(max_sessions.max(1))),
            }),
        })
    }

    /// Acquires a session from the pool.
    pub async fn begin(&self) -> Result<AuditSession, AuditStoreError> {
        let permit = Arc::clone(&self.inner.sessions)
            .acquire_owned()
            .await
            .map_err(|_| AuditStoreError::PoolClosed)?;
        Ok(AuditSession {
            store: Arc::clone(&self.inner),
            staged: None,
            _permit: permit,
        })
    }

    /// Stops admitting new sessions. Used on shutdown drains.
    pub fn close(&self) {
        self.inner.sessions.close();
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

/// One scoped write: stage a record, then commit. Dropping without
/// commit writes nothing; the pool permit is released either way.
pub struct AuditSession {
    store: Arc<StoreInner>,
    staged: Option<AuditRecord>,
    _permit: OwnedSemaphorePermit,
}

impl AuditSession {
    /// Buffers one record for this session.
    pub fn stage(&mut self, record: AuditRecord) {
        self.staged = Some(record);
    }

    /// Appends the staged record and flushes it to disk.
    pub fn commit(self) -> Result<(), AuditStoreError> {
        let Some(record) = self.staged else {
            return Ok(());
        };
        let mut writer = self.store.writer.lock();
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Best-effort writer owning the audit write path.
///
/// Failures are logged and swallowed; they never reach the caller.
#[derive(Debug, Clone)]
pub struct AuditLogWriter {
    store: AuditStore,
    telemetry: Option<Telemetry>,
}

impl AuditLogWriter {
    /// Creates a writer over the given store.
    #[must_use]
    pub const fn new(store: AuditStore) -> Self {
        Self {
            store,
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Persists one run. Never propagates a storage failure.
    pub async fn record(&self, request: &JokeRequest, joke: &JokeResponse, is_safe: bool) {
        let record = AuditRecord::new(request, joke, is_safe);
        let id = record.id;
        if let Err(err) = self.persist(record).await {
            if let Some(tel) = &self.telemetry {
                let _ = tel.log(
                    LogLevel::Error,
                    "audit.persist.failed",
                    json!({ "topic": request.topic, "reason": err.to_string() }),
                );
            }
        } else if let Some(tel) = &self.telemetry {
            let _ = tel.log(
                LogLevel::Info,
                "audit.persist.ok",
                json!({ "record_id": id.to_string(), "is_safe": is_safe }),
            );
        }
    }

    async fn persist(&self, record: AuditRecord) -> Result<(), AuditStoreError> {
        let mut session = self.store.begin().await?;
        session.stage(record);
        session.commit()
    }
}

/// Read-only view over persisted audit records.
#[derive(Debug, Clone)]
pub struct AuditArchive {
    path: PathBuf,
}

impl AuditArchive {
    /// Creates an archive reader for the given log path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns up to `limit` records, newest first, optionally filtered
    /// by topic (case-insensitive). Malformed lines are skipped.
    pub fn query(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, AuditStoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<AuditRecord>(&line) else {
                continue;
            };
            if let Some(topic) = topic {
                if !record.topic.eq_ignore_ascii_case(topic) {
                    continue;
                }
            }
            records.push(record);
        }
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}
