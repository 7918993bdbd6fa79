//! Abuse Log
//!
//! Audit trail of rejected requests. Writing is a side channel: the guard
//! hands entries off with [`AbuseLogService::log_detached`] and never waits on
//! or reacts to the outcome.
//!
//! Detached entries go through a bounded queue drained by a single writer
//! task. When the queue is full the entry is dropped and counted under
//! `abuse_log_writes_total{status="dropped"}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::metrics;

/// Default number of entries kept in memory
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Default number of detached entries waiting for the writer
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;

/// One rejected request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbuseLogEntry {
    pub id: Uuid,
    pub endpoint: String,
    pub ip: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Abuse log errors
#[derive(Debug, thiserror::Error)]
pub enum AbuseLogError {
    #[error("Abuse log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode abuse log entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for abuse log entries
#[async_trait]
pub trait AbuseLogSink: Send + Sync + fmt::Debug {
    /// Store an entry
    async fn persist(&self, entry: &AbuseLogEntry) -> Result<(), AbuseLogError>;

    /// Newest entries first
    async fn recent(&self, limit: usize) -> Result<Vec<AbuseLogEntry>, AbuseLogError>;

    /// Entries currently held
    async fn count(&self) -> Result<usize, AbuseLogError>;
}

/// Bounded in-memory sink, oldest entries dropped first
#[derive(Debug, Clone)]
pub struct MemoryAbuseLog {
    entries: Arc<RwLock<VecDeque<AbuseLogEntry>>>,
    capacity: usize,
}

impl MemoryAbuseLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryAbuseLog {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

#[async_trait]
impl AbuseLogSink for MemoryAbuseLog {
    async fn persist(&self, entry: &AbuseLogEntry) -> Result<(), AbuseLogError> {
        let mut entries = self.entries.write().await;
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AbuseLogEntry>, AbuseLogError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<usize, AbuseLogError> {
        Ok(self.entries.read().await.len())
    }
}

/// Append-only JSON-lines file sink
///
/// Every entry is appended to the file as one line, then mirrored into a
/// bounded in-memory buffer that serves reads. The file is opened on the
/// first write and held open after that.
#[derive(Debug)]
pub struct JsonlAbuseLog {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
    mirror: MemoryAbuseLog,
}

impl JsonlAbuseLog {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
            mirror: MemoryAbuseLog::new(capacity),
        }
    }

    async fn open(&self) -> Result<tokio::fs::File, AbuseLogError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        debug!("Opened abuse log {:?}", self.path);
        Ok(file)
    }
}

#[async_trait]
impl AbuseLogSink for JsonlAbuseLog {
    async fn persist(&self, entry: &AbuseLogEntry) -> Result<(), AbuseLogError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        {
            // Holding the slot keeps lines whole; a failed write drops the
            // handle so the next entry reopens the file
            let mut slot = self.file.lock().await;
            let mut file = match slot.take() {
                Some(file) => file,
                None => self.open().await?,
            };
            file.write_all(&line).await?;
            file.flush().await?;
            *slot = Some(file);
        }

        self.mirror.persist(entry).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AbuseLogEntry>, AbuseLogError> {
        self.mirror.recent(limit).await
    }

    async fn count(&self) -> Result<usize, AbuseLogError> {
        self.mirror.count().await
    }
}

/// Persist through `sink`, recording the outcome metric
async fn persist_entry(
    sink: &dyn AbuseLogSink,
    entry: &AbuseLogEntry,
) -> Result<(), AbuseLogError> {
    match sink.persist(entry).await {
        Ok(()) => {
            metrics::ABUSE_LOG_WRITES_TOTAL
                .with_label_values(&["ok"])
                .inc();
            debug!("Abuse log entry {} recorded for {}", entry.id, entry.endpoint);
            Ok(())
        }
        Err(e) => {
            metrics::ABUSE_LOG_WRITES_TOTAL
                .with_label_values(&["error"])
                .inc();
            Err(e)
        }
    }
}

/// Drain detached entries into the sink until every sender is gone
async fn run_writer(sink: Arc<dyn AbuseLogSink>, mut queue: mpsc::Receiver<AbuseLogEntry>) {
    while let Some(entry) = queue.recv().await {
        if let Err(e) = persist_entry(sink.as_ref(), &entry).await {
            warn!("Failed to record abuse log entry for {}: {}", entry.endpoint, e);
        }
    }
    debug!("Abuse log writer stopped");
}

/// Records rate-limit violations
#[derive(Debug, Clone)]
pub struct AbuseLogService {
    sink: Arc<dyn AbuseLogSink>,
    clock: Arc<dyn Clock>,
    queue_capacity: usize,
    queue: Arc<OnceLock<mpsc::Sender<AbuseLogEntry>>>,
}

impl AbuseLogService {
    pub fn new(sink: Arc<dyn AbuseLogSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue: Arc::new(OnceLock::new()),
        }
    }

    /// Bound the detached queue; takes effect before the first detached entry
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    fn entry(&self, endpoint: String, ip: String, reason: String) -> AbuseLogEntry {
        AbuseLogEntry {
            id: Uuid::new_v4(),
            endpoint,
            ip,
            reason,
            created_at: self.clock.now(),
        }
    }

    /// Sender side of the writer queue, starting the writer on first use
    fn queue(&self) -> &mpsc::Sender<AbuseLogEntry> {
        self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            tokio::spawn(run_writer(self.sink.clone(), rx));
            tx
        })
    }

    /// Persist a violation and return the stored record
    pub async fn log(
        &self,
        endpoint: &str,
        ip: &str,
        reason: &str,
    ) -> Result<AbuseLogEntry, AbuseLogError> {
        let entry = self.entry(endpoint.to_string(), ip.to_string(), reason.to_string());
        persist_entry(self.sink.as_ref(), &entry).await?;
        Ok(entry)
    }

    /// Queue a violation for the background writer without waiting
    ///
    /// Returns `false` when the entry was dropped because the queue is full.
    /// Write failures are only logged. Must be called from within a Tokio
    /// runtime.
    pub fn log_detached(&self, endpoint: String, ip: String, reason: String) -> bool {
        let entry = self.entry(endpoint, ip, reason);

        match self.queue().try_send(entry) {
            Ok(()) => true,
            Err(TrySendError::Full(entry)) => {
                metrics::ABUSE_LOG_WRITES_TOTAL
                    .with_label_values(&["dropped"])
                    .inc();
                debug!("Abuse log queue full, dropped entry for {}", entry.endpoint);
                false
            }
            Err(TrySendError::Closed(entry)) => {
                metrics::ABUSE_LOG_WRITES_TOTAL
                    .with_label_values(&["dropped"])
                    .inc();
                warn!("Abuse log writer is gone, dropped entry for {}", entry.endpoint);
                false
            }
        }
    }

    /// Newest entries first
    pub async fn recent(&self, limit: usize) -> Result<Vec<AbuseLogEntry>, AbuseLogError> {
        self.sink.recent(limit).await
    }

    /// Entries currently held by the sink
    pub async fn count(&self) -> Result<usize, AbuseLogError> {
        self.sink.count().await
    }
}
