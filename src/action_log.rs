//! Durable mirror of a job's lifecycle
//!
//! Each job gets one local JSON record (so a page reload can show that an
//! operation was in flight) and, best-effort, one remote audit record. Every
//! write failure here is caught and logged at warn level; the batch runner's
//! correctness never depends on audit-log availability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{EndType, Job, JobStatus, JobType};

/// One durable action record, keyed by a client-generated action ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogRecord {
    pub client_action_id: String,
    /// Filled asynchronously once the remote sink acknowledges the record;
    /// its absence never blocks progress
    pub remote_log_id: Option<String>,
    pub job_type: JobType,
    pub estimated_runtime: Duration,
    pub total_items: usize,
    pub processed_items: usize,
    pub status: JobStatus,
    pub end_type: Option<EndType>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Remote audit-log collaborator
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Register the record remotely; returns the remote record's ID
    async fn create(&self, record: &ActionLogRecord) -> Result<String>;

    /// Write the terminal state of the record
    async fn finalize(&self, remote_id: &str, record: &ActionLogRecord) -> Result<()>;
}

/// Creates per-job [`ActionLog`] handles under a shared directory
pub struct ActionLogWriter {
    dir: PathBuf,
    sink: Option<Arc<dyn AuditSink>>,
}

impl ActionLogWriter {
    pub fn new(dir: impl Into<PathBuf>, sink: Option<Arc<dyn AuditSink>>) -> Self {
        Self {
            dir: dir.into(),
            sink,
        }
    }

    /// Create the local record before execution begins and kick off the
    /// best-effort remote registration
    pub async fn begin(&self, job: &Job) -> Arc<ActionLog> {
        let record = ActionLogRecord {
            client_action_id: Uuid::new_v4().to_string(),
            remote_log_id: None,
            job_type: job.job_type,
            estimated_runtime: job.initial_eta,
            total_items: job.total_estimated,
            processed_items: 0,
            status: JobStatus::Running,
            end_type: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };

        let log = Arc::new(ActionLog {
            client_action_id: record.client_action_id.clone(),
            dir: self.dir.clone(),
            sink: self.sink.clone(),
            state: Mutex::new(LogState {
                record,
                finalized: false,
            }),
        });

        log.write_local().await;

        if let Some(sink) = self.sink.clone() {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let record = log.state.lock().await.record.clone();
                match sink.create(&record).await {
                    Ok(remote_id) => {
                        {
                            let mut state = log.state.lock().await;
                            state.record.remote_log_id = Some(remote_id);
                        }
                        log.write_local().await;
                    }
                    Err(e) => warn!(
                        action_id = %log.client_action_id,
                        "remote audit record creation failed: {}", e
                    ),
                }
            });
        }

        log
    }

    /// Read back all local records, newest first; used after a restart to
    /// show operations that were in flight
    pub async fn load_all(&self) -> Result<Vec<ActionLogRecord>> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let content = tokio::fs::read_to_string(entry.path()).await?;
            match serde_json::from_str::<ActionLogRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %entry.path().display(), "skipping unreadable action record: {}", e),
            }
        }

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}

struct LogState {
    record: ActionLogRecord,
    finalized: bool,
}

/// Handle for one job's durable record
pub struct ActionLog {
    client_action_id: String,
    dir: PathBuf,
    sink: Option<Arc<dyn AuditSink>>,
    state: Mutex<LogState>,
}

impl ActionLog {
    pub fn client_action_id(&self) -> &str {
        &self.client_action_id
    }

    fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.client_action_id))
    }

    async fn write_local(&self) {
        let record = self.state.lock().await.record.clone();
        if let Err(e) = persist(&self.path(), &record).await {
            warn!(
                action_id = %self.client_action_id,
                "failed to write local action record: {}", e
            );
        }
    }

    /// Update the progress counter at a batch boundary
    pub async fn progress(&self, processed: usize) {
        {
            let mut state = self.state.lock().await;
            if state.finalized {
                return;
            }
            state.record.processed_items = processed;
        }
        self.write_local().await;
    }

    /// Write the terminal state, exactly once; later calls are ignored
    pub async fn finalize(
        &self,
        status: JobStatus,
        end_type: EndType,
        processed: usize,
        error: Option<String>,
    ) {
        let record = {
            let mut state = self.state.lock().await;
            if state.finalized {
                debug!(
                    action_id = %self.client_action_id,
                    "finalize called twice, ignoring"
                );
                return;
            }
            state.finalized = true;
            state.record.status = status;
            state.record.end_type = Some(end_type);
            state.record.processed_items = processed;
            state.record.error = error;
            state.record.finished_at = Some(Utc::now());
            state.record.clone()
        };

        if let Err(e) = persist(&self.path(), &record).await {
            warn!(
                action_id = %self.client_action_id,
                "failed to finalize local action record: {}", e
            );
        }

        match (&self.sink, &record.remote_log_id) {
            (Some(sink), Some(remote_id)) => {
                if let Err(e) = sink.finalize(remote_id, &record).await {
                    warn!(
                        action_id = %self.client_action_id,
                        "remote audit finalize failed: {}", e
                    );
                }
            }
            (Some(_), None) => debug!(
                action_id = %self.client_action_id,
                "remote audit record never materialized, skipping remote finalize"
            ),
            (None, _) => {}
        }
    }

    /// Current record contents, for tests and status displays
    pub async fn record(&self) -> ActionLogRecord {
        self.state.lock().await.record.clone()
    }
}

async fn persist(path: &Path, record: &ActionLogRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| EngineError::AuditLog(e.to_string()))?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
