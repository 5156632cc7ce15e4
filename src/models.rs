//! Core data structures for queued bulk operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::query::FilterRules;

/// Identifier assigned to a job at enqueue time
pub type JobId = Uuid;

/// The kind of bulk operation a job performs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Analysis,
    Delete,
    ModifyLabel,
    DeleteWithExceptions,
    CreateFilter,
}

/// Job lifecycle status
///
/// `Queued -> Running -> {Completed | Failed | Cancelled}`; terminal states
/// are immutable and kept in history until explicitly cleared.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// How a finished job ended, mirrored into the action log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndType {
    Success,
    Failure,
    Cancelled,
}

/// One sender to process within a job; read-only input, never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub address: String,
    /// Cached per-sender message count from the last analysis, used for
    /// progress percentages and the initial ETA
    pub estimated_count: usize,
}

impl Target {
    pub fn new(address: impl Into<String>, estimated_count: usize) -> Self {
        Self {
            address: address.into(),
            estimated_count,
        }
    }
}

/// Whether a label operation adds or removes the labels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LabelAction {
    Add,
    Remove,
}

/// Type-specific immutable job data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    Analysis {
        targets: Vec<Target>,
    },
    Delete {
        targets: Vec<Target>,
    },
    ModifyLabel {
        targets: Vec<Target>,
        label_ids: Vec<String>,
        action: LabelAction,
    },
    DeleteWithExceptions {
        targets: Vec<Target>,
        /// Messages matching these rules are kept; everything else from the
        /// targets is deleted
        exceptions: FilterRules,
    },
    CreateFilter {
        senders: Vec<String>,
        add_label_ids: Vec<String>,
        remove_label_ids: Vec<String>,
    },
}

impl JobPayload {
    /// The job type this payload belongs to
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::Analysis { .. } => JobType::Analysis,
            JobPayload::Delete { .. } => JobType::Delete,
            JobPayload::ModifyLabel { .. } => JobType::ModifyLabel,
            JobPayload::DeleteWithExceptions { .. } => JobType::DeleteWithExceptions,
            JobPayload::CreateFilter { .. } => JobType::CreateFilter,
        }
    }

    /// Total estimated item count across all targets
    ///
    /// Filter creation is a single call, counted as one item so progress
    /// still reads 0% -> 100%.
    pub fn total_estimated(&self) -> usize {
        match self {
            JobPayload::Analysis { targets }
            | JobPayload::Delete { targets }
            | JobPayload::ModifyLabel { targets, .. }
            | JobPayload::DeleteWithExceptions { targets, .. } => {
                targets.iter().map(|t| t.estimated_count).sum()
            }
            JobPayload::CreateFilter { .. } => 1,
        }
    }

    /// Reject structurally invalid payloads before any network activity
    pub fn validate(&self) -> Result<()> {
        match self {
            JobPayload::Analysis { targets }
            | JobPayload::Delete { targets }
            | JobPayload::DeleteWithExceptions { targets, .. } => {
                if targets.is_empty() {
                    return Err(EngineError::Validation(
                        "at least one target sender is required".to_string(),
                    ));
                }
            }
            JobPayload::ModifyLabel {
                targets, label_ids, ..
            } => {
                if targets.is_empty() {
                    return Err(EngineError::Validation(
                        "at least one target sender is required".to_string(),
                    ));
                }
                if label_ids.is_empty() {
                    return Err(EngineError::Validation(
                        "at least one label id is required".to_string(),
                    ));
                }
            }
            JobPayload::CreateFilter {
                senders,
                add_label_ids,
                remove_label_ids,
            } => {
                if senders.is_empty() {
                    return Err(EngineError::Validation(
                        "at least one sender is required for a filter".to_string(),
                    ));
                }
                if add_label_ids.is_empty() && remove_label_ids.is_empty() {
                    return Err(EngineError::Validation(
                        "a filter must add or remove at least one label".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A unit of queued work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// ETA computed at enqueue time, before any progress exists
    pub initial_eta: Duration,
    pub total_estimated: usize,
    /// Items processed by the time the job reached a terminal state
    pub processed: usize,
    pub error: Option<String>,
    /// Per-sender message tallies, filled by analysis jobs only
    pub analysis: Option<HashMap<String, usize>>,
}

impl Job {
    pub fn new(payload: JobPayload, initial_eta: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: payload.job_type(),
            total_estimated: payload.total_estimated(),
            payload,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            finished_at: None,
            initial_eta,
            processed: 0,
            error: None,
            analysis: None,
        }
    }
}

/// Point-in-time view of a running (or finished) job, consumed by UI
/// subscribers and the action-log writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub percent_complete: f32,
    pub total_estimated: usize,
    pub processed: usize,
    pub current_target: Option<String>,
    pub error: Option<String>,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    /// Snapshot for a job that has not started producing progress yet
    pub fn pending(total_estimated: usize, eta: Duration) -> Self {
        Self {
            status: JobStatus::Queued,
            percent_complete: 0.0,
            total_estimated,
            processed: 0,
            current_target: None,
            error: None,
            eta: Some(eta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete_payload() -> JobPayload {
        JobPayload::Delete {
            targets: vec![Target::new("a@example.com", 250)],
        }
    }

    #[test]
    fn test_job_new_starts_queued() {
        let job = Job::new(delete_payload(), Duration::from_secs(10));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.job_type, JobType::Delete);
        assert_eq!(job.total_estimated, 250);
        assert_eq!(job.processed, 0);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_total_estimated_sums_targets() {
        let payload = JobPayload::ModifyLabel {
            targets: vec![
                Target::new("a@example.com", 250),
                Target::new("b@example.com", 10),
            ],
            label_ids: vec!["Label_1".to_string()],
            action: LabelAction::Add,
        };
        assert_eq!(payload.total_estimated(), 260);
    }

    #[test]
    fn test_create_filter_counts_as_one_item() {
        let payload = JobPayload::CreateFilter {
            senders: vec!["a@example.com".to_string()],
            add_label_ids: vec!["Label_1".to_string()],
            remove_label_ids: vec![],
        };
        assert_eq!(payload.total_estimated(), 1);
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let payload = JobPayload::Delete { targets: vec![] };
        assert!(matches!(
            payload.validate(),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_labels() {
        let payload = JobPayload::ModifyLabel {
            targets: vec![Target::new("a@example.com", 5)],
            label_ids: vec![],
            action: LabelAction::Remove,
        };
        assert!(matches!(
            payload.validate(),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_filter_without_label_action() {
        let payload = JobPayload::CreateFilter {
            senders: vec!["a@example.com".to_string()],
            add_label_ids: vec![],
            remove_label_ids: vec![],
        };
        assert!(matches!(
            payload.validate(),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_accepts_good_payloads() {
        assert!(delete_payload().validate().is_ok());

        let payload = JobPayload::CreateFilter {
            senders: vec!["a@example.com".to_string()],
            add_label_ids: vec![],
            remove_label_ids: vec!["INBOX".to_string()],
        };
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_serialization_round_trip() {
        let job = Job::new(delete_payload(), Duration::from_secs(10));
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(job.id, back.id);
        assert_eq!(back.status, JobStatus::Queued);
        assert_eq!(back.total_estimated, 250);
    }
}
