//! Training and AutoML jobs: launch, progress tracking, reconciliation.
//!
//! A job is created when the backend hands back a task id and lives until
//! its owner drops it or launches the next one. The pieces:
//!
//! - [`launcher`]: client-side validation and the create-job request.
//! - [`message`]: decoding and classification of progress frames.
//! - [`tracker`]: the per-job state machine (progress log, candidate set,
//!   terminal states, one-shot reconciliation).
//! - [`promotion`]: selecting and saving an AutoML candidate.
//! - [`runner`]: end-to-end flows wiring a transport to a tracker.

pub mod launcher;
pub mod message;
pub mod promotion;
pub mod runner;
pub mod tracker;

use serde::{Deserialize, Serialize};

/// Which flow created the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Training,
    AutoMlTraining,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Training => write!(f, "training"),
            Self::AutoMlTraining => write!(f, "automl"),
        }
    }
}

/// Lifecycle of a job. `Completed`, `Failed` and `Cancelled` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A backend-initiated run tracked by an opaque id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub model_name: String,
    pub status: JobStatus,
}

impl Job {
    pub fn new(job_id: impl Into<String>, kind: JobKind, model_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            model_name: model_name.into(),
            status: JobStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_pending() {
        let job = Job::new("abc", JobKind::Training, "dc1");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobKind::AutoMlTraining).unwrap(),
            "\"auto_ml_training\""
        );
        assert_eq!(JobKind::AutoMlTraining.to_string(), "automl");
    }
}
