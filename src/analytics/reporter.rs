//! Job ledger reporter: aggregation for `pulse jobs`.
//!
//! Reads the JSONL job ledger and provides:
//! - **Totals**: jobs per status and per kind, average duration
//! - **Per model**: run count, best R² ever seen, last status
//! - **Recent**: the latest finished jobs

use std::collections::HashMap;

use crate::analytics::logger::{self, JobLogEntry};
use crate::job::{JobKind, JobStatus};

/// How many recent jobs `pulse jobs` lists.
pub const RECENT_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Aggregated stats
// ---------------------------------------------------------------------------

/// Summary statistics for `pulse jobs`.
#[derive(Debug)]
pub struct JobStats {
    pub total_jobs: usize,
    pub status_counts: StatusCounts,
    pub training_jobs: usize,
    pub automl_jobs: usize,
    pub avg_duration_ms: u64,
    pub model_stats: Vec<ModelStat>,
    pub recent: Vec<JobLogEntry>,
}

/// Jobs per terminal status.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    /// Percentage for a given count, 0.0 if there are no jobs.
    pub fn pct(&self, count: usize) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (count as f64 / total as f64) * 100.0
        }
    }
}

/// Per-model aggregated statistics.
#[derive(Debug, Clone)]
pub struct ModelStat {
    pub model_name: String,
    pub runs: usize,
    pub best_r2: Option<f64>,
    pub last_status: JobStatus,
}

// ---------------------------------------------------------------------------
// Stats computation
// ---------------------------------------------------------------------------

/// Compute stats over the ledger, optionally limited to the last `days`.
pub fn compute_stats(days: Option<u32>) -> JobStats {
    let entries = logger::read_entries_since_days(days);
    build_stats(&entries)
}

fn build_stats(entries: &[JobLogEntry]) -> JobStats {
    let total_jobs = entries.len();
    let avg_duration_ms = if total_jobs == 0 {
        0
    } else {
        entries.iter().map(|e| e.duration_ms).sum::<u64>() / total_jobs as u64
    };

    JobStats {
        total_jobs,
        status_counts: compute_status_counts(entries),
        training_jobs: entries.iter().filter(|e| e.kind == JobKind::Training).count(),
        automl_jobs: entries
            .iter()
            .filter(|e| e.kind == JobKind::AutoMlTraining)
            .count(),
        avg_duration_ms,
        model_stats: compute_model_stats(entries),
        recent: entries.iter().rev().take(RECENT_LIMIT).cloned().collect(),
    }
}

fn compute_status_counts(entries: &[JobLogEntry]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for entry in entries {
        match entry.status {
            JobStatus::Completed => counts.completed += 1,
            JobStatus::Failed => counts.failed += 1,
            JobStatus::Cancelled => counts.cancelled += 1,
            // Non-terminal statuses are never logged.
            JobStatus::Pending | JobStatus::Running => {}
        }
    }
    counts
}

/// Group entries by model. Sorted by best R² (descending), models without a
/// score last.
fn compute_model_stats(entries: &[JobLogEntry]) -> Vec<ModelStat> {
    let mut groups: HashMap<&str, Vec<&JobLogEntry>> = HashMap::new();
    for entry in entries {
        groups.entry(&entry.model_name).or_default().push(entry);
    }

    let mut stats: Vec<ModelStat> = groups
        .into_iter()
        .filter_map(|(model, group)| {
            let last = group.last()?;
            let best_r2 = group
                .iter()
                .filter_map(|e| e.best_r2)
                .filter(|r2| !r2.is_nan())
                .fold(None, |best: Option<f64>, r2| {
                    Some(best.map_or(r2, |b| b.max(r2)))
                });
            Some(ModelStat {
                model_name: model.to_string(),
                runs: group.len(),
                best_r2,
                last_status: last.status,
            })
        })
        .collect();

    stats.sort_by(|a, b| {
        let ra = a.best_r2.unwrap_or(f64::NEG_INFINITY);
        let rb = b.best_r2.unwrap_or(f64::NEG_INFINITY);
        rb.total_cmp(&ra).then_with(|| a.model_name.cmp(&b.model_name))
    });

    stats
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
