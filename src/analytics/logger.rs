use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::job::tracker::JobTracker;
use crate::job::{JobKind, JobStatus};

// ---------------------------------------------------------------------------
// Job log entry (JSONL ledger)
// ---------------------------------------------------------------------------

/// A single entry in the job ledger (`~/.pulse/job-log.jsonl`).
///
/// One line per finished job, whatever its outcome. Read back by the
/// reporter for `pulse jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub timestamp: String,
    pub job_id: String,
    pub kind: JobKind,
    pub model_name: String,
    pub status: JobStatus,
    /// Distinct candidates seen (AutoML) or summaries received (training).
    #[serde(default)]
    pub candidates: usize,
    /// Best R² among the candidates, or the final R² of a training job.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub best_r2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl JobLogEntry {
    /// Snapshot a tracker at the end of its job.
    pub fn from_tracker(tracker: &JobTracker, duration_ms: u64) -> Self {
        let job = tracker.job();
        let best_r2 = match job.kind {
            JobKind::Training => tracker.metrics().map(|m| m.r2),
            JobKind::AutoMlTraining => tracker
                .candidates()
                .best_index()
                .and_then(|idx| tracker.candidates().get(idx))
                .map(|c| c.metrics.r2),
        };
        Self {
            timestamp: Utc::now().to_rfc3339(),
            job_id: job.job_id.clone(),
            kind: job.kind,
            model_name: job.model_name.clone(),
            status: job.status,
            candidates: tracker.candidates().len(),
            best_r2,
            error: tracker.error().map(str::to_string),
            duration_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging functions
// ---------------------------------------------------------------------------

/// Append a finished job to the ledger. Best-effort: failures are logged at
/// debug level and otherwise ignored.
pub fn log_job(tracker: &JobTracker, duration_ms: u64) {
    let Some(path) = job_log_path() else {
        return;
    };
    let entry = JobLogEntry::from_tracker(tracker, duration_ms);
    if let Err(e) = append_entry(&path, &entry) {
        log::debug!("job ledger write failed: {e}");
    }
}

// ---------------------------------------------------------------------------
// Reading log entries
// ---------------------------------------------------------------------------

/// Read all ledger entries. Malformed lines are skipped; a missing file reads
/// as empty.
pub fn read_all_entries() -> Vec<JobLogEntry> {
    job_log_path()
        .map(|path| read_entries_from(&path))
        .unwrap_or_default()
}

/// Read ledger entries from the last `days` days (all when `None`).
pub fn read_entries_since_days(days: Option<u32>) -> Vec<JobLogEntry> {
    filter_since_days(read_all_entries(), days)
}

pub fn read_entries_from(path: &Path) -> Vec<JobLogEntry> {
    let Ok(file) = fs::File::open(path) else {
        return Vec::new();
    };

    BufReader::new(file)
        .lines()
        .map_while(std::io::Result::ok)
        .filter_map(|line| serde_json::from_str::<JobLogEntry>(&line).ok())
        .collect()
}

fn filter_since_days(entries: Vec<JobLogEntry>, days: Option<u32>) -> Vec<JobLogEntry> {
    let Some(days) = days else {
        return entries;
    };

    let cutoff = (Utc::now() - chrono::Duration::days(i64::from(days))).to_rfc3339();
    entries
        .into_iter()
        .filter(|e| e.timestamp >= cutoff)
        .collect()
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

pub fn append_entry(path: &Path, entry: &JobLogEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(entry)?;
    writeln!(file, "{json}")?;

    Ok(())
}

/// Return the path to the job ledger.
pub fn job_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pulse").join("job-log.jsonl"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
