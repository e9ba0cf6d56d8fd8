/// Per-job progress state machine.
///
/// [`JobTracker`] owns everything a view needs about one running job: the
/// latest status text, the retained progress log, the deduplicated AutoML
/// candidate set and the terminal outcome. Transitions:
///
/// ```text
/// Pending ──start──▶ Running ──close──────▶ Completed ──reconcile (once)
///    │                  │
///    │                  ├──error frame──▶ Failed
///    └──────────────────┴──cancel───────▶ Cancelled
/// ```
///
/// Terminal states are absorbing: once reached, no frame changes the log,
/// the candidates or the status text.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::message::{CandidateSummary, EpochProgress, ProgressMessage};
use super::{Job, JobKind, JobStatus};

// ---------------------------------------------------------------------------
// Progress log
// ---------------------------------------------------------------------------

/// Append-only record of the retained messages of one job.
///
/// Epoch progress is never stored here; it only replaces the status text.
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    entries: Vec<ProgressMessage>,
}

impl ProgressLog {
    pub fn entries(&self) -> &[ProgressMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, msg: ProgressMessage) {
        self.entries.push(msg);
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Metrics reported for a trained model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub loss: f64,
    pub mae: f64,
    pub r2: f64,
}

/// One fully trained AutoML variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub temp_id: String,
    pub epochs: u32,
    pub test_size: f64,
    pub metrics: Metrics,
    #[serde(default)]
    pub features: Vec<String>,
}

impl From<CandidateSummary> for CandidateResult {
    fn from(s: CandidateSummary) -> Self {
        Self {
            temp_id: s.temp_id,
            epochs: s.epochs,
            test_size: s.test_size,
            metrics: Metrics {
                loss: s.loss,
                mae: s.mae,
                r2: s.r2,
            },
            features: s.features,
        }
    }
}

/// Candidates in first-seen `temp_id` order, one per id.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    items: Vec<CandidateResult>,
    seen: HashSet<String>,
}

impl CandidateSet {
    /// Insert a candidate unless its `temp_id` was already seen.
    ///
    /// Returns `true` when the candidate was new.
    pub fn insert(&mut self, candidate: CandidateResult) -> bool {
        if !self.seen.insert(candidate.temp_id.clone()) {
            return false;
        }
        self.items.push(candidate);
        true
    }

    /// Replace values with authoritative ones.
    ///
    /// Known ids are updated in place (keeping their position); unknown ids
    /// are appended in the order given.
    pub fn merge_authoritative(&mut self, authoritative: Vec<CandidateResult>) {
        for candidate in authoritative {
            if self.seen.contains(&candidate.temp_id) {
                if let Some(slot) = self
                    .items
                    .iter_mut()
                    .find(|c| c.temp_id == candidate.temp_id)
                {
                    *slot = candidate;
                }
            } else {
                self.insert(candidate);
            }
        }
    }

    pub fn as_slice(&self) -> &[CandidateResult] {
        &self.items
    }

    pub fn get(&self, idx: usize) -> Option<&CandidateResult> {
        self.items.get(idx)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of the candidate with the highest R². Ties keep the earliest.
    pub fn best_index(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, c) in self.items.iter().enumerate() {
            let r2 = c.metrics.r2;
            if r2.is_nan() {
                continue;
            }
            match best {
                Some((_, best_r2)) if r2 <= best_r2 => {}
                _ => best = Some((idx, r2)),
            }
        }
        best.map(|(idx, _)| idx)
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// What applying a message did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Status text replaced by a newer epoch frame.
    Progress,
    /// A new candidate was recorded.
    Candidate,
    /// Summary whose `temp_id` was already recorded.
    Duplicate,
    /// An error frame moved the job to `Failed`.
    Failed,
    /// The job was already terminal; nothing changed.
    Ignored,
}

impl Applied {
    /// Whether observers should re-render.
    pub fn changed(self) -> bool {
        matches!(self, Self::Progress | Self::Candidate | Self::Failed)
    }
}

/// Authoritative values fetched once a job completes.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Final metrics of a single trained model.
    Training(Metrics),
    /// Final candidate list of an AutoML run.
    Candidates(Vec<CandidateResult>),
}

/// Progress state of one job.
#[derive(Debug, Clone)]
pub struct JobTracker {
    job: Job,
    status_text: Option<String>,
    last_epoch: Option<EpochProgress>,
    log: ProgressLog,
    candidates: CandidateSet,
    metrics: Option<Metrics>,
    selected: Option<usize>,
    error: Option<String>,
    reconciled: bool,
}

impl JobTracker {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            status_text: None,
            last_epoch: None,
            log: ProgressLog::default(),
            candidates: CandidateSet::default(),
            metrics: None,
            selected: None,
            error: None,
            reconciled: false,
        }
    }

    // -- Accessors --

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn status(&self) -> JobStatus {
        self.job.status
    }

    pub fn is_terminal(&self) -> bool {
        self.job.status.is_terminal()
    }

    /// Text describing the most recently processed epoch frame.
    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    pub fn last_epoch(&self) -> Option<&EpochProgress> {
        self.last_epoch.as_ref()
    }

    pub fn log(&self) -> &ProgressLog {
        &self.log
    }

    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    /// Metrics currently shown for a training job. Speculative until
    /// [`is_reconciled`](Self::is_reconciled) returns `true`.
    pub fn metrics(&self) -> Option<Metrics> {
        self.metrics
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_candidate(&self) -> Option<&CandidateResult> {
        self.selected.and_then(|idx| self.candidates.get(idx))
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    // -- Transitions --

    /// `Pending → Running`. No-op in any other state.
    pub fn start(&mut self) {
        if self.job.status == JobStatus::Pending {
            self.job.status = JobStatus::Running;
        }
    }

    /// Record placeholder metrics returned synchronously by the launcher.
    pub fn set_placeholder_metrics(&mut self, metrics: Metrics) {
        if !self.is_terminal() {
            self.metrics = Some(metrics);
        }
    }

    /// Replace the status text (used by the polling transport, which has no
    /// epoch frames).
    pub fn set_status_text(&mut self, text: impl Into<String>) {
        if !self.is_terminal() {
            self.status_text = Some(text.into());
        }
    }

    /// Feed one decoded frame.
    pub fn apply(&mut self, msg: ProgressMessage) -> Applied {
        if self.is_terminal() {
            return Applied::Ignored;
        }
        self.start();

        match msg {
            ProgressMessage::Epoch(progress) => {
                self.status_text = Some(progress.status_text());
                self.last_epoch = Some(progress);
                Applied::Progress
            }
            ProgressMessage::Summary(summary) => {
                let candidate = CandidateResult::from(summary.clone());
                if self.candidates.insert(candidate) {
                    if self.job.kind == JobKind::Training {
                        self.metrics = Some(Metrics {
                            loss: summary.loss,
                            mae: summary.mae,
                            r2: summary.r2,
                        });
                    }
                    self.log.push(ProgressMessage::Summary(summary));
                    Applied::Candidate
                } else {
                    Applied::Duplicate
                }
            }
            ProgressMessage::Error { message } => {
                self.log.push(ProgressMessage::Error {
                    message: message.clone(),
                });
                self.fail(message);
                Applied::Failed
            }
        }
    }

    /// The stream closed cleanly: `Running → Completed` unless an error was
    /// seen. Returns `true` if the transition happened.
    pub fn complete(&mut self) -> bool {
        if self.is_terminal() || self.error.is_some() {
            return false;
        }
        self.job.status = JobStatus::Completed;
        if self.job.kind == JobKind::AutoMlTraining {
            self.selected = self.candidates.best_index();
        }
        true
    }

    /// Move to `Failed` with the given message. Returns `true` on transition.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.error = Some(message.into());
        self.job.status = JobStatus::Failed;
        true
    }

    /// Move to `Cancelled`. Returns `true` on transition.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.job.status = JobStatus::Cancelled;
        true
    }

    /// Merge authoritative final values. Runs at most once, and only for a
    /// `Completed` job; returns `true` if the values were applied.
    pub fn reconcile(&mut self, outcome: Reconciliation) -> bool {
        if self.job.status != JobStatus::Completed || self.reconciled {
            return false;
        }
        self.reconciled = true;
        match outcome {
            Reconciliation::Training(metrics) => self.metrics = Some(metrics),
            Reconciliation::Candidates(list) => {
                self.candidates.merge_authoritative(list);
                self.selected = self.candidates.best_index();
            }
        }
        true
    }

    /// Mark reconciliation as spent without new values (the confirmation
    /// fetch failed; streamed values stay).
    pub fn skip_reconcile(&mut self) {
        if self.job.status == JobStatus::Completed {
            self.reconciled = true;
        }
    }

    /// Select a candidate by index. Returns `false` when out of range.
    pub fn select(&mut self, idx: usize) -> bool {
        if idx >= self.candidates.len() {
            return false;
        }
        self.selected = Some(idx);
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
