/// Selecting and saving one AutoML candidate.
///
/// A [`Promotion`] wraps a finished AutoML job. The best-R² candidate is
/// pre-selected; the caller may pick another by index and then save it under
/// `{base}-{YYYYMMDDHHMMSS}`. Once saved, the promotion is read-only.
use chrono::{DateTime, TimeZone};

use super::tracker::JobTracker;
use super::{JobKind, JobStatus};
use crate::api::ApiClient;
use crate::api::types::{MessageReply, ModelSummary};
use crate::error::{PulseError, Result};

/// Persists a candidate under its final name.
pub trait ModelSaver {
    fn save_automl_model(&self, temp_id: &str, final_name: &str) -> Result<MessageReply>;
}

impl ModelSaver for ApiClient {
    fn save_automl_model(&self, temp_id: &str, final_name: &str) -> Result<MessageReply> {
        ApiClient::save_automl_model(self, temp_id, final_name)
    }
}

/// `base-YYYYMMDDHHMMSS`.
pub fn final_model_name<Tz: TimeZone>(base: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}-{}", base.trim(), at.format("%Y%m%d%H%M%S"))
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedModel {
    pub temp_id: String,
    pub summary: ModelSummary,
    pub message: String,
}

/// Candidate selection for one completed AutoML job.
#[derive(Debug)]
pub struct Promotion {
    tracker: JobTracker,
    saved: Option<SavedModel>,
}

impl Promotion {
    /// Wrap a tracker. Only completed AutoML jobs can be promoted.
    pub fn new(tracker: JobTracker) -> Result<Self> {
        if tracker.job().kind != JobKind::AutoMlTraining {
            return Err(PulseError::validation("Only AutoML jobs have candidates to save."));
        }
        if tracker.status() != JobStatus::Completed {
            return Err(PulseError::validation(format!(
                "AutoML job is {}, not completed.",
                tracker.status()
            )));
        }
        Ok(Self {
            tracker,
            saved: None,
        })
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn saved(&self) -> Option<&SavedModel> {
        self.saved.as_ref()
    }

    pub fn is_saved(&self) -> bool {
        self.saved.is_some()
    }

    /// Select the candidate at `idx`.
    pub fn select(&mut self, idx: usize) -> Result<()> {
        if self.is_saved() {
            return Err(PulseError::validation("Model already saved."));
        }
        if !self.tracker.select(idx) {
            return Err(PulseError::validation(format!(
                "No candidate #{} (have {}).",
                idx + 1,
                self.tracker.candidates().len()
            )));
        }
        Ok(())
    }

    /// Save the selected candidate as `{base}-{timestamp}`.
    ///
    /// On failure nothing changes and the save may be retried.
    pub fn save<S, Tz>(&mut self, saver: &S, base: &str, at: &DateTime<Tz>) -> Result<&SavedModel>
    where
        S: ModelSaver + ?Sized,
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        if self.is_saved() {
            return Err(PulseError::validation("Model already saved."));
        }
        let candidate = self
            .tracker
            .selected_candidate()
            .ok_or_else(|| PulseError::validation("No model selected."))?
            .clone();
        super::launcher::validate_model_name(base)?;

        let final_name = final_model_name(base, at);
        let reply = saver.save_automl_model(&candidate.temp_id, &final_name)?;
        log::info!("saved candidate {} as {final_name}", candidate.temp_id);

        Ok(self.saved.insert(SavedModel {
            temp_id: candidate.temp_id,
            summary: ModelSummary {
                model_name: final_name,
                features: candidate.features,
                epochs: candidate.epochs,
                test_size: candidate.test_size,
                metrics: candidate.metrics,
                simulations: Vec::new(),
                llm_history: Vec::new(),
            },
            message: reply.message,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
