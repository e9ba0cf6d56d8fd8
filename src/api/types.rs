/// Reply schemas for the PULSE REST API, with normalization.
///
/// Backend handlers are loose about shapes: failures often come back as a
/// `200` with an `{"error": ...}` body, history records may be stored under
/// `llm_questions` or `llm_history`, and `simulations` may be missing
/// entirely. Every reply goes through [`decode_reply`] and, where needed, a
/// `normalize` step here, so the rest of the crate only sees one shape.
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PulseError, Result};
use crate::job::message::CandidateSummary;
use crate::job::tracker::{CandidateResult, Metrics};

/// Turn a raw JSON reply into `T`, mapping `{"error": ...}` bodies to
/// [`PulseError::Backend`].
pub fn decode_reply<T: DeserializeOwned>(value: Value) -> Result<T> {
    if let Some(err) = value.get("error").filter(|v| !v.is_null()) {
        let message = err
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(PulseError::Backend(message));
    }
    serde_json::from_value(value).map_err(|e| PulseError::protocol(format!("unexpected reply: {e}")))
}

// ---------------------------------------------------------------------------
// Generic replies
// ---------------------------------------------------------------------------

/// `{"message": "..."}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageReply {
    #[serde(default)]
    pub message: String,
}

/// Reply to a dataset upload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadReply {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Features whose correlation with PUE passed the backend's threshold.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureSuggestion {
    #[serde(default)]
    pub suggested_features: Vec<String>,
    #[serde(default)]
    pub correlations: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Reply to a create-job request.
///
/// The training endpoint may also return metrics synchronously; they are
/// shown as placeholders until the job is reconciled.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskCreated {
    pub task_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub loss: Option<f64>,
    #[serde(default)]
    pub mae: Option<f64>,
    #[serde(default)]
    pub r2: Option<f64>,
}

impl TaskCreated {
    /// Placeholder metrics, when the backend sent all three.
    pub fn placeholder_metrics(&self) -> Option<Metrics> {
        Some(Metrics {
            loss: self.loss?,
            mae: self.mae?,
            r2: self.r2?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusReply {
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidatesReply {
    #[serde(default)]
    pub candidates: Vec<CandidateSummary>,
}

impl CandidatesReply {
    pub fn normalize(self) -> Vec<CandidateResult> {
        self.candidates.into_iter().map(CandidateResult::from).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveAutoMlRequest<'a> {
    pub model_temp_id: &'a str,
    pub final_model_name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictReply {
    pub pue_prediction: f64,
}

// ---------------------------------------------------------------------------
// Models and history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub models: Vec<String>,
}

/// One saved what-if simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    pub pue: f64,
}

/// One recorded question to the LLM assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmInteraction {
    #[serde(default)]
    pub timestamp: String,
    pub query: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub ollama_model: String,
}

/// Stored summary of a trained model, as returned by the explorer.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub model_name: String,
    pub features: Vec<String>,
    pub epochs: u32,
    pub test_size: f64,
    pub metrics: Metrics,
    pub simulations: Vec<Simulation>,
    pub llm_history: Vec<LlmInteraction>,
}

/// Wire shape of a model summary before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawModelSummary {
    pub model_name: String,
    #[serde(default)]
    pub features: Vec<String>,
    pub epochs: u32,
    pub test_size: f64,
    pub metrics: Metrics,
    #[serde(default)]
    pub simulations: Option<Vec<Simulation>>,
    #[serde(default)]
    pub llm_history: Option<Vec<LlmInteraction>>,
    #[serde(default)]
    pub llm_questions: Option<Vec<LlmInteraction>>,
}

impl RawModelSummary {
    pub fn normalize(self) -> ModelSummary {
        ModelSummary {
            model_name: self.model_name,
            features: self.features,
            epochs: self.epochs,
            test_size: self.test_size,
            metrics: self.metrics,
            simulations: self.simulations.unwrap_or_default(),
            llm_history: pick_llm_history(self.llm_questions, self.llm_history),
        }
    }
}

/// Per-model history of simulations and LLM questions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub simulations: Vec<Simulation>,
    pub llm_questions: Vec<LlmInteraction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHistory {
    #[serde(default)]
    pub simulations: Option<Vec<Simulation>>,
    #[serde(default)]
    pub llm_questions: Option<Vec<LlmInteraction>>,
    #[serde(default)]
    pub llm_history: Option<Vec<LlmInteraction>>,
}

impl RawHistory {
    pub fn normalize(self) -> History {
        History {
            simulations: self.simulations.unwrap_or_default(),
            llm_questions: pick_llm_history(self.llm_questions, self.llm_history),
        }
    }
}

/// `llm_questions` wins when non-empty; otherwise fall back to `llm_history`.
fn pick_llm_history(
    questions: Option<Vec<LlmInteraction>>,
    history: Option<Vec<LlmInteraction>>,
) -> Vec<LlmInteraction> {
    match questions {
        Some(q) if !q.is_empty() => q,
        _ => history.unwrap_or_default(),
    }
}

/// Kind of history entry for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Simulation,
    Llm,
}

impl HistoryKind {
    /// Value of the `type` field expected by the backend.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Simulation => "Simulation",
            Self::Llm => "LLM",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteHistoryItem<'a> {
    pub model: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultModelReply {
    #[serde(default)]
    pub default_model: String,
}

// ---------------------------------------------------------------------------
// Dashboard statistics
// ---------------------------------------------------------------------------

/// R² of one stored model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAccuracy {
    pub model: String,
    #[serde(default)]
    pub r2: f64,
}

/// Usage and accuracy figures across every stored model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub models_count: usize,
    /// Mean R²; `0.0` without models.
    pub avg_accuracy: f64,
    /// Sorted by model name.
    pub accuracy_by_model: Vec<ModelAccuracy>,
    pub total_predictions: u64,
    /// `YYYY-MM` → predictions, in month order.
    pub predictions_by_month: BTreeMap<String, u64>,
    pub llm_questions: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDashboardStats {
    #[serde(default)]
    pub models_count: Option<usize>,
    #[serde(default)]
    pub avg_accuracy: Option<f64>,
    #[serde(default)]
    pub accuracy_by_model: Vec<ModelAccuracy>,
    #[serde(default)]
    pub total_predictions: Option<u64>,
    #[serde(default)]
    pub predictions_by_month: BTreeMap<String, u64>,
    #[serde(default)]
    pub llm_questions: u64,
}

impl RawDashboardStats {
    /// Missing totals are derived from the per-model and per-month lists.
    pub fn normalize(self) -> DashboardStats {
        let mut accuracy_by_model = self.accuracy_by_model;
        accuracy_by_model.sort_by(|a, b| a.model.cmp(&b.model));

        let avg_accuracy = self.avg_accuracy.unwrap_or_else(|| {
            if accuracy_by_model.is_empty() {
                0.0
            } else {
                accuracy_by_model.iter().map(|m| m.r2).sum::<f64>() / accuracy_by_model.len() as f64
            }
        });
        let total_predictions = self
            .total_predictions
            .unwrap_or_else(|| self.predictions_by_month.values().sum());

        DashboardStats {
            models_count: self.models_count.unwrap_or(accuracy_by_model.len()),
            avg_accuracy,
            accuracy_by_model,
            total_predictions,
            predictions_by_month: self.predictions_by_month,
            llm_questions: self.llm_questions,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
