/// Progress frames pushed by the backend while a job runs.
///
/// Each frame is a single JSON object. The protocol carries no type tag and
/// no sequence number, so frames are classified by which fields they carry:
///
/// | Field(s) present                 | Message           |
/// |----------------------------------|-------------------|
/// | `error`                          | [`ProgressMessage::Error`] |
/// | `is_summary: true`               | [`ProgressMessage::Summary`] |
/// | `temp_id` without `is_summary`   | [`ProgressMessage::Summary`] (NDJSON AutoML stream) |
/// | `epoch` and `total_epochs`       | [`ProgressMessage::Epoch`] |
///
/// Anything else is a protocol error and the caller drops the frame.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PulseError, Result};

/// Live per-epoch training progress. Ephemeral: only the latest is shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_idx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_models: Option<u32>,
    pub epoch: u32,
    pub total_epochs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mae: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mse: Option<f64>,
}

impl EpochProgress {
    /// One-line status text for the latest epoch.
    pub fn status_text(&self) -> String {
        let mut text = match (self.model_idx, self.total_models) {
            (Some(idx), Some(total)) => format!(
                "Model {}/{} · epoch {}/{}",
                idx + 1,
                total,
                self.epoch,
                self.total_epochs
            ),
            _ => format!("Epoch {}/{}", self.epoch, self.total_epochs),
        };
        if let Some(loss) = self.loss {
            text.push_str(&format!(" · loss {loss:.4}"));
        }
        if let Some(mae) = self.mae {
            text.push_str(&format!(" · MAE {mae:.4}"));
        }
        if let Some(mse) = self.mse {
            text.push_str(&format!(" · MSE {mse:.4}"));
        }
        text
    }
}

/// Final result of one trained model variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_idx: Option<u32>,
    pub temp_id: String,
    pub epochs: u32,
    /// Test split size in percent.
    pub test_size: f64,
    pub loss: f64,
    pub mae: f64,
    pub r2: f64,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A decoded progress frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressMessage {
    Epoch(EpochProgress),
    Summary(CandidateSummary),
    Error { message: String },
}

/// Decode and classify one text frame.
pub fn decode_frame(text: &str) -> Result<ProgressMessage> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| PulseError::protocol(format!("invalid JSON: {e}")))?;
    classify(value)
}

/// Classify an already-parsed frame.
pub fn classify(value: Value) -> Result<ProgressMessage> {
    let Value::Object(ref obj) = value else {
        return Err(PulseError::protocol("frame is not a JSON object"));
    };

    if let Some(err) = obj.get("error").filter(|v| !v.is_null()) {
        let message = match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(ProgressMessage::Error { message });
    }

    let is_summary = match obj.get("is_summary") {
        Some(flag) => flag.as_bool().unwrap_or(false),
        None => obj.contains_key("temp_id"),
    };
    if is_summary {
        let summary: CandidateSummary = serde_json::from_value(value)
            .map_err(|e| PulseError::protocol(format!("bad summary frame: {e}")))?;
        return Ok(ProgressMessage::Summary(summary));
    }

    if obj.contains_key("epoch") && obj.contains_key("total_epochs") {
        let progress: EpochProgress = serde_json::from_value(value)
            .map_err(|e| PulseError::protocol(format!("bad epoch frame: {e}")))?;
        return Ok(ProgressMessage::Epoch(progress));
    }

    Err(PulseError::protocol("unrecognized frame"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
