/// Model summary export and import.
///
/// An exported summary is the portable, authoritative record of a trained
/// model: `{model_name}_summary.json`, pretty-printed, with exactly
/// `model_name`, `features`, `epochs`, `test_size` and `metrics`.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::types::ModelSummary;
use crate::error::{PulseError, Result};
use crate::job::tracker::Metrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportedSummary {
    pub model_name: String,
    pub features: Vec<String>,
    pub epochs: u32,
    pub test_size: f64,
    pub metrics: Metrics,
}

impl From<&ModelSummary> for ExportedSummary {
    fn from(s: &ModelSummary) -> Self {
        Self {
            model_name: s.model_name.clone(),
            features: s.features.clone(),
            epochs: s.epochs,
            test_size: s.test_size,
            metrics: s.metrics,
        }
    }
}

/// File name an exported summary is written under.
pub fn export_file_name(model_name: &str) -> String {
    format!("{model_name}_summary.json")
}

/// Write the summary into `dir`. Returns the written path.
pub fn export_summary(summary: &ModelSummary, dir: &Path) -> Result<PathBuf> {
    let exported = ExportedSummary::from(summary);
    let json = serde_json::to_string_pretty(&exported)
        .map_err(|e| PulseError::protocol(format!("cannot encode summary: {e}")))?;

    fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(&summary.model_name));
    fs::write(&path, json)?;
    Ok(path)
}

/// Read an exported summary back.
pub fn load_summary(path: &Path) -> Result<ExportedSummary> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        PulseError::protocol(format!("{} is not an exported summary: {e}", path.display()))
    })
}
