/// Summary export: fetch from the backend, write, read back.
mod common;

use common::{MockBackend, Reply};
use pulse::api::JobBackend;
use pulse::summary::{ExportedSummary, export_summary, load_summary};
use serde_json::json;

#[test]
fn exported_summary_reproduces_the_trained_model() {
    let mock = MockBackend::start(|_| {
        Reply::json(json!({
            "model_name": "dc1-20250307090501",
            "features": ["it_load", "outdoor_temp", "humidity"],
            "epochs": 200,
            "test_size": 30,
            "metrics": {"loss": 0.0131, "mae": 0.0672, "r2": 0.9512},
            "simulations": [{"timestamp": "2025-03-07T10:00:00", "inputs": {"it_load": 480}, "pue": 1.38}],
            "llm_questions": [{"query": "why?", "response": "because"}]
        }))
    });

    let summary = mock.client().model_summary("dc1-20250307090501").unwrap();
    let dir = std::env::temp_dir().join(format!("pulse-export-{}", std::process::id()));
    let path = export_summary(&summary, &dir).unwrap();
    let loaded = load_summary(&path).unwrap();

    assert_eq!(
        loaded,
        ExportedSummary {
            model_name: "dc1-20250307090501".into(),
            features: vec!["it_load".into(), "outdoor_temp".into(), "humidity".into()],
            epochs: 200,
            test_size: 30.0,
            metrics: summary.metrics,
        }
    );
    assert_eq!(loaded, ExportedSummary::from(&summary));

    let _ = std::fs::remove_dir_all(&dir);
}
