/// Job launch: client-side validation, then the create-job request.
///
/// Nothing reaches the network until the request passes [`validate`]; a
/// rejected request returns [`PulseError::Validation`] with a message meant
/// for the user.
///
/// [`validate`]: TrainRequest::validate
use std::sync::LazyLock;

use regex::Regex;

use super::tracker::JobTracker;
use super::{Job, JobKind};
use crate::api::{ApiClient, BodyReader};
use crate::error::{PulseError, Result};
use crate::stream::ndjson::NdjsonSource;

/// Model names become file names on the backend: no whitespace, no path
/// separators.
static MODEL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s/\\]+$").expect("model name regex must compile"));

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A single-model training request.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainRequest {
    pub model_name: String,
    pub features: Vec<String>,
    pub epochs: u32,
    /// Test split in percent.
    pub test_size: f64,
}

impl TrainRequest {
    pub fn validate(&self) -> Result<()> {
        validate_model_name(&self.model_name)?;
        validate_features(&self.features)?;
        validate_epochs(self.epochs)?;
        validate_test_size(self.test_size)
    }
}

/// An AutoML request: one model per (epochs × test size) combination.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoMlRequest {
    pub model_name: String,
    pub features: Vec<String>,
    pub epochs_options: Vec<u32>,
    pub test_size_options: Vec<f64>,
}

impl AutoMlRequest {
    pub fn validate(&self) -> Result<()> {
        validate_model_name(&self.model_name)?;
        validate_features(&self.features)?;
        if self.epochs_options.is_empty() {
            return Err(PulseError::validation("Select at least one epochs option."));
        }
        if self.test_size_options.is_empty() {
            return Err(PulseError::validation("Select at least one test size option."));
        }
        self.epochs_options.iter().try_for_each(|&e| validate_epochs(e))?;
        self.test_size_options
            .iter()
            .try_for_each(|&t| validate_test_size(t))
    }

    /// Number of models the backend will train.
    pub fn combinations(&self) -> usize {
        self.epochs_options.len() * self.test_size_options.len()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate_model_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(PulseError::validation("Model name is required."));
    }
    if !MODEL_NAME_RE.is_match(name) {
        return Err(PulseError::validation(format!(
            "Invalid model name '{name}': spaces and path separators are not allowed."
        )));
    }
    Ok(())
}

pub fn validate_features(features: &[String]) -> Result<()> {
    if features.iter().all(|f| f.trim().is_empty()) {
        return Err(PulseError::validation("No features selected."));
    }
    Ok(())
}

fn validate_epochs(epochs: u32) -> Result<()> {
    if epochs == 0 {
        return Err(PulseError::validation("Epochs must be greater than zero."));
    }
    Ok(())
}

fn validate_test_size(test_size: f64) -> Result<()> {
    if !(test_size > 0.0 && test_size < 100.0) {
        return Err(PulseError::validation(format!(
            "Test size must be between 0 and 100 percent (got {test_size})."
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

/// Validate and create a training job. The returned tracker is `Pending`
/// and carries any placeholder metrics the backend sent back.
pub fn launch_training(client: &ApiClient, req: &TrainRequest) -> Result<JobTracker> {
    req.validate()?;
    let created = client.train_model(&req.model_name, &req.features, req.epochs, req.test_size)?;
    log::info!("training job {} created for {}", created.task_id, req.model_name);

    let mut tracker = JobTracker::new(Job::new(&created.task_id, JobKind::Training, &req.model_name));
    if let Some(metrics) = created.placeholder_metrics() {
        tracker.set_placeholder_metrics(metrics);
    }
    if let Some(message) = created.message {
        tracker.set_status_text(message);
    }
    Ok(tracker)
}

/// Validate and create an AutoML job followed over a socket.
pub fn launch_automl(client: &ApiClient, req: &AutoMlRequest) -> Result<JobTracker> {
    req.validate()?;
    let created = client.automl_train(
        &req.model_name,
        &req.features,
        &req.epochs_options,
        &req.test_size_options,
    )?;
    log::info!(
        "automl job {} created for {} ({} combinations)",
        created.task_id,
        req.model_name,
        req.combinations()
    );
    Ok(JobTracker::new(Job::new(
        &created.task_id,
        JobKind::AutoMlTraining,
        &req.model_name,
    )))
}

/// Validate and start AutoML over the streaming endpoint.
///
/// That endpoint assigns no task id, so the job id is derived locally from
/// the model name and launch time.
pub fn launch_automl_stream(
    client: &ApiClient,
    req: &AutoMlRequest,
) -> Result<(JobTracker, NdjsonSource<BodyReader>)> {
    req.validate()?;
    let source = client.automl_stream(
        &req.model_name,
        &req.features,
        &req.epochs_options,
        &req.test_size_options,
    )?;
    let job_id = format!(
        "{}-stream-{}",
        req.model_name,
        chrono::Local::now().format("%Y%m%d%H%M%S")
    );
    Ok((
        JobTracker::new(Job::new(job_id, JobKind::AutoMlTraining, &req.model_name)),
        source,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn train() -> TrainRequest {
        TrainRequest {
            model_name: "dc1".to_string(),
            features: vec!["it_load".to_string(), "outdoor_temp".to_string()],
            epochs: 100,
            test_size: 20.0,
        }
    }

    fn automl() -> AutoMlRequest {
        AutoMlRequest {
            model_name: "dc1".to_string(),
            features: vec!["it_load".to_string()],
            epochs_options: vec![50, 100],
            test_size_options: vec![10.0, 20.0],
        }
    }

    #[test]
    fn valid_requests_pass() {
        assert!(train().validate().is_ok());
        assert!(automl().validate().is_ok());
        assert_eq!(automl().combinations(), 4);
    }

    #[test]
    fn empty_features_rejected() {
        let mut req = train();
        req.features.clear();
        let err = req.validate().unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "No features selected.");

        req.features = vec!["  ".to_string()];
        assert!(req.validate().unwrap_err().is_validation());
    }

    #[test]
    fn model_name_rules() {
        assert!(validate_model_name("dc-north_2").is_ok());
        for bad in ["", "   ", "my model", "../etc", "a\\b", "tab\there"] {
            assert!(validate_model_name(bad).unwrap_err().is_validation(), "{bad:?}");
        }
    }

    #[test]
    fn automl_option_bounds() {
        let mut req = automl();
        req.epochs_options.clear();
        assert!(req.validate().is_err());

        let mut req = automl();
        req.epochs_options.push(0);
        assert!(req.validate().is_err());

        for bad in [0.0, 100.0, -5.0, f64::NAN] {
            let mut req = automl();
            req.test_size_options = vec![bad];
            assert!(req.validate().unwrap_err().is_validation(), "{bad}");
        }
    }

    #[test]
    fn validation_happens_before_any_request() {
        // Nothing listens here; a request would surface as a network error.
        let mut config = crate::config::PulseConfig::default();
        config.api.base_url = "http://127.0.0.1:1".to_string();
        let client = ApiClient::from_config(&config);

        let mut req = train();
        req.model_name = "bad name".to_string();
        assert!(launch_training(&client, &req).unwrap_err().is_validation());

        let mut req = automl();
        req.features.clear();
        assert!(launch_automl(&client, &req).unwrap_err().is_validation());
    }
}
