/// HTTP client for the PULSE backend.
///
/// Talks to the FastAPI service using the synchronous `ureq` client. Every
/// REST path shares one configurable prefix (default `/pulse`); progress
/// sockets live at the origin root (see [`crate::stream::socket`]).
///
/// Replies are decoded through [`types::decode_reply`], which turns the
/// backend's `{"error": ...}` bodies into [`PulseError::Backend`].
pub mod types;

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};

use crate::config::PulseConfig;
use crate::error::{PulseError, Result};
use crate::job::tracker::CandidateResult;
use crate::stream::ndjson::NdjsonSource;

use types::{
    CandidatesReply, DashboardStats, DefaultModelReply, DeleteHistoryItem, FeatureSuggestion,
    History, HistoryKind, MessageReply, ModelList, ModelSummary, PredictReply,
    RawDashboardStats, RawHistory, RawModelSummary, SaveAutoMlRequest, StatusReply, TaskCreated,
    UploadReply, decode_reply,
};

/// A streaming HTTP body.
pub type BodyReader = Box<dyn Read + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Backend seam used by the job flows
// ---------------------------------------------------------------------------

/// The calls a running job makes after launch.
///
/// [`ApiClient`] is the real implementation; tests substitute in-memory
/// fakes.
pub trait JobBackend {
    /// Current status string of a task (`"completed"`, `"error: ..."`, or
    /// anything else while running).
    fn job_status(&self, task_id: &str) -> Result<String>;

    /// Stored summary of a trained model.
    fn model_summary(&self, model_name: &str) -> Result<ModelSummary>;

    /// Final candidate list of an AutoML task.
    fn automl_candidates(&self, task_id: &str) -> Result<Vec<CandidateResult>>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Synchronous PULSE API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    prefix: String,
    timeout: Duration,
    llm_timeout: Duration,
    agent: ureq::Agent,
    /// For long-lived NDJSON bodies: no overall deadline, bounded reads.
    stream_agent: ureq::Agent,
}

impl ApiClient {
    /// Build a client from the resolved config.
    pub fn from_config(config: &PulseConfig) -> Self {
        let timeout = Duration::from_millis(config.api.timeout_ms);
        let read_timeout = Duration::from_millis(config.stream.read_timeout_ms.max(1));
        Self {
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            prefix: normalize_prefix(&config.api.prefix),
            timeout,
            llm_timeout: Duration::from_millis(config.llm.timeout_ms),
            agent: ureq::AgentBuilder::new().timeout_connect(timeout).build(),
            stream_agent: ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout_read(read_timeout)
                .build(),
        }
    }

    /// How long a streamed answer may go without a fragment.
    pub fn llm_timeout(&self) -> Duration {
        self.llm_timeout
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for a REST path (`path` starts with `/`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.prefix, path)
    }

    // -- Request helpers --

    fn get_json(&self, path: &str) -> Result<Value> {
        let resp = self.agent.get(&self.url(path)).timeout(self.timeout).call()?;
        read_json(resp)
    }

    fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value> {
        let resp = self
            .agent
            .post(&self.url(path))
            .timeout(self.timeout)
            .send_form(form)?;
        read_json(resp)
    }

    fn send_json(&self, method: &str, path: &str, body: &impl Serialize) -> Result<Value> {
        let resp = self
            .agent
            .request(method, &self.url(path))
            .timeout(self.timeout)
            .send_json(body)?;
        read_json(resp)
    }

    fn delete(&self, path: &str) -> Result<Value> {
        let resp = self.agent.delete(&self.url(path)).timeout(self.timeout).call()?;
        read_json(resp)
    }

    // -- Generator --

    /// Upload a `;`-separated CSV dataset for `model_name`.
    pub fn upload_data(&self, model_name: &str, csv_path: &Path) -> Result<UploadReply> {
        let file_name = csv_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("data.csv");
        let contents = std::fs::read(csv_path)?;
        let boundary = multipart_boundary();
        let body = multipart_body(
            &boundary,
            &[("model_name", model_name)],
            ("file", file_name, &contents),
        )?;

        let resp = self
            .agent
            .post(&self.url("/generator/upload_data"))
            .timeout(self.timeout)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)?;
        decode_reply(read_json(resp)?)
    }

    /// Copy the backend's bundled sample dataset to `model_name`.
    pub fn load_sample(&self, model_name: &str) -> Result<UploadReply> {
        decode_reply(self.post_form("/generator/load_sample", &[("model_name", model_name)])?)
    }

    pub fn suggest_features(&self, model_name: &str) -> Result<FeatureSuggestion> {
        decode_reply(self.post_form("/generator/suggest_features", &[("model_name", model_name)])?)
    }

    /// Create a single-model training job.
    pub fn train_model(
        &self,
        model_name: &str,
        features: &[String],
        epochs: u32,
        test_size: f64,
    ) -> Result<TaskCreated> {
        let features = serde_json::to_string(features)
            .map_err(|e| PulseError::protocol(e.to_string()))?;
        let epochs = epochs.to_string();
        let test_size = test_size.to_string();
        decode_reply(self.post_form("/generator/train_model", &[
            ("model_name", model_name),
            ("features", &features),
            ("epochs", &epochs),
            ("test_size", &test_size),
        ])?)
    }

    /// Create an AutoML job whose progress is pushed over a socket.
    pub fn automl_train(
        &self,
        model_name: &str,
        features: &[String],
        epochs_options: &[u32],
        test_size_options: &[f64],
    ) -> Result<TaskCreated> {
        let form = automl_form(features, epochs_options, test_size_options)?;
        decode_reply(self.post_form("/generator/automl_train_ws", &[
            ("model_name", model_name),
            ("features", &form.0),
            ("epochs_options", &form.1),
            ("test_size_options", &form.2),
        ])?)
    }

    /// Run AutoML over the streaming endpoint. Each candidate arrives as one
    /// NDJSON line of the response body. Reads time out after the stream read
    /// timeout and surface as [`FrameEvent::Idle`](crate::stream::FrameEvent).
    pub fn automl_stream(
        &self,
        model_name: &str,
        features: &[String],
        epochs_options: &[u32],
        test_size_options: &[f64],
    ) -> Result<NdjsonSource<BodyReader>> {
        let form = automl_form(features, epochs_options, test_size_options)?;
        let resp = self
            .stream_agent
            .post(&self.url("/generator/automl_train"))
            .send_form(&[
                ("model_name", model_name),
                ("features", &form.0),
                ("epochs_options", &form.1),
                ("test_size_options", &form.2),
            ])?;
        Ok(NdjsonSource::new(resp.into_reader()))
    }

    /// Promote an AutoML candidate under its final name.
    pub fn save_automl_model(&self, temp_id: &str, final_name: &str) -> Result<MessageReply> {
        let body = SaveAutoMlRequest {
            model_temp_id: temp_id,
            final_model_name: final_name,
        };
        decode_reply(self.send_json("POST", "/generator/save_automl_model", &body)?)
    }

    /// Predict PUE for one set of feature values.
    pub fn predict(
        &self,
        model_name: &str,
        values: &serde_json::Map<String, Value>,
        save_simulation: bool,
    ) -> Result<f64> {
        let input = json!({ "values": values }).to_string();
        let save = save_simulation.to_string();
        let reply: PredictReply = decode_reply(self.post_form("/generator/predict", &[
            ("input", &input),
            ("model_name", model_name),
            ("save_simulation", &save),
        ])?)?;
        Ok(reply.pue_prediction)
    }

    /// One random row of the model's dataset, restricted to `features`.
    pub fn example_input(
        &self,
        model_name: &str,
        features: &[String],
    ) -> Result<serde_json::Map<String, Value>> {
        let features = serde_json::to_string(features)
            .map_err(|e| PulseError::protocol(e.to_string()))?;
        let value = self.post_form("/generator/example_input", &[
            ("features", &features),
            ("model_name", model_name),
        ])?;

        #[derive(serde::Deserialize)]
        struct ExampleReply {
            example: serde_json::Map<String, Value>,
        }
        let reply: ExampleReply = decode_reply(value)?;
        Ok(reply.example)
    }

    // -- Explorer --

    pub fn list_models(&self) -> Result<Vec<String>> {
        let list: ModelList = decode_reply(self.get_json("/explorer/models")?)?;
        Ok(list.models)
    }

    pub fn delete_model(&self, model_name: &str) -> Result<MessageReply> {
        decode_reply(self.delete(&format!("/explorer/delete/{model_name}"))?)
    }

    /// Download the model bundle as a zip to `dest`. Returns bytes written.
    pub fn download_model(&self, model_name: &str, dest: &Path) -> Result<u64> {
        let resp = self
            .agent
            .get(&self.url(&format!("/explorer/download/{model_name}.zip")))
            .timeout(self.timeout)
            .call()?;
        let mut reader = resp.into_reader();
        let mut file = std::fs::File::create(dest)?;
        let written = std::io::copy(&mut reader, &mut file)?;
        file.flush()?;
        Ok(written)
    }

    // -- History --

    pub fn history(&self, model_name: &str) -> Result<History> {
        let raw: RawHistory = decode_reply(self.get_json(&format!("/history/{model_name}"))?)?;
        Ok(raw.normalize())
    }

    pub fn clear_llm_history(&self, model_name: &str) -> Result<MessageReply> {
        decode_reply(self.delete(&format!("/history/clear_llm/{model_name}"))?)
    }

    pub fn clear_simulations(&self, model_name: &str) -> Result<MessageReply> {
        decode_reply(self.delete(&format!("/history/clear_simulations/{model_name}"))?)
    }

    pub fn delete_history_item(
        &self,
        model_name: &str,
        kind: HistoryKind,
        timestamp: &str,
    ) -> Result<MessageReply> {
        let body = DeleteHistoryItem {
            model: model_name,
            kind: kind.as_wire(),
            timestamp,
        };
        decode_reply(self.send_json("DELETE", "/history/delete_item", &body)?)
    }

    // -- LLM --

    /// Open the streamed answer to a question. The body is NDJSON with one
    /// `{"response": fragment}` object per line. Reads are bounded like
    /// [`automl_stream`](Self::automl_stream); the caller enforces
    /// [`llm_timeout`](Self::llm_timeout) between fragments.
    pub fn ask_stream(&self, request: &impl Serialize) -> Result<BodyReader> {
        let resp = self
            .stream_agent
            .post(&self.url("/llm/ask"))
            .send_json(request)?;
        Ok(resp.into_reader())
    }

    // -- Statistics --

    /// Accuracy and usage figures behind the dashboard.
    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        let raw: RawDashboardStats = decode_reply(self.get_json("/statistics/dashboard")?)?;
        Ok(raw.normalize())
    }

    // -- Settings --

    pub fn default_model(&self) -> Result<Option<String>> {
        let reply: DefaultModelReply = decode_reply(self.get_json("/settings/default_model")?)?;
        let name = reply.default_model.trim();
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    pub fn set_default_model(&self, model_name: &str) -> Result<MessageReply> {
        decode_reply(self.post_form("/settings/default_model", &[("model_name", model_name)])?)
    }

    /// Whether the backend answers at all. Uses a short timeout.
    pub fn is_healthy(&self) -> bool {
        let result = self
            .agent
            .get(&self.url("/explorer/models"))
            .timeout(Duration::from_secs(5))
            .call();
        match result {
            Ok(_) => true,
            Err(err) => {
                log::debug!("health check failed: {err}");
                false
            }
        }
    }
}

impl JobBackend for ApiClient {
    fn job_status(&self, task_id: &str) -> Result<String> {
        let reply: StatusReply = decode_reply(self.get_json(&format!("/generator/status/{task_id}"))?)?;
        Ok(reply.status)
    }

    fn model_summary(&self, model_name: &str) -> Result<ModelSummary> {
        let raw: RawModelSummary =
            decode_reply(self.get_json(&format!("/explorer/summary/{model_name}"))?)?;
        Ok(raw.normalize())
    }

    fn automl_candidates(&self, task_id: &str) -> Result<Vec<CandidateResult>> {
        let reply: CandidatesReply =
            decode_reply(self.get_json(&format!("/generator/automl_candidates/{task_id}"))?)?;
        Ok(reply.normalize())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_json(resp: ureq::Response) -> Result<Value> {
    resp.into_json()
        .map_err(|e| PulseError::protocol(format!("reply is not JSON: {e}")))
}

/// `"pulse"`, `"/pulse/"` and `"/pulse"` all become `"/pulse"`; empty stays
/// empty.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// JSON-encoded form fields for the AutoML endpoints.
fn automl_form(
    features: &[String],
    epochs_options: &[u32],
    test_size_options: &[f64],
) -> Result<(String, String, String)> {
    let encode = |e: serde_json::Error| PulseError::protocol(e.to_string());
    Ok((
        serde_json::to_string(features).map_err(encode)?,
        serde_json::to_string(epochs_options).map_err(encode)?,
        serde_json::to_string(test_size_options).map_err(encode)?,
    ))
}

fn multipart_boundary() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("----pulse-boundary-{nanos:x}")
}

/// Encode text fields plus one file part as `multipart/form-data`.
fn multipart_body(
    boundary: &str,
    fields: &[(&str, &str)],
    file: (&str, &str, &[u8]),
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    for (name, value) in fields {
        write!(body, "--{boundary}\r\n")?;
        write!(body, "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")?;
        write!(body, "{value}\r\n")?;
    }
    let (name, file_name, contents) = file;
    write!(body, "--{boundary}\r\n")?;
    write!(
        body,
        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n"
    )?;
    write!(body, "Content-Type: text/csv\r\n\r\n")?;
    body.extend_from_slice(contents);
    write!(body, "\r\n--{boundary}--\r\n")?;
    Ok(body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
