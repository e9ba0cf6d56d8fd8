/// Configuration schema and defaults for the PULSE client.
///
/// Defines the TOML-serializable configuration structure with all sections:
/// `[api]`, `[stream]`, `[automl]`, `[llm]`, and `[logging]`.
///
/// Every field has a built-in default. Users only need to set the values they
/// want to override.
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level PULSE configuration.
///
/// Maps directly to the `~/.pulse/config.toml` and `.pulse.toml` file
/// schemas. All sections and fields are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub automl: AutoMlConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// [api]
// ---------------------------------------------------------------------------

/// Backend endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Backend origin, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Versioned path prefix shared by every REST endpoint.
    pub prefix: String,
    /// Timeout for ordinary REST calls (milliseconds).
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            prefix: "/pulse".to_string(),
            timeout_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// [stream]
// ---------------------------------------------------------------------------

/// How the training flow follows a job's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// WebSocket pushing one JSON object per text frame.
    #[default]
    Socket,
    /// Periodic status requests until the job reaches a terminal status.
    Poll,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Socket => write!(f, "socket"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

/// Progress-streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Transport used by the single-model training flow.
    pub transport: Transport,
    /// Delay between status requests for the polling transport (milliseconds).
    pub poll_interval_ms: u64,
    /// Limit for opening the progress socket, TCP connect and upgrade each.
    pub handshake_timeout_ms: u64,
    /// Per-read timeout on progress sockets and streamed bodies; bounds how
    /// long a cancellation goes unnoticed.
    pub read_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            poll_interval_ms: 2000,
            handshake_timeout_ms: 5000,
            read_timeout_ms: 250,
        }
    }
}

// ---------------------------------------------------------------------------
// [automl]
// ---------------------------------------------------------------------------

/// Default search grid for AutoML runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMlConfig {
    pub epochs_options: Vec<u32>,
    /// Test split sizes in percent.
    pub test_size_options: Vec<u32>,
}

impl Default for AutoMlConfig {
    fn default() -> Self {
        Self {
            epochs_options: vec![50, 100, 200],
            test_size_options: vec![10, 20, 30],
        }
    }
}

// ---------------------------------------------------------------------------
// [llm]
// ---------------------------------------------------------------------------

/// Inference engines the backend's LLM assistant accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmEngine {
    /// Fast and accurate.
    #[default]
    Phi,
    /// Extremely fast, low resource.
    Tinyllama,
    /// Balanced speed and reasoning.
    Llama2,
    /// High quality, slower.
    Mistral,
    /// Efficient, small footprint.
    Gemma,
}

impl LlmEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phi => "phi",
            Self::Tinyllama => "tinyllama",
            Self::Llama2 => "llama2",
            Self::Mistral => "mistral",
            Self::Gemma => "gemma",
        }
    }

    /// Parse an engine name, case-insensitively.
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_ascii_lowercase().as_str() {
            "phi" => Some(Self::Phi),
            "tinyllama" => Some(Self::Tinyllama),
            "llama2" => Some(Self::Llama2),
            "mistral" => Some(Self::Mistral),
            "gemma" => Some(Self::Gemma),
            _ => None,
        }
    }
}

impl std::fmt::Display for LlmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LLM assistant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub engine: LlmEngine,
    /// Read timeout for the streamed answer (milliseconds).
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            engine: LlmEngine::default(),
            timeout_ms: 120_000,
        }
    }
}

// ---------------------------------------------------------------------------
// [logging]
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether finished jobs are appended to `~/.pulse/job-log.jsonl`.
    pub job_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { job_log: true }
    }
}

// ---------------------------------------------------------------------------
// Default TOML content
// ---------------------------------------------------------------------------

impl PulseConfig {
    /// Generate the annotated default TOML config file content.
    ///
    /// Used by `pulse config init`.
    pub fn default_toml() -> String {
        r#"# PULSE client configuration
#
# Configuration hierarchy (highest precedence wins):
#   1. Environment variables (PULSE_*)
#   2. Project config (.pulse.toml in current directory)
#   3. User global config (~/.pulse/config.toml)
#   4. Built-in defaults

[api]
base_url = "http://localhost:8000"   # or PULSE_API_URL
prefix = "/pulse"
timeout_ms = 30000

[stream]
transport = "socket"                 # socket | poll
poll_interval_ms = 2000
handshake_timeout_ms = 5000
read_timeout_ms = 250

[automl]
epochs_options = [50, 100, 200]
test_size_options = [10, 20, 30]     # percent

[llm]
engine = "phi"                       # phi | tinyllama | llama2 | mistral | gemma
timeout_ms = 120000

[logging]
job_log = true                       # ~/.pulse/job-log.jsonl
"#
        .to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = PulseConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.prefix, "/pulse");
        assert_eq!(config.stream.transport, Transport::Socket);
        assert_eq!(config.stream.poll_interval_ms, 2000);
        assert_eq!(config.automl.epochs_options, vec![50, 100, 200]);
        assert_eq!(config.automl.test_size_options, vec![10, 20, 30]);
        assert_eq!(config.llm.engine, LlmEngine::Phi);
        assert!(config.logging.job_log);
    }

    #[test]
    fn deserialize_minimal_toml() {
        let toml_str = r#"
[api]
base_url = "http://pulse.internal:9000"
"#;
        let config: PulseConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api.base_url, "http://pulse.internal:9000");
        assert_eq!(config.api.prefix, "/pulse"); // default
        assert_eq!(config.stream.read_timeout_ms, 250); // default
        assert_eq!(config.stream.handshake_timeout_ms, 5000); // default
    }

    #[test]
    fn deserialize_enums() {
        let toml_str = r#"
[stream]
transport = "poll"

[llm]
engine = "mistral"
"#;
        let config: PulseConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.stream.transport, Transport::Poll);
        assert_eq!(config.llm.engine, LlmEngine::Mistral);
    }

    #[test]
    fn empty_toml_produces_defaults() {
        let config: PulseConfig = toml::from_str("").unwrap();
        assert_eq!(config.api.timeout_ms, 30_000);
        assert_eq!(config.llm.timeout_ms, 120_000);
    }

    #[test]
    fn default_toml_parses_back() {
        let config: PulseConfig = toml::from_str(&PulseConfig::default_toml()).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.stream.transport, Transport::Socket);
        assert_eq!(config.automl.epochs_options, vec![50, 100, 200]);
    }

    #[test]
    fn engine_parse_and_display() {
        assert_eq!(LlmEngine::parse("TinyLlama"), Some(LlmEngine::Tinyllama));
        assert_eq!(LlmEngine::parse("gpt4"), None);
        assert_eq!(LlmEngine::Llama2.to_string(), "llama2");
        assert_eq!(Transport::Poll.to_string(), "poll");
    }
}
