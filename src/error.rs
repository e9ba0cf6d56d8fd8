/// Error taxonomy for the PULSE client.
///
/// Every operation that talks to the backend or consumes a progress stream
/// returns [`PulseError`]. CLI handlers convert it into `anyhow::Error` at the
/// command boundary; nothing escapes further.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PulseError {
    /// Missing or invalid user input, caught before any request is sent.
    #[error("{0}")]
    Validation(String),

    /// The request failed, the backend answered with a non-success status,
    /// or a streaming connection dropped.
    #[error("network error: {0}")]
    Network(String),

    /// A frame or reply that could not be decoded.
    #[error("malformed message: {0}")]
    Protocol(String),

    /// Failure reported by the backend inside a job's progress stream.
    #[error("job failed: {0}")]
    Job(String),

    /// A REST reply that carried an `{"error": ...}` body.
    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PulseError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether the error was raised client-side before any request went out.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<ureq::Error> for PulseError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, resp) => {
                let detail = resp
                    .into_string()
                    .ok()
                    .and_then(|body| extract_detail(&body))
                    .unwrap_or_default();
                if detail.is_empty() {
                    Self::Network(format!("HTTP {code}"))
                } else {
                    Self::Network(format!("HTTP {code}: {detail}"))
                }
            }
            ureq::Error::Transport(t) => Self::Network(t.to_string()),
        }
    }
}

impl From<tungstenite::Error> for PulseError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Pull a human-readable message out of an error body.
///
/// FastAPI reports `{"detail": "..."}`; PULSE handlers use `{"error": "..."}`.
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("detail")
        .or_else(|| value.get("error"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

pub type Result<T> = std::result::Result<T, PulseError>;
