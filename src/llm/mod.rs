/// LLM assistant: streamed answers to questions about a model's data.
///
/// The backend answers `POST /llm/ask` with an NDJSON body of
/// `{"response": fragment}` objects, generated by a local Ollama engine.
/// Fragments are appended to the answer as they arrive.
///
/// # Stopping
///
/// Generation can be stopped through the [`CancelToken`]. The text received
/// so far is kept, [`CANCELLED_MARKER`] is appended once, and nothing is
/// appended afterwards. There is no retry.
use std::io::Read;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::api::ApiClient;
use crate::config::LlmEngine;
use crate::error::{PulseError, Result};
use crate::session::SessionState;
use crate::stream::ndjson::NdjsonSource;
use crate::stream::{CancelToken, FrameEvent, FrameSource, Subscription};

/// Appended to a stopped answer.
pub const CANCELLED_MARKER: &str = "\n[⛔ Response generation stopped by user.]";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Request body for `POST /llm/ask`.
#[derive(Debug, Serialize)]
pub struct AskRequest<'a> {
    pub query: &'a str,
    /// Ollama engine name.
    pub model: &'a str,
    pub stream: bool,
    /// PULSE model whose data the question is about.
    pub model_name: &'a str,
}

/// One line of the streamed answer.
#[derive(Debug, Deserialize)]
struct Fragment {
    #[serde(default)]
    response: Option<String>,
}

// ---------------------------------------------------------------------------
// Answer accumulation
// ---------------------------------------------------------------------------

/// How an answer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerStatus {
    Streaming,
    Complete,
    Cancelled,
    /// The connection dropped mid-answer. Partial text is kept.
    Interrupted(String),
}

/// Answer text built up from streamed fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    text: String,
    status: AnswerStatus,
}

impl Default for Answer {
    fn default() -> Self {
        Self {
            text: String::new(),
            status: AnswerStatus::Streaming,
        }
    }
}

impl Answer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> &AnswerStatus {
        &self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status != AnswerStatus::Streaming
    }

    /// Append one fragment. Ignored once the answer is finished.
    pub fn append(&mut self, fragment: &str) -> bool {
        if self.is_finished() {
            return false;
        }
        self.text.push_str(fragment);
        true
    }

    /// Decode one NDJSON line and append its fragment. Returns the fragment
    /// when something was appended.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if self.is_finished() {
            return None;
        }
        let fragment = match serde_json::from_str::<Fragment>(line) {
            Ok(Fragment {
                response: Some(text),
            }) if !text.is_empty() => text,
            Ok(_) => return None,
            Err(e) => {
                log::warn!("dropping answer line: {e}");
                return None;
            }
        };
        self.append(&fragment);
        Some(fragment)
    }

    pub fn complete(&mut self) {
        if !self.is_finished() {
            self.status = AnswerStatus::Complete;
        }
    }

    /// Stop the answer: keep the text, append the marker once, freeze.
    pub fn cancel(&mut self) {
        if self.is_finished() {
            return;
        }
        self.text.push_str(CANCELLED_MARKER);
        self.status = AnswerStatus::Cancelled;
    }

    pub fn interrupt(&mut self, reason: impl Into<String>) {
        if !self.is_finished() {
            self.status = AnswerStatus::Interrupted(reason.into());
        }
    }
}

/// Read a streamed answer from `body` until it ends or `cancel` fires.
///
/// `on_fragment` runs for every appended fragment and never after
/// cancellation.
pub fn read_answer<R, F>(body: R, cancel: &CancelToken, on_fragment: F) -> Answer
where
    R: Read,
    F: FnMut(&str),
{
    read_answer_within(body, cancel, None, on_fragment)
}

/// [`read_answer`] that also gives up when `idle_limit` passes without a
/// new line from the backend. The answer is then interrupted.
pub fn read_answer_within<R, F>(
    body: R,
    cancel: &CancelToken,
    idle_limit: Option<Duration>,
    mut on_fragment: F,
) -> Answer
where
    R: Read,
    F: FnMut(&str),
{
    let mut answer = Answer::new();
    let mut subscription = Subscription::new(NdjsonSource::new(body));
    let mut last_line = Instant::now();

    while !answer.is_finished() {
        if cancel.is_cancelled() {
            answer.cancel();
            break;
        }
        let event = subscription.source_mut().next_frame();
        if cancel.is_cancelled() {
            answer.cancel();
            break;
        }
        match event {
            Ok(FrameEvent::Frame(line)) => {
                last_line = Instant::now();
                if let Some(fragment) = answer.push_line(&line) {
                    on_fragment(&fragment);
                }
            }
            Ok(FrameEvent::Idle) => {
                if let Some(limit) = idle_limit
                    && last_line.elapsed() >= limit
                {
                    answer.interrupt(format!("no reply for {limit:?}"));
                }
            }
            Ok(FrameEvent::Closed) => answer.complete(),
            Err(err) => answer.interrupt(err.to_string()),
        }
    }
    answer
}

// ---------------------------------------------------------------------------
// Ask
// ---------------------------------------------------------------------------

/// A finished question and its answer.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub answer: Answer,
    pub engine: LlmEngine,
    pub model_name: String,
    pub latency_ms: u64,
}

/// Ask a question about the session's active model.
pub fn ask<F>(
    client: &ApiClient,
    session: &SessionState,
    engine: LlmEngine,
    query: &str,
    cancel: &CancelToken,
    on_fragment: F,
) -> Result<AskOutcome>
where
    F: FnMut(&str),
{
    let query = query.trim();
    if query.is_empty() {
        return Err(PulseError::validation("Question is empty."));
    }
    let model_name = session.require_model()?;

    let start = Instant::now();
    let body = client.ask_stream(&AskRequest {
        query,
        model: engine.as_str(),
        stream: true,
        model_name,
    })?;
    let answer = read_answer_within(body, cancel, Some(client.llm_timeout()), on_fragment);
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    log::info!(
        "llm answer from {engine} for {model_name}: {} chars in {latency_ms}ms ({:?})",
        answer.text().len(),
        answer.status()
    );

    Ok(AskOutcome {
        answer,
        engine,
        model_name: model_name.to_string(),
        latency_ms,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn fragments_accumulate_in_order() {
        let body = "{\"response\":\"The PUE \"}\n{\"response\":\"is 1.4\"}\n{\"done\":true}\n";
        let mut seen = Vec::new();
        let answer = read_answer(Cursor::new(body), &CancelToken::new(), |f| {
            seen.push(f.to_string())
        });
        assert_eq!(answer.text(), "The PUE is 1.4");
        assert_eq!(answer.status(), &AnswerStatus::Complete);
        assert_eq!(seen, vec!["The PUE ", "is 1.4"]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let body = "{\"response\":\"a\"}\nnot json\n{\"response\":\"b\"}";
        let answer = read_answer(Cursor::new(body), &CancelToken::new(), |_| {});
        assert_eq!(answer.text(), "ab");
    }

    #[test]
    fn cancel_appends_marker_once_and_freezes() {
        let mut answer = Answer::new();
        answer.push_line(r#"{"response":"partial"}"#);
        answer.cancel();
        answer.cancel();
        assert!(!answer.append("more"));
        assert_eq!(answer.push_line(r#"{"response":"late"}"#), None);
        assert_eq!(answer.text(), format!("partial{CANCELLED_MARKER}"));
        assert_eq!(answer.status(), &AnswerStatus::Cancelled);
    }

    #[test]
    fn cancel_mid_stream_stops_callbacks() {
        let body = "{\"response\":\"one \"}\n{\"response\":\"two \"}\n{\"response\":\"three\"}\n";
        let cancel = CancelToken::new();
        let mut calls = 0;
        let answer = read_answer(Cursor::new(body), &cancel, |_| {
            calls += 1;
            cancel.cancel();
        });
        assert_eq!(calls, 1);
        assert_eq!(answer.text(), format!("one {CANCELLED_MARKER}"));
    }

    /// One line, then a backend that stays silent: every read times out.
    struct Stalled {
        first: Option<&'static [u8]>,
    }

    impl Read for Stalled {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(bytes) = self.first.take() {
                buf[..bytes.len()].copy_from_slice(bytes);
                return Ok(bytes.len());
            }
            std::thread::sleep(Duration::from_millis(10));
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out reading response"))
        }
    }

    #[test]
    fn stop_from_another_thread_ends_a_stalled_answer() {
        let cancel = CancelToken::new();
        let stopper = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let answer = read_answer(
            Stalled {
                first: Some(b"{\"response\":\"Cooling \"}\n"),
            },
            &cancel,
            |_| {},
        );
        stopper.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(answer.status(), &AnswerStatus::Cancelled);
        assert_eq!(answer.text(), format!("Cooling {CANCELLED_MARKER}"));
        assert_eq!(answer.text().matches(CANCELLED_MARKER).count(), 1);
    }

    #[test]
    fn silent_backend_interrupts_after_idle_limit() {
        let answer = read_answer_within(
            Stalled {
                first: Some(b"{\"response\":\"partial\"}\n"),
            },
            &CancelToken::new(),
            Some(Duration::from_millis(50)),
            |_| {},
        );
        assert!(matches!(answer.status(), AnswerStatus::Interrupted(_)));
        assert_eq!(answer.text(), "partial");
    }

    #[test]
    fn completed_answer_ignores_cancel() {
        let mut answer = Answer::new();
        answer.append("done");
        answer.complete();
        answer.cancel();
        assert_eq!(answer.text(), "done");
        assert_eq!(answer.status(), &AnswerStatus::Complete);
    }

    #[test]
    fn request_shape() {
        let body = serde_json::to_value(AskRequest {
            query: "why?",
            model: LlmEngine::Mistral.as_str(),
            stream: true,
            model_name: "dc1",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"query": "why?", "model": "mistral", "stream": true, "model_name": "dc1"})
        );
    }
}
