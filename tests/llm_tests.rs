/// LLM assistant flows against the mock backend.
///
/// Answers arrive as NDJSON `{"response": fragment}` lines; these tests check
/// accumulation, the stop marker and the session requirement end to end.
mod common;

use common::{MockBackend, Reply};
use pulse::config::LlmEngine;
use pulse::llm::{self, AnswerStatus, CANCELLED_MARKER};
use pulse::session::SessionState;
use pulse::stream::CancelToken;
use serde_json::json;

fn ndjson(fragments: &[&str]) -> String {
    fragments
        .iter()
        .map(|f| json!({"response": f}).to_string())
        .collect::<Vec<_>>()
        .join("\n")
        + "\n{\"done\":true}\n"
}

#[test]
fn streamed_answer_is_accumulated() {
    let mock = MockBackend::start(|req| {
        assert_eq!(req.url, "/llm/ask");
        Reply::raw(
            ndjson(&["Cooling ", "dominates ", "your PUE."]),
            "application/x-ndjson",
        )
    });

    let mut fragments = Vec::new();
    let outcome = llm::ask(
        &mock.client(),
        &SessionState::with_model("dc1"),
        LlmEngine::Gemma,
        "  what drives PUE?  ",
        &CancelToken::new(),
        |f| fragments.push(f.to_string()),
    )
    .unwrap();

    assert_eq!(outcome.answer.text(), "Cooling dominates your PUE.");
    assert_eq!(outcome.answer.status(), &AnswerStatus::Complete);
    assert_eq!(outcome.model_name, "dc1");
    assert_eq!(fragments.len(), 3);

    let body: serde_json::Value = serde_json::from_str(&mock.requests()[0].body).unwrap();
    assert_eq!(
        body,
        json!({"query": "what drives PUE?", "model": "gemma", "stream": true, "model_name": "dc1"})
    );
}

#[test]
fn stopping_keeps_partial_text_and_marks_once() {
    let mock = MockBackend::start(|_| {
        Reply::raw(ndjson(&["The ", "answer ", "is ", "long"]), "application/x-ndjson")
    });

    let cancel = CancelToken::new();
    let mut calls = 0;
    let outcome = llm::ask(
        &mock.client(),
        &SessionState::with_model("dc1"),
        LlmEngine::Phi,
        "explain",
        &cancel,
        |_| {
            calls += 1;
            if calls == 2 {
                cancel.cancel();
            }
        },
    )
    .unwrap();

    assert_eq!(calls, 2);
    assert_eq!(outcome.answer.status(), &AnswerStatus::Cancelled);
    assert_eq!(outcome.answer.text(), format!("The answer {CANCELLED_MARKER}"));
    assert_eq!(outcome.answer.text().matches(CANCELLED_MARKER).count(), 1);
}

#[test]
fn asking_without_a_model_sends_nothing() {
    let mock = MockBackend::start(|_| Reply::raw(ndjson(&["x"]), "application/x-ndjson"));
    let err = llm::ask(
        &mock.client(),
        &SessionState::new(),
        LlmEngine::Phi,
        "hello",
        &CancelToken::new(),
        |_| {},
    )
    .unwrap_err();
    assert!(err.is_validation());

    let err = llm::ask(
        &mock.client(),
        &SessionState::with_model("dc1"),
        LlmEngine::Phi,
        "   ",
        &CancelToken::new(),
        |_| {},
    )
    .unwrap_err();
    assert!(err.is_validation());
    assert!(mock.requests().is_empty());
}

#[test]
fn engine_names_parse() {
    for name in ["phi", "tinyllama", "llama2", "mistral", "gemma"] {
        let engine = LlmEngine::parse(name).unwrap();
        assert_eq!(engine.as_str(), name);
    }
    assert_eq!(LlmEngine::parse("gpt-4"), None);
}
