/// End-to-end job flows: launch, follow progress, reconcile.
///
/// The socket flows run against a local `tungstenite` server; the polling
/// and NDJSON flows run against the mock REST backend. Confirmation fetches
/// are counted to check they happen exactly once, and only on success.
mod common;

use std::cell::Cell;
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, mpsc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{MockBackend, Reply};
use pulse::api::JobBackend;
use pulse::api::types::ModelSummary;
use pulse::config::Transport;
use pulse::error::{PulseError, Result};
use pulse::job::launcher::{AutoMlRequest, TrainRequest};
use pulse::job::runner::{JobRunner, follow_polling, follow_stream};
use pulse::job::tracker::{CandidateResult, JobTracker, Metrics};
use pulse::job::{Job, JobKind, JobStatus};
use pulse::stream::ndjson::NdjsonSource;
use pulse::stream::socket::{SocketSource, progress_url};
use pulse::stream::CancelToken;
use pulse::stream::poll::PollState;
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// In-memory backend counting confirmation fetches.
struct FakeBackend {
    summary_fetches: Cell<u32>,
    candidate_fetches: Cell<u32>,
    metrics: Metrics,
    candidates: Vec<CandidateResult>,
}

impl FakeBackend {
    fn new(metrics: Metrics) -> Self {
        Self {
            summary_fetches: Cell::new(0),
            candidate_fetches: Cell::new(0),
            metrics,
            candidates: Vec::new(),
        }
    }
}

impl JobBackend for FakeBackend {
    fn job_status(&self, _task_id: &str) -> Result<String> {
        Ok("completed".to_string())
    }

    fn model_summary(&self, model_name: &str) -> Result<ModelSummary> {
        self.summary_fetches.set(self.summary_fetches.get() + 1);
        Ok(ModelSummary {
            model_name: model_name.to_string(),
            features: vec!["it_load".into()],
            epochs: 100,
            test_size: 20.0,
            metrics: self.metrics,
            simulations: Vec::new(),
            llm_history: Vec::new(),
        })
    }

    fn automl_candidates(&self, _task_id: &str) -> Result<Vec<CandidateResult>> {
        self.candidate_fetches.set(self.candidate_fetches.get() + 1);
        Ok(self.candidates.clone())
    }
}

const HANDSHAKE: Duration = Duration::from_secs(2);
const READ: Duration = Duration::from_millis(100);

fn metrics(loss: f64, mae: f64, r2: f64) -> Metrics {
    Metrics { loss, mae, r2 }
}

fn summary_frame(temp_id: &str, epochs: u32, test_size: u32, r2: f64) -> String {
    json!({
        "is_summary": true,
        "temp_id": temp_id,
        "epochs": epochs,
        "test_size": test_size,
        "loss": 0.02,
        "mae": 0.03,
        "r2": r2,
        "features": ["it_load"]
    })
    .to_string()
}

/// Serve one WebSocket connection that sends `frames` and then closes.
/// Returns the base URL to derive the socket URL from.
fn serve_socket(frames: Vec<String>) -> String {
    serve_socket_reporting_close(frames).0
}

/// Like [`serve_socket`], also reporting whether the client answered the
/// server's close frame.
fn serve_socket_reporting_close(frames: Vec<String>) -> (String, mpsc::Receiver<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut ws = tungstenite::accept(stream).unwrap();
        for frame in frames {
            if ws.send(tungstenite::Message::text(frame)).is_err() {
                return;
            }
        }
        let _ = ws.close(None);
        loop {
            match ws.read() {
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed) => {
                    let _ = tx.send(true);
                    return;
                }
                Err(_) => {
                    let _ = tx.send(false);
                    return;
                }
            }
        }
    });
    (format!("http://{addr}"), rx)
}

// ---------------------------------------------------------------------------
// Socket transport
// ---------------------------------------------------------------------------

#[test]
fn socket_training_reconciles_metrics_once() {
    let base = serve_socket(vec![
        json!({"epoch": 1, "total_epochs": 2, "loss": 0.5, "mae": 0.4}).to_string(),
        json!({"epoch": 2, "total_epochs": 2, "loss": 0.3, "mae": 0.2}).to_string(),
        summary_frame("dc1-final", 2, 20, 0.80),
    ]);
    let url = progress_url(&base, JobKind::Training, "t1");
    let source = SocketSource::connect(&url, HANDSHAKE, READ).unwrap();

    let backend = FakeBackend::new(metrics(0.01, 0.02, 0.97));
    let mut tracker = JobTracker::new(Job::new("t1", JobKind::Training, "dc1"));
    let mut seen = Vec::new();
    follow_stream(&backend, &mut tracker, source, &CancelToken::new(), |t| {
        seen.push(t.status_text().map(str::to_string))
    })
    .unwrap();

    assert_eq!(tracker.status(), JobStatus::Completed);
    assert_eq!(backend.summary_fetches.get(), 1);
    assert_eq!(tracker.metrics(), Some(metrics(0.01, 0.02, 0.97)));
    assert!(
        seen.iter()
            .flatten()
            .any(|s| s.starts_with("Epoch 2/2")),
        "{seen:?}"
    );
}

#[test]
fn socket_error_frame_fails_without_confirmation() {
    let base = serve_socket(vec![
        json!({"epoch": 1, "total_epochs": 10}).to_string(),
        json!({"error": "Training diverged"}).to_string(),
        json!({"epoch": 2, "total_epochs": 10}).to_string(),
    ]);
    let url = progress_url(&base, JobKind::Training, "t2");
    let source = SocketSource::connect(&url, HANDSHAKE, READ).unwrap();

    let backend = FakeBackend::new(metrics(0.0, 0.0, 1.0));
    let mut tracker = JobTracker::new(Job::new("t2", JobKind::Training, "dc1"));
    follow_stream(&backend, &mut tracker, source, &CancelToken::new(), |_| {}).unwrap();

    assert_eq!(tracker.status(), JobStatus::Failed);
    assert_eq!(tracker.error(), Some("Training diverged"));
    assert_eq!(backend.summary_fetches.get(), 0);
    assert_eq!(tracker.last_epoch().map(|e| e.epoch), Some(1));
}

#[test]
fn socket_automl_dedups_and_preselects_best() {
    let base = serve_socket(vec![
        summary_frame("c-50-10", 50, 10, 0.81),
        summary_frame("c-50-20", 50, 20, 0.88),
        summary_frame("c-50-20", 50, 20, 0.88),
        summary_frame("c-100-10", 100, 10, 0.93),
        summary_frame("c-100-20", 100, 20, 0.90),
    ]);
    let url = progress_url(&base, JobKind::AutoMlTraining, "a1");
    let source = SocketSource::connect(&url, HANDSHAKE, READ).unwrap();

    let mut backend = FakeBackend::new(metrics(0.0, 0.0, 0.0));
    backend.candidates = vec![CandidateResult {
        temp_id: "c-100-20".into(),
        epochs: 100,
        test_size: 20.0,
        metrics: metrics(0.01, 0.01, 0.95),
        features: vec!["it_load".into()],
    }];
    let mut tracker = JobTracker::new(Job::new("a1", JobKind::AutoMlTraining, "dc1"));
    follow_stream(&backend, &mut tracker, source, &CancelToken::new(), |_| {}).unwrap();

    assert_eq!(tracker.status(), JobStatus::Completed);
    assert_eq!(backend.candidate_fetches.get(), 1);
    let ids: Vec<_> = tracker
        .candidates()
        .as_slice()
        .iter()
        .map(|c| c.temp_id.as_str())
        .collect();
    assert_eq!(ids, vec!["c-50-10", "c-50-20", "c-100-10", "c-100-20"]);
    // The authoritative value moved the best candidate.
    assert_eq!(tracker.selected(), Some(3));
}

#[test]
fn socket_answers_server_close() {
    let (base, clean_close) = serve_socket_reporting_close(vec![
        json!({"epoch": 1, "total_epochs": 1}).to_string(),
    ]);
    let url = progress_url(&base, JobKind::Training, "t3");
    let source = SocketSource::connect(&url, HANDSHAKE, READ).unwrap();

    let backend = FakeBackend::new(metrics(0.0, 0.0, 1.0));
    let mut tracker = JobTracker::new(Job::new("t3", JobKind::Training, "dc1"));
    follow_stream(&backend, &mut tracker, source, &CancelToken::new(), |_| {}).unwrap();

    assert_eq!(tracker.status(), JobStatus::Completed);
    assert_eq!(clean_close.recv_timeout(Duration::from_secs(5)), Ok(true));
}

// ---------------------------------------------------------------------------
// NDJSON transport
// ---------------------------------------------------------------------------

#[test]
fn ndjson_stream_completes_on_clean_close() {
    let body = format!(
        "{}\n{}\n{{\"epoch\":3,\"total_epochs\":5}}\n",
        summary_frame("x1", 50, 10, 0.7),
        summary_frame("x2", 100, 10, 0.9)
    );
    let source = NdjsonSource::new(Cursor::new(body.into_bytes()));
    let backend = FakeBackend::new(metrics(0.0, 0.0, 0.0));
    let mut tracker = JobTracker::new(Job::new("s1", JobKind::AutoMlTraining, "dc1"));
    follow_stream(&backend, &mut tracker, source, &CancelToken::new(), |_| {}).unwrap();

    assert_eq!(tracker.status(), JobStatus::Completed);
    assert_eq!(tracker.candidates().len(), 2);
    assert_eq!(tracker.selected(), Some(1));
}

#[test]
fn runner_streams_automl_over_ndjson_without_confirmation() {
    let mock = MockBackend::start(|req| {
        if req.url == "/generator/automl_train" {
            let body = [
                summary_frame("n-50-10", 50, 10, 0.84),
                summary_frame("n-50-20", 50, 20, 0.91),
                summary_frame("n-100-10", 100, 10, 0.87),
                summary_frame("n-100-20", 100, 20, 0.89),
            ]
            .join("\n");
            Reply::raw(body, "application/x-ndjson")
        } else {
            Reply::status(500, json!({"detail": "unexpected"}))
        }
    });
    let config = mock.config();
    let client = mock.client();
    let mut runner = JobRunner::new(&client, &config);

    let req = AutoMlRequest {
        model_name: "dc1".into(),
        features: vec!["it_load".into(), "outdoor_temp".into()],
        epochs_options: vec![50, 100],
        test_size_options: vec![10.0, 20.0],
    };
    let tracker = runner.automl_streamed(&req, |_| {}).unwrap();

    assert_eq!(tracker.status(), JobStatus::Completed);
    assert_eq!(tracker.candidates().len(), req.combinations());
    assert_eq!(tracker.selected(), Some(1));
    assert!(tracker.job().job_id.starts_with("dc1-stream-"));
    assert_eq!(mock.count("/generator/automl_candidates"), 0);
}

/// Answer one request with a chunked NDJSON body: `line`, then silence until
/// the returned sender is dropped.
fn serve_stalled_ndjson(line: String) -> (String, mpsc::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (release, held) = mpsc::channel::<()>();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = [0u8; 4096];
        let _ = stream.read(&mut request);
        let chunk = format!("{line}\n");
        let head = "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nTransfer-Encoding: chunked\r\n\r\n";
        let _ = write!(stream, "{head}{:x}\r\n{chunk}\r\n", chunk.len());
        let _ = stream.flush();
        let _ = held.recv_timeout(Duration::from_secs(10));
    });
    (format!("http://{addr}"), release)
}

#[test]
fn stalled_ndjson_stream_can_be_cancelled() {
    let (base, _release) = serve_stalled_ndjson(summary_frame("n-50-10", 50, 10, 0.84));
    let mut config = pulse::config::PulseConfig::default();
    config.api.base_url = base;
    config.api.prefix = String::new();
    config.stream.read_timeout_ms = 50;
    let client = pulse::api::ApiClient::from_config(&config);

    let source = client
        .automl_stream("dc1", &["it_load".to_string()], &[50, 100], &[10.0])
        .unwrap();
    let cancel = CancelToken::new();
    let backend = FakeBackend::new(metrics(0.0, 0.0, 0.0));
    let mut tracker = JobTracker::new(Job::new("s2", JobKind::AutoMlTraining, "dc1"));
    let started = Instant::now();
    follow_stream(&backend, &mut tracker, source, &cancel, |t| {
        // Stop once the first candidate is in; the body never ends by itself.
        if t.candidates().len() == 1 {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            });
        }
    })
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    assert_eq!(tracker.status(), JobStatus::Cancelled);
    assert_eq!(tracker.candidates().len(), 1);
    assert_eq!(backend.candidate_fetches.get(), 0);
}

// ---------------------------------------------------------------------------
// Polling transport
// ---------------------------------------------------------------------------

fn polling_mock(statuses: Vec<&'static str>) -> MockBackend {
    let polls = Arc::new(AtomicUsize::new(0));
    MockBackend::start(move |req| match req.url.as_str() {
        "/generator/train_model" => Reply::json(json!({
            "task_id": "p1",
            "message": "Training started",
            "loss": 0.9, "mae": 0.8, "r2": 0.1
        })),
        "/generator/status/p1" => {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            let status = statuses.get(n).or(statuses.last()).copied().unwrap_or("running");
            Reply::json(json!({"status": status}))
        }
        "/explorer/summary/dc1" => Reply::json(json!({
            "model_name": "dc1",
            "features": ["it_load"],
            "epochs": 100,
            "test_size": 20,
            "metrics": {"loss": 0.011, "mae": 0.022, "r2": 0.963}
        })),
        _ => Reply::status(404, json!({"detail": "Not Found"})),
    })
}

fn train_request() -> TrainRequest {
    TrainRequest {
        model_name: "dc1".into(),
        features: vec!["it_load".into()],
        epochs: 100,
        test_size: 20.0,
    }
}

#[test]
fn polling_completion_confirms_exactly_once() {
    let mock = polling_mock(vec!["running", "Epoch 40/100", "completed"]);
    let mut config = mock.config();
    config.stream.transport = Transport::Poll;
    config.stream.poll_interval_ms = 10;
    let client = mock.client();

    let mut texts = Vec::new();
    let tracker = JobRunner::new(&client, &config)
        .train(&train_request(), |t| {
            texts.push(t.status_text().unwrap_or_default().to_string())
        })
        .unwrap();

    assert_eq!(tracker.status(), JobStatus::Completed);
    assert_eq!(mock.count("/generator/status/p1"), 3);
    assert_eq!(mock.count("/explorer/summary/dc1"), 1);
    assert_eq!(tracker.metrics(), Some(metrics(0.011, 0.022, 0.963)));
    assert_eq!(texts.first().map(String::as_str), Some("Training started"));
    assert!(texts.iter().any(|t| t == "Epoch 40/100"), "{texts:?}");
}

#[test]
fn polling_error_status_fails_verbatim() {
    let mock = polling_mock(vec!["running", "error: CUDA out of memory"]);
    let mut config = mock.config();
    config.stream.transport = Transport::Poll;
    config.stream.poll_interval_ms = 10;
    let client = mock.client();

    let tracker = JobRunner::new(&client, &config)
        .train(&train_request(), |_| {})
        .unwrap();

    assert_eq!(tracker.status(), JobStatus::Failed);
    assert_eq!(tracker.error(), Some("error: CUDA out of memory"));
    assert_eq!(mock.count("/explorer/summary"), 0);
    // Placeholder metrics from the launch reply survive.
    assert_eq!(tracker.metrics().map(|m| m.r2), Some(0.1));
}

#[test]
fn socket_transport_falls_back_to_polling() {
    // The mock never completes the WebSocket upgrade; the handshake times out.
    let mock = polling_mock(vec!["completed"]);
    let mut config = mock.config();
    config.stream.transport = Transport::Socket;
    config.stream.poll_interval_ms = 10;
    let client = mock.client();

    let tracker = JobRunner::new(&client, &config)
        .train(&train_request(), |_| {})
        .unwrap();

    assert_eq!(tracker.status(), JobStatus::Completed);
    assert_eq!(mock.count("/ws/train/p1"), 1);
    assert_eq!(mock.count("/explorer/summary/dc1"), 1);
}

#[test]
fn invalid_request_sends_nothing() {
    let mock = polling_mock(vec!["completed"]);
    let config = mock.config();
    let client = mock.client();

    let mut req = train_request();
    req.features.clear();
    let err = JobRunner::new(&client, &config)
        .train(&req, |_| {})
        .unwrap_err();
    assert!(matches!(&err, PulseError::Validation(msg) if msg == "No features selected."));
    assert!(mock.requests().is_empty());
}

/// Reports "running" and cancels its owner on the second poll.
struct CancellingBackend {
    cancel: CancelToken,
    polls: Cell<u32>,
    summary_fetches: Cell<u32>,
}

impl JobBackend for CancellingBackend {
    fn job_status(&self, _task_id: &str) -> Result<String> {
        self.polls.set(self.polls.get() + 1);
        if self.polls.get() == 2 {
            self.cancel.cancel();
        }
        Ok("running".to_string())
    }

    fn model_summary(&self, _model_name: &str) -> Result<ModelSummary> {
        self.summary_fetches.set(self.summary_fetches.get() + 1);
        Err(PulseError::Backend("not expected".into()))
    }

    fn automl_candidates(&self, _task_id: &str) -> Result<Vec<CandidateResult>> {
        Ok(Vec::new())
    }
}

#[test]
fn cancelled_poll_stops_without_confirmation() {
    let cancel = CancelToken::new();
    let backend = CancellingBackend {
        cancel: cancel.clone(),
        polls: Cell::new(0),
        summary_fetches: Cell::new(0),
    };
    let mut tracker = JobTracker::new(Job::new("p9", JobKind::Training, "dc1"));
    let mut updates = 0;
    let state = follow_polling(
        &backend,
        &mut tracker,
        Duration::from_millis(10),
        &cancel,
        |_| updates += 1,
    )
    .unwrap();

    assert_eq!(state, PollState::Cancelled);
    assert_eq!(tracker.status(), JobStatus::Cancelled);
    assert_eq!(backend.polls.get(), 2);
    assert_eq!(backend.summary_fetches.get(), 0);
    // Only the first poll reached the callback.
    assert_eq!(updates, 1);
}
