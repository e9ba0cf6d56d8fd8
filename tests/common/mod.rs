//! In-process mock of the PULSE backend, served with `tiny_http`.
#![allow(dead_code)]

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use pulse::api::ApiClient;
use pulse::config::PulseConfig;
use tiny_http::{Header, Response, Server, StatusCode};

/// One request as the mock saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub url: String,
    pub body: String,
}

/// A reply from a test handler.
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub content_type: &'static str,
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            status: 200,
            body: value.to_string(),
            content_type: "application/json",
        }
    }

    pub fn status(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            ..Self::json(value)
        }
    }

    pub fn raw(body: impl Into<String>, content_type: &'static str) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_type,
        }
    }
}

pub struct MockBackend {
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    addr: String,
}

impl MockBackend {
    /// Serve every request with `handler` until dropped.
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("mock backend must bind"));
        let addr = server
            .server_addr()
            .to_ip()
            .expect("mock backend listens on TCP")
            .to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let srv = Arc::clone(&server);
        let log = Arc::clone(&requests);
        let handle = std::thread::spawn(move || {
            for mut request in srv.incoming_requests() {
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let recorded = Recorded {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    body,
                };
                let reply = handler(&recorded);
                log.lock().unwrap().push(recorded);

                let header = Header::from_bytes("Content-Type", reply.content_type).unwrap();
                let response = Response::from_string(reply.body)
                    .with_header(header)
                    .with_status_code(StatusCode(reply.status));
                let _ = request.respond(response);
            }
        });

        Self {
            server,
            handle: Some(handle),
            requests,
            addr,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Config pointing at this mock, without a route prefix.
    pub fn config(&self) -> PulseConfig {
        let mut config = PulseConfig::default();
        config.api.base_url = self.base_url();
        config.api.prefix = String::new();
        config.api.timeout_ms = 5_000;
        config.llm.timeout_ms = 5_000;
        config.stream.handshake_timeout_ms = 500;
        config.logging.job_log = false;
        config
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::from_config(&self.config())
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests whose path starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
