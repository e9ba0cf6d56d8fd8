/// WebSocket transport for job progress.
///
/// The backend pushes one JSON object per text frame on
/// `ws://{host}/ws/train/{task_id}` and `ws://{host}/ws/automl/{task_id}`
/// (`wss://` behind TLS). Uses the blocking `tungstenite` client. The TCP
/// connect and the upgrade handshake are bounded by a handshake timeout;
/// after that a short read timeout lets the consumer loop regain control
/// regularly to check for cancellation.
use std::io::{self, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::HandshakeError;
use tungstenite::http::Uri;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::{FrameEvent, FrameSource};
use crate::error::{PulseError, Result};
use crate::job::JobKind;

/// A connected progress socket.
pub struct SocketSource {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl std::fmt::Debug for SocketSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketSource")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SocketSource {
    /// Open the socket.
    ///
    /// Connecting and the upgrade handshake each give up after
    /// `handshake_timeout`. Reads on the open socket wait at most
    /// `read_timeout`.
    pub fn connect(url: &str, handshake_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let cannot_open =
            |e: &dyn std::fmt::Display| PulseError::network(format!("cannot open {url}: {e}"));

        let request = url.into_client_request().map_err(|e| cannot_open(&e))?;
        let stream = open_stream(request.uri(), handshake_timeout).map_err(|e| cannot_open(&e))?;
        stream.set_read_timeout(Some(handshake_timeout))?;
        stream.set_write_timeout(Some(handshake_timeout))?;
        // Same socket; keeps a handle to retune after TLS wraps the stream.
        let tcp = stream.try_clone()?;

        let socket = match tungstenite::client_tls_with_config(request, stream, None, None) {
            Ok((socket, _response)) => socket,
            Err(HandshakeError::Failure(e)) => return Err(cannot_open(&e)),
            Err(HandshakeError::Interrupted(_)) => {
                return Err(cannot_open(&format!(
                    "no handshake reply within {}ms",
                    handshake_timeout.as_millis()
                )));
            }
        };
        tcp.set_read_timeout(Some(read_timeout))?;

        log::debug!("progress socket connected: {url}");
        Ok(Self {
            socket,
            closed: false,
        })
    }
}

/// Resolve the URL's host and connect to the first address that answers.
fn open_stream(uri: &Uri, timeout: Duration) -> io::Result<TcpStream> {
    let host = uri
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "URL has no host"))?;
    let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
        Some("wss") => 443,
        _ => 80,
    });

    let mut last_err = io::Error::new(ErrorKind::NotFound, format!("{host} did not resolve"));
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

impl FrameSource for SocketSource {
    fn next_frame(&mut self) -> Result<FrameEvent> {
        if self.closed {
            return Ok(FrameEvent::Closed);
        }
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(FrameEvent::Frame(text)),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Ok(FrameEvent::Frame(text)),
                Err(_) => {
                    log::warn!("dropping non-UTF-8 binary frame");
                    Ok(FrameEvent::Idle)
                }
            },
            Ok(Message::Close(_)) => {
                self.closed = true;
                // Sends the queued close reply.
                if let Err(e) = self.socket.flush() {
                    log::debug!("socket close reply not sent: {e}");
                }
                Ok(FrameEvent::Closed)
            }
            // Ping/pong are answered by tungstenite itself.
            Ok(_) => Ok(FrameEvent::Idle),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(FrameEvent::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                self.closed = true;
                Ok(FrameEvent::Closed)
            }
            Err(e) => {
                self.closed = true;
                Err(e.into())
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.socket.close(None) {
            log::debug!("socket close handshake failed: {e}");
        }
        // Best-effort flush of the close frame; the peer may already be gone.
        let _ = self.socket.flush();
    }
}

// ---------------------------------------------------------------------------
// URLs
// ---------------------------------------------------------------------------

/// Derive the WebSocket origin from the REST base URL.
///
/// `http` becomes `ws` and `https` becomes `wss`; any path on the base URL
/// is dropped.
pub fn ws_origin(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let (scheme, rest) = match base.split_once("://") {
        Some(("https", rest)) => ("wss", rest),
        Some((_, rest)) => ("ws", rest),
        None => ("ws", base),
    };
    let host = rest.split('/').next().unwrap_or(rest);
    format!("{scheme}://{host}")
}

/// Progress socket URL for a job.
pub fn progress_url(base_url: &str, kind: JobKind, task_id: &str) -> String {
    let channel = match kind {
        JobKind::Training => "train",
        JobKind::AutoMlTraining => "automl",
    };
    format!("{}/ws/{channel}/{task_id}", ws_origin(base_url))
}
