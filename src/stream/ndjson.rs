/// Newline-delimited JSON over a chunked HTTP body.
///
/// Both the AutoML streaming endpoint and the LLM assistant answer with a
/// body of `\n`-terminated JSON objects that arrive in arbitrary chunks. A
/// chunk may end in the middle of a line (or of a UTF-8 sequence), so bytes
/// are buffered until a newline completes a line.
use std::io::{ErrorKind, Read};

use super::{FrameEvent, FrameSource};
use crate::error::Result;

/// Read size for one chunk of the body.
const CHUNK_SIZE: usize = 4096;

/// Splits a byte stream into complete lines, keeping the unterminated tail.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed. Blank lines are
    /// skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Flush whatever remains when the stream ends without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Frame source over any blocking reader (typically a `ureq` response body).
pub struct NdjsonSource<R: Read> {
    reader: Option<R>,
    buffer: LineBuffer,
    ready: std::collections::VecDeque<String>,
}

impl<R: Read> NdjsonSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            buffer: LineBuffer::new(),
            ready: Default::default(),
        }
    }
}

impl<R: Read> FrameSource for NdjsonSource<R> {
    fn next_frame(&mut self) -> Result<FrameEvent> {
        if let Some(line) = self.ready.pop_front() {
            return Ok(FrameEvent::Frame(line));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(FrameEvent::Closed);
        };

        let mut chunk = [0u8; CHUNK_SIZE];
        match reader.read(&mut chunk) {
            Ok(0) => {
                self.reader = None;
                if let Some(tail) = self.buffer.finish() {
                    return Ok(FrameEvent::Frame(tail));
                }
                Ok(FrameEvent::Closed)
            }
            Ok(n) => {
                self.ready.extend(self.buffer.push(&chunk[..n]));
                Ok(self
                    .ready
                    .pop_front()
                    .map(FrameEvent::Frame)
                    .unwrap_or(FrameEvent::Idle))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                ) =>
            {
                Ok(FrameEvent::Idle)
            }
            Err(e) => {
                self.reader = None;
                Err(e.into())
            }
        }
    }

    fn close(&mut self) {
        // Dropping the reader drops the HTTP connection.
        self.reader = None;
        self.ready.clear();
    }
}
