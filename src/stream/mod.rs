//! Progress stream consumption.
//!
//! A running job pushes frames over one of three transports:
//!
//! - [`socket`]: WebSocket, one JSON object per text frame.
//! - [`ndjson`]: newline-delimited JSON over a chunked HTTP body.
//! - [`poll`]: no frames at all; a status endpoint is polled on a fixed
//!   interval instead.
//!
//! The first two implement [`FrameSource`] and are driven by [`consume`].
//! Every source is wrapped in a [`Subscription`] guard, so the underlying
//! connection is released on every exit path: completion, error frame,
//! cancellation, or the owner simply dropping it.

pub mod ndjson;
pub mod poll;
pub mod socket;

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::job::message::decode_frame;
use crate::job::tracker::JobTracker;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag.
///
/// Clones observe the same flag. Waiting on the token (see
/// [`wait_timeout`](Self::wait_timeout)) wakes immediately on cancel, which
/// is what lets the polling ticker stop mid-sleep.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block for up to `timeout`. Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Process-wide stop control, fired by the interrupt handler.
///
/// At most one token is armed at a time. [`stop`](Self::stop) cancels it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    armed: Arc<Mutex<Option<CancelToken>>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `token` the one a stop cancels, replacing any other.
    pub fn arm(&self, token: &CancelToken) {
        *self.armed.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
    }

    pub fn disarm(&self) {
        self.armed.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Cancel the armed token. Returns `false` when nothing was armed.
    pub fn stop(&self) -> bool {
        match self.armed.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame sources
// ---------------------------------------------------------------------------

/// Result of waiting for the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// One text frame (a single JSON object, not yet decoded).
    Frame(String),
    /// Nothing arrived within the read timeout; check cancellation and retry.
    Idle,
    /// The peer closed the channel.
    Closed,
}

/// A transport pushing discrete text frames.
pub trait FrameSource {
    /// Wait for the next frame. Must return within a bounded time so the
    /// caller can observe cancellation (yield [`FrameEvent::Idle`]).
    fn next_frame(&mut self) -> Result<FrameEvent>;

    /// Release the underlying connection. Must be idempotent and must not
    /// panic.
    fn close(&mut self);
}

/// Scoped ownership of a frame source. Dropping it closes the source.
pub struct Subscription<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> Subscription<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: FrameSource> Drop for Subscription<S> {
    fn drop(&mut self) {
        self.source.close();
        log::debug!("progress subscription released");
    }
}

// ---------------------------------------------------------------------------
// Consumer loop
// ---------------------------------------------------------------------------

/// Drive `subscription` until the tracker reaches a terminal state.
///
/// - Undecodable frames are logged and dropped.
/// - An error frame fails the job and stops consumption immediately.
/// - A clean close completes the job (unless it already failed).
/// - A transport error fails the job and is returned to the caller.
/// - Once `cancel` fires the job is cancelled and `on_update` is never
///   called again.
///
/// `on_update` runs after every frame that changed visible state.
pub fn consume<S, F>(
    subscription: &mut Subscription<S>,
    tracker: &mut JobTracker,
    cancel: &CancelToken,
    mut on_update: F,
) -> Result<()>
where
    S: FrameSource,
    F: FnMut(&JobTracker),
{
    tracker.start();

    while !tracker.is_terminal() {
        if cancel.is_cancelled() {
            tracker.cancel();
            break;
        }

        let event = match subscription.source_mut().next_frame() {
            Ok(event) => event,
            Err(err) => {
                if cancel.is_cancelled() {
                    tracker.cancel();
                    break;
                }
                tracker.fail(format!("connection lost: {err}"));
                on_update(tracker);
                return Err(err);
            }
        };

        // A frame that raced with cancellation is discarded.
        if cancel.is_cancelled() {
            tracker.cancel();
            break;
        }

        match event {
            FrameEvent::Idle => continue,
            FrameEvent::Closed => {
                if tracker.complete() {
                    on_update(tracker);
                }
            }
            FrameEvent::Frame(text) => match decode_frame(&text) {
                Ok(msg) => {
                    if tracker.apply(msg).changed() {
                        on_update(tracker);
                    }
                }
                Err(err) => log::warn!("dropping frame for job {}: {err}", tracker.job().job_id),
            },
        }
    }

    subscription.source_mut().close();
    Ok(())
}

// ---------------------------------------------------------------------------
// Job slot
// ---------------------------------------------------------------------------

/// Owner-side handle enforcing one live subscription per owner.
///
/// [`begin`](Self::begin) cancels whatever job the slot was tracking before
/// handing out a fresh token; dropping the slot cancels the current one.
/// With a [`StopSignal`] attached, the current job's token is armed on it.
#[derive(Debug, Default)]
pub struct JobSlot {
    current: Option<(String, CancelToken)>,
    signal: Option<StopSignal>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(signal: StopSignal) -> Self {
        Self {
            current: None,
            signal: Some(signal),
        }
    }

    /// Supersede the previous job (if any) and return the new job's token.
    pub fn begin(&mut self, job_id: impl Into<String>) -> CancelToken {
        self.release();
        let token = CancelToken::new();
        if let Some(signal) = &self.signal {
            signal.arm(&token);
        }
        self.current = Some((job_id.into(), token.clone()));
        token
    }

    /// Id of the job currently owned by the slot.
    pub fn current_job(&self) -> Option<&str> {
        self.current.as_ref().map(|(id, _)| id.as_str())
    }

    /// Cancel and forget the current job.
    pub fn release(&mut self) {
        if let Some((job_id, token)) = self.current.take() {
            log::debug!("releasing subscription for job {job_id}");
            if let Some(signal) = &self.signal {
                signal.disarm();
            }
            token.cancel();
        }
    }
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
