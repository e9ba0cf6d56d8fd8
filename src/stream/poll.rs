/// Polling transport: follow a job by asking for its status on a fixed
/// interval.
///
/// Modelled as an explicit state machine driven by a cancellable ticker:
///
/// ```text
/// Pending ─▶ Polling{n} ─▶ Polling{n+1} ─▶ … ─▶ Completed | Failed | Cancelled
/// ```
///
/// The status string `"completed"` is the success signal; any status
/// starting with `"error"` is the failure signal and is surfaced verbatim.
/// Every other value means "still running" and is shown as status text.
use std::time::Duration;

use super::CancelToken;
use crate::api::JobBackend;
use crate::error::Result;
use crate::job::tracker::JobTracker;

/// Where a polled job stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Polling { polls: u32 },
    Completed,
    Failed(String),
    Cancelled,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }

    /// Advance with one status reply. Terminal states never change.
    pub fn advance(self, status: &str) -> Self {
        if self.is_terminal() {
            return self;
        }
        let normalized = status.trim().to_ascii_lowercase();
        if normalized == "completed" {
            return Self::Completed;
        }
        if normalized.starts_with("error") {
            return Self::Failed(status.trim().to_string());
        }
        match self {
            Self::Polling { polls } => Self::Polling { polls: polls + 1 },
            _ => Self::Polling { polls: 1 },
        }
    }
}

/// Cancellable fixed-delay ticker.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    cancel: CancelToken,
}

impl Ticker {
    pub fn new(interval: Duration, cancel: CancelToken) -> Self {
        Self { interval, cancel }
    }

    /// Sleep one interval. Returns `false` if cancelled before or during it.
    pub fn tick(&self) -> bool {
        !self.cancel.wait_timeout(self.interval)
    }
}

/// Polls `backend` for a job's status.
pub struct StatusPoller<'a, B: JobBackend + ?Sized> {
    backend: &'a B,
    interval: Duration,
}

impl<'a, B: JobBackend + ?Sized> StatusPoller<'a, B> {
    pub fn new(backend: &'a B, interval: Duration) -> Self {
        Self { backend, interval }
    }

    /// Poll until the job is terminal, updating `tracker` along the way.
    ///
    /// A failed status request fails the job and is returned; it is not
    /// retried.
    pub fn run<F>(&self, tracker: &mut JobTracker, cancel: &CancelToken, mut on_update: F) -> Result<PollState>
    where
        F: FnMut(&JobTracker),
    {
        let ticker = Ticker::new(self.interval, cancel.clone());
        let task_id = tracker.job().job_id.clone();
        let mut state = PollState::Pending;
        tracker.start();

        loop {
            if cancel.is_cancelled() {
                tracker.cancel();
                return Ok(PollState::Cancelled);
            }

            let status = match self.backend.job_status(&task_id) {
                Ok(status) => status,
                Err(err) => {
                    if cancel.is_cancelled() {
                        tracker.cancel();
                        return Ok(PollState::Cancelled);
                    }
                    tracker.fail(err.to_string());
                    on_update(tracker);
                    return Err(err);
                }
            };
            if cancel.is_cancelled() {
                tracker.cancel();
                return Ok(PollState::Cancelled);
            }

            state = state.advance(&status);
            match &state {
                PollState::Completed => {
                    tracker.complete();
                    on_update(tracker);
                    return Ok(state);
                }
                PollState::Failed(message) => {
                    tracker.fail(message.clone());
                    on_update(tracker);
                    return Ok(state);
                }
                PollState::Polling { polls } => {
                    log::debug!("job {task_id} poll #{polls}: {status}");
                    tracker.set_status_text(status.trim());
                    on_update(tracker);
                }
                PollState::Pending | PollState::Cancelled => {}
            }

            if !ticker.tick() {
                tracker.cancel();
                return Ok(PollState::Cancelled);
            }
        }
    }
}
