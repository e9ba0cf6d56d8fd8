/// End-to-end job flows: launch, follow progress, reconcile, record.
///
/// The generic `follow_*` functions wire one transport to a tracker and then
/// run the completion reconciler; they only need a [`JobBackend`], so tests
/// drive them with in-memory fakes. [`JobRunner`] adds the launch step, the
/// transport choice from config, the one-job-per-owner slot and the ledger.
use std::time::{Duration, Instant};

use super::launcher::{self, AutoMlRequest, TrainRequest};
use super::tracker::{JobTracker, Reconciliation};
use super::{JobKind, JobStatus};
use crate::analytics::logger;
use crate::api::{ApiClient, JobBackend};
use crate::config::{PulseConfig, Transport};
use crate::error::Result;
use crate::stream::poll::{PollState, StatusPoller};
use crate::stream::socket::{SocketSource, progress_url};
use crate::stream::{CancelToken, FrameSource, JobSlot, StopSignal, Subscription, consume};

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

/// Consume a frame source to the end, then reconcile.
///
/// A transport failure fails the job and is returned; the tracker keeps
/// whatever progress arrived before it.
pub fn follow_stream<B, S, F>(
    backend: &B,
    tracker: &mut JobTracker,
    source: S,
    cancel: &CancelToken,
    mut on_update: F,
) -> Result<()>
where
    B: JobBackend + ?Sized,
    S: FrameSource,
    F: FnMut(&JobTracker),
{
    let mut subscription = Subscription::new(source);
    consume(&mut subscription, tracker, cancel, &mut on_update)?;
    drop(subscription);
    reconcile(backend, tracker, cancel, &mut on_update);
    Ok(())
}

/// Poll the status endpoint until the job is terminal, then reconcile.
pub fn follow_polling<B, F>(
    backend: &B,
    tracker: &mut JobTracker,
    interval: Duration,
    cancel: &CancelToken,
    mut on_update: F,
) -> Result<PollState>
where
    B: JobBackend + ?Sized,
    F: FnMut(&JobTracker),
{
    let state = StatusPoller::new(backend, interval).run(tracker, cancel, &mut on_update)?;
    reconcile(backend, tracker, cancel, &mut on_update);
    Ok(state)
}

/// Run the one confirmation fetch for a completed job.
///
/// Does nothing unless the job is `Completed` and not yet reconciled. A
/// failed fetch keeps the streamed values and spends the reconciliation.
pub fn reconcile<B, F>(backend: &B, tracker: &mut JobTracker, cancel: &CancelToken, mut on_update: F)
where
    B: JobBackend + ?Sized,
    F: FnMut(&JobTracker),
{
    if tracker.status() != JobStatus::Completed || tracker.is_reconciled() {
        return;
    }
    if cancel.is_cancelled() {
        tracker.skip_reconcile();
        return;
    }

    let job = tracker.job().clone();
    let fetched = match job.kind {
        JobKind::Training => backend
            .model_summary(&job.model_name)
            .map(|summary| Reconciliation::Training(summary.metrics)),
        JobKind::AutoMlTraining => backend
            .automl_candidates(&job.job_id)
            .map(Reconciliation::Candidates),
    };

    match fetched {
        Ok(outcome) => {
            if cancel.is_cancelled() {
                tracker.skip_reconcile();
                return;
            }
            if tracker.reconcile(outcome) {
                on_update(tracker);
            }
        }
        Err(err) => {
            log::warn!(
                "confirmation fetch for job {} failed, keeping streamed values: {err}",
                job.job_id
            );
            tracker.skip_reconcile();
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Launches jobs and follows them on the caller's thread.
///
/// Holds one [`JobSlot`]: starting a job cancels the previous one, and
/// dropping the runner cancels whatever is still running.
#[derive(Debug)]
pub struct JobRunner<'a> {
    client: &'a ApiClient,
    config: &'a PulseConfig,
    slot: JobSlot,
}

impl<'a> JobRunner<'a> {
    pub fn new(client: &'a ApiClient, config: &'a PulseConfig) -> Self {
        Self {
            client,
            config,
            slot: JobSlot::new(),
        }
    }

    /// Let `signal` stop whichever job the runner is following.
    pub fn with_stop_signal(mut self, signal: StopSignal) -> Self {
        self.slot = JobSlot::with_signal(signal);
        self
    }

    /// Id of the job the runner currently owns.
    pub fn current_job(&self) -> Option<&str> {
        self.slot.current_job()
    }

    /// Cancel the current job, if any.
    pub fn cancel(&mut self) {
        self.slot.release();
    }

    /// Launch and follow a training job.
    ///
    /// Launch failures are returned as errors. Failures after launch are
    /// recorded on the returned tracker. With the socket transport, a socket
    /// that cannot be opened falls back to polling.
    pub fn train<F>(&mut self, req: &TrainRequest, mut on_update: F) -> Result<JobTracker>
    where
        F: FnMut(&JobTracker),
    {
        let mut tracker = launcher::launch_training(self.client, req)?;
        let cancel = self.slot.begin(&tracker.job().job_id);
        let started = Instant::now();
        on_update(&tracker);

        let result = self.follow(&mut tracker, &cancel, &mut on_update);
        self.finish(&tracker, started, result);
        Ok(tracker)
    }

    /// Launch and follow an AutoML job. Like [`train`](Self::train), falls
    /// back to polling when the progress socket cannot be opened.
    pub fn automl<F>(&mut self, req: &AutoMlRequest, mut on_update: F) -> Result<JobTracker>
    where
        F: FnMut(&JobTracker),
    {
        let mut tracker = launcher::launch_automl(self.client, req)?;
        let cancel = self.slot.begin(&tracker.job().job_id);
        let started = Instant::now();
        on_update(&tracker);

        let result = self.follow(&mut tracker, &cancel, &mut on_update);
        self.finish(&tracker, started, result);
        Ok(tracker)
    }

    /// Run AutoML over the NDJSON streaming endpoint.
    ///
    /// The stream itself carries the final candidate list, so no
    /// confirmation fetch is made.
    pub fn automl_streamed<F>(&mut self, req: &AutoMlRequest, mut on_update: F) -> Result<JobTracker>
    where
        F: FnMut(&JobTracker),
    {
        let (mut tracker, source) = launcher::launch_automl_stream(self.client, req)?;
        let cancel = self.slot.begin(&tracker.job().job_id);
        let started = Instant::now();
        on_update(&tracker);

        let mut subscription = Subscription::new(source);
        let result = consume(&mut subscription, &mut tracker, &cancel, &mut on_update);
        drop(subscription);
        tracker.skip_reconcile();
        self.finish(&tracker, started, result);
        Ok(tracker)
    }

    /// Follow a launched job over the configured transport.
    fn follow<F>(&self, tracker: &mut JobTracker, cancel: &CancelToken, on_update: F) -> Result<()>
    where
        F: FnMut(&JobTracker),
    {
        let socket = match self.config.stream.transport {
            Transport::Socket => self.connect(tracker),
            Transport::Poll => None,
        };
        match socket {
            Some(source) => follow_stream(self.client, tracker, source, cancel, on_update),
            None => follow_polling(self.client, tracker, self.poll_interval(), cancel, on_update)
                .map(|_| ()),
        }
    }

    fn connect(&self, tracker: &JobTracker) -> Option<SocketSource> {
        let job = tracker.job();
        let url = progress_url(self.client.base_url(), job.kind, &job.job_id);
        let stream = &self.config.stream;
        let handshake_timeout = Duration::from_millis(stream.handshake_timeout_ms.max(1));
        let read_timeout = Duration::from_millis(stream.read_timeout_ms.max(1));
        match SocketSource::connect(&url, handshake_timeout, read_timeout) {
            Ok(source) => Some(source),
            Err(err) => {
                log::warn!("progress socket unavailable, polling instead: {err}");
                None
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.stream.poll_interval_ms.max(1))
    }

    fn finish(&self, tracker: &JobTracker, started: Instant, result: Result<()>) {
        if let Err(err) = result {
            log::warn!("job {} stopped: {err}", tracker.job().job_id);
        }
        log::info!(
            "job {} finished as {}",
            tracker.job().job_id,
            tracker.status()
        );
        if self.config.logging.job_log {
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            logger::log_job(tracker, elapsed);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::api::types::ModelSummary;
    use crate::error::PulseError;
    use crate::job::Job;
    use crate::job::tracker::{CandidateResult, Metrics};

    struct SummaryOnly {
        fetches: Cell<u32>,
        fail: bool,
    }

    impl JobBackend for SummaryOnly {
        fn job_status(&self, _task_id: &str) -> Result<String> {
            Ok("completed".to_string())
        }

        fn model_summary(&self, model_name: &str) -> Result<ModelSummary> {
            self.fetches.set(self.fetches.get() + 1);
            if self.fail {
                return Err(PulseError::Backend("Summary not found".into()));
            }
            Ok(ModelSummary {
                model_name: model_name.to_string(),
                features: vec!["it_load".into()],
                epochs: 100,
                test_size: 20.0,
                metrics: Metrics {
                    loss: 0.01,
                    mae: 0.02,
                    r2: 0.97,
                },
                simulations: Vec::new(),
                llm_history: Vec::new(),
            })
        }

        fn automl_candidates(&self, _task_id: &str) -> Result<Vec<CandidateResult>> {
            Ok(Vec::new())
        }
    }

    fn training() -> JobTracker {
        let mut t = JobTracker::new(Job::new("t1", JobKind::Training, "dc1"));
        t.set_placeholder_metrics(Metrics {
            loss: 1.0,
            mae: 1.0,
            r2: 0.0,
        });
        t
    }

    #[test]
    fn reconcile_only_for_completed_jobs() {
        let backend = SummaryOnly {
            fetches: Cell::new(0),
            fail: false,
        };
        let mut t = training();
        t.start();
        t.fail("error: boom");
        reconcile(&backend, &mut t, &CancelToken::new(), |_| {});
        assert_eq!(backend.fetches.get(), 0);
        assert_eq!(t.metrics().map(|m| m.r2), Some(0.0));
    }

    #[test]
    fn reconcile_replaces_placeholders_once() {
        let backend = SummaryOnly {
            fetches: Cell::new(0),
            fail: false,
        };
        let mut t = training();
        t.start();
        t.complete();
        reconcile(&backend, &mut t, &CancelToken::new(), |_| {});
        reconcile(&backend, &mut t, &CancelToken::new(), |_| {});
        assert_eq!(backend.fetches.get(), 1);
        assert_eq!(t.metrics().map(|m| m.r2), Some(0.97));
    }

    #[test]
    fn failed_fetch_keeps_streamed_values() {
        let backend = SummaryOnly {
            fetches: Cell::new(0),
            fail: true,
        };
        let mut t = training();
        t.start();
        t.complete();
        reconcile(&backend, &mut t, &CancelToken::new(), |_| {});
        assert!(t.is_reconciled());
        assert_eq!(t.status(), JobStatus::Completed);
        assert_eq!(t.metrics().map(|m| m.r2), Some(0.0));
    }

    #[test]
    fn cancelled_owner_skips_the_fetch() {
        let backend = SummaryOnly {
            fetches: Cell::new(0),
            fail: false,
        };
        let mut t = training();
        t.start();
        t.complete();
        let cancel = CancelToken::new();
        cancel.cancel();
        reconcile(&backend, &mut t, &cancel, |_| panic!("no update after cancel"));
        assert_eq!(backend.fetches.get(), 0);
    }
}
