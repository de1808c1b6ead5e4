// MediaCore - Title Resolution and Playback Core
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Progress polling for backend preparation jobs
//!
//! # Polling Loop
//! 1. Wait one interval (2 s by default), then request the job status
//! 2. Forward the snapshot to the caller's callback
//! 3. On `percent >= 100` stop requesting immediately
//! 4. After the grace delay (5 s by default), signal "re-resolve" exactly once,
//!    unless the task was marked resolved in the meantime
//!
//! A failed request is logged and the tick is skipped. Only `stop()`,
//! `mark_resolved()`, dropping the task, or the optional duration limit end the
//! loop early.

use crate::api::resolver::ResolveBackend;
use crate::download::progress::{ProgressCallback, ProgressTracker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How a polling loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Job reached 100% and the grace delay elapsed; resolve the title again
    ReadyToResolve,
    /// Stopped, resolved through another path, or dropped
    Stopped,
    /// The configured maximum poll duration elapsed first
    TimedOut,
    /// The loop died without reporting (panicked or its runtime shut down)
    Failed,
}

/// Loop registration: the token is what `start_polling` checks for liveness,
/// the id keeps a finished loop from unregistering its successor
#[derive(Debug)]
struct Registration {
    id: u64,
    cancel: CancellationToken,
}

/// Starts and deduplicates polling loops
#[derive(Clone)]
pub struct ProgressPoller {
    backend: Arc<dyn ResolveBackend>,
    interval: Duration,
    grace_delay: Duration,
    max_poll_duration: Option<Duration>,
    active: Arc<Mutex<HashMap<String, Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for ProgressPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressPoller")
            .field("interval", &self.interval)
            .field("grace_delay", &self.grace_delay)
            .field("max_poll_duration", &self.max_poll_duration)
            .finish_non_exhaustive()
    }
}

impl ProgressPoller {
    pub fn new(backend: Arc<dyn ResolveBackend>, interval: Duration, grace_delay: Duration) -> Self {
        Self {
            backend,
            interval,
            grace_delay,
            max_poll_duration: None,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Bound a single polling loop; interval and completion handling are unchanged
    pub fn with_max_poll_duration(mut self, limit: Option<Duration>) -> Self {
        self.max_poll_duration = limit;
        self
    }

    /// Whether a live loop exists for this handle
    pub fn is_polling(&self, progress_handle: &str) -> bool {
        self.active
            .lock()
            .get(progress_handle)
            .map(|r| !r.cancel.is_cancelled())
            .unwrap_or(false)
    }

    /// Start polling a job handle
    ///
    /// Returns `None` without side effects when a live loop for the same handle
    /// already exists.
    pub fn start_polling(&self, progress_handle: &str, on_update: ProgressCallback) -> Option<PollingTask> {
        let cancel = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut active = self.active.lock();
            if let Some(existing) = active.get(progress_handle) {
                if !existing.cancel.is_cancelled() {
                    tracing::debug!(handle = %progress_handle, "Already polling; ignoring start");
                    return None;
                }
            }
            active.insert(
                progress_handle.to_string(),
                Registration {
                    id,
                    cancel: cancel.clone(),
                },
            );
        }

        tracing::info!(handle = %progress_handle, "Polling preparation progress");

        let resolved = Arc::new(AtomicBool::new(false));
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let run = PollLoop {
            backend: Arc::clone(&self.backend),
            handle: progress_handle.to_string(),
            interval: self.interval,
            grace_delay: self.grace_delay,
            max_poll_duration: self.max_poll_duration,
            cancel: cancel.clone(),
            resolved: Arc::clone(&resolved),
            on_update,
        };
        let active = Arc::clone(&self.active);
        let handle = progress_handle.to_string();

        let join = tokio::spawn(async move {
            let outcome = run.run().await;

            // Unregister before reporting so the caller can poll the same handle again
            {
                let mut active = active.lock();
                if active.get(&handle).map(|r| r.id) == Some(id) {
                    active.remove(&handle);
                }
            }

            tracing::debug!(handle = %handle, outcome = ?outcome, "Polling loop finished");
            let _ = outcome_tx.send(outcome);
        });

        Some(PollingTask {
            handle: progress_handle.to_string(),
            cancel,
            resolved,
            outcome: Some(outcome_rx),
            join,
        })
    }
}

/// State moved into the spawned loop
struct PollLoop {
    backend: Arc<dyn ResolveBackend>,
    handle: String,
    interval: Duration,
    grace_delay: Duration,
    max_poll_duration: Option<Duration>,
    cancel: CancellationToken,
    resolved: Arc<AtomicBool>,
    on_update: ProgressCallback,
}

impl PollLoop {
    async fn run(self) -> PollOutcome {
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tracker = ProgressTracker::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return PollOutcome::Stopped,
                _ = ticker.tick() => {}
            }

            if let Some(limit) = self.max_poll_duration {
                if started.elapsed() >= limit {
                    tracing::warn!(handle = %self.handle, limit_secs = limit.as_secs(), "Polling gave up");
                    return PollOutcome::TimedOut;
                }
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return PollOutcome::Stopped,
                result = self.backend.poll(&self.handle) => result,
            };

            let job = match result {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(
                        handle = %self.handle,
                        error = %e,
                        transient = e.is_skippable_poll_failure(),
                        "Progress poll failed; retrying next tick"
                    );
                    continue;
                }
            };

            if self.cancel.is_cancelled() || self.resolved.load(Ordering::SeqCst) {
                return PollOutcome::Stopped;
            }

            let job = tracker.observe(job);
            let complete = job.is_complete();
            tracing::debug!(handle = %self.handle, percent = job.percent, status = %job.status, "Progress");
            (self.on_update)(job);

            if complete {
                // No further requests for this handle from here on
                return self.wait_grace().await;
            }
        }
    }

    async fn wait_grace(&self) -> PollOutcome {
        tracing::info!(
            handle = %self.handle,
            grace_ms = self.grace_delay.as_millis() as u64,
            "Preparation finished; re-resolving after grace delay"
        );

        tokio::select! {
            _ = self.cancel.cancelled() => PollOutcome::Stopped,
            _ = tokio::time::sleep(self.grace_delay) => {
                // Checked when the timer fires, not when it was scheduled
                if self.resolved.load(Ordering::SeqCst) {
                    PollOutcome::Stopped
                } else {
                    PollOutcome::ReadyToResolve
                }
            }
        }
    }
}

/// Handle to one running polling loop
///
/// Dropping the task stops the loop.
#[derive(Debug)]
pub struct PollingTask {
    handle: String,
    cancel: CancellationToken,
    resolved: Arc<AtomicBool>,
    outcome: Option<oneshot::Receiver<PollOutcome>>,
    join: JoinHandle<()>,
}

impl PollingTask {
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Stop polling and cancel a pending grace timer
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Record that the title was resolved another way; suppresses the
    /// re-resolve signal even if the grace timer is already due
    pub fn mark_resolved(&self) {
        self.resolved.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to end
    ///
    /// The outcome is delivered once; later calls report `Stopped`.
    pub async fn completion(&mut self) -> PollOutcome {
        match self.outcome.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                tracing::error!(handle = %self.handle, "Polling loop ended without an outcome");
                PollOutcome::Failed
            }),
            None => PollOutcome::Stopped,
        }
    }
}

impl Drop for PollingTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::catalog::CatalogKey;
    use crate::api::resolver::ResolutionResult;
    use crate::download::progress::ProgressJob;
    use crate::error::{PipelineError, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Poll responses served in order; the last one repeats
    struct ScriptedPolls {
        responses: Mutex<VecDeque<Result<f64>>>,
        calls: AtomicUsize,
    }

    impl ScriptedPolls {
        fn new(responses: Vec<Result<f64>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResolveBackend for ScriptedPolls {
        async fn resolve(&self, _key: &CatalogKey) -> Result<ResolutionResult> {
            Err(PipelineError::internal("not scripted"))
        }

        async fn poll(&self, progress_handle: &str) -> Result<ProgressJob> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock();
            let next = if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().map(|r| match r {
                    Ok(p) => Ok(*p),
                    Err(_) => Err(PipelineError::network("offline", None, None)),
                })
            };
            match next {
                Some(Ok(percent)) => {
                    let mut job = ProgressJob::new(progress_handle, "transcoding");
                    job.percent = percent;
                    Ok(job)
                }
                Some(Err(e)) => Err(e),
                None => Err(PipelineError::internal("script exhausted")),
            }
        }
    }

    fn collecting() -> (ProgressCallback, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |job: ProgressJob| sink.lock().push(job.percent));
        (callback, seen)
    }

    fn poller(backend: Arc<ScriptedPolls>) -> ProgressPoller {
        ProgressPoller::new(backend, Duration::from_secs(2), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_signals_after_grace_delay() {
        let backend = ScriptedPolls::new(vec![Ok(40.0), Ok(100.0)]);
        let poller = poller(Arc::clone(&backend));
        let (callback, seen) = collecting();

        let started = Instant::now();
        let mut task = poller.start_polling("/p/1", callback).unwrap();
        let outcome = task.completion().await;

        assert_eq!(outcome, PollOutcome::ReadyToResolve);
        assert_eq!(*seen.lock(), vec![40.0, 100.0]);
        assert_eq!(backend.calls(), 2);
        // two 2 s ticks plus the 5 s grace delay
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(9) && elapsed < Duration::from_secs(10));
        assert!(!poller.is_polling("/p/1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_requests_after_completion() {
        let backend = ScriptedPolls::new(vec![Ok(100.0)]);
        let poller = poller(Arc::clone(&backend));
        let (callback, _seen) = collecting();

        let mut task = poller.start_polling("/p/1", callback).unwrap();
        assert_eq!(task.completion().await, PollOutcome::ReadyToResolve);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_is_noop() {
        let backend = ScriptedPolls::new(vec![Ok(10.0)]);
        let poller = poller(backend);
        let (first_cb, _) = collecting();
        let (second_cb, second_seen) = collecting();

        let first = poller.start_polling("/p/1", first_cb).unwrap();
        assert!(poller.start_polling("/p/1", second_cb).is_none());
        assert!(poller.is_polling("/p/1"));

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(second_seen.lock().is_empty());

        // once stopped the handle can be polled again
        first.stop();
        let (third_cb, _) = collecting();
        assert!(poller.start_polling("/p/1", third_cb).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_polls_are_skipped() {
        let backend = ScriptedPolls::new(vec![
            Err(PipelineError::network("connection reset", None, None)),
            Err(PipelineError::protocol("garbled", None)),
            Ok(55.0),
            Ok(100.0),
        ]);
        let poller = poller(Arc::clone(&backend));
        let (callback, seen) = collecting();

        let mut task = poller.start_polling("/p/2", callback).unwrap();
        assert_eq!(task.completion().await, PollOutcome::ReadyToResolve);
        assert_eq!(*seen.lock(), vec![55.0, 100.0]);
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_resolved_during_grace_suppresses_signal() {
        let backend = ScriptedPolls::new(vec![Ok(100.0)]);
        let poller = poller(backend);
        let (callback, _) = collecting();

        let mut task = poller.start_polling("/p/3", callback).unwrap();
        // first tick at 2 s, grace timer due at 7 s
        tokio::time::sleep(Duration::from_secs(3)).await;
        task.mark_resolved();

        assert_eq!(task.completion().await, PollOutcome::Stopped);
        assert!(task.is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_regressions_are_floored() {
        let backend = ScriptedPolls::new(vec![Ok(50.0), Ok(20.0), Ok(100.0)]);
        let poller = poller(backend);
        let (callback, seen) = collecting();

        let mut task = poller.start_polling("/p/4", callback).unwrap();
        task.completion().await;
        assert_eq!(*seen.lock(), vec![50.0, 50.0, 100.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_poll_duration() {
        let backend = ScriptedPolls::new(vec![Ok(5.0)]);
        let poller = poller(backend).with_max_poll_duration(Some(Duration::from_secs(10)));
        let (callback, _) = collecting();

        let mut task = poller.start_polling("/p/5", callback).unwrap();
        assert_eq!(task.completion().await, PollOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_loop() {
        let backend = ScriptedPolls::new(vec![Ok(5.0)]);
        let poller = poller(Arc::clone(&backend));
        let (callback, _) = collecting();

        let task = poller.start_polling("/p/6", callback).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(task);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls(), 1);
        assert!(!poller.is_polling("/p/6"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_loop_reports_failed() {
        let backend = ScriptedPolls::new(vec![Ok(5.0)]);
        // a zero period makes the interval panic inside the spawned loop
        let poller = ProgressPoller::new(backend, Duration::ZERO, Duration::from_secs(5));
        let (callback, seen) = collecting();

        let mut task = poller.start_polling("/p/7", callback).unwrap();
        assert_eq!(task.completion().await, PollOutcome::Failed);
        assert!(seen.lock().is_empty());
    }
}

