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


//! Acquisition manager: resolve a title and track its preparation
//!
//! # Attempt Lifecycle
//! - Every `resolve_and_track_title` call is a new attempt with a fresh id
//! - Starting an attempt cancels the previous one (its poller and token)
//! - Progress is forwarded only while the attempt is current and unresolved
//! - A superseded attempt settles with `Aborted`
//!
//! # Re-resolution
//! A pending result hands over to the [`ProgressPoller`]. When the job completes
//! and the grace delay elapses the title is resolved again. A backend that keeps
//! answering with a job handle is given `max_resolve_rounds` rounds, after which
//! the attempt fails with `Timeout`.

use crate::api::catalog::CatalogKey;
use crate::api::client::ClientConfig;
use crate::api::resolver::{ResolutionResult, ResolveBackend};
use crate::download::poller::{PollOutcome, ProgressPoller};
use crate::download::progress::{ProgressCallback, ProgressJob};
use crate::error::{PipelineError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Identifier of one resolution attempt
pub type AttemptId = u64;

/// The attempt currently allowed to deliver results
#[derive(Debug)]
struct CurrentAttempt {
    id: AttemptId,
    cancel: CancellationToken,
}

/// Per-attempt state shared with guarded callbacks
#[derive(Debug, Clone)]
struct Attempt {
    id: AttemptId,
    cancel: CancellationToken,
    resolved: Arc<AtomicBool>,
}

/// Drives resolver and poller for one title at a time
pub struct AcquisitionManager {
    /// Resolver seam (HTTP in production, scripted in tests)
    backend: Arc<dyn ResolveBackend>,

    /// Poller shared by all attempts
    poller: ProgressPoller,

    /// Pending rounds allowed per attempt
    max_resolve_rounds: u32,

    /// Last issued attempt id
    attempt_seq: Arc<AtomicU64>,

    /// Attempt that may still deliver results
    current: Arc<Mutex<Option<CurrentAttempt>>>,
}

impl std::fmt::Debug for AcquisitionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionManager")
            .field("poller", &self.poller)
            .field("max_resolve_rounds", &self.max_resolve_rounds)
            .field("current_attempt", &self.current_attempt())
            .finish_non_exhaustive()
    }
}

impl AcquisitionManager {
    /// Create a manager using the polling settings from `config`
    ///
    /// # Errors
    /// Returns `InvalidInput` if the polling settings are unusable
    pub fn new(backend: Arc<dyn ResolveBackend>, config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    /// Manager with default intervals
    pub fn with_defaults(backend: Arc<dyn ResolveBackend>) -> Self {
        Self::build(backend, &ClientConfig::default())
    }

    fn build(backend: Arc<dyn ResolveBackend>, config: &ClientConfig) -> Self {
        let poller = ProgressPoller::new(Arc::clone(&backend), config.poll_interval, config.grace_delay)
            .with_max_poll_duration(config.max_poll_duration);

        Self {
            backend,
            poller,
            max_resolve_rounds: config.max_resolve_rounds.max(1),
            attempt_seq: Arc::new(AtomicU64::new(0)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn poller(&self) -> &ProgressPoller {
        &self.poller
    }

    /// Id of the attempt that may still deliver results
    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.current.lock().as_ref().map(|c| c.id)
    }

    /// Cancel the current attempt, if any
    pub fn cancel_current(&self) {
        if let Some(previous) = self.current.lock().take() {
            tracing::debug!(attempt = previous.id, "Cancelling resolution attempt");
            previous.cancel.cancel();
        }
    }

    /// Resolve a title to a playable URL, tracking backend preparation if needed
    ///
    /// # Arguments
    /// * `key` - title to resolve
    /// * `on_progress` - receives preparation snapshots while this attempt is current
    ///
    /// # Errors
    /// - `Aborted` if a newer attempt started or the attempt was cancelled
    /// - `Network` / `Protocol` if a resolve request fails
    /// - `Timeout` if the backend kept the title pending for too long
    pub async fn resolve_and_track_title(
        &self,
        key: &CatalogKey,
        on_progress: ProgressCallback,
    ) -> Result<String> {
        let attempt = self.begin_attempt();
        tracing::info!(attempt = attempt.id, title = %key, "Resolving title");

        let result = self.run_attempt(&attempt, key, on_progress).await;

        attempt.resolved.store(true, Ordering::SeqCst);
        self.finish_attempt(&attempt);

        match &result {
            Ok(url) => tracing::info!(attempt = attempt.id, url = %url, "Title ready"),
            Err(e) if e.is_aborted() => tracing::debug!(attempt = attempt.id, "Attempt superseded"),
            Err(e) => tracing::warn!(attempt = attempt.id, error = %e, "Resolution failed"),
        }
        result
    }

    fn begin_attempt(&self) -> Attempt {
        let id = self.attempt_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        let previous = self.current.lock().replace(CurrentAttempt {
            id,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            tracing::debug!(attempt = previous.id, superseded_by = id, "Superseding attempt");
            previous.cancel.cancel();
        }

        Attempt {
            id,
            cancel,
            resolved: Arc::new(AtomicBool::new(false)),
        }
    }

    fn finish_attempt(&self, attempt: &Attempt) {
        let mut current = self.current.lock();
        if current.as_ref().map(|c| c.id) == Some(attempt.id) {
            *current = None;
        }
    }

    fn is_current(&self, attempt: &Attempt) -> bool {
        !attempt.cancel.is_cancelled() && self.current.lock().as_ref().map(|c| c.id) == Some(attempt.id)
    }

    fn ensure_current(&self, attempt: &Attempt) -> Result<()> {
        if self.is_current(attempt) {
            Ok(())
        } else {
            Err(PipelineError::Aborted)
        }
    }

    /// Callback that drops updates once the attempt is stale or resolved
    fn guarded_progress(&self, attempt: &Attempt, on_progress: ProgressCallback) -> ProgressCallback {
        let current = Arc::clone(&self.current);
        let id = attempt.id;
        let cancel = attempt.cancel.clone();
        let resolved = Arc::clone(&attempt.resolved);

        Arc::new(move |job: ProgressJob| {
            let live = !cancel.is_cancelled()
                && !resolved.load(Ordering::SeqCst)
                && current.lock().as_ref().map(|c| c.id) == Some(id);
            if live {
                on_progress(job);
            } else {
                tracing::debug!(attempt = id, "Dropping progress from stale attempt");
            }
        })
    }

    async fn run_attempt(
        &self,
        attempt: &Attempt,
        key: &CatalogKey,
        on_progress: ProgressCallback,
    ) -> Result<String> {
        let started = Instant::now();
        let mut rounds = 0u32;

        loop {
            let resolution = tokio::select! {
                _ = attempt.cancel.cancelled() => return Err(PipelineError::Aborted),
                result = self.backend.resolve(key) => result?,
            };
            self.ensure_current(attempt)?;

            let progress_handle = match resolution {
                ResolutionResult::Ready { url } => return Ok(url),
                ResolutionResult::Pending { progress_handle } => progress_handle,
            };

            rounds += 1;
            if rounds > self.max_resolve_rounds {
                return Err(PipelineError::Timeout(started.elapsed().as_secs()));
            }
            tracing::info!(attempt = attempt.id, handle = %progress_handle, round = rounds, "Title is being prepared");

            let callback = self.guarded_progress(attempt, Arc::clone(&on_progress));
            let mut task = self.poller.start_polling(&progress_handle, callback).ok_or_else(|| {
                PipelineError::InvalidState(format!("{} is already being tracked", progress_handle))
            })?;

            let outcome = tokio::select! {
                _ = attempt.cancel.cancelled() => {
                    task.mark_resolved();
                    return Err(PipelineError::Aborted);
                }
                outcome = task.completion() => outcome,
            };

            match outcome {
                PollOutcome::ReadyToResolve => self.ensure_current(attempt)?,
                PollOutcome::Stopped => return Err(PipelineError::Aborted),
                PollOutcome::TimedOut => {
                    return Err(PipelineError::Timeout(started.elapsed().as_secs()))
                }
                PollOutcome::Failed => {
                    return Err(PipelineError::internal(format!(
                        "Polling {} ended unexpectedly",
                        progress_handle
                    )))
                }
            }
        }
    }
}
