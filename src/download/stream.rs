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


//! Whole-resource HTTP fetch into memory
//!
//! # Behavior
//! - Streams the response body chunk by chunk into a byte buffer
//! - Reports byte progress through the same callback type as job polling
//!   (status `"buffering"`, throttled to one update per 250 ms)
//! - Cancellable at any point; cancellation yields `PipelineError::Aborted`
//!
//! There is no resume or retry here: a failed fetch is handled by the caller
//! falling back to direct playback of the URL.

use crate::download::progress::{noop_progress, ProgressCallback, ProgressJob, ProgressTracker};
use crate::error::{PipelineError, Result};
use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Request timeout for whole-file fetches
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Minimum time between forwarded byte-progress updates
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound for the initial buffer reservation (64 MB)
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Status label used for byte progress
pub const BUFFERING_STATUS: &str = "buffering";

/// One cancellable fetch of a media resource into memory
pub struct BufferedFetch {
    client: Client,
    url: Url,
    cancel: CancellationToken,
    on_progress: ProgressCallback,
}

impl BufferedFetch {
    pub fn new(client: Client, url: Url, cancel: CancellationToken) -> Self {
        Self {
            client,
            url,
            cancel,
            on_progress: noop_progress(),
        }
    }

    /// Forward byte progress to `on_progress`
    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = on_progress;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Download the whole body
    ///
    /// # Errors
    /// - `Aborted` if the token was cancelled before the body completed
    /// - `Network` on connection failure or non-success status
    pub async fn run(self) -> Result<Vec<u8>> {
        let endpoint = self.url.to_string();
        tracing::debug!(url = %endpoint, "Starting buffered fetch");

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PipelineError::Aborted),
            response = self.client.get(self.url.clone()).send() => response.map_err(|e| {
                PipelineError::network(format!("Fetch failed: {}", e), None, Some(endpoint.clone()))
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::network(
                format!("Fetch returned HTTP {}", status.as_u16()),
                Some(status.as_u16()),
                Some(endpoint),
            ));
        }

        let total = response.content_length().unwrap_or(0);
        let mut buffer = Vec::with_capacity(total.min(MAX_PREALLOCATION) as usize);
        let mut tracker = ProgressTracker::with_interval(PROGRESS_INTERVAL);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(url = %endpoint, received = buffer.len(), "Buffered fetch aborted");
                    return Err(PipelineError::Aborted);
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    return Err(PipelineError::network(
                        format!("Fetch interrupted after {} bytes: {}", buffer.len(), e),
                        None,
                        Some(endpoint),
                    ))
                }
                None => break,
            };

            buffer.extend_from_slice(&chunk);

            if tracker.should_emit() {
                (self.on_progress)(self.snapshot(&endpoint, buffer.len() as u64, total));
            }
        }

        let received = buffer.len() as u64;
        let mut done = self.snapshot(&endpoint, received, total.max(received));
        done.percent = 100.0;
        (self.on_progress)(done);

        tracing::info!(url = %endpoint, bytes = received, "Buffered fetch complete");
        Ok(buffer)
    }

    fn snapshot(&self, endpoint: &str, downloaded: u64, total: u64) -> ProgressJob {
        let mut job = ProgressJob::new(endpoint, BUFFERING_STATUS);
        job.bytes_downloaded = downloaded;
        job.bytes_total = total;
        job.calculate_percentage();
        job
    }
}

/// HTTP client for whole-file fetches
pub fn fetch_client(user_agent: &str) -> Result<Client> {
    Ok(Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(user_agent)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancelled_before_start_is_aborted() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Port 9 (discard) is never contacted: the cancelled branch wins first
        let url = Url::parse("http://127.0.0.1:9/movie.mp4").unwrap();
        let fetch = BufferedFetch::new(Client::new(), url, cancel);

        let err = fetch.run().await.unwrap_err();
        assert!(err.is_aborted());
    }

    #[test]
    fn test_snapshot_computes_percent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let url = Url::parse("https://cdn/x.mp4").unwrap();
        let fetch = BufferedFetch::new(Client::new(), url, CancellationToken::new())
            .with_progress(Arc::new(move |job| sink.lock().push(job)));

        let job = fetch.snapshot("https://cdn/x.mp4", 250, 1000);
        assert_eq!(job.status, BUFFERING_STATUS);
        assert_eq!(job.percent, 25.0);
        assert!(seen.lock().is_empty());
        assert_eq!(fetch.url().path(), "/x.mp4");
    }
}
