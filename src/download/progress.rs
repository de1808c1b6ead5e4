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


//! Preparation progress snapshots and tracking
//!
//! # Progress Information
//! - Progress handle (the URL being polled, or the media URL for buffered fetches)
//! - Free-text phase label reported by the backend ("transcoding", "caching")
//! - Percentage complete, clamped to 0–100
//! - Bytes downloaded / total bytes
//!
//! # Wire Format
//! ```json
//! { "progress": { "status": "transcoding", "progress": 42.5,
//!                 "downloaded": 104857600, "total": 734003200 } }
//! ```

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Snapshot of an in-flight backend preparation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressJob {
    /// Opaque handle the snapshot was read from
    pub progress_handle: String,

    /// Phase label as reported by the backend
    pub status: String,

    /// Percentage complete (0.0 - 100.0)
    pub percent: f64,

    /// Bytes prepared so far
    pub bytes_downloaded: u64,

    /// Total bytes to prepare (0 if unknown)
    pub bytes_total: u64,

    /// When the snapshot was taken
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ProgressEnvelope {
    progress: Option<ProgressBody>,
}

#[derive(Debug, Deserialize)]
struct ProgressBody {
    #[serde(default)]
    status: Option<String>,
    progress: Option<f64>,
    #[serde(default)]
    downloaded: Option<f64>,
    #[serde(default)]
    total: Option<f64>,
}

impl ProgressJob {
    /// Create a new snapshot with nothing prepared yet
    pub fn new<S: Into<String>>(progress_handle: S, status: S) -> Self {
        Self {
            progress_handle: progress_handle.into(),
            status: status.into(),
            percent: 0.0,
            bytes_downloaded: 0,
            bytes_total: 0,
            observed_at: Utc::now(),
        }
    }

    /// Parse a poll response body
    ///
    /// # Errors
    /// Returns `Protocol` when the body has no `progress` object or no numeric
    /// `progress` field
    pub fn from_response(progress_handle: &str, body: &Value) -> Result<Self> {
        let envelope: ProgressEnvelope = serde_json::from_value(body.clone()).map_err(|e| {
            PipelineError::protocol(
                format!("Malformed progress response: {}", e),
                Some(body.to_string()),
            )
        })?;

        let progress = envelope.progress.ok_or_else(|| {
            PipelineError::protocol("Progress response has no `progress` object", Some(body.to_string()))
        })?;

        let percent = progress.progress.ok_or_else(|| {
            PipelineError::protocol("Progress snapshot has no `progress` value", Some(body.to_string()))
        })?;

        Ok(Self {
            progress_handle: progress_handle.to_string(),
            status: progress.status.unwrap_or_default(),
            percent: clamp_percent(percent),
            bytes_downloaded: to_bytes(progress.downloaded),
            bytes_total: to_bytes(progress.total),
            observed_at: Utc::now(),
        })
    }

    /// Calculate percentage from bytes
    pub fn calculate_percentage(&mut self) {
        if self.bytes_total > 0 {
            self.percent =
                clamp_percent((self.bytes_downloaded as f64 / self.bytes_total as f64) * 100.0);
        } else {
            self.percent = 0.0;
        }
    }

    /// Backend reports the job as finished
    pub fn is_complete(&self) -> bool {
        self.percent >= 100.0
    }

    /// Format bytes as human-readable string (e.g., "45.2 MB")
    pub fn bytes_string(bytes: u64) -> String {
        let mb = bytes as f64 / 1_000_000.0;
        format!("{:.1} MB", mb)
    }

    /// Format progress as display string
    pub fn display_string(&self) -> String {
        let status = if self.status.is_empty() {
            "preparing"
        } else {
            self.status.as_str()
        };

        if self.bytes_total > 0 {
            format!(
                "{}: {:.0}% ({} / {})",
                status,
                self.percent,
                Self::bytes_string(self.bytes_downloaded),
                Self::bytes_string(self.bytes_total)
            )
        } else {
            format!("{}: {:.0}%", status, self.percent)
        }
    }
}

/// Callback type for progress updates
pub type ProgressCallback = std::sync::Arc<dyn Fn(ProgressJob) + Send + Sync>;

/// Callback that drops every update
pub fn noop_progress() -> ProgressCallback {
    std::sync::Arc::new(|_| {})
}

fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

fn to_bytes(value: Option<f64>) -> u64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v as u64,
        _ => 0,
    }
}

/// Progress tracker for one job or fetch
///
/// Keeps the reported percentage from moving backwards (backends occasionally
/// report a lower value when switching phases) and throttles how often byte
/// progress is forwarded.
#[derive(Debug)]
pub struct ProgressTracker {
    /// Highest percentage reported so far
    high_water: f64,

    /// Last time an update was let through
    last_update: Option<Instant>,

    /// Minimum interval between forwarded updates
    update_interval: Duration,
}

impl ProgressTracker {
    /// Tracker that forwards every update
    pub fn new() -> Self {
        Self::with_interval(Duration::ZERO)
    }

    /// Tracker that forwards at most one update per `update_interval`
    pub fn with_interval(update_interval: Duration) -> Self {
        Self {
            high_water: 0.0,
            last_update: None,
            update_interval,
        }
    }

    /// Apply the non-decreasing floor to a snapshot
    pub fn observe(&mut self, mut job: ProgressJob) -> ProgressJob {
        if job.percent < self.high_water {
            tracing::debug!(
                handle = %job.progress_handle,
                reported = job.percent,
                kept = self.high_water,
                "Progress regressed; keeping previous value"
            );
            job.percent = self.high_water;
        } else {
            self.high_water = job.percent;
        }
        job
    }

    /// Returns true if enough time has passed to forward another update
    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_update {
            Some(last) if now.duration_since(last) < self.update_interval => false,
            _ => {
                self.last_update = Some(now);
                true
            }
        }
    }

    pub fn high_water(&self) -> f64 {
        self.high_water
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
