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


//! Acquisition: getting from a title to playable bytes
//!
//! - `progress` - preparation snapshots and the non-decreasing tracker
//! - `poller` - fixed-cadence polling of a backend preparation job
//! - `manager` - one resolution attempt at a time, re-resolving after completion
//! - `stream` - cancellable whole-file fetch into memory

pub mod manager;
pub mod poller;
pub mod progress;
pub mod stream;

// Re-export commonly used types
pub use manager::{AcquisitionManager, AttemptId};
pub use poller::{PollOutcome, PollingTask, ProgressPoller};
pub use progress::{noop_progress, ProgressCallback, ProgressJob, ProgressTracker};
pub use stream::BufferedFetch;
