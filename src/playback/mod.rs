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


//! Playback: from a resolved URL to a controllable session
//!
//! - `source` - delivery strategy selection, byte handles, adaptive sessions
//! - `surface` - decode surface / fullscreen seams and their events
//! - `timers` - one-shot UI deadlines
//! - `engine` - the session state machine
//! - `driver` - async event loop owning one engine

pub mod driver;
pub mod engine;
pub mod source;
pub mod surface;
pub mod timers;

// Re-export commonly used types
pub use driver::{PlaybackDriver, PlayerCommand};
pub use engine::{PlaybackConfig, PlaybackEngine, PlayerSnapshot, TransportState};
pub use source::{
    classify_url, ByteStore, DeliveryKind, DeliveryStrategySelector, LocalByteHandle, PreparedSource,
    SourceDescriptor,
};
pub use surface::{CommandQueueSurface, DecodeSurface, FullscreenContainer, SurfaceCommand, SurfaceEvent};
