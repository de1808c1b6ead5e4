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


//! Decode surface and fullscreen container seams
//!
//! The host owns the actual decoder and view. The engine talks to them through
//! [`DecodeSurface`] and [`FullscreenContainer`] and learns what happened through
//! [`SurfaceEvent`]s the host forwards.

use crate::error::Result;
use crate::playback::source::SourceDescriptor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Decoder/renderer controlled by a playback session
pub trait DecodeSurface: Send {
    fn load(&mut self, source: &SourceDescriptor);
    fn play(&mut self);
    fn pause(&mut self);
    fn set_current_time(&mut self, seconds: f64);
    fn set_volume(&mut self, volume: f64);
    /// Drop the loaded source
    fn unload(&mut self);
}

/// View that can enter and leave fullscreen
pub trait FullscreenContainer: Send {
    fn request_fullscreen(&mut self) -> Result<()>;
    fn exit_fullscreen(&mut self) -> Result<()>;
}

/// Notification from the decode surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceEvent {
    LoadedMetadata { duration: f64 },
    DurationChange { duration: f64 },
    CanPlay,
    Playing,
    Pause,
    Waiting,
    TimeUpdate { current_time: f64 },
    Progress { buffered_end: f64 },
    Ended,
    Error { message: String },
}

/// Instruction for a host-side decode surface or container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceCommand {
    Load { source: SourceDescriptor },
    Play,
    Pause,
    Seek { time: f64 },
    SetVolume { volume: f64 },
    Unload,
    EnterFullscreen,
    ExitFullscreen,
}

/// Surface and container that queue commands for the host to drain
///
/// Used across the FFI boundary, where the host polls for pending commands.
#[derive(Debug, Clone, Default)]
pub struct CommandQueueSurface {
    queue: Arc<Mutex<VecDeque<SurfaceCommand>>>,
}

impl CommandQueueSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: SurfaceCommand) {
        self.queue.lock().push_back(command);
    }

    /// Take every pending command in issue order
    pub fn drain(&self) -> Vec<SurfaceCommand> {
        self.queue.lock().drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl DecodeSurface for CommandQueueSurface {
    fn load(&mut self, source: &SourceDescriptor) {
        self.push(SurfaceCommand::Load {
            source: source.clone(),
        });
    }

    fn play(&mut self) {
        self.push(SurfaceCommand::Play);
    }

    fn pause(&mut self) {
        self.push(SurfaceCommand::Pause);
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.push(SurfaceCommand::Seek { time: seconds });
    }

    fn set_volume(&mut self, volume: f64) {
        self.push(SurfaceCommand::SetVolume { volume });
    }

    fn unload(&mut self) {
        self.push(SurfaceCommand::Unload);
    }
}

impl FullscreenContainer for CommandQueueSurface {
    fn request_fullscreen(&mut self) -> Result<()> {
        self.push(SurfaceCommand::EnterFullscreen);
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> Result<()> {
        self.push(SurfaceCommand::ExitFullscreen);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_preserves_order() {
        let surface = CommandQueueSurface::new();
        let mut decoder = surface.clone();
        decoder.play();
        decoder.set_current_time(12.5);
        decoder.pause();

        assert_eq!(surface.pending(), 3);
        assert_eq!(
            surface.drain(),
            vec![
                SurfaceCommand::Play,
                SurfaceCommand::Seek { time: 12.5 },
                SurfaceCommand::Pause
            ]
        );
        assert_eq!(surface.pending(), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let event: SurfaceEvent =
            serde_json::from_str(r#"{"type":"time_update","current_time":42.0}"#).unwrap();
        assert_eq!(event, SurfaceEvent::TimeUpdate { current_time: 42.0 });

        let event: SurfaceEvent = serde_json::from_str(r#"{"type":"can_play"}"#).unwrap();
        assert_eq!(event, SurfaceEvent::CanPlay);
    }
}
