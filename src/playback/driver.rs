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


//! Event loop that owns a [`PlaybackEngine`]
//!
//! Commands, surface events and timer expiries are handled one at a time on a
//! single task. After each one the engine snapshot is published on a `watch`
//! channel.

use crate::error::{PipelineError, Result};
use crate::playback::engine::{PlaybackEngine, PlayerSnapshot};
use crate::playback::surface::SurfaceEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

const COMMAND_BUFFER: usize = 64;

/// Transport/UI command from the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PlayerCommand {
    TogglePlay,
    BeginSeek,
    Seek { time: f64 },
    EndSeek,
    SetVolume { volume: f64 },
    ToggleMute,
    ToggleFullscreen,
    FullscreenChanged { fullscreen: bool },
    PointerMoved,
    Close,
}

enum DriverMessage {
    Command(PlayerCommand, oneshot::Sender<Result<()>>),
    Event(SurfaceEvent, oneshot::Sender<Result<()>>),
}

/// Cloneable handle to a running playback session
#[derive(Debug, Clone)]
pub struct PlaybackDriver {
    tx: mpsc::Sender<DriverMessage>,
    snapshots: watch::Receiver<PlayerSnapshot>,
}

impl PlaybackDriver {
    /// Move the engine onto its own task
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(engine: PlaybackEngine) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshots) = watch::channel(engine.snapshot());

        tokio::spawn(run(engine, rx, snapshot_tx));

        Self { tx, snapshots }
    }

    /// Apply a command and wait until it was handled
    pub async fn send(&self, command: PlayerCommand) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DriverMessage::Command(command, reply_tx))
            .await
            .map_err(|_| PipelineError::SessionClosed)?;
        reply_rx.await.map_err(|_| PipelineError::SessionClosed)?
    }

    /// Forward a surface event and wait until it was handled
    pub async fn surface_event(&self, event: SurfaceEvent) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DriverMessage::Event(event, reply_tx))
            .await
            .map_err(|_| PipelineError::SessionClosed)?;
        reply_rx.await.map_err(|_| PipelineError::SessionClosed)?
    }

    /// Close the session; closing twice is not an error
    pub async fn close(&self) -> Result<()> {
        match self.send(PlayerCommand::Close).await {
            Err(PipelineError::SessionClosed) => Ok(()),
            other => other,
        }
    }

    /// Latest published state
    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn run(
    mut engine: PlaybackEngine,
    mut rx: mpsc::Receiver<DriverMessage>,
    snapshots: watch::Sender<PlayerSnapshot>,
) {
    loop {
        let deadline = engine.next_deadline();

        let reply = tokio::select! {
            message = rx.recv() => match message {
                Some(DriverMessage::Command(command, reply)) => Some((apply(&mut engine, command), reply)),
                Some(DriverMessage::Event(event, reply)) => Some((engine.handle_event(event), reply)),
                // every handle dropped
                None => {
                    engine.close();
                    None
                }
            },
            _ = sleep_until(deadline) => {
                engine.tick();
                None
            }
        };

        // Publish before replying so a caller sees its own change
        snapshots.send_replace(engine.snapshot());
        if let Some((result, reply)) = reply {
            let _ = reply.send(result);
        }
        if engine.is_closed() {
            break;
        }
    }

    tracing::debug!("Playback driver stopped");
}

fn apply(engine: &mut PlaybackEngine, command: PlayerCommand) -> Result<()> {
    tracing::debug!(command = ?command, "Player command");
    match command {
        PlayerCommand::TogglePlay => engine.toggle_play(),
        PlayerCommand::BeginSeek => engine.begin_seek(),
        PlayerCommand::Seek { time } => engine.seek(time),
        PlayerCommand::EndSeek => engine.end_seek(),
        PlayerCommand::SetVolume { volume } => engine.set_volume(volume),
        PlayerCommand::ToggleMute => engine.toggle_mute(),
        PlayerCommand::ToggleFullscreen => engine.toggle_fullscreen(),
        PlayerCommand::FullscreenChanged { fullscreen } => {
            engine.on_fullscreen_change(fullscreen);
            Ok(())
        }
        PlayerCommand::PointerMoved => {
            engine.pointer_moved();
            Ok(())
        }
        PlayerCommand::Close => {
            engine.close();
            Ok(())
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::engine::{PlaybackConfig, TransportState};
    use crate::playback::source::{AdaptiveStreamSession, PreparedSource};
    use crate::playback::surface::CommandQueueSurface;
    use std::time::Duration;

    fn spawn_driver() -> (PlaybackDriver, CommandQueueSurface) {
        let surface = CommandQueueSurface::new();
        let engine = PlaybackEngine::open(
            PlaybackConfig::default(),
            Box::new(surface.clone()),
            Box::new(surface.clone()),
            PreparedSource::Adaptive(AdaptiveStreamSession::open("https://cdn/a.m3u8")),
            vec![],
            None,
        );
        (PlaybackDriver::spawn(engine), surface)
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_update_snapshot() {
        let (driver, _surface) = spawn_driver();
        assert_eq!(driver.snapshot().state, TransportState::Loading);

        driver
            .surface_event(SurfaceEvent::LoadedMetadata { duration: 90.0 })
            .await
            .unwrap();
        driver.send(PlayerCommand::TogglePlay).await.unwrap();
        driver.surface_event(SurfaceEvent::Playing).await.unwrap();

        let snapshot = driver.snapshot();
        assert_eq!(snapshot.state, TransportState::Playing);
        assert_eq!(snapshot.duration, Some(90.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_on_driver_task() {
        let (driver, _surface) = spawn_driver();
        let mut updates = driver.subscribe();
        assert!(driver.snapshot().controls_visible);

        tokio::time::sleep(Duration::from_secs(4)).await;
        updates.changed().await.unwrap();
        assert!(!driver.snapshot().controls_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_driver() {
        let (driver, surface) = spawn_driver();
        driver.close().await.unwrap();
        driver.close().await.unwrap();

        assert!(driver.snapshot().closed);
        assert!(matches!(
            driver.send(PlayerCommand::TogglePlay).await,
            Err(PipelineError::SessionClosed)
        ));
        assert!(surface.drain().contains(&crate::playback::surface::SurfaceCommand::Unload));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_reaches_caller() {
        let (driver, _surface) = spawn_driver();
        let err = driver
            .surface_event(SurfaceEvent::Error {
                message: "bad frame".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(!driver.is_closed());
    }
}
