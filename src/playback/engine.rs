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


//! Playback session state machine
//!
//! # Transport States
//! ```text
//! Idle --load()--> Loading --loaded_metadata/can_play--> Ready
//! Ready <--> Playing <--> Paused
//! ```
//! Seeking is a gesture nested in Ready/Playing/Paused and returns to where it
//! started. Buffering is a flag on top of the transport state.
//!
//! # UI State
//! - Controls hide after `controls_timeout` without pointer movement
//! - The primary content rating is shown once per session, on the first
//!   transition to Playing, for `rating_overlay_duration`
//! - Mute sets volume 0; unmute always restores full volume
//!
//! The engine is synchronous and never sleeps. Whoever owns it calls
//! [`PlaybackEngine::tick`] at [`PlaybackEngine::next_deadline`].

use crate::api::catalog::{primary_rating, ContentRating};
use crate::api::client::serde_millis;
use crate::error::{PipelineError, Result};
use crate::playback::source::{PreparedSource, SourceDescriptor};
use crate::playback::surface::{DecodeSurface, FullscreenContainer, SurfaceEvent};
use crate::playback::timers::{earliest, Deadline};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_CONTROLS_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_RATING_OVERLAY_DURATION: Duration = Duration::from_secs(4);
pub const FULL_VOLUME: f64 = 1.0;

/// Invoked once when a session closes
pub type ClosedCallback = Box<dyn FnOnce() + Send>;

/// Timing and defaults for playback sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    #[serde(with = "serde_millis")]
    pub controls_timeout: Duration,
    #[serde(with = "serde_millis")]
    pub rating_overlay_duration: Duration,
    pub default_volume: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            controls_timeout: DEFAULT_CONTROLS_TIMEOUT,
            rating_overlay_duration: DEFAULT_RATING_OVERLAY_DURATION,
            default_volume: FULL_VOLUME,
        }
    }
}

impl PlaybackConfig {
    pub fn builder() -> PlaybackConfigBuilder {
        PlaybackConfigBuilder::default()
    }
}

/// Builder for PlaybackConfig
#[derive(Debug, Default)]
pub struct PlaybackConfigBuilder {
    config: PlaybackConfig,
}

impl PlaybackConfigBuilder {
    pub fn controls_timeout(mut self, timeout: Duration) -> Self {
        self.config.controls_timeout = timeout;
        self
    }

    pub fn rating_overlay_duration(mut self, duration: Duration) -> Self {
        self.config.rating_overlay_duration = duration;
        self
    }

    pub fn default_volume(mut self, volume: f64) -> Self {
        self.config.default_volume = clamp_volume(volume).unwrap_or(FULL_VOLUME);
        self
    }

    pub fn build(self) -> PlaybackConfig {
        self.config
    }
}

/// Transport state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
}

/// Everything a host needs to render the player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub state: TransportState,
    pub seeking: bool,
    pub buffering: bool,
    /// Gesture position while seeking, otherwise the surface time
    pub displayed_time: f64,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub buffered_fraction: f64,
    pub played_fraction: f64,
    pub volume: f64,
    pub muted: bool,
    pub fullscreen: bool,
    pub controls_visible: bool,
    pub rating_overlay: Option<ContentRating>,
    pub source: Option<SourceDescriptor>,
    pub last_error: Option<String>,
    pub closed: bool,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            state: TransportState::Idle,
            seeking: false,
            buffering: false,
            displayed_time: 0.0,
            current_time: 0.0,
            duration: None,
            buffered_fraction: 0.0,
            played_fraction: 0.0,
            volume: FULL_VOLUME,
            muted: false,
            fullscreen: false,
            controls_visible: true,
            rating_overlay: None,
            source: None,
            last_error: None,
            closed: false,
        }
    }
}

/// One playback session bound to one prepared source
pub struct PlaybackEngine {
    config: PlaybackConfig,
    surface: Box<dyn DecodeSurface>,
    container: Box<dyn FullscreenContainer>,
    source: PreparedSource,
    ratings: Vec<ContentRating>,

    // ===== Transport =====
    state: TransportState,
    seek_gesture: Option<f64>,
    buffering: bool,
    current_time: f64,
    duration: Option<f64>,
    buffered_end: f64,

    // ===== UI =====
    volume: f64,
    fullscreen: bool,
    controls_visible: bool,
    rating_overlay: Option<ContentRating>,
    rating_shown: bool,
    controls_timer: Deadline,
    rating_timer: Deadline,

    // ===== Lifecycle =====
    last_error: Option<String>,
    closed: bool,
    on_closed: Option<ClosedCallback>,
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("state", &self.state)
            .field("source", &self.source)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PlaybackEngine {
    /// Create an idle session; call [`load`](Self::load) to hand the source to the surface
    pub fn new(
        config: PlaybackConfig,
        surface: Box<dyn DecodeSurface>,
        container: Box<dyn FullscreenContainer>,
        source: PreparedSource,
        ratings: Vec<ContentRating>,
    ) -> Self {
        let volume = clamp_volume(config.default_volume).unwrap_or(FULL_VOLUME);
        Self {
            config,
            surface,
            container,
            source,
            ratings,
            state: TransportState::Idle,
            seek_gesture: None,
            buffering: false,
            current_time: 0.0,
            duration: None,
            buffered_end: 0.0,
            volume,
            fullscreen: false,
            controls_visible: true,
            rating_overlay: None,
            rating_shown: false,
            controls_timer: Deadline::new(),
            rating_timer: Deadline::new(),
            last_error: None,
            closed: false,
            on_closed: None,
        }
    }

    /// Register the "closed" notification
    pub fn on_closed(mut self, callback: ClosedCallback) -> Self {
        self.on_closed = Some(callback);
        self
    }

    /// Create and immediately load
    pub fn open(
        config: PlaybackConfig,
        surface: Box<dyn DecodeSurface>,
        container: Box<dyn FullscreenContainer>,
        source: PreparedSource,
        ratings: Vec<ContentRating>,
        on_closed: Option<ClosedCallback>,
    ) -> Self {
        let mut engine = Self::new(config, surface, container, source, ratings);
        engine.on_closed = on_closed;
        // a fresh engine is neither closed nor past Idle
        let _ = engine.load();
        engine
    }

    /// Idle -> Loading: hand the source to the surface
    pub fn load(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state != TransportState::Idle {
            return Err(PipelineError::InvalidState(format!(
                "Cannot load while {:?}",
                self.state
            )));
        }

        let descriptor = self.source.descriptor();
        tracing::info!(source = %descriptor.locator(), "Loading playback source");
        self.surface.load(&descriptor);
        self.surface.set_volume(self.volume);
        self.state = TransportState::Loading;
        self.controls_timer.arm(Instant::now(), self.config.controls_timeout);
        Ok(())
    }

    // ===== Accessors =====

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_seeking(&self) -> bool {
        self.seek_gesture.is_some()
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.volume == 0.0
    }

    pub fn displayed_time(&self) -> f64 {
        self.seek_gesture.unwrap_or(self.current_time)
    }

    pub fn source(&self) -> &PreparedSource {
        &self.source
    }

    /// Buffered range end over duration; 0 when the duration is unknown
    pub fn buffered_fraction(&self) -> f64 {
        fraction(self.buffered_end, self.duration)
    }

    /// Current time over duration; 0 when the duration is unknown
    pub fn played_fraction(&self) -> f64 {
        fraction(self.current_time, self.duration)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            state: self.state,
            seeking: self.is_seeking(),
            buffering: self.buffering,
            displayed_time: self.displayed_time(),
            current_time: self.current_time,
            duration: self.duration,
            buffered_fraction: self.buffered_fraction(),
            played_fraction: self.played_fraction(),
            volume: self.volume,
            muted: self.is_muted(),
            fullscreen: self.fullscreen,
            controls_visible: self.controls_visible,
            rating_overlay: self.rating_overlay.clone(),
            source: (!self.closed).then(|| self.source.descriptor()),
            last_error: self.last_error.clone(),
            closed: self.closed,
        }
    }

    // ===== Transport controls =====

    /// Play when paused or ready, pause when playing; nothing before Ready
    pub fn toggle_play(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.state {
            TransportState::Idle | TransportState::Loading => {
                tracing::debug!(state = ?self.state, "Ignoring play toggle before ready");
            }
            TransportState::Ready | TransportState::Paused => {
                self.surface.play();
                self.enter_playing();
            }
            TransportState::Playing => {
                self.surface.pause();
                self.state = TransportState::Paused;
            }
        }
        Ok(())
    }

    /// Start a seek gesture; the displayed time follows `seek` until `end_seek`
    pub fn begin_seek(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.can_seek() && self.seek_gesture.is_none() {
            self.seek_gesture = Some(self.current_time);
        }
        Ok(())
    }

    /// Move the gesture, or seek immediately when no gesture is active
    pub fn seek(&mut self, time: f64) -> Result<()> {
        self.ensure_open()?;
        if !self.can_seek() || time.is_nan() {
            return Ok(());
        }

        let time = self.clamp_time(time);
        match self.seek_gesture.as_mut() {
            Some(gesture) => *gesture = time,
            None => self.commit_seek(time),
        }
        Ok(())
    }

    /// Release the gesture and set the surface time once
    pub fn end_seek(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(time) = self.seek_gesture.take() {
            self.commit_seek(time);
        }
        Ok(())
    }

    /// Set volume, clamped to 0..=1
    pub fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.ensure_open()?;
        if let Some(volume) = clamp_volume(volume) {
            self.apply_volume(volume);
        }
        Ok(())
    }

    /// Mute to 0, or unmute to full volume
    pub fn toggle_mute(&mut self) -> Result<()> {
        self.ensure_open()?;
        let next = if self.is_muted() { FULL_VOLUME } else { 0.0 };
        self.apply_volume(next);
        Ok(())
    }

    pub fn toggle_fullscreen(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.fullscreen {
            self.container.exit_fullscreen()?;
            self.fullscreen = false;
        } else {
            self.container.request_fullscreen()?;
            self.fullscreen = true;
        }
        Ok(())
    }

    /// Platform reported a fullscreen change (e.g. user pressed Escape)
    pub fn on_fullscreen_change(&mut self, fullscreen: bool) {
        self.fullscreen = fullscreen;
    }

    /// Show controls and restart the inactivity timer
    pub fn pointer_moved(&mut self) {
        if self.closed {
            return;
        }
        self.controls_visible = true;
        self.controls_timer.arm(Instant::now(), self.config.controls_timeout);
    }

    // ===== Timers =====

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest(&[self.controls_timer, self.rating_timer])
    }

    /// Fire due timers; returns true if anything changed
    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if self.controls_timer.fire_if_due(now) {
            self.controls_visible = false;
            changed = true;
        }
        if self.rating_timer.fire_if_due(now) {
            self.rating_overlay = None;
            changed = true;
        }
        changed
    }

    // ===== Surface events =====

    /// Reconcile with what the surface reports
    ///
    /// # Errors
    /// Returns `Decode` for a surface error event. Events after close are ignored.
    pub fn handle_event(&mut self, event: SurfaceEvent) -> Result<()> {
        if self.closed {
            tracing::debug!(event = ?event, "Ignoring surface event after close");
            return Ok(());
        }

        match event {
            SurfaceEvent::LoadedMetadata { duration } => {
                self.duration = valid_duration(duration);
                self.mark_ready();
            }
            SurfaceEvent::DurationChange { duration } => {
                self.duration = valid_duration(duration);
            }
            SurfaceEvent::CanPlay => {
                self.buffering = false;
                self.mark_ready();
            }
            SurfaceEvent::Playing => {
                self.buffering = false;
                self.enter_playing();
            }
            SurfaceEvent::Pause => {
                if self.state == TransportState::Playing {
                    self.state = TransportState::Paused;
                }
            }
            SurfaceEvent::Waiting => {
                self.buffering = true;
            }
            SurfaceEvent::TimeUpdate { current_time } => {
                if current_time.is_finite() {
                    self.current_time = current_time.max(0.0);
                }
            }
            SurfaceEvent::Progress { buffered_end } => {
                if buffered_end.is_finite() {
                    self.buffered_end = buffered_end.max(0.0);
                }
            }
            SurfaceEvent::Ended => {
                if let Some(duration) = self.duration {
                    self.current_time = duration;
                }
                self.buffering = false;
                self.state = TransportState::Paused;
            }
            SurfaceEvent::Error { message } => {
                tracing::warn!(error = %message, "Decode surface reported an error");
                self.buffering = false;
                self.last_error = Some(message.clone());
                return Err(PipelineError::Decode(message));
            }
        }
        Ok(())
    }

    // ===== Teardown =====

    /// Release everything the session owns; returns false if already closed
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        self.controls_timer.cancel();
        self.rating_timer.cancel();
        self.seek_gesture = None;
        self.rating_overlay = None;

        if self.fullscreen {
            if let Err(e) = self.container.exit_fullscreen() {
                tracing::debug!(error = %e, "Exit fullscreen on close failed");
            }
            self.fullscreen = false;
        }

        self.surface.pause();
        self.surface.unload();
        self.source.release();
        self.state = TransportState::Idle;

        tracing::info!("Playback session closed");
        if let Some(callback) = self.on_closed.take() {
            callback();
        }
        true
    }

    // ===== Internals =====

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(PipelineError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn can_seek(&self) -> bool {
        matches!(
            self.state,
            TransportState::Ready | TransportState::Playing | TransportState::Paused
        )
    }

    fn clamp_time(&self, time: f64) -> f64 {
        let time = time.max(0.0);
        match self.duration {
            Some(duration) => time.min(duration),
            None => time,
        }
    }

    fn commit_seek(&mut self, time: f64) {
        self.surface.set_current_time(time);
        self.current_time = time;
    }

    fn apply_volume(&mut self, volume: f64) {
        self.volume = volume;
        self.surface.set_volume(volume);
    }

    fn mark_ready(&mut self) {
        if matches!(self.state, TransportState::Idle | TransportState::Loading) {
            self.state = TransportState::Ready;
        }
    }

    fn enter_playing(&mut self) {
        self.state = TransportState::Playing;
        if self.rating_shown {
            return;
        }
        self.rating_shown = true;

        if let Some(rating) = primary_rating(&self.ratings).cloned() {
            tracing::debug!(rating = %rating.rating, "Showing rating overlay");
            self.rating_overlay = Some(rating);
            self.rating_timer
                .arm(Instant::now(), self.config.rating_overlay_duration);
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn clamp_volume(volume: f64) -> Option<f64> {
    (!volume.is_nan()).then(|| volume.clamp(0.0, 1.0))
}

fn valid_duration(duration: f64) -> Option<f64> {
    (duration.is_finite() && duration > 0.0).then_some(duration)
}

fn fraction(position: f64, duration: Option<f64>) -> f64 {
    match duration {
        Some(d) if d > 0.0 => (position / d).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::source::{AdaptiveStreamSession, ByteStore};
    use crate::playback::surface::{CommandQueueSurface, SurfaceCommand};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn rating(value: &str) -> ContentRating {
        ContentRating {
            region: Some("US".to_string()),
            rating: value.to_string(),
            descriptors: vec![],
        }
    }

    fn engine_with(source: PreparedSource, ratings: Vec<ContentRating>) -> (PlaybackEngine, CommandQueueSurface) {
        let surface = CommandQueueSurface::new();
        let engine = PlaybackEngine::open(
            PlaybackConfig::default(),
            Box::new(surface.clone()),
            Box::new(surface.clone()),
            source,
            ratings,
            None,
        );
        (engine, surface)
    }

    fn ready_engine() -> (PlaybackEngine, CommandQueueSurface) {
        let source = PreparedSource::Adaptive(AdaptiveStreamSession::open("https://cdn/a.m3u8"));
        let (mut engine, surface) = engine_with(source, vec![rating("PG-13")]);
        engine
            .handle_event(SurfaceEvent::LoadedMetadata { duration: 120.0 })
            .unwrap();
        surface.drain();
        (engine, surface)
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_then_ready() {
        let source = PreparedSource::Direct {
            url: "https://cdn/x.mp4".to_string(),
            reason: "offline".to_string(),
        };
        let (mut engine, surface) = engine_with(source, vec![]);
        assert_eq!(engine.state(), TransportState::Loading);
        assert_eq!(
            surface.drain(),
            vec![
                SurfaceCommand::Load {
                    source: SourceDescriptor::Direct {
                        url: "https://cdn/x.mp4".to_string()
                    }
                },
                SurfaceCommand::SetVolume { volume: 1.0 }
            ]
        );

        // play before ready does nothing
        engine.toggle_play().unwrap();
        assert_eq!(engine.state(), TransportState::Loading);
        assert_eq!(surface.pending(), 0);

        engine.handle_event(SurfaceEvent::CanPlay).unwrap();
        assert_eq!(engine.state(), TransportState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_play_and_pause_events() {
        let (mut engine, surface) = ready_engine();

        engine.toggle_play().unwrap();
        assert_eq!(engine.state(), TransportState::Playing);
        engine.handle_event(SurfaceEvent::Playing).unwrap();
        assert_eq!(engine.state(), TransportState::Playing);

        engine.toggle_play().unwrap();
        assert_eq!(engine.state(), TransportState::Paused);
        assert_eq!(surface.drain(), vec![SurfaceCommand::Play, SurfaceCommand::Pause]);

        // platform-initiated pause and resume
        engine.handle_event(SurfaceEvent::Playing).unwrap();
        engine.handle_event(SurfaceEvent::Pause).unwrap();
        assert_eq!(engine.state(), TransportState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_gesture_holds_displayed_time() {
        let (mut engine, surface) = ready_engine();
        engine.toggle_play().unwrap();
        surface.drain();

        engine.begin_seek().unwrap();
        engine.seek(30.0).unwrap();
        engine
            .handle_event(SurfaceEvent::TimeUpdate { current_time: 5.0 })
            .unwrap();
        engine.seek(45.0).unwrap();
        engine
            .handle_event(SurfaceEvent::TimeUpdate { current_time: 6.0 })
            .unwrap();

        assert!(engine.is_seeking());
        assert_eq!(engine.displayed_time(), 45.0);
        assert_eq!(surface.pending(), 0);

        engine.end_seek().unwrap();
        assert!(!engine.is_seeking());
        assert_eq!(engine.displayed_time(), 45.0);
        assert_eq!(surface.drain(), vec![SurfaceCommand::Seek { time: 45.0 }]);
        assert_eq!(engine.state(), TransportState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_gesture_from_paused_returns_to_paused() {
        let (mut engine, surface) = ready_engine();
        engine.toggle_play().unwrap();
        engine.toggle_play().unwrap();
        assert_eq!(engine.state(), TransportState::Paused);
        surface.drain();

        engine.begin_seek().unwrap();
        engine.seek(20.0).unwrap();
        engine
            .handle_event(SurfaceEvent::TimeUpdate { current_time: 3.0 })
            .unwrap();
        engine.seek(70.0).unwrap();

        assert!(engine.is_seeking());
        assert_eq!(engine.state(), TransportState::Paused);
        assert_eq!(engine.displayed_time(), 70.0);
        assert_eq!(surface.pending(), 0);

        engine.end_seek().unwrap();
        assert!(!engine.is_seeking());
        assert_eq!(engine.state(), TransportState::Paused);
        assert_eq!(surface.drain(), vec![SurfaceCommand::Seek { time: 70.0 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_event_during_seek_gesture() {
        let (mut engine, surface) = ready_engine();
        engine.toggle_play().unwrap();
        engine.handle_event(SurfaceEvent::Playing).unwrap();
        surface.drain();

        engine.begin_seek().unwrap();
        engine.seek(50.0).unwrap();
        engine.handle_event(SurfaceEvent::Pause).unwrap();

        // the gesture survives the platform pause
        assert!(engine.is_seeking());
        assert_eq!(engine.state(), TransportState::Paused);
        assert_eq!(engine.displayed_time(), 50.0);

        engine.seek(55.0).unwrap();
        engine.end_seek().unwrap();
        assert_eq!(engine.state(), TransportState::Paused);
        assert_eq!(engine.displayed_time(), 55.0);
        assert_eq!(surface.drain(), vec![SurfaceCommand::Seek { time: 55.0 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_clamps_to_duration() {
        let (mut engine, surface) = ready_engine();
        engine.seek(500.0).unwrap();
        engine.seek(-3.0).unwrap();
        assert_eq!(
            surface.drain(),
            vec![SurfaceCommand::Seek { time: 120.0 }, SurfaceCommand::Seek { time: 0.0 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_restores_full_volume() {
        let (mut engine, _surface) = ready_engine();
        engine.set_volume(0.4).unwrap();
        engine.toggle_mute().unwrap();
        assert!(engine.is_muted());
        engine.toggle_mute().unwrap();
        assert_eq!(engine.volume(), 1.0);

        engine.set_volume(7.0).unwrap();
        assert_eq!(engine.volume(), 1.0);
        engine.set_volume(f64::NAN).unwrap();
        assert_eq!(engine.volume(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rating_overlay_once_per_session() {
        let (mut engine, _surface) = ready_engine();

        engine.handle_event(SurfaceEvent::Playing).unwrap();
        assert_eq!(engine.snapshot().rating_overlay.unwrap().rating, "PG-13");

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(engine.tick());
        assert!(engine.snapshot().rating_overlay.is_none());

        engine.handle_event(SurfaceEvent::Pause).unwrap();
        engine.handle_event(SurfaceEvent::Playing).unwrap();
        assert!(engine.snapshot().rating_overlay.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_overlay_without_ratings() {
        let source = PreparedSource::Adaptive(AdaptiveStreamSession::open("https://cdn/a.m3u8"));
        let (mut engine, _surface) = engine_with(source, vec![rating("  ")]);
        engine.handle_event(SurfaceEvent::CanPlay).unwrap();
        engine.handle_event(SurfaceEvent::Playing).unwrap();
        assert!(engine.snapshot().rating_overlay.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_hide_after_inactivity() {
        let (mut engine, _surface) = ready_engine();
        assert!(engine.snapshot().controls_visible);

        tokio::time::advance(Duration::from_secs(2)).await;
        engine.pointer_moved();
        tokio::time::advance(Duration::from_secs(2)).await;
        engine.tick();
        assert!(engine.snapshot().controls_visible);

        tokio::time::advance(Duration::from_secs(1)).await;
        engine.tick();
        assert!(!engine.snapshot().controls_visible);

        engine.pointer_moved();
        assert!(engine.snapshot().controls_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractions() {
        let (mut engine, _surface) = ready_engine();
        engine.handle_event(SurfaceEvent::Progress { buffered_end: 60.0 }).unwrap();
        engine.handle_event(SurfaceEvent::TimeUpdate { current_time: 30.0 }).unwrap();
        assert_eq!(engine.buffered_fraction(), 0.5);
        assert_eq!(engine.played_fraction(), 0.25);

        engine.handle_event(SurfaceEvent::DurationChange { duration: 0.0 }).unwrap();
        assert_eq!(engine.buffered_fraction(), 0.0);
        assert_eq!(engine.played_fraction(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fullscreen_toggle_and_platform_change() {
        let (mut engine, surface) = ready_engine();
        engine.toggle_fullscreen().unwrap();
        assert!(engine.snapshot().fullscreen);
        engine.on_fullscreen_change(false);
        engine.toggle_fullscreen().unwrap();
        assert_eq!(
            surface.drain(),
            vec![SurfaceCommand::EnterFullscreen, SurfaceCommand::EnterFullscreen]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_is_surfaced() {
        let (mut engine, _surface) = ready_engine();
        let err = engine
            .handle_event(SurfaceEvent::Error {
                message: "MEDIA_ERR_DECODE".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(engine.snapshot().last_error.as_deref(), Some("MEDIA_ERR_DECODE"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_and_notifies_once() {
        let store = ByteStore::new();
        let source = PreparedSource::Buffered {
            handle: store.register(vec![0; 8]),
            origin_url: "https://cdn/x.mp4".to_string(),
        };
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        let surface = CommandQueueSurface::new();

        let mut engine = PlaybackEngine::open(
            PlaybackConfig::default(),
            Box::new(surface.clone()),
            Box::new(surface.clone()),
            source,
            vec![],
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        engine.toggle_fullscreen().unwrap();

        assert!(engine.close());
        assert!(!engine.close());
        drop(engine);

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(store.active_handles(), 0);
        let commands = surface.drain();
        assert!(commands.contains(&SurfaceCommand::ExitFullscreen));
        assert_eq!(commands.last(), Some(&SurfaceCommand::Unload));
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_after_close() {
        let (mut engine, _surface) = ready_engine();
        engine.close();
        assert!(matches!(engine.toggle_play(), Err(PipelineError::SessionClosed)));
        assert!(engine.handle_event(SurfaceEvent::Playing).is_ok());
        assert_eq!(engine.state(), TransportState::Idle);
        assert!(engine.next_deadline().is_none());
        assert!(engine.snapshot().closed);
    }
}
