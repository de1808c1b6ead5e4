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


//! Media pipeline facade
//!
//! Wires the backend client, catalog cache, acquisition manager, delivery
//! selector and the current playback session together. At most one session is
//! alive: opening a new one closes the previous session first, so its byte
//! handle and stream session are released before the new source is loaded.
//!
//! `play_title` calls are generation-tagged. Starting a new one cancels the
//! previous call's buffered fetch, and a call that is no longer the newest stops
//! with `Aborted` at its next step instead of opening a session.

use crate::api::catalog::{CatalogClient, CatalogKey, ContentRating};
use crate::api::client::{BackendClient, ClientConfig};
use crate::api::resolver::{ResolveBackend, ResolverClient};
use crate::download::manager::AcquisitionManager;
use crate::download::progress::{noop_progress, ProgressCallback};
use crate::download::stream::fetch_client;
use crate::error::{PipelineError, Result};
use crate::playback::driver::PlaybackDriver;
use crate::playback::engine::{ClosedCallback, PlaybackConfig, PlaybackEngine};
use crate::playback::source::{ByteStore, DeliveryStrategySelector, PreparedSource};
use crate::playback::surface::{DecodeSurface, FullscreenContainer};
use crate::storage::ResourceCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Entry point for hosts: title in, playback session out
pub struct MediaPipeline {
    backend: BackendClient,
    cache: Arc<ResourceCache>,
    catalog: CatalogClient,
    acquisition: AcquisitionManager,
    selector: DeliveryStrategySelector,
    playback_config: PlaybackConfig,
    session: Mutex<Option<PlaybackDriver>>,
    /// Generation of the newest `play_title` call
    play_generation: AtomicU64,
}

impl std::fmt::Debug for MediaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPipeline")
            .field("base_url", &self.backend.base_url().as_str())
            .field("cached_entries", &self.cache.len())
            .field("acquisition", &self.acquisition)
            .finish_non_exhaustive()
    }
}

impl MediaPipeline {
    /// Pipeline with its own empty cache
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_cache(config, Arc::new(ResourceCache::new()))
    }

    /// Pipeline sharing an existing cache
    pub fn with_cache(config: ClientConfig, cache: Arc<ResourceCache>) -> Result<Self> {
        let backend = BackendClient::with_config(config)?;
        let resolver: Arc<dyn ResolveBackend> = Arc::new(ResolverClient::new(backend.clone()));
        let acquisition = AcquisitionManager::new(resolver, backend.config())?;
        let selector = DeliveryStrategySelector::new(
            fetch_client(&backend.config().user_agent)?,
            ByteStore::new(),
        );

        Ok(Self {
            catalog: CatalogClient::new(backend.clone(), Arc::clone(&cache)),
            backend,
            cache,
            acquisition,
            selector,
            playback_config: PlaybackConfig::default(),
            session: Mutex::new(None),
            play_generation: AtomicU64::new(0),
        })
    }

    pub fn with_playback_config(mut self, config: PlaybackConfig) -> Self {
        self.playback_config = config;
        self
    }

    // ===== Accessors =====

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    pub fn acquisition(&self) -> &AcquisitionManager {
        &self.acquisition
    }

    pub fn byte_store(&self) -> &ByteStore {
        self.selector.store()
    }

    pub fn playback_config(&self) -> &PlaybackConfig {
        &self.playback_config
    }

    // ===== Acquisition =====

    /// Resolve a title to a playable URL; see [`AcquisitionManager`]
    pub async fn resolve_and_track_title(
        &self,
        key: &CatalogKey,
        on_progress: ProgressCallback,
    ) -> Result<String> {
        self.acquisition.resolve_and_track_title(key, on_progress).await
    }

    pub async fn prepare_playback_source(&self, url: &str) -> Result<PreparedSource> {
        self.selector.prepare(url).await
    }

    pub async fn prepare_playback_source_with_progress(
        &self,
        url: &str,
        on_progress: ProgressCallback,
    ) -> Result<PreparedSource> {
        self.selector.prepare_with_progress(url, on_progress).await
    }

    /// Content ratings for the overlay; a failed lookup means no overlay
    pub async fn ratings_for(&self, key: &CatalogKey) -> Vec<ContentRating> {
        match self.catalog.ratings_for(key).await {
            Ok(ratings) => ratings,
            Err(e) => {
                tracing::warn!(title = %key, error = %e, "Ratings unavailable");
                Vec::new()
            }
        }
    }

    // ===== Sessions =====

    /// Close the current session, then start a new one on `source`
    pub async fn open_session(
        &self,
        source: PreparedSource,
        surface: Box<dyn DecodeSurface>,
        container: Box<dyn FullscreenContainer>,
        ratings: Vec<ContentRating>,
        on_closed: Option<ClosedCallback>,
    ) -> Result<PlaybackDriver> {
        let mut session = self.session.lock().await;
        self.replace_session(&mut session, source, surface, container, ratings, on_closed)
            .await
    }

    async fn replace_session(
        &self,
        session: &mut Option<PlaybackDriver>,
        source: PreparedSource,
        surface: Box<dyn DecodeSurface>,
        container: Box<dyn FullscreenContainer>,
        ratings: Vec<ContentRating>,
        on_closed: Option<ClosedCallback>,
    ) -> Result<PlaybackDriver> {
        if let Some(previous) = session.take() {
            tracing::debug!("Closing previous playback session");
            previous.close().await?;
        }

        let engine = PlaybackEngine::open(
            self.playback_config.clone(),
            surface,
            container,
            source,
            ratings,
            on_closed,
        );
        let driver = PlaybackDriver::spawn(engine);
        *session = Some(driver.clone());
        Ok(driver)
    }

    /// Abort any in-flight buffered fetch and close the current session
    pub async fn close_session(&self) -> Result<()> {
        self.selector.cancel_in_flight();
        let previous = self.session.lock().await.take();
        match previous {
            Some(driver) => driver.close().await,
            None => Ok(()),
        }
    }

    pub async fn current_session(&self) -> Option<PlaybackDriver> {
        self.session
            .lock()
            .await
            .as_ref()
            .filter(|driver| !driver.is_closed())
            .cloned()
    }

    /// Resolve, prepare and open a session for a title in one go
    ///
    /// The current session stays open until the new source is ready. A newer
    /// `play_title` call supersedes this one: its buffered fetch is cancelled and
    /// it returns `Aborted` without touching the current session.
    pub async fn play_title(
        &self,
        key: &CatalogKey,
        on_progress: Option<ProgressCallback>,
        surface: Box<dyn DecodeSurface>,
        container: Box<dyn FullscreenContainer>,
        on_closed: Option<ClosedCallback>,
    ) -> Result<PlaybackDriver> {
        let generation = self.play_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.selector.cancel_in_flight();
        let on_progress = on_progress.unwrap_or_else(noop_progress);

        let url = self
            .resolve_and_track_title(key, Arc::clone(&on_progress))
            .await?;
        self.ensure_latest_play(generation)?;

        let ratings = self.ratings_for(key).await;
        self.ensure_latest_play(generation)?;

        let mut source = self
            .prepare_playback_source_with_progress(&url, on_progress)
            .await?;

        // Checked again under the session lock so a newer call cannot slip in
        let mut session = self.session.lock().await;
        if let Err(e) = self.ensure_latest_play(generation) {
            source.release();
            return Err(e);
        }
        self.replace_session(&mut session, source, surface, container, ratings, on_closed)
            .await
    }

    fn ensure_latest_play(&self, generation: u64) -> Result<()> {
        if self.play_generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            tracing::debug!(generation, "Superseded play request");
            Err(PipelineError::Aborted)
        }
    }
}
