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


//! Catalog keys and the cached catalog/metadata client
//!
//! Catalog endpoints are read-only and idempotent, so every successful response
//! is memoized in the shared [`ResourceCache`] by (endpoint, key). A response is
//! only stored after it parsed into the requested type; failures are never
//! cached.

use crate::api::client::BackendClient;
use crate::error::{PipelineError, Result};
use crate::storage::{CacheKey, CatalogEndpoint, ResourceCache};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Identifies a title
///
/// Episodic content is the composite of series title, season label and
/// episode label. Labels are free text as shown by the catalog ("Season 1").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogKey {
    Movie {
        title: String,
    },
    Episode {
        series: String,
        season: String,
        episode: String,
    },
}

impl CatalogKey {
    /// Key for a movie
    ///
    /// # Errors
    /// Returns `InvalidInput` if the title is blank
    pub fn movie<S: Into<String>>(title: S) -> Result<Self> {
        let title = Self::non_blank("title", title.into())?;
        Ok(Self::Movie { title })
    }

    /// Key for one episode of a series
    pub fn episode<A, B, C>(series: A, season: B, episode: C) -> Result<Self>
    where
        A: Into<String>,
        B: Into<String>,
        C: Into<String>,
    {
        Ok(Self::Episode {
            series: Self::non_blank("series", series.into())?,
            season: Self::non_blank("season", season.into())?,
            episode: Self::non_blank("episode", episode.into())?,
        })
    }

    /// Title of the movie, or of the series for episodes
    pub fn title(&self) -> &str {
        match self {
            Self::Movie { title } => title,
            Self::Episode { series, .. } => series,
        }
    }

    pub fn is_episode(&self) -> bool {
        matches!(self, Self::Episode { .. })
    }

    /// Query parameters for the resolve endpoint
    pub fn resolve_query(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Movie { title } => vec![("title", title.as_str())],
            Self::Episode {
                series,
                season,
                episode,
            } => vec![
                ("title", series.as_str()),
                ("season", season.as_str()),
                ("episode", episode.as_str()),
            ],
        }
    }

    fn non_blank(field: &str, value: String) -> Result<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::invalid_input(format!("{} must not be empty", field)));
        }
        Ok(trimmed.to_string())
    }
}

impl fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movie { title } => write!(f, "{}", title),
            Self::Episode {
                series,
                season,
                episode,
            } => write!(f, "{} / {} / {}", series, season, episode),
        }
    }
}

/// One content rating entry (e.g. region "US", rating "PG-13")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRating {
    #[serde(default, alias = "iso_3166_1", alias = "country")]
    pub region: Option<String>,
    #[serde(alias = "certification")]
    pub rating: String,
    #[serde(default)]
    pub descriptors: Vec<String>,
}

/// Metadata for a title; fields the pipeline does not use are kept in `extra`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleMetadata {
    #[serde(default, alias = "name")]
    pub title: Option<String>,
    #[serde(default, alias = "description")]
    pub overview: Option<String>,
    #[serde(default, alias = "contentRatings", alias = "content_ratings")]
    pub ratings: Vec<ContentRating>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TitleMetadata {
    /// Rating shown in the transient overlay: the first entry with a non-empty value
    pub fn primary_rating(&self) -> Option<&ContentRating> {
        primary_rating(&self.ratings)
    }
}

/// First rating with a non-empty value
pub fn primary_rating(ratings: &[ContentRating]) -> Option<&ContentRating> {
    ratings.iter().find(|r| !r.rating.trim().is_empty())
}

/// Cached client for the read-only catalog endpoints
#[derive(Debug, Clone)]
pub struct CatalogClient {
    backend: BackendClient,
    cache: Arc<ResourceCache>,
}

impl CatalogClient {
    pub fn new(backend: BackendClient, cache: Arc<ResourceCache>) -> Self {
        Self { backend, cache }
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// All movies in the store
    pub async fn movies(&self) -> Result<Value> {
        let url = self.backend.endpoint_url(&self.backend.config().paths.movies, &[])?;
        self.fetch_cached(CacheKey::all(CatalogEndpoint::Movies), url).await
    }

    /// All series in the store
    pub async fn series(&self) -> Result<Value> {
        let url = self.backend.endpoint_url(&self.backend.config().paths.series, &[])?;
        self.fetch_cached(CacheKey::all(CatalogEndpoint::Series), url).await
    }

    /// Metadata for a movie or series
    pub async fn metadata(&self, title: &str) -> Result<TitleMetadata> {
        let url = self
            .backend
            .endpoint_url(&self.backend.config().paths.metadata, &[title])?;
        self.fetch_cached(CacheKey::title(CatalogEndpoint::Metadata, title), url)
            .await
    }

    /// Metadata for one season of a series
    pub async fn season_metadata(&self, title: &str, season: &str) -> Result<Value> {
        let url = self.backend.endpoint_url(
            &self.backend.config().paths.metadata,
            &[title, "seasons", season],
        )?;
        self.fetch_cached(CacheKey::season(title, season), url).await
    }

    /// Display card for a title
    pub async fn card(&self, title: &str) -> Result<Value> {
        let url = self
            .backend
            .endpoint_url(&self.backend.config().paths.cards, &[title])?;
        self.fetch_cached(CacheKey::title(CatalogEndpoint::Card, title), url)
            .await
    }

    /// Genre category list
    pub async fn genre_categories(&self) -> Result<Value> {
        let url = self.backend.endpoint_url(&self.backend.config().paths.genres, &[])?;
        self.fetch_cached(CacheKey::all(CatalogEndpoint::GenreCategories), url)
            .await
    }

    /// Titles in one genre
    pub async fn genre_items(&self, genre: &str) -> Result<Value> {
        let url = self
            .backend
            .endpoint_url(&self.backend.config().paths.genres, &[genre])?;
        self.fetch_cached(CacheKey::title(CatalogEndpoint::GenreItems, genre), url)
            .await
    }

    /// Content ratings for the overlay; episodes use the series' ratings
    pub async fn ratings_for(&self, key: &CatalogKey) -> Result<Vec<ContentRating>> {
        Ok(self.metadata(key.title()).await?.ratings)
    }

    /// Serve from cache, or fetch, validate and then cache
    async fn fetch_cached<T>(&self, key: CacheKey, url: Url) -> Result<T>
    where
        T: DeserializeOwned,
    {
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(key = %key, "Catalog cache hit");
            return serde_json::from_value(hit).map_err(|e| {
                PipelineError::internal(format!("Cached payload for {} no longer parses: {}", key, e))
            });
        }

        let payload: Value = self.backend.get_json(url, &[]).await?;
        let typed = serde_json::from_value::<T>(payload.clone()).map_err(|e| {
            PipelineError::protocol(format!("Unexpected {} payload: {}", key, e), None)
        })?;
        self.cache.put(key, payload);
        Ok(typed)
    }
}
