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


//! Process-scoped memo of catalog and metadata payloads
//!
//! # Semantics
//! - Entries are created lazily after a successful fetch and never expire.
//! - `clear()` drops every entry at once; there is no partial eviction.
//! - Racing fetches for the same key are not collapsed. Both write the same
//!   payload, so the last writer wins without harm.
//!
//! The cache is an ordinary value handed to its users (usually behind an `Arc`),
//! so tests can build isolated instances.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Catalog endpoint a cached payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogEndpoint {
    /// Every movie in the store
    Movies,
    /// Every series in the store
    Series,
    /// Metadata for one title
    Metadata,
    /// Metadata for one season of a series
    SeasonMetadata,
    /// Display card for one title
    Card,
    /// Genre category list
    GenreCategories,
    /// Titles in one genre
    GenreItems,
}

impl CatalogEndpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movies => "movies",
            Self::Series => "series",
            Self::Metadata => "metadata",
            Self::SeasonMetadata => "season_metadata",
            Self::Card => "card",
            Self::GenreCategories => "genre_categories",
            Self::GenreItems => "genre_items",
        }
    }
}

/// Key of one cache entry
///
/// Coarse keys ("all movies") carry no title. Season metadata is keyed by both
/// the series title and the season label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub endpoint: CatalogEndpoint,
    pub title: Option<String>,
    pub season: Option<String>,
}

impl CacheKey {
    /// Key for an endpoint that returns one collection
    pub fn all(endpoint: CatalogEndpoint) -> Self {
        Self {
            endpoint,
            title: None,
            season: None,
        }
    }

    /// Key for a per-title (or per-genre) endpoint
    pub fn title<S: Into<String>>(endpoint: CatalogEndpoint, title: S) -> Self {
        Self {
            endpoint,
            title: Some(title.into()),
            season: None,
        }
    }

    /// Key for season metadata of a series
    pub fn season<S: Into<String>, T: Into<String>>(title: S, season: T) -> Self {
        Self {
            endpoint: CatalogEndpoint::SeasonMetadata,
            title: Some(title.into()),
            season: Some(season.into()),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint.as_str())?;
        if let Some(ref title) = self.title {
            write!(f, ":{}", title)?;
        }
        if let Some(ref season) = self.season {
            write!(f, ":{}", season)?;
        }
        Ok(())
    }
}

/// Memoized store of fetched payloads
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: RwLock<HashMap<CacheKey, Value>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached payload; `None` is a miss
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Store a payload. Callers only store complete, successfully parsed responses.
    pub fn put(&self, key: CacheKey, value: Value) {
        tracing::debug!(key = %key, "Caching catalog payload");
        self.entries.write().insert(key, value);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        tracing::debug!(entries = entries.len(), "Clearing resource cache");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_is_stable_without_put() {
        let cache = ResourceCache::new();
        let key = CacheKey::title(CatalogEndpoint::Card, "Inception");
        cache.put(key.clone(), json!({ "title": "Inception", "year": 2010 }));

        let first = cache.get(&key);
        let second = cache.get(&key);
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn test_clear_misses_every_key() {
        let cache = ResourceCache::new();
        let keys = vec![
            CacheKey::all(CatalogEndpoint::Movies),
            CacheKey::all(CatalogEndpoint::Series),
            CacheKey::title(CatalogEndpoint::Metadata, "Dark"),
            CacheKey::season("Dark", "Season 1"),
        ];
        for key in &keys {
            cache.put(key.clone(), json!([]));
        }
        assert_eq!(cache.len(), 4);

        cache.clear();

        assert!(cache.is_empty());
        for key in &keys {
            assert!(cache.get(key).is_none(), "expected miss for {}", key);
        }
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = ResourceCache::new();
        let key = CacheKey::all(CatalogEndpoint::GenreCategories);
        cache.put(key.clone(), json!(["Drama"]));
        cache.put(key.clone(), json!(["Drama", "Comedy"]));
        assert_eq!(cache.get(&key), Some(json!(["Drama", "Comedy"])));
    }

    #[test]
    fn test_season_keys_are_distinct() {
        let first = CacheKey::season("Dark", "Season 1");
        let second = CacheKey::season("Dark", "Season 2");
        let metadata = CacheKey::title(CatalogEndpoint::Metadata, "Dark");
        assert_ne!(first, second);
        assert_ne!(first, metadata);
        assert_eq!(first.to_string(), "season_metadata:Dark:Season 1");
    }
}
