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


//! In-memory storage
//!
//! Nothing here touches disk. The only shared state in the pipeline is the
//! resource cache, which memoizes catalog and metadata payloads for the lifetime
//! of the process.
//!
//! # Usage Example
//! ```no_run
//! use media_core::storage::{CacheKey, CatalogEndpoint, ResourceCache};
//!
//! let cache = ResourceCache::new();
//! let key = CacheKey::title(CatalogEndpoint::Metadata, "Inception");
//! cache.put(key.clone(), serde_json::json!({ "title": "Inception" }));
//! assert!(cache.get(&key).is_some());
//! ```

pub mod cache;

// Re-export commonly used types
pub use cache::{CacheKey, CatalogEndpoint, ResourceCache};
