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


//! Media backend client
//!
//! This module covers the client side of the backend contract: the HTTP layer,
//! title resolution, and the cached catalog endpoints.
//!
//! - `client` - reqwest wrapper, configuration, error mapping
//! - `resolver` - resolve a title into a URL or a preparation job handle
//! - `catalog` - catalog keys and memoized catalog/metadata reads

pub mod catalog;
pub mod client;
pub mod resolver;

// Re-export commonly used types
pub use catalog::{CatalogClient, CatalogKey, ContentRating, TitleMetadata};
pub use client::{BackendClient, ClientConfig, EndpointPaths};
pub use resolver::{ResolutionResult, ResolveBackend, ResolverClient};
