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


//! "Resolve playable link" requests
//!
//! A resolve call answers with either a playable URL or a handle to a
//! preparation job that is still running on the backend:
//!
//! ```text
//! START --resolve()--> READY    { "url": "https://cdn/x.mp4" }
//! START --resolve()--> PENDING  { "progress_url": "/p/1" }
//! PENDING --poller reports completion--> START (re-resolve after grace delay)
//! ```
//!
//! Resolution results are never cached: a ready URL may expire, and a finished
//! job may need a fresh resolution.

use crate::api::catalog::CatalogKey;
use crate::api::client::BackendClient;
use crate::download::progress::ProgressJob;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one resolve call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionResult {
    /// Media can be fetched right away
    Ready { url: String },
    /// Backend is still preparing the media; poll the handle
    Pending { progress_handle: String },
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    progress_url: Option<String>,
}

impl ResolutionResult {
    /// Interpret a resolve response body
    ///
    /// A non-empty `url` wins over `progress_url` when both are present.
    ///
    /// # Errors
    /// Returns `Protocol` when neither field carries a value
    pub fn from_response(body: &Value) -> Result<Self> {
        let parsed: ResolveBody = serde_json::from_value(body.clone()).map_err(|e| {
            PipelineError::protocol(
                format!("Malformed resolve response: {}", e),
                Some(body.to_string()),
            )
        })?;

        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(parsed.url) {
            return Ok(Self::Ready { url });
        }
        if let Some(progress_handle) = non_empty(parsed.progress_url) {
            return Ok(Self::Pending { progress_handle });
        }

        Err(PipelineError::protocol(
            "Resolve response contains neither `url` nor `progress_url`",
            Some(body.to_string()),
        ))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Backend operations the resolution pipeline depends on
///
/// `ResolverClient` is the HTTP implementation; tests plug in scripted ones.
#[async_trait]
pub trait ResolveBackend: Send + Sync {
    /// Ask the backend for a playable link
    async fn resolve(&self, key: &CatalogKey) -> Result<ResolutionResult>;

    /// Read one progress snapshot of a preparation job
    async fn poll(&self, progress_handle: &str) -> Result<ProgressJob>;
}

/// HTTP resolver against the media backend
#[derive(Debug, Clone)]
pub struct ResolverClient {
    backend: BackendClient,
}

impl ResolverClient {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }
}

#[async_trait]
impl ResolveBackend for ResolverClient {
    async fn resolve(&self, key: &CatalogKey) -> Result<ResolutionResult> {
        let url = self
            .backend
            .endpoint_url(&self.backend.config().paths.resolve, &[])?;
        let query = key.resolve_query();

        let body: Value = self.backend.get_json(url, &query).await?;
        let result = ResolutionResult::from_response(&body)?;

        // Relative URLs and handles are made absolute here, once
        let result = match result {
            ResolutionResult::Ready { url } => ResolutionResult::Ready {
                url: self.backend.absolute_url(&url)?.to_string(),
            },
            ResolutionResult::Pending { progress_handle } => ResolutionResult::Pending {
                progress_handle: self.backend.absolute_url(&progress_handle)?.to_string(),
            },
        };

        tracing::info!(title = %key, ready = result.is_ready(), "Resolved title");
        Ok(result)
    }

    async fn poll(&self, progress_handle: &str) -> Result<ProgressJob> {
        let url = self.backend.absolute_url(progress_handle)?;
        let body: Value = self.backend.get_json(url, &[]).await?;
        ProgressJob::from_response(progress_handle, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_response() {
        let result = ResolutionResult::from_response(&json!({ "url": "https://cdn/x.mp4" })).unwrap();
        assert_eq!(
            result,
            ResolutionResult::Ready {
                url: "https://cdn/x.mp4".to_string()
            }
        );
    }

    #[test]
    fn test_pending_response() {
        let result = ResolutionResult::from_response(&json!({ "progress_url": "/p/1" })).unwrap();
        assert_eq!(
            result,
            ResolutionResult::Pending {
                progress_handle: "/p/1".to_string()
            }
        );
        assert!(!result.is_ready());
    }

    #[test]
    fn test_url_wins_over_progress_url() {
        let body = json!({ "url": "https://cdn/x.mp4", "progress_url": "/p/1" });
        assert!(ResolutionResult::from_response(&body).unwrap().is_ready());
    }

    #[test]
    fn test_empty_fields_are_protocol_errors() {
        for body in [json!({}), json!({ "url": "" , "progress_url": "  " }), json!({ "other": 1 })] {
            let err = ResolutionResult::from_response(&body).unwrap_err();
            assert!(matches!(err, PipelineError::Protocol { .. }), "body: {}", body);
        }
    }

    #[test]
    fn test_non_object_body_is_protocol_error() {
        let err = ResolutionResult::from_response(&json!("https://cdn/x.mp4")).unwrap_err();
        assert!(err.is_protocol_error());
    }
}
