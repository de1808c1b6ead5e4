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


//! HTTP client for the media backend
//!
//! This module provides the thin HTTP layer every backend call goes through:
//! - Base URL management and endpoint path configuration
//! - Default headers (User-Agent, Accept)
//! - Timeout and connection pooling configuration
//! - Mapping of transport failures, non-success statuses and bad payloads onto
//!   `PipelineError::Network` / `PipelineError::Protocol`
//!
//! There is deliberately no retry loop here. Resolution failures go back to the
//! caller, and the progress poller already retries on its own cadence.
//!
//! # Backend Endpoints (defaults)
//! ```text
//! GET /api/stream?title=…&season=…&episode=…   → { "url" } | { "progress_url" }
//! GET {progress_url}                            → { "progress": { … } }
//! GET /api/movies | /api/series | /api/genres
//! GET /api/metadata/{title}[/seasons/{season}]
//! GET /api/cards/{title} | /api/genres/{genre}
//! ```

use crate::error::{PipelineError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Default backend location for local development
const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Progress status requests are issued every 2 seconds
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Wait after a job reports 100% before resolving the title again
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_secs(5);

/// Pending → poll → re-resolve rounds allowed per attempt
pub const DEFAULT_MAX_RESOLVE_ROUNDS: u32 = 5;

/// Paths of the backend endpoints, relative to the base URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointPaths {
    pub resolve: String,
    pub movies: String,
    pub series: String,
    pub metadata: String,
    pub cards: String,
    pub genres: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            resolve: "/api/stream".to_string(),
            movies: "/api/movies".to_string(),
            series: "/api/series".to_string(),
            metadata: "/api/metadata".to_string(),
            cards: "/api/cards".to_string(),
            genres: "/api/genres".to_string(),
        }
    }
}

/// Configuration for BackendClient and the resolution pipeline
/// Provides a builder pattern for client customization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "serde_millis")]
    pub timeout: Duration,
    pub user_agent: String,
    pub enable_cookies: bool,
    pub paths: EndpointPaths,
    /// Cadence of progress status requests
    #[serde(with = "serde_millis")]
    pub poll_interval: Duration,
    /// Delay between a 100% progress report and the re-resolution request
    #[serde(with = "serde_millis")]
    pub grace_delay: Duration,
    /// Upper bound on Pending rounds before an attempt gives up
    pub max_resolve_rounds: u32,
    /// Optional hard limit on a single polling loop
    #[serde(with = "serde_opt_millis")]
    pub max_poll_duration: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: format!("media-core/{}", env!("CARGO_PKG_VERSION")),
            enable_cookies: true,
            paths: EndpointPaths::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_delay: DEFAULT_GRACE_DELAY,
            max_resolve_rounds: DEFAULT_MAX_RESOLVE_ROUNDS,
            max_poll_duration: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Check the settings the pipeline cannot run with
    ///
    /// # Errors
    /// Returns `InvalidInput` for a zero poll interval or a zero max poll duration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(PipelineError::invalid_input("poll_interval must be greater than zero"));
        }
        if self.max_poll_duration.map_or(false, |limit| limit.is_zero()) {
            return Err(PipelineError::invalid_input("max_poll_duration must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn enable_cookies(mut self, enable: bool) -> Self {
        self.config.enable_cookies = enable;
        self
    }

    pub fn paths(mut self, paths: EndpointPaths) -> Self {
        self.config.paths = paths;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn grace_delay(mut self, delay: Duration) -> Self {
        self.config.grace_delay = delay;
        self
    }

    pub fn max_resolve_rounds(mut self, rounds: u32) -> Self {
        self.config.max_resolve_rounds = rounds;
        self
    }

    pub fn max_poll_duration(mut self, limit: Option<Duration>) -> Self {
        self.config.max_poll_duration = limit;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// HTTP client shared by the resolver, the poller, the catalog and buffered fetches
///
/// Cloning is cheap; `reqwest::Client` is reference counted internally.
#[derive(Debug, Clone)]
pub struct BackendClient {
    /// Underlying HTTP client
    client: Client,
    /// Base URL, always ending in `/` so relative joins keep any path prefix
    base_url: Url,
    /// Client configuration
    config: ClientConfig,
}

impl BackendClient {
    /// Create a new BackendClient with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new BackendClient with custom configuration
    ///
    /// # Errors
    /// Returns error if the base URL does not parse, the user agent is not a valid
    /// header value, the polling settings are unusable, or the HTTP client cannot be built
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut base = config.base_url.trim().to_string();
        if base.is_empty() {
            return Err(PipelineError::invalid_input("base_url must not be empty"));
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| PipelineError::InvalidInput(format!("Invalid user agent: {}", e)))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut client_builder = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if config.enable_cookies {
            client_builder = client_builder.cookie_store(true);
        }

        let client = client_builder.build()?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Create a builder for custom client configuration
    pub fn builder() -> ClientConfigBuilder {
        ClientConfig::builder()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build the URL of a configured endpoint path plus extra path segments
    ///
    /// Segments are percent-encoded, so titles with spaces or slashes stay intact.
    pub fn endpoint_url(&self, path: &str, segments: &[&str]) -> Result<Url> {
        let mut relative = path.trim_start_matches('/').to_string();
        for segment in segments {
            if !relative.is_empty() && !relative.ends_with('/') {
                relative.push('/');
            }
            relative.push_str(&urlencoding::encode(segment));
        }
        Ok(self.base_url.join(&relative)?)
    }

    /// Turn a handle returned by the backend into an absolute URL
    ///
    /// Absolute handles are used as-is; relative ones are resolved against the
    /// base URL like a browser would resolve a link.
    pub fn absolute_url(&self, handle: &str) -> Result<Url> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(PipelineError::invalid_input("empty URL handle"));
        }
        match Url::parse(handle) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.base_url.join(handle)?),
            Err(e) => Err(e.into()),
        }
    }

    /// Perform a GET request and deserialize the JSON body
    ///
    /// # Errors
    /// - `Network` when the request fails or the status is not a success
    /// - `Protocol` when the body is not the expected JSON
    pub async fn get_json<T>(&self, url: Url, query: &[(&str, &str)]) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        tracing::debug!(url = %url, "GET");

        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| {
                PipelineError::network(
                    format!("Request failed: {}", e),
                    None,
                    Some(url.path().to_string()),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return self.handle_error_response(response).await;
        }

        self.handle_success_response(response).await
    }

    /// Handle successful HTTP response
    async fn handle_success_response<T>(&self, response: Response) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        let url = response.url().clone();

        // Read the text first so a parse error can carry context
        let response_text = response.text().await.map_err(|e| {
            PipelineError::network(
                format!("Failed to read response body: {}", e),
                Some(status.as_u16()),
                Some(url.path().to_string()),
            )
        })?;

        serde_json::from_str::<T>(&response_text).map_err(|e| {
            let snippet: String = response_text.chars().take(400).collect();
            PipelineError::protocol(
                format!("Unexpected response from {}: {}", url.path(), e),
                Some(snippet),
            )
        })
    }

    /// Handle error HTTP response
    async fn handle_error_response<T>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let url = response.url().clone();
        let error_body = response.text().await.unwrap_or_default();

        Err(PipelineError::network(
            format!("Backend answered {}: {}", status, error_body.trim()),
            Some(status.as_u16()),
            Some(url.path().to_string()),
        ))
    }
}

/// `Duration` as integer milliseconds, so hosts can pass configuration as JSON
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod serde_opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

// ===== TESTS =====
