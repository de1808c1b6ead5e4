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


//! Delivery strategy selection and prepared decoder sources
//!
//! # Strategies
//! - **Adaptive stream**: URL path ends in `.m3u8` or `.ts` (query and fragment
//!   ignored, case-insensitive). The decoder gets the manifest URL through an
//!   adaptive-stream session; nothing is fetched up front.
//! - **Buffered file**: anything else. The whole resource is fetched into memory
//!   and exposed through a revocable local URI (`blob:media-core/<uuid>`).
//! - **Direct** (degraded): the buffered fetch failed for a reason other than
//!   cancellation, so the decoder gets the raw URL.
//!
//! Byte handles are revoked when released and when dropped; [`ByteStore::active_handles`]
//! reports how many are still live.

use crate::download::progress::{noop_progress, ProgressCallback};
use crate::download::stream::BufferedFetch;
use crate::error::{PipelineError, Result};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// URI scheme prefix for in-memory byte handles
pub const BYTE_HANDLE_PREFIX: &str = "blob:media-core/";

lazy_static::lazy_static! {
    static ref ADAPTIVE_SUFFIX: Regex =
        Regex::new(r"(?i)\.(m3u8|ts)$").expect("adaptive suffix pattern is valid");
}

/// How a resolved URL is delivered to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    /// Segmented stream driven by a manifest
    AdaptiveStream,
    /// Whole file fetched into memory first
    BufferedFile,
}

/// Pick the delivery strategy for a URL
pub fn classify_url(url: &str) -> DeliveryKind {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        // Relative or malformed: cut query and fragment by hand
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    if ADAPTIVE_SUFFIX.is_match(&path) {
        DeliveryKind::AdaptiveStream
    } else {
        DeliveryKind::BufferedFile
    }
}

// ============================================================================
// BYTE STORE
// ============================================================================

/// Registry of in-memory media buffers addressable by local URI
#[derive(Debug, Clone, Default)]
pub struct ByteStore {
    entries: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl ByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer and return the owning handle
    pub fn register(&self, bytes: Vec<u8>) -> LocalByteHandle {
        let uri = format!("{}{}", BYTE_HANDLE_PREFIX, Uuid::new_v4());
        let len = bytes.len();
        self.entries.write().insert(uri.clone(), Arc::new(bytes));
        tracing::debug!(uri = %uri, bytes = len, "Registered byte handle");

        LocalByteHandle {
            uri,
            len,
            store: self.clone(),
            released: false,
        }
    }

    /// Bytes behind a live handle
    pub fn lookup(&self, uri: &str) -> Option<Arc<Vec<u8>>> {
        self.entries.read().get(uri).cloned()
    }

    /// Number of handles not yet revoked
    pub fn active_handles(&self) -> usize {
        self.entries.read().len()
    }

    fn revoke(&self, uri: &str) -> bool {
        self.entries.write().remove(uri).is_some()
    }
}

/// Revocable local URI for a fetched media buffer
#[derive(Debug)]
pub struct LocalByteHandle {
    uri: String,
    len: usize,
    store: ByteStore,
    released: bool,
}

impl LocalByteHandle {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Revoke the URI; later calls do nothing
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.store.revoke(&self.uri) {
            tracing::debug!(uri = %self.uri, "Revoked byte handle");
        }
    }
}

impl Drop for LocalByteHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// ADAPTIVE STREAM SESSION
// ============================================================================

/// Attachment of a segmented stream to the decoder
#[derive(Debug)]
pub struct AdaptiveStreamSession {
    id: Uuid,
    manifest_url: String,
    attached: bool,
}

impl AdaptiveStreamSession {
    pub fn open<S: Into<String>>(manifest_url: S) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            manifest_url: manifest_url.into(),
            attached: true,
        };
        tracing::debug!(session = %session.id, url = %session.manifest_url, "Opened adaptive stream session");
        session
    }

    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Detach from the decoder; later calls do nothing
    pub fn detach(&mut self) {
        if self.attached {
            self.attached = false;
            tracing::debug!(session = %self.id, "Detached adaptive stream session");
        }
    }
}

impl Drop for AdaptiveStreamSession {
    fn drop(&mut self) {
        self.detach();
    }
}

// ============================================================================
// PREPARED SOURCE
// ============================================================================

/// Decoder input prepared for one resolved URL
#[derive(Debug)]
pub enum PreparedSource {
    Adaptive(AdaptiveStreamSession),
    Buffered {
        handle: LocalByteHandle,
        origin_url: String,
    },
    /// Buffered fetch failed; play the URL as is
    Direct { url: String, reason: String },
}

/// Serializable description of what the decoder should load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Adaptive { url: String },
    Buffered { uri: String, origin_url: String, bytes: usize },
    Direct { url: String },
}

impl SourceDescriptor {
    /// URL or local URI the decoder loads
    pub fn locator(&self) -> &str {
        match self {
            Self::Adaptive { url } | Self::Direct { url } => url,
            Self::Buffered { uri, .. } => uri,
        }
    }
}

impl PreparedSource {
    pub fn descriptor(&self) -> SourceDescriptor {
        match self {
            Self::Adaptive(session) => SourceDescriptor::Adaptive {
                url: session.manifest_url().to_string(),
            },
            Self::Buffered { handle, origin_url } => SourceDescriptor::Buffered {
                uri: handle.uri().to_string(),
                origin_url: origin_url.clone(),
                bytes: handle.len(),
            },
            Self::Direct { url, .. } => SourceDescriptor::Direct { url: url.clone() },
        }
    }

    pub fn kind(&self) -> DeliveryKind {
        match self {
            Self::Adaptive(_) => DeliveryKind::AdaptiveStream,
            Self::Buffered { .. } | Self::Direct { .. } => DeliveryKind::BufferedFile,
        }
    }

    /// Direct playback after a failed fetch
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }

    /// Revoke the byte handle or detach the stream session
    pub fn release(&mut self) {
        match self {
            Self::Adaptive(session) => session.detach(),
            Self::Buffered { handle, .. } => handle.release(),
            Self::Direct { .. } => {}
        }
    }
}

// ============================================================================
// SELECTOR
// ============================================================================

/// In-flight buffered fetch, tagged so a finished fetch only clears itself
#[derive(Debug)]
struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

/// Turns a resolved URL into a [`PreparedSource`]
#[derive(Debug)]
pub struct DeliveryStrategySelector {
    client: Client,
    store: ByteStore,
    in_flight: Mutex<Option<InFlight>>,
    generation: AtomicU64,
}

impl DeliveryStrategySelector {
    pub fn new(client: Client, store: ByteStore) -> Self {
        Self {
            client,
            store,
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &ByteStore {
        &self.store
    }

    /// Abort the buffered fetch started by the last `prepare`, if still running
    pub fn cancel_in_flight(&self) {
        if let Some(previous) = self.in_flight.lock().take() {
            tracing::debug!(generation = previous.generation, "Cancelling buffered fetch");
            previous.cancel.cancel();
        }
    }

    pub async fn prepare(&self, url: &str) -> Result<PreparedSource> {
        self.prepare_with_progress(url, noop_progress()).await
    }

    /// Prepare the decoder source for `url`
    ///
    /// # Errors
    /// Returns `Aborted` if a later `prepare` or `cancel_in_flight` cancelled the
    /// fetch. Other fetch failures degrade to `PreparedSource::Direct`.
    pub async fn prepare_with_progress(
        &self,
        url: &str,
        on_progress: ProgressCallback,
    ) -> Result<PreparedSource> {
        if url.trim().is_empty() {
            return Err(PipelineError::invalid_input("Cannot prepare an empty URL"));
        }

        self.cancel_in_flight();

        if classify_url(url) == DeliveryKind::AdaptiveStream {
            tracing::info!(url = %url, "Using adaptive stream");
            return Ok(PreparedSource::Adaptive(AdaptiveStreamSession::open(url)));
        }

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(Self::direct(url, &PipelineError::from(e))),
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *self.in_flight.lock() = Some(InFlight {
            generation,
            cancel: cancel.clone(),
        });

        let result = BufferedFetch::new(self.client.clone(), parsed, cancel.clone())
            .with_progress(on_progress)
            .run()
            .await;

        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.as_ref().map(|f| f.generation) == Some(generation) {
                *in_flight = None;
            }
        }

        match result {
            // Cancelled after the body completed: still superseded
            Ok(_) if cancel.is_cancelled() => Err(PipelineError::Aborted),
            Ok(bytes) => {
                let handle = self.store.register(bytes);
                tracing::info!(url = %url, uri = %handle.uri(), bytes = handle.len(), "Buffered source ready");
                Ok(PreparedSource::Buffered {
                    handle,
                    origin_url: url.to_string(),
                })
            }
            Err(e) if e.is_aborted() => Err(e),
            Err(e) => Ok(Self::direct(url, &e)),
        }
    }

    fn direct(url: &str, error: &PipelineError) -> PreparedSource {
        tracing::warn!(url = %url, error = %error, "Buffered fetch failed; falling back to direct playback");
        PreparedSource::Direct {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_path_suffix() {
        assert_eq!(classify_url("https://cdn/live/master.m3u8"), DeliveryKind::AdaptiveStream);
        assert_eq!(classify_url("https://cdn/seg/0001.TS"), DeliveryKind::AdaptiveStream);
        assert_eq!(classify_url("https://cdn/x.ts?token=abc#t=10"), DeliveryKind::AdaptiveStream);
        assert_eq!(classify_url("https://cdn/x.mp4"), DeliveryKind::BufferedFile);
        assert_eq!(classify_url("https://cdn/x.mp4?format=.m3u8"), DeliveryKind::BufferedFile);
        assert_eq!(classify_url("https://cdn/stats"), DeliveryKind::BufferedFile);
        assert_eq!(classify_url("/media/show.m3u8?x=1"), DeliveryKind::AdaptiveStream);
    }

    #[test]
    fn test_byte_handle_release_and_drop() {
        let store = ByteStore::new();
        let mut first = store.register(vec![1, 2, 3]);
        let second = store.register(vec![4]);
        assert_eq!(store.active_handles(), 2);
        assert!(first.uri().starts_with(BYTE_HANDLE_PREFIX));
        assert_eq!(store.lookup(first.uri()).unwrap().as_slice(), &[1, 2, 3]);

        first.release();
        first.release();
        assert!(first.is_released());
        assert_eq!(store.active_handles(), 1);
        assert!(store.lookup(first.uri()).is_none());

        drop(second);
        assert_eq!(store.active_handles(), 0);
    }

    #[test]
    fn test_prepared_source_descriptor() {
        let store = ByteStore::new();
        let mut source = PreparedSource::Buffered {
            handle: store.register(vec![0; 16]),
            origin_url: "https://cdn/x.mp4".to_string(),
        };
        match source.descriptor() {
            SourceDescriptor::Buffered { uri, origin_url, bytes } => {
                assert!(uri.starts_with(BYTE_HANDLE_PREFIX));
                assert_eq!(origin_url, "https://cdn/x.mp4");
                assert_eq!(bytes, 16);
            }
            other => panic!("unexpected descriptor {:?}", other),
        }
        assert_eq!(source.kind(), DeliveryKind::BufferedFile);
        source.release();
        assert_eq!(store.active_handles(), 0);

        let mut adaptive = PreparedSource::Adaptive(AdaptiveStreamSession::open("https://cdn/a.m3u8"));
        assert_eq!(adaptive.descriptor().locator(), "https://cdn/a.m3u8");
        adaptive.release();
        assert!(matches!(&adaptive, PreparedSource::Adaptive(s) if !s.is_attached()));
    }

    #[test]
    fn test_descriptor_json_shape() {
        let descriptor = SourceDescriptor::Direct {
            url: "https://cdn/x.mp4".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&descriptor).unwrap(),
            serde_json::json!({ "kind": "direct", "url": "https://cdn/x.mp4" })
        );
    }

    #[tokio::test]
    async fn test_adaptive_url_skips_fetch() {
        let selector = DeliveryStrategySelector::new(Client::new(), ByteStore::new());
        let source = selector.prepare("https://cdn/show/master.m3u8").await.unwrap();
        assert!(matches!(source, PreparedSource::Adaptive(_)));
        assert_eq!(selector.store().active_handles(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_url_degrades_to_direct() {
        let selector = DeliveryStrategySelector::new(Client::new(), ByteStore::new());
        let source = selector.prepare("movies/x.mp4").await.unwrap();
        assert!(source.is_degraded());
        assert_eq!(source.descriptor().locator(), "movies/x.mp4");
    }
}
