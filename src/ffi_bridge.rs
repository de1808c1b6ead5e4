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


//! C FFI bridge - exposes the media pipeline to native hosts
//!
//! The host owns the real decoder and view. It forwards decoder notifications
//! with `media_surface_event` and executes whatever `media_drain_surface_commands`
//! returns.
//!
//! # Design Patterns
//! 1. **JSON Communication**: requests and responses cross the boundary as JSON
//! 2. **Error Handling**: every error becomes a JSON error response
//! 3. **Async Runtime**: a process-wide tokio runtime runs the async pipeline
//! 4. **No Panics**: panics are caught and reported as errors
//! 5. **Memory Safety**: returned strings must be freed with `media_free_string()`
//!
//! # Response Format
//! ```json
//! { "success": true, "data": { ... } }
//! { "success": false, "error": "User-facing message", "detail": "...", "network": false }
//! { "success": false, "aborted": true }
//! ```
//!
//! `aborted` marks a cancelled or superseded call. It is not a failure.
//!
//! # Call Sequence
//! ```text
//! media_init(config) -> media_resolve_title(key) -> media_prepare_source(url)
//!   -> media_open_player(request) -> (media_player_command | media_surface_event
//!   | media_drain_surface_commands)* -> media_close_player()
//! ```
//!
//! Example Swift code:
//! ```swift
//! let resultPtr = media_classify_url(url)
//! defer { media_free_string(resultPtr) }
//! let jsonString = String(cString: resultPtr)
//! ```

use crate::api::catalog::CatalogKey;
use crate::api::client::ClientConfig;
use crate::download::progress::ProgressJob;
use crate::error::PipelineError;
use crate::pipeline::MediaPipeline;
use crate::playback::driver::{PlaybackDriver, PlayerCommand};
use crate::playback::engine::PlaybackConfig;
use crate::playback::source::{classify_url, PreparedSource};
use crate::playback::surface::{CommandQueueSurface, SurfaceEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic;
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref RUNTIME: tokio::runtime::Runtime =
        tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    static ref PIPELINE: Mutex<Option<Arc<MediaPipeline>>> = Mutex::new(None);

    /// Source from the last `media_prepare_source`, waiting for `media_open_player`
    static ref PREPARED: Mutex<Option<PreparedSource>> = Mutex::new(None);

    /// Command queue of the current player
    static ref SURFACE: Mutex<Option<CommandQueueSurface>> = Mutex::new(None);

    static ref LAST_PROGRESS: Mutex<Option<ProgressJob>> = Mutex::new(None);
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Safely convert C string pointer to Rust String
fn c_str_to_string(ptr: *const c_char) -> crate::Result<String> {
    if ptr.is_null() {
        return Err(PipelineError::InvalidInput("Null pointer received".to_string()));
    }
    // SAFETY: non-null and, per the calling convention, NUL-terminated
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| PipelineError::InvalidInput(format!("Invalid UTF-8: {}", e)))
    }
}

/// Parse a JSON argument; null or empty input yields the type's default
fn parse_json_or_default<T>(ptr: *const c_char) -> crate::Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if ptr.is_null() {
        return Ok(T::default());
    }
    let raw = c_str_to_string(ptr)?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).map_err(|e| PipelineError::InvalidInput(format!("Invalid JSON: {}", e)))
}

fn parse_json<T>(ptr: *const c_char) -> crate::Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let raw = c_str_to_string(ptr)?;
    serde_json::from_str(&raw).map_err(|e| PipelineError::InvalidInput(format!("Invalid JSON: {}", e)))
}

/// Convert Rust string to C string pointer
///
/// Caller MUST free the returned pointer using `media_free_string()`
fn string_to_c_str(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => {
            let error_json = error_response("String contains null bytes");
            CString::new(error_json)
                .map(CString::into_raw)
                .unwrap_or(std::ptr::null_mut())
        }
    }
}

/// Create success response JSON
fn success_response<T: Serialize>(data: T) -> String {
    serde_json::json!({
        "success": true,
        "data": data
    })
    .to_string()
}

/// Create error response JSON
fn error_response(error: &str) -> String {
    serde_json::json!({
        "success": false,
        "error": error
    })
    .to_string()
}

/// Map a pipeline error to a response
///
/// A cancelled or superseded operation is reported as `"aborted": true` with no
/// error text, so hosts can drop it instead of showing a failure.
fn pipeline_error_response(e: &PipelineError) -> String {
    if e.is_aborted() {
        return serde_json::json!({
            "success": false,
            "aborted": true
        })
        .to_string();
    }

    serde_json::json!({
        "success": false,
        "error": e.user_message(),
        "detail": e.to_string(),
        "network": e.is_network_error()
    })
    .to_string()
}

/// Wrap a function call with panic catching
fn catch_panic<F>(f: F) -> String
where
    F: FnOnce() -> crate::Result<String> + panic::UnwindSafe,
{
    match panic::catch_unwind(f) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => pipeline_error_response(&e),
        Err(panic_err) => {
            let panic_msg = if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic occurred".to_string()
            };
            error_response(&format!("Rust panic: {}", panic_msg))
        }
    }
}

fn pipeline() -> crate::Result<Arc<MediaPipeline>> {
    PIPELINE
        .lock()
        .clone()
        .ok_or_else(|| PipelineError::InvalidState("media_init has not been called".to_string()))
}

fn current_player() -> crate::Result<PlaybackDriver> {
    let pipeline = pipeline()?;
    RUNTIME
        .block_on(pipeline.current_session())
        .ok_or(PipelineError::SessionClosed)
}

// ============================================================================
// SETUP
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InitRequest {
    client: ClientConfig,
    playback: PlaybackConfig,
}

/// Create the pipeline; calling again replaces it and closes the old player
///
/// # Arguments
/// * `config_json` - `{"client": {...}, "playback": {...}}`, both optional; null for defaults
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_init(config_json: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let request: InitRequest = parse_json_or_default(config_json)?;
        let base_url = request.client.base_url.clone();
        let pipeline = MediaPipeline::new(request.client)?.with_playback_config(request.playback);

        let previous = PIPELINE.lock().replace(Arc::new(pipeline));
        if let Some(previous) = previous {
            RUNTIME.block_on(previous.close_session())?;
        }
        PREPARED.lock().take();
        SURFACE.lock().take();

        Ok(success_response(serde_json::json!({ "base_url": base_url })))
    });

    string_to_c_str(response)
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Resolve a title, waiting through backend preparation
///
/// Blocks until the URL is available. Progress can be read from another thread
/// with `media_last_progress()`.
///
/// # Arguments
/// * `key_json` - `{"kind":"movie","title":"Inception"}` or
///   `{"kind":"episode","series":"Dark","season":"Season 1","episode":"Episode 3"}`
///
/// # Returns
/// ```json
/// { "success": true, "data": { "url": "https://cdn/x.mp4" } }
/// ```
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_resolve_title(key_json: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let key: CatalogKey = parse_json(key_json)?;
        // re-validate: deserialization bypasses the constructors
        let key = match key {
            CatalogKey::Movie { title } => CatalogKey::movie(title)?,
            CatalogKey::Episode {
                series,
                season,
                episode,
            } => CatalogKey::episode(series, season, episode)?,
        };
        let pipeline = pipeline()?;

        LAST_PROGRESS.lock().take();
        let on_progress = Arc::new(|job: ProgressJob| {
            *LAST_PROGRESS.lock() = Some(job);
        });

        let url = RUNTIME.block_on(pipeline.resolve_and_track_title(&key, on_progress))?;
        Ok(success_response(serde_json::json!({ "url": url })))
    });

    string_to_c_str(response)
}

/// Latest preparation progress snapshot, or null
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_last_progress() -> *mut c_char {
    let response = catch_panic(|| {
        let progress = LAST_PROGRESS.lock().clone();
        Ok(success_response(progress))
    });

    string_to_c_str(response)
}

/// Cancel a running `media_resolve_title`
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_cancel_resolve() -> *mut c_char {
    let response = catch_panic(|| {
        pipeline()?.acquisition().cancel_current();
        Ok(success_response(serde_json::json!({ "cancelled": true })))
    });

    string_to_c_str(response)
}

// ============================================================================
// SOURCES
// ============================================================================

/// Delivery strategy for a URL, without any network access
///
/// # Returns
/// ```json
/// { "success": true, "data": { "kind": "adaptive_stream" } }
/// ```
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_classify_url(url: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let url = c_str_to_string(url)?;
        Ok(success_response(serde_json::json!({ "kind": classify_url(&url) })))
    });

    string_to_c_str(response)
}

/// Prepare the decoder source for a resolved URL and hold it for `media_open_player`
///
/// A previously held, unopened source is released.
///
/// # Returns
/// The source descriptor, e.g.
/// ```json
/// { "success": true, "data": { "kind": "buffered", "uri": "blob:media-core/...",
///   "origin_url": "https://cdn/x.mp4", "bytes": 734003200 } }
/// ```
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_prepare_source(url: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let url = c_str_to_string(url)?;
        let pipeline = pipeline()?;

        PREPARED.lock().take();
        let source = RUNTIME.block_on(pipeline.prepare_playback_source(&url))?;
        let descriptor = source.descriptor();
        *PREPARED.lock() = Some(source);

        Ok(success_response(descriptor))
    });

    string_to_c_str(response)
}

// ============================================================================
// PLAYER
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OpenPlayerRequest {
    /// Title being played; used for the rating overlay
    key: Option<CatalogKey>,
}

/// Open a player on the prepared source, closing the current one first
///
/// # Arguments
/// * `request_json` - `{"key": {...}}` or null
///
/// # Returns
/// The initial player snapshot
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_open_player(request_json: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let request: OpenPlayerRequest = parse_json_or_default(request_json)?;
        let pipeline = pipeline()?;
        let source = PREPARED.lock().take().ok_or_else(|| {
            PipelineError::InvalidState("No prepared source; call media_prepare_source first".to_string())
        })?;

        let surface = CommandQueueSurface::new();
        let driver = RUNTIME.block_on(async {
            let ratings = match &request.key {
                Some(key) => pipeline.ratings_for(key).await,
                None => Vec::new(),
            };
            pipeline
                .open_session(
                    source,
                    Box::new(surface.clone()),
                    Box::new(surface.clone()),
                    ratings,
                    None,
                )
                .await
        })?;
        *SURFACE.lock() = Some(surface);

        Ok(success_response(driver.snapshot()))
    });

    string_to_c_str(response)
}

/// Apply a transport/UI command
///
/// # Arguments
/// * `command_json` - e.g. `{"command":"toggle_play"}`, `{"command":"seek","time":42.0}`
///
/// # Returns
/// The player snapshot after the command
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_player_command(command_json: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let command: PlayerCommand = parse_json(command_json)?;
        let driver = current_player()?;
        RUNTIME.block_on(driver.send(command))?;
        Ok(success_response(driver.snapshot()))
    });

    string_to_c_str(response)
}

/// Forward a decoder notification
///
/// # Arguments
/// * `event_json` - e.g. `{"type":"time_update","current_time":12.5}`
///
/// # Returns
/// The player snapshot after the event; a decoder error is returned as an error
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_surface_event(event_json: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let event: SurfaceEvent = parse_json(event_json)?;
        let driver = current_player()?;
        RUNTIME.block_on(driver.surface_event(event))?;
        Ok(success_response(driver.snapshot()))
    });

    string_to_c_str(response)
}

/// Commands the host must apply to its decoder and view, in order
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_drain_surface_commands() -> *mut c_char {
    let response = catch_panic(|| {
        let commands = SURFACE
            .lock()
            .as_ref()
            .map(CommandQueueSurface::drain)
            .unwrap_or_default();
        Ok(success_response(commands))
    });

    string_to_c_str(response)
}

/// Current player snapshot; timers may have changed it since the last call
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_player_snapshot() -> *mut c_char {
    let response = catch_panic(|| Ok(success_response(current_player()?.snapshot())));

    string_to_c_str(response)
}

/// Close the player and abort any buffered fetch in flight
///
/// The final surface commands stay available to `media_drain_surface_commands()`.
///
/// # Safety
/// Caller must free the returned string with `media_free_string()`
#[no_mangle]
pub extern "C" fn media_close_player() -> *mut c_char {
    let response = catch_panic(|| {
        let pipeline = pipeline()?;
        RUNTIME.block_on(pipeline.close_session())?;
        Ok(success_response(serde_json::json!({ "closed": true })))
    });

    string_to_c_str(response)
}

// ============================================================================
// MEMORY MANAGEMENT
// ============================================================================

/// Free a string returned by any `media_*` function
///
/// # Safety
/// Must be called exactly once per returned string. Calling it twice on the same
/// pointer is a double free; not calling it leaks.
#[no_mangle]
pub extern "C" fn media_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        // SAFETY: ptr came from CString::into_raw in string_to_c_str
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn call(ptr: *mut c_char) -> serde_json::Value {
        let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        media_free_string(ptr);
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_success_response() {
        let response = success_response(serde_json::json!({"test": "data"}));
        assert!(response.contains("\"success\":true"));
        assert!(response.contains("\"test\":\"data\""));
    }

    #[test]
    fn test_error_response() {
        let response = error_response("Test error");
        assert!(response.contains("\"success\":false"));
        assert!(response.contains("Test error"));
    }

    #[test]
    fn test_aborted_is_not_an_error() {
        let response: serde_json::Value =
            serde_json::from_str(&catch_panic(|| Err(PipelineError::Aborted))).unwrap();
        assert_eq!(response["success"], false);
        assert_eq!(response["aborted"], true);
        assert!(response.get("error").is_none());
    }

    #[test]
    fn test_error_uses_user_message() {
        let response: serde_json::Value = serde_json::from_str(&catch_panic(|| {
            Err(PipelineError::network("connection reset", Some(503), None))
        }))
        .unwrap();
        assert_eq!(response["success"], false);
        assert_eq!(
            response["error"],
            PipelineError::network("connection reset", Some(503), None).user_message()
        );
        assert!(response["detail"].as_str().unwrap().contains("connection reset"));
        assert_eq!(response["network"], true);
        assert!(response.get("aborted").is_none());
    }

    #[test]
    fn test_classify_url() {
        let url = CString::new("https://cdn/live/master.m3u8?token=1").unwrap();
        let response = call(media_classify_url(url.as_ptr()));
        assert_eq!(response["success"], true);
        assert_eq!(response["data"]["kind"], "adaptive_stream");
    }

    #[test]
    fn test_null_pointer_is_error() {
        let response = call(media_classify_url(std::ptr::null()));
        assert_eq!(response["success"], false);
    }

    #[test]
    fn test_invalid_command_json() {
        let command = CString::new("{\"command\":\"rewind\"}").unwrap();
        let response = call(media_player_command(command.as_ptr()));
        assert_eq!(response["success"], false);
        assert!(response["error"].as_str().unwrap().contains("Invalid"));
    }

    #[test]
    fn test_drain_without_player_is_empty() {
        let response = call(media_drain_surface_commands());
        assert_eq!(response["success"], true);
        assert_eq!(response["data"], serde_json::json!([]));
    }

    #[test]
    fn test_free_null_is_noop() {
        media_free_string(std::ptr::null_mut());
    }
}
