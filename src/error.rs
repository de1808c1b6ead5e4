//! Error types for MediaCore
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by the pipeline stage they come from (resolution,
//! polling, delivery, playback) so the host can decide what to show the user.
//!
//! ## Error Taxonomy
//!
//! ### Network (resolve, poll, buffered fetch, catalog)
//! - Request could not complete, or the backend answered with a non-success status
//!   → `Network`
//!
//! ### Protocol
//! - Response body does not match the backend contract (no `url` and no
//!   `progress_url`, malformed progress snapshot, unparsable JSON) → `Protocol`
//!
//! ### Cancellation
//! - Superseded attempt, aborted buffered fetch, stopped poller → `Aborted`
//!   (never surfaced to the user)
//!
//! ### Playback
//! - Decode surface reported a fatal error → `Decode`
//! - Operation on a closed session → `SessionClosed`

use thiserror::Error;

/// Result type alias using our PipelineError type
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for MediaCore
///
/// Each variant includes a descriptive message and, where available, the context
/// needed to log the failure (status code, endpoint, response body).
#[derive(Error, Debug)]
pub enum PipelineError {
    // ===== Network Errors =====

    /// Request failed to complete or the backend returned a non-success status
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// HTTP status code if the backend answered at all
        status_code: Option<u16>,
        /// Endpoint or URL that failed
        endpoint: Option<String>,
    },

    // ===== Protocol Errors =====

    /// Response shape violates the backend contract
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        /// Response body snippet for debugging
        response_body: Option<String>,
    },

    // ===== Cancellation =====

    /// Operation was intentionally cancelled (superseded attempt, aborted fetch)
    #[error("Operation aborted")]
    Aborted,

    /// Resolution or polling gave up after the configured bound
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    // ===== Playback Errors =====

    /// Decode surface reported a fatal playback error
    #[error("Playback failed: {0}")]
    Decode(String),

    /// Operation attempted on a session that has already been closed
    #[error("Playback session is closed")]
    SessionClosed,

    // ===== General Errors =====

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Component state is invalid for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    Internal(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// URL could not be parsed or joined
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),
}

impl From<std::string::FromUtf8Error> for PipelineError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        PipelineError::Internal(format!("UTF-8 conversion error: {}", err))
    }
}

// Helper methods for creating common errors
impl PipelineError {
    /// Create a Network error
    pub fn network<S: Into<String>>(
        message: S,
        status_code: Option<u16>,
        endpoint: Option<String>,
    ) -> Self {
        PipelineError::Network {
            message: message.into(),
            status_code,
            endpoint,
        }
    }

    /// Create a Protocol error
    pub fn protocol<S: Into<String>>(message: S, response_body: Option<String>) -> Self {
        PipelineError::Protocol {
            message: message.into(),
            response_body,
        }
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        PipelineError::InvalidInput(message.into())
    }

    /// Create an Internal error with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        PipelineError::Internal(message.into())
    }

    /// Check if this error is an intentional cancellation
    pub fn is_aborted(&self) -> bool {
        matches!(self, PipelineError::Aborted)
    }

    /// Check if the error came from the transport layer
    ///
    /// reqwest errors that escape without being mapped are transport failures too.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Network { .. } | PipelineError::ReqwestError(_)
        )
    }

    /// Check if the error means the backend answered with something unusable
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Protocol { .. } | PipelineError::SerdeJsonError(_)
        )
    }

    /// Check if a poll tick that failed with this error can simply be skipped
    ///
    /// Returns `true` for:
    /// - Network failures (connection drop, 5xx, 404 while the job is being created)
    /// - Malformed progress snapshots (the next tick usually parses)
    pub fn is_skippable_poll_failure(&self) -> bool {
        self.is_network_error() || self.is_protocol_error()
    }

    /// Check if the error should reach the user-visible error path
    pub fn is_user_visible(&self) -> bool {
        !self.is_aborted()
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Network { status_code: Some(code), .. } => {
                format!("The media server answered with an error ({}). Please try again.", code)
            }
            PipelineError::Network { .. } | PipelineError::ReqwestError(_) => {
                "Could not reach the media server. Check your connection and try again.".to_string()
            }
            PipelineError::Protocol { .. } | PipelineError::SerdeJsonError(_) => {
                "The media server sent an unexpected response for this title.".to_string()
            }
            PipelineError::Timeout(seconds) => {
                format!("This title is still being prepared after {} seconds. Please try again later.", seconds)
            }
            PipelineError::Decode(message) => {
                format!("This video could not be played: {}", message)
            }
            _ => self.to_string(),
        }
    }
}

// ===== IMPLEMENTATION NOTES =====
//
// ## Propagation Policy
//
// - `Network` during resolution is returned to the caller. During polling it is
//   logged with `tracing::warn!` and the tick is skipped.
// - `Protocol` is fatal to the current resolution attempt. There is no safe
//   default URL to fall back to.
// - `Aborted` is produced by cancelled fetches and superseded attempts. Callers
//   filter it with `is_user_visible()` before showing anything.
// - `Decode` is reported by the playback engine only. It never touches the
//   resource cache or the resolver.
//
// ## Logging
//
// ```rust
// if let Err(e) = operation().await {
//     if e.is_user_visible() {
//         tracing::error!(error = %e, network = e.is_network_error(), "Resolution failed");
//     }
// }
// ```

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_is_not_user_visible() {
        assert!(!PipelineError::Aborted.is_user_visible());
        assert!(PipelineError::Decode("bad frame".into()).is_user_visible());
    }

    #[test]
    fn test_poll_failures_are_skippable() {
        let network = PipelineError::network("connection reset", None, Some("/p/1".into()));
        let protocol = PipelineError::protocol("missing progress", None);
        assert!(network.is_skippable_poll_failure());
        assert!(protocol.is_skippable_poll_failure());
        assert!(!PipelineError::Aborted.is_skippable_poll_failure());
        assert!(!PipelineError::Timeout(30).is_skippable_poll_failure());
    }

    #[test]
    fn test_user_message_includes_status() {
        let err = PipelineError::network("bad gateway", Some(502), None);
        assert!(err.user_message().contains("502"));
    }
}
