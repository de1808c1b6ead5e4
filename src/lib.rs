//! MediaCore - title resolution and playback core
//!
//! Turns a catalog title into a playing session:
//! resolve the title with the backend, wait out any server-side preparation,
//! choose how the media reaches the decoder, and drive the player state.
//!
//! - [`api`] - backend client, resolver, cached catalog reads
//! - [`download`] - progress polling, attempt management, buffered fetches
//! - [`playback`] - delivery selection, session engine and its driver
//! - [`storage`] - the process-wide resource cache
//! - [`pipeline`] - facade wiring the above together

uniffi::setup_scaffolding!();

pub mod api;
pub mod download;
pub mod error;
pub mod pipeline;
pub mod playback;
pub mod storage;

// C FFI for native hosts
pub mod ffi_bridge;

pub use api::{BackendClient, CatalogClient, CatalogKey, ClientConfig, ResolutionResult, ResolverClient};
pub use download::{AcquisitionManager, ProgressCallback, ProgressJob, ProgressPoller};
pub use error::{PipelineError, Result};
pub use pipeline::MediaPipeline;
pub use playback::{
    DeliveryKind, DeliveryStrategySelector, PlaybackConfig, PlaybackDriver, PlaybackEngine, PlayerCommand,
    PlayerSnapshot, PreparedSource, SurfaceEvent, TransportState,
};
pub use storage::ResourceCache;

/// Delivery strategy for a resolved URL
#[uniffi::export]
pub fn classify_delivery(url: String) -> DeliveryKind {
    playback::classify_url(&url)
}

/// Crate version, for host diagnostics
#[uniffi::export]
pub fn core_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
