//! ignition-rs library
//!
//! Boot-time configuration acquisition for first-boot provisioning. Before
//! disks, filesystems or units can be set up, a single config document has
//! to be obtained from one of several unreliable sources: a config drive
//! that may appear late, a metadata service that may be unreachable, or a
//! multipart envelope that embeds the config among unrelated parts.
//!
//! # Design Principles
//!
//! - **Race, don't queue**: every source for a platform runs concurrently
//!   under one deadline and the first to respond wins
//! - **Never block boot**: no config in time is a valid outcome, not an error
//! - **Leave nothing behind**: mounts and mount points are released on every
//!   exit path, including cancellation
//! - **Opaque bytes**: the acquired config is handed on uninterpreted

pub mod config;
pub mod device;
pub mod mime;
pub mod providers;
pub mod race;
pub mod resource;

mod error;

pub use error::{IgnitionError, ProtocolError, SourceError};
pub use providers::{ConfigSource, Platform};
pub use race::{Acquisition, AcquisitionRequest, RaceContext, acquire};

use config::Settings;
use tracing::info;

/// Race every source for `platform` and return the first config found
///
/// Errors only come from building the sources; an acquisition that finds
/// nothing returns an empty [`Acquisition`].
pub async fn fetch_config(
    platform: Platform,
    settings: &Settings,
) -> Result<Acquisition, IgnitionError> {
    let sources = providers::sources_for(platform, settings)?;
    info!(
        "Fetching config for platform {} from {} sources",
        platform,
        sources.len()
    );

    let request = AcquisitionRequest::new(settings.timeout())
        .with_cleanup_grace(settings.cleanup_grace())
        .with_sources(sources);

    Ok(acquire(request).await)
}
