//! Config sources for supported platforms
//!
//! A source knows one way of obtaining the raw provisioning config: a config
//! drive with a given label, a metadata service URL, a local file. A
//! platform is the set of sources raced together on that platform.

pub mod file;
pub mod mock;
pub mod openstack;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Settings;
use crate::race::RaceContext;
use crate::{IgnitionError, SourceError};

/// Trait for config sources
///
/// `Ok(Some(bytes))` is a config, `Ok(None)` means the source was reachable
/// but had no config, and errors mean the source produced nothing. Sources
/// must return promptly once `ctx` ends.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Name used in logs (e.g., "config drive (config-2)")
    fn name(&self) -> &str;

    /// Fetch the raw config
    async fn fetch(&self, ctx: &RaceContext) -> Result<Option<Vec<u8>>, SourceError>;
}

/// Platforms ignition-rs can acquire a config on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Config drives labelled config-2 plus the metadata service
    OpenStack,
    /// A local file
    File,
}

impl Platform {
    pub const ALL: &'static [Platform] = &[Platform::OpenStack, Platform::File];
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::OpenStack => write!(f, "openstack"),
            Platform::File => write!(f, "file"),
        }
    }
}

impl FromStr for Platform {
    type Err = IgnitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openstack" => Ok(Platform::OpenStack),
            "file" => Ok(Platform::File),
            _ => Err(IgnitionError::UnknownPlatform(s.to_string())),
        }
    }
}

/// Build the sources raced on `platform`
pub fn sources_for(
    platform: Platform,
    settings: &Settings,
) -> Result<Vec<Arc<dyn ConfigSource>>, IgnitionError> {
    match platform {
        Platform::OpenStack => openstack::sources(settings),
        Platform::File => Ok(vec![Arc::new(file::FileSource::new(&settings.file.path))]),
    }
}
