//! Mock mounter for testing
//!
//! "Mounting" writes the configured files into the target directory and
//! "unmounting" removes them again, so callers can exercise the full mount
//! session lifecycle without root privileges or block devices.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Mounter;
use crate::SourceError;

/// Mock mounter for testing
///
/// # Example
/// ```
/// use ignition_rs::device::mock::MockMounter;
///
/// let mounter = MockMounter::new()
///     .with_file("openstack/latest/user_data", br#"{"ignition":{"version":"3.0.0"}}"#);
/// assert_eq!(mounter.mount_count(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockMounter {
    files: Vec<(PathBuf, Vec<u8>)>,
    mount_error: Option<String>,
    mount_delay: Option<Duration>,
    unmount_error: Option<String>,
    mounts: Arc<AtomicUsize>,
    unmounts: Arc<AtomicUsize>,
    last_target: Arc<Mutex<Option<PathBuf>>>,
}

impl MockMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (relative to the mount root) to the simulated filesystem
    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: &[u8]) -> Self {
        self.files.push((path.into(), contents.to_vec()));
        self
    }

    /// Make every mount fail with `message`
    pub fn with_mount_failure(mut self, message: &str) -> Self {
        self.mount_error = Some(message.to_string());
        self
    }

    /// Make every mount take effect immediately but return only after `delay`
    pub fn with_mount_delay(mut self, delay: Duration) -> Self {
        self.mount_delay = Some(delay);
        self
    }

    /// Make every unmount report `message` (the simulated files are still removed)
    pub fn with_unmount_failure(mut self, message: &str) -> Self {
        self.unmount_error = Some(message.to_string());
        self
    }

    /// Number of mount attempts so far
    pub fn mount_count(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    /// Number of unmounts so far
    pub fn unmount_count(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }

    /// Mount point used by the most recent mount attempt
    pub fn last_target(&self) -> Option<PathBuf> {
        self.last_target.lock().ok().and_then(|t| t.clone())
    }

    fn populate(&self, target: &Path) -> std::io::Result<()> {
        for (path, contents) in &self.files {
            let path = target.join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    fn clear(target: &Path) -> std::io::Result<()> {
        for entry in std::fs::read_dir(target)? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(path)?;
            } else {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Mounter for MockMounter {
    async fn mount(&self, _device: &Path, target: &Path) -> Result<(), SourceError> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_target.lock() {
            *last = Some(target.to_path_buf());
        }

        if let Some(message) = &self.mount_error {
            return Err(SourceError::transport(message.clone()));
        }

        self.populate(target)?;
        if let Some(delay) = self.mount_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> std::io::Result<()> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        Self::clear(target)?;

        match &self.unmount_error {
            Some(message) => Err(std::io::Error::other(message.clone())),
            None => Ok(()),
        }
    }
}
