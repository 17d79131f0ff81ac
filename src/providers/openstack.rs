//! OpenStack config sources
//!
//! OpenStack exposes user data both on a config drive (a block device
//! labelled `config-2` or `CONFIG-2`) and through the metadata service.
//! Whichever responds first is used.
//! https://docs.openstack.org/nova/latest/user/metadata.html

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use super::ConfigSource;
use crate::config::Settings;
use crate::device::{DEFAULT_POLL_INTERVAL, Mounter, SystemMounter, wait_for_device, with_mount};
use crate::mime::extract_config;
use crate::race::RaceContext;
use crate::resource::{FetchOptions, Fetcher, config_headers};
use crate::{IgnitionError, SourceError};

/// OpenStack metadata service user data URL (link-local address)
pub const METADATA_SERVICE_URL: &str = "http://169.254.169.254/openstack/latest/user_data";

/// User data location on a config drive, relative to its root
pub const CONFIG_DRIVE_USERDATA_PATH: &str = "openstack/latest/user_data";

/// Build the OpenStack sources: one per config drive label, then the metadata service
pub fn sources(settings: &Settings) -> Result<Vec<Arc<dyn ConfigSource>>, IgnitionError> {
    let mounter: Arc<dyn Mounter> = Arc::new(SystemMounter::new(
        &settings.mount_cmd,
        &settings.umount_cmd,
    ));

    let mut sources: Vec<Arc<dyn ConfigSource>> = settings
        .openstack
        .config_drive_labels
        .iter()
        .map(|label| {
            let source = ConfigDriveSource::new(settings.disk_by_label_dir.join(label), mounter.clone())
                .with_userdata_path(&settings.openstack.userdata_path)
                .with_poll_interval(settings.poll_interval());
            Arc::new(source) as Arc<dyn ConfigSource>
        })
        .collect();

    let fetcher = Fetcher::from_settings(&settings.retry)?;
    sources.push(Arc::new(MetadataServiceSource::with_url(
        &settings.openstack.metadata_url,
        fetcher,
    )));

    Ok(sources)
}

/// Config drive source: waits for the labelled device, mounts it and reads user data
pub struct ConfigDriveSource {
    name: String,
    device: PathBuf,
    userdata_path: PathBuf,
    poll_interval: Duration,
    mounter: Arc<dyn Mounter>,
}

impl ConfigDriveSource {
    pub fn new(device: impl AsRef<Path>, mounter: Arc<dyn Mounter>) -> Self {
        let device = device.as_ref().to_path_buf();
        let label = device
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| device.display().to_string());

        Self {
            name: format!("config drive ({label})"),
            device,
            userdata_path: PathBuf::from(CONFIG_DRIVE_USERDATA_PATH),
            poll_interval: DEFAULT_POLL_INTERVAL,
            mounter,
        }
    }

    /// Set the user data location relative to the drive root
    pub fn with_userdata_path(mut self, path: impl AsRef<Path>) -> Self {
        // Keep the path relative so joining it never escapes the mount point.
        let path = path.as_ref();
        self.userdata_path = path.strip_prefix("/").unwrap_or(path).to_path_buf();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl ConfigSource for ConfigDriveSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ctx: &RaceContext) -> Result<Option<Vec<u8>>, SourceError> {
        wait_for_device(&self.device, self.poll_interval, ctx).await?;

        let userdata_path = self.userdata_path.clone();
        with_mount(self.mounter.clone(), &self.device, ctx, |root| async move {
            let path = root.join(userdata_path);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                debug!("No user data at {} on config drive", path.display());
                return Ok(None);
            }
            let data = fs::read(&path).await.map_err(|e| {
                SourceError::transport(format!("failed to read {}: {}", path.display(), e))
            })?;
            Ok::<_, SourceError>(Some(data))
        })
        .await
    }
}

/// Metadata service source: fetches user data over HTTP
///
/// OpenStack with Heat may return the config as one section of a
/// multipart/mixed document; that section is extracted.
pub struct MetadataServiceSource {
    url: String,
    fetcher: Fetcher,
}

impl MetadataServiceSource {
    pub fn new(fetcher: Fetcher) -> Self {
        Self::with_url(METADATA_SERVICE_URL, fetcher)
    }

    /// Create with a custom URL (for testing)
    pub fn with_url(url: &str, fetcher: Fetcher) -> Self {
        Self {
            url: url.to_string(),
            fetcher,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConfigSource for MetadataServiceSource {
    fn name(&self) -> &str {
        "metadata service"
    }

    async fn fetch(&self, ctx: &RaceContext) -> Result<Option<Vec<u8>>, SourceError> {
        let options = FetchOptions::new().with_headers(config_headers());
        let fetched = self.fetcher.fetch(&self.url, &options, ctx).await?;
        Ok(extract_config(&fetched.body, fetched.content_type())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockMounter;
    use tempfile::TempDir;

    const CONFIG: &[u8] = br#"{"ignition":{"version":"3.0.0"}}"#;

    fn device_in(temp: &TempDir, label: &str) -> PathBuf {
        let device = temp.path().join(label);
        std::fs::write(&device, b"").unwrap();
        device
    }

    #[test]
    fn test_config_drive_name() {
        let source = ConfigDriveSource::new("/dev/disk/by-label/CONFIG-2", Arc::new(MockMounter::new()));
        assert_eq!(source.name(), "config drive (CONFIG-2)");
    }

    #[test]
    fn test_userdata_path_stays_relative() {
        let source = ConfigDriveSource::new("/dev/disk/by-label/config-2", Arc::new(MockMounter::new()))
            .with_userdata_path("/openstack/latest/user_data");
        assert_eq!(source.userdata_path, PathBuf::from("openstack/latest/user_data"));
    }

    #[tokio::test]
    async fn test_config_drive_reads_userdata() {
        let temp = TempDir::new().unwrap();
        let mounter = MockMounter::new().with_file(CONFIG_DRIVE_USERDATA_PATH, CONFIG);
        let source = ConfigDriveSource::new(device_in(&temp, "config-2"), Arc::new(mounter.clone()));

        let ctx = RaceContext::new(Duration::from_secs(5));
        let config = source.fetch(&ctx).await.unwrap();

        assert_eq!(config.as_deref(), Some(CONFIG));
        assert_eq!(mounter.unmount_count(), 1);
    }

    #[tokio::test]
    async fn test_config_drive_without_userdata_is_empty() {
        let temp = TempDir::new().unwrap();
        let mounter = MockMounter::new().with_file("openstack/latest/meta_data.json", b"{}");
        let source = ConfigDriveSource::new(device_in(&temp, "config-2"), Arc::new(mounter.clone()));

        let ctx = RaceContext::new(Duration::from_secs(5));
        let config = source.fetch(&ctx).await.unwrap();

        assert_eq!(config, None);
        assert_eq!(mounter.mount_count(), 1);
        assert_eq!(mounter.unmount_count(), 1);
    }

    #[tokio::test]
    async fn test_config_drive_mount_failure() {
        let temp = TempDir::new().unwrap();
        let mounter = MockMounter::new().with_mount_failure("unknown filesystem type");
        let source = ConfigDriveSource::new(device_in(&temp, "config-2"), Arc::new(mounter.clone()));

        let ctx = RaceContext::new(Duration::from_secs(5));
        let err = source.fetch(&ctx).await.unwrap_err();

        assert!(matches!(err, SourceError::Transport(_)));
        assert_eq!(mounter.unmount_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_config_drive_never_mounts() {
        let temp = TempDir::new().unwrap();
        let mounter = MockMounter::new();
        let source = ConfigDriveSource::new(temp.path().join("config-2"), Arc::new(mounter.clone()))
            .with_poll_interval(Duration::from_millis(20));

        let ctx = RaceContext::new(Duration::from_millis(100));
        let err = source.fetch(&ctx).await.unwrap_err();

        assert!(matches!(err, SourceError::TimedOut));
        assert_eq!(mounter.mount_count(), 0);
    }

    #[test]
    fn test_metadata_service_default_url() {
        let fetcher = Fetcher::from_settings(&Default::default()).unwrap();
        let source = MetadataServiceSource::new(fetcher);
        assert_eq!(source.url(), METADATA_SERVICE_URL);
        assert_eq!(source.name(), "metadata service");
    }
}
