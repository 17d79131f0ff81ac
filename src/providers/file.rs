//! Local file source

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::ConfigSource;
use crate::SourceError;
use crate::race::RaceContext;

/// Reads the config from a local file
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("file ({})", path.display()),
            path,
        }
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ctx: &RaceContext) -> Result<Option<Vec<u8>>, SourceError> {
        ctx.run(async {
            if !fs::try_exists(&self.path).await? {
                debug!("Config file {} not found", self.path.display());
                return Ok(None);
            }
            debug!("Reading config from {}", self.path.display());
            Ok::<_, SourceError>(Some(fs::read(&self.path).await?))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ign");
        fs::write(&path, b"{\"ignition\":{}}").await.unwrap();

        let ctx = RaceContext::new(Duration::from_secs(5));
        let config = FileSource::new(&path).fetch(&ctx).await.unwrap();
        assert_eq!(config, Some(b"{\"ignition\":{}}".to_vec()));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let ctx = RaceContext::new(Duration::from_secs(5));
        let source = FileSource::new(temp.path().join("missing.ign"));
        assert_eq!(source.fetch(&ctx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_directory_is_transport_error() {
        let temp = TempDir::new().unwrap();
        let ctx = RaceContext::new(Duration::from_secs(5));
        let err = FileSource::new(temp.path()).fetch(&ctx).await.unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
    }
}
