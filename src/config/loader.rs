//! Settings loader
//!
//! Reads acquisition settings from an explicit path or the system default.

use super::Settings;
use crate::IgnitionError;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Settings file consulted when no explicit path is given
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/ignition-rs/acquire.yaml";

/// Load settings from `path`, or from [`DEFAULT_SETTINGS_PATH`] when present
///
/// An explicit path must exist. A missing default file yields default settings.
pub async fn load_settings(path: Option<&Path>) -> Result<Settings, IgnitionError> {
    match path {
        Some(path) => load_settings_file(path).await?.ok_or_else(|| {
            IgnitionError::Config(format!("settings file {} not found", path.display()))
        }),
        None => Ok(load_settings_file(DEFAULT_SETTINGS_PATH)
            .await?
            .unwrap_or_default()),
    }
}

async fn load_settings_file(path: impl AsRef<Path>) -> Result<Option<Settings>, IgnitionError> {
    let path = path.as_ref();

    if !fs::try_exists(path).await? {
        return Ok(None);
    }

    let content = fs::read_to_string(path).await?;
    let settings = Settings::from_yaml(&content)?;
    debug!("Loaded settings from {}", path.display());

    Ok(Some(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("acquire.yaml");
        fs::write(&path, "timeout_secs: 3\npoll_interval_ms: 250\n")
            .await
            .unwrap();

        let settings = load_settings(Some(&path)).await.unwrap();
        assert_eq!(settings.timeout_secs, 3);
        assert_eq!(settings.poll_interval_ms, 250);
    }

    #[tokio::test]
    async fn test_missing_explicit_path_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yaml");

        let err = load_settings(Some(&path)).await.unwrap_err();
        assert!(matches!(err, IgnitionError::Config(_)));
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("acquire.yaml");
        fs::write(&path, "retry: 12\n").await.unwrap();

        let err = load_settings(Some(&path)).await.unwrap_err();
        assert!(matches!(err, IgnitionError::Yaml(_)));
    }
}
