//! Block device sources
//!
//! Config drives may show up seconds after boot. [`wait_for_device`] polls
//! for the device node until it appears or the race ends, and
//! [`with_mount`] gives a closure read access to the mounted filesystem.

pub mod mock;
mod mount;

pub use mount::{MountSession, Mounter, SystemMounter, with_mount};

use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::SourceError;
use crate::race::RaceContext;

/// Default interval between device existence checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest interval between device existence checks
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wait until `device` exists, checking every `interval`
///
/// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
///
/// Returns the context's error as soon as it ends, so this never waits past
/// the deadline by more than the time one existence check takes.
pub async fn wait_for_device(
    device: &Path,
    interval: Duration,
    ctx: &RaceContext,
) -> Result<(), SourceError> {
    let interval = interval.max(MIN_POLL_INTERVAL);
    while !device_exists(device).await {
        debug!("Config drive ({}) not found, waiting...", device.display());
        ctx.sleep(interval).await?;
    }
    Ok(())
}

async fn device_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_existing_device_returns_immediately() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("config-2");
        std::fs::write(&device, b"").unwrap();

        let ctx = RaceContext::new(Duration::from_secs(5));
        wait_for_device(&device, Duration::from_secs(60), &ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_device_appearing_later_is_found() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("config-2");

        let creator = device.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            fs::write(&creator, b"").await.unwrap();
        });

        let ctx = RaceContext::new(Duration::from_secs(5));
        wait_for_device(&device, Duration::from_millis(20), &ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_device_stops_at_deadline() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("never");
        let deadline = Duration::from_millis(150);
        let interval = Duration::from_millis(50);

        let start = Instant::now();
        let ctx = RaceContext::new(deadline);
        let err = wait_for_device(&device, interval, &ctx).await.unwrap_err();

        assert!(matches!(err, SourceError::TimedOut));
        // Generous slack for slow CI machines.
        assert!(start.elapsed() < deadline + interval + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_long_interval_is_interrupted_by_cancel() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("never");

        let ctx = RaceContext::new(Duration::from_secs(60));
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = wait_for_device(&device, Duration::from_secs(30), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_does_not_spin() {
        let temp = TempDir::new().unwrap();
        let device = temp.path().join("never");

        let ctx = RaceContext::new(Duration::from_millis(100));
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            wait_for_device(&device, Duration::ZERO, &ctx),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(SourceError::TimedOut)));
    }
}
