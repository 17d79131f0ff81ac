//! Integration tests for the acquisition race

use async_trait::async_trait;
use ignition_rs::device::mock::MockMounter;
use ignition_rs::providers::mock::MockSource;
use ignition_rs::providers::openstack::{CONFIG_DRIVE_USERDATA_PATH, ConfigDriveSource};
use ignition_rs::{
    AcquisitionRequest, ConfigSource, ProtocolError, RaceContext, SourceError, acquire,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CONFIG: &[u8] = br#"{"ignition":{"version":"3.0.0"}}"#;

fn config_drive(temp: &TempDir, label: &str) -> std::path::PathBuf {
    let device = temp.path().join(label);
    std::fs::write(&device, b"").unwrap();
    device
}

#[tokio::test]
async fn test_first_success_wins_and_cancels_the_rest() {
    let fast = MockSource::new("fast")
        .with_delay(Duration::from_millis(10))
        .with_config(b"fast");
    let slow = MockSource::new("slow")
        .with_delay(Duration::from_millis(500))
        .with_config(b"slow");

    let request = AcquisitionRequest::new(Duration::from_secs(10))
        .with_source(fast.clone())
        .with_source(slow.clone());

    let start = Instant::now();
    let outcome = acquire(request).await;

    assert_eq!(outcome.source(), Some("fast"));
    assert_eq!(outcome.config(), Some(&b"fast"[..]));
    assert!(!outcome.timed_out());
    assert!(slow.was_cancelled());
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_simultaneous_successes_commit_exactly_one() {
    let sources: Vec<MockSource> = (0..10)
        .map(|i| MockSource::new(format!("source-{i}")).with_config(format!("config-{i}").as_bytes()))
        .collect();

    let request = AcquisitionRequest::new(Duration::from_secs(10)).with_sources(
        sources
            .iter()
            .cloned()
            .map(|s| Arc::new(s) as Arc<dyn ConfigSource>),
    );

    let outcome = acquire(request).await;
    let source = outcome.source().unwrap().to_string();
    let index = source.trim_start_matches("source-");
    assert_eq!(outcome.into_bytes(), format!("config-{index}").into_bytes());
    assert!(sources.iter().all(|s| s.calls() == 1));
}

#[tokio::test]
async fn test_deadline_without_success_is_empty_not_error() {
    let deadline = Duration::from_millis(150);
    let request = AcquisitionRequest::new(deadline)
        .with_source(MockSource::new("broken").with_transport_error("connection refused"))
        .with_source(MockSource::new("ambiguous").with_protocol_error(ProtocolError::MultipleConfigs))
        .with_source(MockSource::new("silent").never_responding());

    let start = Instant::now();
    let outcome = acquire(request).await;

    assert!(outcome.is_empty());
    assert!(outcome.timed_out());
    assert_eq!(outcome.source(), None);
    assert!(start.elapsed() >= deadline);
}

#[tokio::test]
async fn test_failures_do_not_end_the_race() {
    let request = AcquisitionRequest::new(Duration::from_secs(10))
        .with_source(MockSource::new("broken").with_transport_error("no route to host"))
        .with_source(MockSource::new("ambiguous").with_protocol_error(ProtocolError::NoBoundary))
        .with_source(
            MockSource::new("working")
                .with_delay(Duration::from_millis(50))
                .with_config(CONFIG),
        );

    let outcome = acquire(request).await;
    assert_eq!(outcome.source(), Some("working"));
    assert_eq!(outcome.config(), Some(CONFIG));
}

#[tokio::test]
async fn test_empty_config_drive_is_the_outcome() {
    let temp = TempDir::new().unwrap();
    let mounter = MockMounter::new();
    let drive = ConfigDriveSource::new(config_drive(&temp, "config-2"), Arc::new(mounter.clone()));

    let outcome = acquire(AcquisitionRequest::new(Duration::from_secs(5)).with_source(drive)).await;

    assert!(outcome.is_empty());
    assert!(!outcome.timed_out());
    assert_eq!(outcome.source(), Some("config drive (config-2)"));
    assert_eq!(mounter.unmount_count(), 1);
}

#[tokio::test]
async fn test_empty_config_drive_beats_slower_source() {
    let temp = TempDir::new().unwrap();
    let mounter = MockMounter::new();
    let drive = ConfigDriveSource::new(config_drive(&temp, "config-2"), Arc::new(mounter.clone()));
    let network = MockSource::new("metadata service")
        .with_delay(Duration::from_millis(300))
        .with_config(CONFIG);

    let request = AcquisitionRequest::new(Duration::from_secs(5))
        .with_source(drive)
        .with_source(network.clone());
    let outcome = acquire(request).await;

    assert_eq!(outcome.source(), Some("config drive (config-2)"));
    assert!(outcome.is_empty());
    assert!(network.was_cancelled());
}

#[tokio::test]
async fn test_config_drive_config_is_acquired() {
    let temp = TempDir::new().unwrap();
    let mounter = MockMounter::new().with_file(CONFIG_DRIVE_USERDATA_PATH, CONFIG);
    let drive = ConfigDriveSource::new(config_drive(&temp, "CONFIG-2"), Arc::new(mounter.clone()));
    let missing = ConfigDriveSource::new(temp.path().join("config-2"), Arc::new(MockMounter::new()))
        .with_poll_interval(Duration::from_millis(20));

    let request = AcquisitionRequest::new(Duration::from_secs(5))
        .with_source(missing)
        .with_source(drive);
    let outcome = acquire(request).await;

    assert_eq!(outcome.source(), Some("config drive (CONFIG-2)"));
    assert_eq!(outcome.config(), Some(CONFIG));
    assert_eq!(mounter.mount_count(), 1);
    assert_eq!(mounter.unmount_count(), 1);
}

#[tokio::test]
async fn test_missing_device_does_not_outlive_deadline() {
    let temp = TempDir::new().unwrap();
    let mounter = MockMounter::new();
    let deadline = Duration::from_millis(200);
    let interval = Duration::from_millis(50);
    let drive = ConfigDriveSource::new(temp.path().join("config-2"), Arc::new(mounter.clone()))
        .with_poll_interval(interval);

    let start = Instant::now();
    let outcome = acquire(AcquisitionRequest::new(deadline).with_source(drive)).await;

    assert!(outcome.timed_out());
    assert!(outcome.is_empty());
    assert_eq!(mounter.mount_count(), 0);
    // Generous slack for slow CI machines.
    assert!(start.elapsed() < deadline + interval + Duration::from_millis(500));
}

/// A source that ignores cancellation entirely
struct StubbornSource;

#[async_trait]
impl ConfigSource for StubbornSource {
    fn name(&self) -> &str {
        "stubborn"
    }

    async fn fetch(&self, _ctx: &RaceContext) -> Result<Option<Vec<u8>>, SourceError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Some(b"too late".to_vec()))
    }
}

#[tokio::test]
async fn test_sources_ignoring_cancellation_are_aborted() {
    let request = AcquisitionRequest::new(Duration::from_secs(10))
        .with_cleanup_grace(Duration::from_millis(50))
        .with_source(StubbornSource)
        .with_source(MockSource::new("quick").with_config(CONFIG));

    let start = Instant::now();
    let outcome = acquire(request).await;

    assert_eq!(outcome.source(), Some("quick"));
    assert_eq!(outcome.config(), Some(CONFIG));
    assert!(start.elapsed() < Duration::from_secs(5));
}

/// A source that ignores cancellation and answers just after the deadline
struct LateSource;

#[async_trait]
impl ConfigSource for LateSource {
    fn name(&self) -> &str {
        "late"
    }

    async fn fetch(&self, _ctx: &RaceContext) -> Result<Option<Vec<u8>>, SourceError> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(Some(b"after deadline".to_vec()))
    }
}

#[tokio::test]
async fn test_success_after_deadline_is_discarded() {
    let request = AcquisitionRequest::new(Duration::from_millis(50))
        .with_cleanup_grace(Duration::from_secs(2))
        .with_source(LateSource);

    let start = Instant::now();
    let outcome = acquire(request).await;

    assert!(outcome.timed_out());
    assert!(outcome.is_empty());
    assert_eq!(outcome.source(), None);
    // The late task was drained, not aborted.
    assert!(start.elapsed() >= Duration::from_millis(150));
}
