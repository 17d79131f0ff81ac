//! Mock config source for testing
//!
//! Provides a configurable source that responds after an artificial delay,
//! for exercising race behaviour in unit and integration tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::ConfigSource;
use crate::SourceError;
use crate::race::RaceContext;

#[derive(Debug, Clone)]
enum Response {
    Config(Vec<u8>),
    Nothing,
    Transport(String),
    Protocol(crate::ProtocolError),
    Never,
}

/// Mock config source for testing
///
/// # Example
/// ```
/// use ignition_rs::providers::mock::MockSource;
/// use std::time::Duration;
///
/// let mock = MockSource::new("slow drive")
///     .with_delay(Duration::from_millis(50))
///     .with_config(br#"{"ignition":{"version":"3.0.0"}}"#);
/// ```
#[derive(Debug, Clone)]
pub struct MockSource {
    name: String,
    delay: Duration,
    response: Response,
    calls: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
}

impl MockSource {
    /// Create a mock that immediately reports "reachable, nothing found"
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            response: Response::Nothing,
            calls: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Respond only after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Respond with config bytes
    pub fn with_config(mut self, config: &[u8]) -> Self {
        self.response = Response::Config(config.to_vec());
        self
    }

    /// Respond with "reachable, nothing found"
    pub fn with_nothing(mut self) -> Self {
        self.response = Response::Nothing;
        self
    }

    /// Fail with a transport error
    pub fn with_transport_error(mut self, message: &str) -> Self {
        self.response = Response::Transport(message.to_string());
        self
    }

    /// Fail with a protocol error
    pub fn with_protocol_error(mut self, err: crate::ProtocolError) -> Self {
        self.response = Response::Protocol(err);
        self
    }

    /// Never respond; only the race context ends the fetch
    pub fn never_responding(mut self) -> Self {
        self.response = Response::Never;
        self
    }

    /// Number of times `fetch` was called
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether the fetch observed the race context ending
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ctx: &RaceContext) -> Result<Option<Vec<u8>>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let result = ctx
            .run(async {
                tokio::time::sleep(self.delay).await;
                match &self.response {
                    Response::Config(config) => Ok(Some(config.clone())),
                    Response::Nothing => Ok(None),
                    Response::Transport(message) => Err(SourceError::transport(message.clone())),
                    Response::Protocol(err) => Err(SourceError::Protocol(err.clone())),
                    Response::Never => std::future::pending().await,
                }
            })
            .await;

        if matches!(&result, Err(e) if e.is_context_end()) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        result
    }
}
