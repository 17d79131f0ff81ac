//! Shared cancellation and deadline for one acquisition run

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::SourceError;

/// Stand-in for timeouts past what [`Instant`] can represent (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Cancellation token paired with the race's absolute deadline
///
/// Every source receives a clone. Cancelling any clone cancels them all; the
/// deadline is fixed when the context is created.
#[derive(Debug, Clone)]
pub struct RaceContext {
    token: CancellationToken,
    deadline: Instant,
}

impl RaceContext {
    /// Create a context that expires `timeout` from now
    ///
    /// Timeouts too large to represent are treated as about 30 years.
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self {
            token: CancellationToken::new(),
            deadline,
        }
    }

    /// Signal every holder of this context to stop
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The reason this context has ended, if it has
    pub fn err(&self) -> Option<SourceError> {
        if Instant::now() >= self.deadline {
            Some(SourceError::TimedOut)
        } else if self.token.is_cancelled() {
            Some(SourceError::Cancelled)
        } else {
            None
        }
    }

    /// Resolve once the context is cancelled or its deadline passes
    pub async fn done(&self) -> SourceError {
        tokio::select! {
            _ = self.token.cancelled() => self.err().unwrap_or(SourceError::Cancelled),
            _ = sleep_until(self.deadline) => SourceError::TimedOut,
        }
    }

    /// Run `fut` until it completes or the context ends, whichever comes first
    pub async fn run<T, F>(&self, fut: F) -> Result<T, SourceError>
    where
        F: Future<Output = Result<T, SourceError>>,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }

    /// Sleep for `duration` unless the context ends first
    pub async fn sleep(&self, duration: Duration) -> Result<(), SourceError> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
