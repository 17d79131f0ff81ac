//! Race coordinator
//!
//! Every enabled config source runs as its own task under one shared
//! [`RaceContext`]. The first source to produce a result (including an
//! explicit "reachable, nothing found") wins; the rest are cancelled and
//! whatever they return afterwards is discarded. If the deadline passes with
//! no winner the outcome is empty, which is a valid boot scenario.

mod context;
mod slot;

pub use context::RaceContext;
pub use slot::{Committed, ResultSlot};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::SourceError;
use crate::providers::ConfigSource;

/// Default time given to cancelled sources to release their resources
pub const DEFAULT_CLEANUP_GRACE: Duration = Duration::from_secs(2);

/// Everything one acquisition run needs
pub struct AcquisitionRequest {
    timeout: Duration,
    cleanup_grace: Duration,
    sources: Vec<Arc<dyn ConfigSource>>,
}

impl AcquisitionRequest {
    /// Create a request whose race ends `timeout` after it starts
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cleanup_grace: DEFAULT_CLEANUP_GRACE,
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Arc<dyn ConfigSource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Set how long cancelled sources may take to wind down before being aborted
    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }
}

/// The committed outcome of a race
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acquisition {
    config: Option<Vec<u8>>,
    source: Option<String>,
    timed_out: bool,
}

impl Acquisition {
    /// Raw config bytes, if the winning source had any
    pub fn config(&self) -> Option<&[u8]> {
        self.config.as_deref()
    }

    /// Name of the source that won the race
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Whether the deadline passed before any source responded
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// True when there is no config to hand to the parser
    pub fn is_empty(&self) -> bool {
        self.config.as_ref().is_none_or(|c| c.is_empty())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.config.unwrap_or_default()
    }
}

/// What one source task reported when it finished
struct SourceReport {
    source: String,
    result: Result<Option<Vec<u8>>, SourceError>,
}

/// Race every source in `request` and return the first result
///
/// Per-source failures are logged and never end the race; only a success or
/// the deadline does. This never returns an error: an empty [`Acquisition`]
/// means no config was available in time.
pub async fn acquire(request: AcquisitionRequest) -> Acquisition {
    let AcquisitionRequest {
        timeout,
        cleanup_grace,
        sources,
    } = request;

    if sources.is_empty() {
        warn!("No config sources enabled; continuing without a config");
        return Acquisition::default();
    }

    let ctx = RaceContext::new(timeout);
    let slot = ResultSlot::new();
    let mut tasks = JoinSet::new();

    for source in sources {
        let ctx = ctx.clone();
        debug!("Starting config source: {}", source.name());
        tasks.spawn(async move {
            let result = source.fetch(&ctx).await;
            SourceReport {
                source: source.name().to_string(),
                result,
            }
        });
    }

    let timed_out = loop {
        tokio::select! {
            joined = tasks.join_next(), if !tasks.is_empty() => {
                if let Some(joined) = joined {
                    if handle_joined(Some(&slot), joined) {
                        break false;
                    }
                }
            }
            _ = ctx.done() => break true,
        }
    };

    ctx.cancel();

    if timed_out {
        info!(
            "No config source responded within {:?}; continuing without a config",
            timeout
        );
    } else if let Some(committed) = slot.get() {
        debug!("Using config from {}", committed.source);
    }

    let remaining = tasks.len();
    if tokio::time::timeout(cleanup_grace, drain(&mut tasks))
        .await
        .is_err()
    {
        warn!(
            "Aborting {} of {} config sources that did not stop within {:?}",
            tasks.len(),
            remaining,
            cleanup_grace
        );
        tasks.shutdown().await;
    }

    match slot.into_inner() {
        Some(Committed { source, config }) => Acquisition {
            config,
            source: Some(source),
            timed_out: false,
        },
        None => Acquisition {
            timed_out,
            ..Default::default()
        },
    }
}

/// Collect the reports of cancelled tasks so their cleanup runs before returning
///
/// The race is over by now, so nothing reported here is ever committed.
async fn drain(tasks: &mut JoinSet<SourceReport>) {
    while let Some(joined) = tasks.join_next().await {
        handle_joined(None, joined);
    }
}

/// Log a finished task and try to commit its result to `slot`
///
/// `slot` is `None` once the race is over. Returns true if the result was
/// committed.
fn handle_joined(
    slot: Option<&ResultSlot>,
    joined: Result<SourceReport, tokio::task::JoinError>,
) -> bool {
    let report = match joined {
        Ok(report) => report,
        Err(e) => {
            error!("Config source task failed: {}", e);
            return false;
        }
    };

    match (report.result, slot) {
        (Ok(config), Some(slot)) => match slot.commit(report.source, config) {
            Ok(()) => true,
            Err(rejected) => {
                debug!("Discarding late result from {}", rejected.source);
                false
            }
        },
        (Ok(_), None) => {
            debug!("Discarding late result from {}", report.source);
            false
        }
        (Err(SourceError::Cancelled), _) => false,
        (Err(SourceError::TimedOut), _) => {
            error!("Timed out while fetching config from {}", report.source);
            false
        }
        (Err(e), _) => {
            error!("Failed to fetch config from {}: {}", report.source, e);
            false
        }
    }
}
