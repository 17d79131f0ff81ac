//! Single-assignment cell for the winning source result

use std::sync::OnceLock;

/// A committed source result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub source: String,
    pub config: Option<Vec<u8>>,
}

/// Holds at most one committed result; later commits are rejected
#[derive(Debug, Default)]
pub struct ResultSlot {
    committed: OnceLock<Committed>,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit `config` from `source` if nothing has been committed yet
    ///
    /// On rejection the attempted value is handed back unchanged.
    pub fn commit(
        &self,
        source: impl Into<String>,
        config: Option<Vec<u8>>,
    ) -> Result<(), Committed> {
        self.committed.set(Committed {
            source: source.into(),
            config,
        })
    }

    pub fn is_committed(&self) -> bool {
        self.committed.get().is_some()
    }

    pub fn get(&self) -> Option<&Committed> {
        self.committed.get()
    }

    pub fn into_inner(self) -> Option<Committed> {
        self.committed.into_inner()
    }
}
