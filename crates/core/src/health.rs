//! Process-wide health of the frame source.

use parking_lot::RwLock;
use serde::Serialize;

/// Lifecycle of the ingestion loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SourceState {
    /// No register-backed source is configured.
    Disabled,
    /// Configured but not yet receiving.
    Idle,
    Running,
    /// The ingestion loop ended on a transport error.
    Failed(String),
}

/// Shared, lock-protected [`SourceState`].
///
/// The ingest task is the only writer; the health endpoint reads it.
#[derive(Debug)]
pub struct SourceHealth {
    state: RwLock<SourceState>,
}

impl SourceHealth {
    pub fn new(initial: SourceState) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    pub fn set(&self, state: SourceState) {
        let mut current = self.state.write();
        if *current != state {
            tracing::debug!(old_state = ?*current, new_state = ?state, "source state transition");
            *current = state;
        }
    }

    pub fn get(&self) -> SourceState {
        self.state.read().clone()
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.state.read(), SourceState::Failed(_))
    }
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self::new(SourceState::Disabled)
    }
}
