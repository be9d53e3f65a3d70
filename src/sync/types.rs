use crate::authority::AuthorityError;
use crate::storage::StoreError;

use super::progress_tracker::SyncStats;

/// Lifecycle of the synchronization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No genesis is known yet.
    Uninitialized,
    /// Genesis is stored; no pass has completed.
    GenesisSynced,
    /// At least one pass has completed.
    Steady,
}

/// Result of one sync pass.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Local tip already matches the authority; nothing was written.
    UpToDate,
    /// Blocks were fetched and applied.
    Applied(SyncStats),
}

/// Error types for synchronization
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Authority error: {0}")]
    AuthorityError(#[from] AuthorityError),

    /// Genesis could not be fetched or stored; no local state can exist.
    #[error("Genesis error: {0}")]
    GenesisError(String),

    /// Fetched data does not chain onto, or cannot be applied to, local state.
    #[error("Consistency error: {0}")]
    ConsistencyError(String),

    #[error("Node not initialized: {0}")]
    NotInitialized(String),
}

impl SyncError {
    /// Errors after which restarting the sync manager cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::GenesisError(_) | SyncError::NotInitialized(_)
        )
    }

    /// Network failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::AuthorityError(e) => e.is_transient(),
            _ => false,
        }
    }
}
