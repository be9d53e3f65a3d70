//! Blockchain Synchronization Module
//!
//! This module keeps the local replica in step with the authority:
//!
//! - `engine`: genesis bootstrap and the repeatable sync pass (fetch, walk back, apply).
//! - `manager`: follows the authority's push feed and runs passes in their own transactions.
//! - `progress_tracker`: per-pass statistics and gap detection.
//! - `types`: engine state, pass outcome and error types.

/// Genesis bootstrap and sync passes
pub mod engine;
/// Streaming sync manager and its supervisor
pub mod manager;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Engine state, outcomes and errors
mod types;

pub use engine::BlockchainSyncEngine;
pub use manager::{StreamingSyncManager, run_supervised};
pub use progress_tracker::{SyncProgressTracker, SyncStats};
pub use types::*;
