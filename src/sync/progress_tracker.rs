//! Progress tracking for catch-up passes.
//!
//! This module provides the `SyncProgressTracker`, which records the blocks a
//! pass applies, counts transactions, reconciled pending entries and dropped
//! stale token updates, and checks that the applied block numbers are
//! contiguous.

use std::collections::BTreeSet;
use tracing::{info, warn};

/// Log a progress line every this many blocks.
const LOG_INTERVAL: u64 = 100;

/// Service for tracking synchronization progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// Block number the pass started from (the local tip)
    start_number: u64,
    /// The highest block number applied so far
    highest_applied_number: u64,
    /// Every block number applied in this pass
    applied_numbers: BTreeSet<u64>,
    transactions_applied: usize,
    pending_reconciled: usize,
    stale_token_updates: usize,
    /// Last block number at which we logged progress
    last_logged_number: u64,
}

impl SyncProgressTracker {
    pub fn new(start_number: u64) -> Self {
        Self {
            start_number,
            highest_applied_number: start_number,
            applied_numbers: BTreeSet::new(),
            transactions_applied: 0,
            pending_reconciled: 0,
            stale_token_updates: 0,
            last_logged_number: start_number,
        }
    }

    pub fn record_block(&mut self, number: u64, transactions: usize) {
        self.highest_applied_number = self.highest_applied_number.max(number);
        self.applied_numbers.insert(number);
        self.transactions_applied += transactions;
    }

    pub fn record_reconciled(&mut self) {
        self.pending_reconciled += 1;
    }

    pub fn record_stale_token_update(&mut self) {
        self.stale_token_updates += 1;
    }

    /// Returns (start, end) pairs between which block numbers are missing.
    pub fn check_for_gaps(&self) -> Vec<(u64, u64)> {
        self.applied_numbers
            .iter()
            .zip(self.applied_numbers.iter().skip(1))
            .filter(|(a, b)| **b - **a > 1)
            .map(|(a, b)| (*a, *b))
            .collect()
    }

    /// Log progress at regular intervals or when forced
    pub fn log_progress(&mut self, force: bool) {
        let since_last = self
            .highest_applied_number
            .saturating_sub(self.last_logged_number);
        if (force || since_last >= LOG_INTERVAL) && !self.applied_numbers.is_empty() {
            info!(
                "Sync progress: {} blocks, {} transactions applied up to block {}",
                self.applied_numbers.len(),
                self.transactions_applied,
                self.highest_applied_number
            );
            self.last_logged_number = self.highest_applied_number;
        }
    }

    /// Warn about gaps in the applied block numbers.
    pub fn validate_completion(&self) {
        for (start, end) in self.check_for_gaps() {
            warn!("Gap detected: missing block numbers between {} and {}", start, end);
        }
    }

    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_number: self.start_number,
            highest_applied_number: self.highest_applied_number,
            blocks_applied: self.applied_numbers.len(),
            transactions_applied: self.transactions_applied,
            pending_reconciled: self.pending_reconciled,
            stale_token_updates: self.stale_token_updates,
            gaps: self.check_for_gaps(),
        }
    }
}

/// Statistics about one sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub start_number: u64,
    pub highest_applied_number: u64,
    pub blocks_applied: usize,
    pub transactions_applied: usize,
    pub pending_reconciled: usize,
    pub stale_token_updates: usize,
    pub gaps: Vec<(u64, u64)>,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Sync from {} to {}: {} blocks, {} transactions, {} pending reconciled{}{}",
            self.start_number,
            self.highest_applied_number,
            self.blocks_applied,
            self.transactions_applied,
            self.pending_reconciled,
            if self.stale_token_updates == 0 {
                String::new()
            } else {
                format!(", {} stale token updates dropped", self.stale_token_updates)
            },
            if self.gaps.is_empty() {
                String::new()
            } else {
                format!(" ({} gaps)", self.gaps.len())
            }
        )
    }
}
