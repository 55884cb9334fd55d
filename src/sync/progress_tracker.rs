//! Progress tracking for block synchronization.
//!
//! This module provides the `SyncProgressTracker`, which counts the blocks, transactions and ranges
//! processed since the engine started and logs progress at regular intervals while a large backlog
//! is being replayed.

use tracing::info;

/// Log progress at least every this many blocks.
const LOG_EVERY_BLOCKS: u64 = 1000;

/// Service for tracking synchronization progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// Height the engine resumed from
    start_height: u64,
    /// The highest block height we've processed
    highest_processed_height: u64,
    /// Total blocks processed
    blocks_processed: u64,
    /// Total transactions dispatched
    transactions_processed: u64,
    /// Total ranges flushed
    ranges_flushed: u64,
    /// Height at which we last logged progress
    last_logged_height: u64,
}

impl SyncProgressTracker {
    /// Create a new progress tracker starting from the given height.
    pub fn new(start_height: u64) -> Self {
        Self {
            start_height,
            highest_processed_height: start_height,
            blocks_processed: 0,
            transactions_processed: 0,
            ranges_flushed: 0,
            last_logged_height: start_height,
        }
    }

    /// Record a replayed block and the number of transactions it carried
    pub fn record_block(&mut self, height: u64, transactions: usize) {
        self.highest_processed_height = self.highest_processed_height.max(height);
        self.blocks_processed += 1;
        self.transactions_processed += transactions as u64;
    }

    /// Record a flushed range
    pub fn record_range(&mut self, to: u64) {
        self.highest_processed_height = self.highest_processed_height.max(to);
        self.ranges_flushed += 1;
    }

    /// Log progress at regular intervals or when forced
    pub fn log_progress(&mut self, chain_height: u64, force: bool) {
        let blocks_since_last_log = self
            .highest_processed_height
            .saturating_sub(self.last_logged_height);
        let should_log = force || blocks_since_last_log >= LOG_EVERY_BLOCKS;

        if should_log && self.blocks_processed > 0 {
            info!(
                "Sync progress: {} blocks, {} transactions processed up to height {} (chain at {})",
                self.blocks_processed,
                self.transactions_processed,
                self.highest_processed_height,
                chain_height
            );
            self.last_logged_height = self.highest_processed_height;
        }
    }

    /// Get sync statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_height: self.start_height,
            highest_processed_height: self.highest_processed_height,
            blocks_processed: self.blocks_processed,
            transactions_processed: self.transactions_processed,
            ranges_flushed: self.ranges_flushed,
        }
    }
}

/// Statistics about the sync progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub start_height: u64,
    pub highest_processed_height: u64,
    pub blocks_processed: u64,
    pub transactions_processed: u64,
    pub ranges_flushed: u64,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Sync from {} to {}: {} blocks, {} transactions, {} ranges",
            self.start_height,
            self.highest_processed_height,
            self.blocks_processed,
            self.transactions_processed,
            self.ranges_flushed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_blocks_and_ranges() {
        let mut tracker = SyncProgressTracker::new(10);
        tracker.record_block(11, 3);
        tracker.record_block(12, 0);
        tracker.record_range(12);
        tracker.log_progress(20, true);

        let stats = tracker.get_stats();
        assert_eq!(stats.highest_processed_height, 12);
        assert_eq!(stats.blocks_processed, 2);
        assert_eq!(stats.transactions_processed, 3);
        assert_eq!(stats.ranges_flushed, 1);
        assert_eq!(
            stats.summary(),
            "Sync from 10 to 12: 2 blocks, 3 transactions, 1 ranges"
        );
    }
}
