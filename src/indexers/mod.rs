//! Derived indexers
//!
//! Each indexer is a `TransactionHandler` that reads the replayed transaction stream and writes
//! through the shared `Storage`. Indexers validate defensively: input they cannot make sense of
//! is logged and skipped, because a handler error stalls the whole pipeline.
//!
//! Every write except the statistics counters is idempotent, so replaying a range after a crash
//! leaves the anchor, address and verification indexes as a single pass would.

/// Per-address transaction lists
pub mod address;
/// First-writer-wins anchor records
pub mod anchor;
/// Daily counters
pub mod stats;
/// Verification relationship records
pub mod verification;

pub use address::AddressIndexer;
pub use anchor::{AnchorIndexer, AnchorRecord};
pub use stats::StatsIndexer;
pub use verification::{VerificationIndexer, VerificationRelationships};

use crate::storage::Storage;
use crate::sync::EventDispatcher;
use std::sync::Arc;

/// Register every indexer with `dispatcher`, all writing to `storage`.
pub fn register_all(dispatcher: &mut EventDispatcher, storage: Arc<dyn Storage>) {
	dispatcher.register_handler(Arc::new(AnchorIndexer::new(storage.clone())));
	dispatcher.register_handler(Arc::new(AddressIndexer::new(storage.clone())));
	dispatcher.register_handler(Arc::new(VerificationIndexer::new(storage.clone())));
	dispatcher.register_handler(Arc::new(StatsIndexer::new(storage)));
}
