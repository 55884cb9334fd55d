//! Block Synchronization Module
//!
//! This module provides the core logic for keeping the derived indexes in step with the ledger.
//! It is composed of several submodules, each responsible for a specific aspect of the sync process:
//!
//! - `engine`: The state machine that owns the poll loop. It discovers unprocessed ranges, fetches
//!   them through the chain client and replays them in order.
//! - `events`: Defines the `TransactionHandler` trait implemented by indexers and the dispatcher
//!   that fans transactions out to them.
//! - `checkpoint`: Reads, advances and clears the persisted processing height.
//! - `progress_tracker`: Tracks sync progress and provides statistics.
//!
//! The engine is the only driver of block replay. Indexers are passive consumers registered with
//! the dispatcher at startup.

/// Persisted processing height
pub mod checkpoint;
/// Main coordinator for block sync
pub mod engine;
/// Transaction handler trait and dispatcher
pub mod events;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Shared sync types and errors
pub mod types;

pub use engine::*;
pub use events::{EventDispatcher, TransactionHandler};
pub use types::*;
