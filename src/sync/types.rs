use crate::chain::{ChainError, Transaction};
use crate::storage::StorageError;

/// A transaction tagged with where it sits on the chain.
///
/// `position` is the index of the transaction in its block's transaction list.
#[derive(Debug, Clone, Copy)]
pub struct IndexedTransaction<'a> {
	pub block_height: u64,
	pub position: usize,
	pub transaction: &'a Transaction,
}

/// Error raised by an indexer while handling a transaction
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Invalid transaction {id}: {reason}")]
	InvalidTransaction { id: String, reason: String },
}

/// Error types for the sync engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Chain error: {0}")]
	ChainError(#[from] ChainError),

	#[error("Storage error: {0}")]
	StorageError(#[from] StorageError),

	#[error("Handler {handler} failed at block {block_height} position {position}: {source}")]
	Handler {
		handler: &'static str,
		block_height: u64,
		position: usize,
		#[source]
		source: IndexError,
	},

	#[error("Checkpoint error: {0}")]
	CheckpointError(String),

	#[error("Sync cancelled")]
	Cancelled,
}
