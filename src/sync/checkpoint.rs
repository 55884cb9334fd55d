//! Checkpoint persistence for block synchronization.
//!
//! The checkpoint is the highest block height that has been fully replayed and flushed. It lives
//! in the same store as the indexes under `processing-height`, so on the embedded backend it is
//! written in the same flush as the side effects that produced it.

use crate::storage::{Storage, StorageError, keys};
use crate::sync::types::SyncError;
use std::sync::Arc;
use tracing::info;

/// Service for reading and advancing the sync checkpoint.
#[derive(Clone)]
pub struct CheckpointService {
	storage: Arc<dyn Storage>,
}

impl CheckpointService {
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self { storage }
	}

	/// The persisted checkpoint, if any range has been processed yet.
	pub async fn load(&self) -> Result<Option<u64>, SyncError> {
		match self.storage.get(keys::PROCESSING_HEIGHT).await? {
			Some(raw) => raw.parse::<u64>().map(Some).map_err(|e| {
				SyncError::CheckpointError(format!("Invalid processing height {:?}: {}", raw, e))
			}),
			None => Ok(None),
		}
	}

	/// The persisted checkpoint, or `initial_height` on a store that has none.
	pub async fn processing_height(&self, initial_height: u64) -> Result<u64, SyncError> {
		Ok(self.load().await?.unwrap_or(initial_height))
	}

	/// Record `height` as processed. Durable after the next flush.
	pub async fn save(&self, height: u64) -> Result<(), StorageError> {
		self.storage
			.set(keys::PROCESSING_HEIGHT, &height.to_string())
			.await
	}

	/// Remove the checkpoint so the next sync starts from the initial height.
	pub async fn clear(&self) -> Result<(), StorageError> {
		self.storage.delete(keys::PROCESSING_HEIGHT).await?;
		self.storage.flush().await?;
		info!("Cleared sync checkpoint");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::EmbeddedStorage;
	use crate::storage::embedded::DEFAULT_FLUSH_INTERVAL;

	#[tokio::test]
	async fn test_empty_store_yields_initial_height() {
		let dir = tempfile::tempdir().expect("tempdir");
		let storage = Arc::new(EmbeddedStorage::open(dir.path(), DEFAULT_FLUSH_INTERVAL).expect("open"));
		let checkpoint = CheckpointService::new(storage.clone());

		assert_eq!(checkpoint.load().await.expect("load"), None);
		assert_eq!(checkpoint.processing_height(42).await.expect("height"), 42);

		checkpoint.save(500).await.expect("save");
		assert_eq!(checkpoint.processing_height(42).await.expect("height"), 500);

		checkpoint.clear().await.expect("clear");
		assert_eq!(checkpoint.processing_height(42).await.expect("height"), 42);
		storage.close().await.expect("close");
	}

	#[tokio::test]
	async fn test_corrupt_checkpoint_is_an_error() {
		let dir = tempfile::tempdir().expect("tempdir");
		let storage = Arc::new(EmbeddedStorage::open(dir.path(), DEFAULT_FLUSH_INTERVAL).expect("open"));
		storage.set(keys::PROCESSING_HEIGHT, "abc").await.expect("set");

		let checkpoint = CheckpointService::new(storage.clone());
		assert!(matches!(
			checkpoint.load().await,
			Err(SyncError::CheckpointError(_))
		));
		storage.close().await.expect("close");
	}
}
