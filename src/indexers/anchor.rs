use crate::chain::TransactionType;
use crate::storage::{Storage, keys};
use crate::sync::{IndexError, IndexedTransaction, TransactionHandler};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where an anchored hash was first seen on the chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
	pub transaction_id: String,
	pub block_height: u64,
	pub position: usize,
}

/// Records the proof location of every anchored hash. First writer wins.
pub struct AnchorIndexer {
	storage: Arc<dyn Storage>,
}

impl AnchorIndexer {
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self { storage }
	}

	pub async fn get_anchor(&self, hash: &str) -> Result<Option<AnchorRecord>, IndexError> {
		match self.storage.get(&keys::anchor(hash)).await? {
			Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
			None => Ok(None),
		}
	}
}

#[async_trait::async_trait]
impl TransactionHandler for AnchorIndexer {
	async fn handle(&self, tx: &IndexedTransaction<'_>) -> Result<(), IndexError> {
		let transaction = tx.transaction;
		if !matches!(
			transaction.tx_type(),
			TransactionType::Anchor | TransactionType::MappedAnchor
		) {
			return Ok(());
		}

		let record = serde_json::to_string(&AnchorRecord {
			transaction_id: transaction.id.clone(),
			block_height: tx.block_height,
			position: tx.position,
		})?;

		for anchor in &transaction.anchors {
			let hash = anchor.hash();
			if hash.is_empty() {
				warn!("Skipping empty anchor in transaction {}", transaction.id);
				continue;
			}

			let stored = self.storage.add_if_absent(&keys::anchor(hash), &record).await?;
			if stored != record {
				debug!(
					"Anchor {} already recorded, ignoring transaction {}",
					hash, transaction.id
				);
			}
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"anchor"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::Transaction;
	use crate::storage::EmbeddedStorage;
	use crate::storage::embedded::DEFAULT_FLUSH_INTERVAL;

	fn anchor_tx(id: &str, anchors: serde_json::Value) -> Transaction {
		serde_json::from_value(serde_json::json!({
			"id": id,
			"type": 15,
			"sender": "3Nsender",
			"timestamp": 1,
			"anchors": anchors
		}))
		.expect("valid transaction")
	}

	#[tokio::test]
	async fn test_first_anchor_wins() {
		let dir = tempfile::tempdir().expect("tempdir");
		let storage = Arc::new(EmbeddedStorage::open(dir.path(), DEFAULT_FLUSH_INTERVAL).expect("open"));
		let indexer = AnchorIndexer::new(storage.clone());

		let first = anchor_tx("a1", serde_json::json!(["h1", ""]));
		let second = anchor_tx("a2", serde_json::json!(["h1", "h2"]));
		for (block_height, transaction) in [(10, &first), (20, &second)] {
			let tx = IndexedTransaction {
				block_height,
				position: 3,
				transaction,
			};
			indexer.handle(&tx).await.expect("handle");
		}

		assert_eq!(
			indexer.get_anchor("h1").await.expect("get"),
			Some(AnchorRecord {
				transaction_id: "a1".to_string(),
				block_height: 10,
				position: 3,
			})
		);
		assert_eq!(
			indexer.get_anchor("h2").await.expect("get").map(|r| r.block_height),
			Some(20)
		);
		assert_eq!(indexer.get_anchor("missing").await.expect("get"), None);
		storage.close().await.expect("close");
	}
}
