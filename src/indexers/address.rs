use crate::storage::{Storage, keys};
use crate::sync::{IndexError, IndexedTransaction, TransactionHandler};
use std::sync::Arc;
use tracing::warn;

/// Category every indexed transaction is listed under.
pub const ALL_CATEGORY: &str = "all";

/// Per-address transaction lists, newest first.
///
/// Every address a transaction touches gets the transaction id under `all` and under the
/// category of its type, scored by the transaction timestamp.
pub struct AddressIndexer {
	storage: Arc<dyn Storage>,
}

impl AddressIndexer {
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self { storage }
	}

	/// A page of transaction ids for `address`, newest first.
	pub async fn transactions(
		&self,
		address: &str,
		category: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<String>, IndexError> {
		let key = keys::address_transactions(category, address);
		Ok(self.storage.range_sorted(&key, limit, offset).await?)
	}

	pub async fn count(&self, address: &str, category: &str) -> Result<u64, IndexError> {
		let key = keys::address_transactions(category, address);
		Ok(self.storage.count_sorted(&key).await?)
	}
}

#[async_trait::async_trait]
impl TransactionHandler for AddressIndexer {
	async fn handle(&self, tx: &IndexedTransaction<'_>) -> Result<(), IndexError> {
		let transaction = tx.transaction;
		if transaction.id.is_empty() {
			warn!(
				"Skipping transaction without id at block {} position {}",
				tx.block_height, tx.position
			);
			return Ok(());
		}

		let category = transaction.tx_type().category();
		for address in transaction.addresses() {
			self.storage
				.add_sorted(
					&keys::address_transactions(ALL_CATEGORY, address),
					&transaction.id,
					transaction.timestamp,
				)
				.await?;

			if let Some(category) = category {
				self.storage
					.add_sorted(
						&keys::address_transactions(category, address),
						&transaction.id,
						transaction.timestamp,
					)
					.await?;
			}
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"address"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::Transaction;
	use crate::storage::EmbeddedStorage;
	use crate::storage::embedded::DEFAULT_FLUSH_INTERVAL;

	#[tokio::test]
	async fn test_mass_transfer_indexes_every_recipient() {
		let dir = tempfile::tempdir().expect("tempdir");
		let storage = Arc::new(EmbeddedStorage::open(dir.path(), DEFAULT_FLUSH_INTERVAL).expect("open"));
		let indexer = AddressIndexer::new(storage.clone());

		let transaction: Transaction = serde_json::from_value(serde_json::json!({
			"id": "mt1",
			"type": 11,
			"sender": "3Nsender",
			"timestamp": 5_000,
			"transfers": [
				{"recipient": "3Nalice", "amount": 1},
				{"recipient": "3Nbob", "amount": 2}
			]
		}))
		.expect("valid transaction");
		let tx = IndexedTransaction {
			block_height: 1,
			position: 0,
			transaction: &transaction,
		};
		indexer.handle(&tx).await.expect("handle");

		for address in ["3Nsender", "3Nalice", "3Nbob"] {
			assert_eq!(
				indexer.transactions(address, ALL_CATEGORY, 10, 0).await.expect("range"),
				vec!["mt1".to_string()]
			);
			assert_eq!(indexer.count(address, "transfer").await.expect("count"), 1);
		}
		assert_eq!(indexer.count("3Nsender", "anchor").await.expect("count"), 0);
		storage.close().await.expect("close");
	}

	#[tokio::test]
	async fn test_newest_transactions_first() {
		let dir = tempfile::tempdir().expect("tempdir");
		let storage = Arc::new(EmbeddedStorage::open(dir.path(), DEFAULT_FLUSH_INTERVAL).expect("open"));
		let indexer = AddressIndexer::new(storage.clone());

		for (i, timestamp) in [300u64, 100, 200].into_iter().enumerate() {
			let transaction = crate::sync::events::tests::transfer(&format!("t{}", timestamp), timestamp);
			let tx = IndexedTransaction {
				block_height: 1,
				position: i,
				transaction: &transaction,
			};
			indexer.handle(&tx).await.expect("handle");
		}

		assert_eq!(
			indexer.transactions("3Nrecipient", "transfer", 2, 0).await.expect("range"),
			vec!["t300".to_string(), "t200".to_string()]
		);
		assert_eq!(
			indexer.transactions("3Nrecipient", "transfer", 2, 2).await.expect("range"),
			vec!["t100".to_string()]
		);
		storage.close().await.expect("close");
	}
}
