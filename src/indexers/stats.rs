use crate::chain::TransactionType;
use crate::storage::{Storage, keys};
use crate::sync::{IndexError, IndexedTransaction, TransactionHandler};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

pub const TRANSACTIONS: &str = "transactions";
pub const ANCHORS: &str = "anchors";
pub const TRANSFERS: &str = "transfers";

/// Days since the Unix epoch (UTC) for a millisecond timestamp.
pub fn day_index(timestamp_ms: u64) -> Option<i64> {
	let millis = i64::try_from(timestamp_ms).ok()?;
	let time = DateTime::<Utc>::from_timestamp_millis(millis)?;
	Some((time - DateTime::UNIX_EPOCH).num_days())
}

/// Daily counters. Increment-only, so replays after a crash may double count.
pub struct StatsIndexer {
	storage: Arc<dyn Storage>,
}

impl StatsIndexer {
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self { storage }
	}

	/// Counter value for `category` on day `day`. Zero when never incremented.
	pub async fn get(&self, category: &str, day: i64) -> Result<i64, IndexError> {
		match self.storage.get(&keys::stats(category, day)).await? {
			Some(raw) => raw.parse::<i64>().map_err(|e| IndexError::InvalidTransaction {
				id: keys::stats(category, day),
				reason: format!("counter is not an integer: {}", e),
			}),
			None => Ok(0),
		}
	}

	async fn bump(&self, category: &str, day: i64, amount: i64) -> Result<(), IndexError> {
		if amount > 0 {
			self.storage.increment(&keys::stats(category, day), amount).await?;
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl TransactionHandler for StatsIndexer {
	async fn handle(&self, tx: &IndexedTransaction<'_>) -> Result<(), IndexError> {
		let transaction = tx.transaction;
		let Some(day) = day_index(transaction.timestamp) else {
			warn!(
				"Skipping stats for transaction {} with timestamp {}",
				transaction.id, transaction.timestamp
			);
			return Ok(());
		};

		let tx_type = transaction.tx_type();
		self.bump(TRANSACTIONS, day, 1).await?;
		if let Some(category) = tx_type.category() {
			self.bump(&format!("tx-{}", category), day, 1).await?;
		}

		match tx_type {
			TransactionType::Anchor | TransactionType::MappedAnchor => {
				self.bump(ANCHORS, day, transaction.anchors.len() as i64).await?;
			}
			TransactionType::Transfer => self.bump(TRANSFERS, day, 1).await?,
			TransactionType::MassTransfer => {
				self.bump(TRANSFERS, day, transaction.transfers.len() as i64).await?;
			}
			_ => {}
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"stats"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::Transaction;
	use crate::storage::EmbeddedStorage;
	use crate::storage::embedded::DEFAULT_FLUSH_INTERVAL;

	#[test]
	fn test_day_index() {
		assert_eq!(day_index(0), Some(0));
		assert_eq!(day_index(86_399_999), Some(0));
		assert_eq!(day_index(86_400_000), Some(1));
		// 2020-09-13T12:26:40Z
		assert_eq!(day_index(1_600_000_000_000), Some(18518));
		assert_eq!(day_index(u64::MAX), None);
	}

	#[tokio::test]
	async fn test_counts_per_category() {
		let dir = tempfile::tempdir().expect("tempdir");
		let storage = Arc::new(EmbeddedStorage::open(dir.path(), DEFAULT_FLUSH_INTERVAL).expect("open"));
		let indexer = StatsIndexer::new(storage.clone());

		let transactions: Vec<Transaction> = [
			serde_json::json!({"id": "t1", "type": 4, "sender": "a", "recipient": "b", "timestamp": 1_000}),
			serde_json::json!({"id": "t2", "type": 11, "sender": "a", "timestamp": 2_000,
				"transfers": [{"recipient": "b", "amount": 1}, {"recipient": "c", "amount": 1}]}),
			serde_json::json!({"id": "t3", "type": 15, "sender": "a", "timestamp": 3_000,
				"anchors": ["h1", "h2", "h3"]}),
			serde_json::json!({"id": "t4", "type": 15, "sender": "a", "timestamp": 86_400_000u64,
				"anchors": ["h4"]}),
		]
		.into_iter()
		.map(|raw| serde_json::from_value(raw).expect("valid transaction"))
		.collect();

		for (position, transaction) in transactions.iter().enumerate() {
			let tx = IndexedTransaction {
				block_height: 1,
				position,
				transaction,
			};
			indexer.handle(&tx).await.expect("handle");
		}

		assert_eq!(indexer.get(TRANSACTIONS, 0).await.expect("get"), 3);
		assert_eq!(indexer.get(TRANSFERS, 0).await.expect("get"), 3);
		assert_eq!(indexer.get(ANCHORS, 0).await.expect("get"), 3);
		assert_eq!(indexer.get("tx-transfer", 0).await.expect("get"), 2);
		assert_eq!(indexer.get("tx-anchor", 0).await.expect("get"), 1);
		assert_eq!(indexer.get(ANCHORS, 1).await.expect("get"), 1);
		assert_eq!(indexer.get(TRANSFERS, 1).await.expect("get"), 0);
		storage.close().await.expect("close");
	}
}
