//! Transaction dispatch for block replay.
//!
//! Indexers implement `TransactionHandler` and are registered once with an `EventDispatcher` at
//! startup. The sync engine replays each block through the dispatcher, which hands every
//! transaction to every handler in registration order and waits for all of them before moving on
//! to the next transaction. The first handler error stops dispatch and is returned to the engine,
//! which then leaves the checkpoint where it was.

use super::types::{IndexError, IndexedTransaction, SyncError};
use crate::chain::Block;
use std::sync::Arc;
use tracing::{debug, error};

/// Trait for consumers of the transaction stream.
///
/// Handlers should skip input they do not understand rather than fail: a returned error stalls
/// the whole pipeline at that transaction until it is fixed.
#[async_trait::async_trait]
pub trait TransactionHandler: Send + Sync {
    /// Handle one transaction.
    ///
    /// Called exactly once per dispatch, after every earlier transaction has been handled by
    /// every handler.
    async fn handle(&self, tx: &IndexedTransaction<'_>) -> Result<(), IndexError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that fans transactions out to the registered handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn TransactionHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a new handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Arc<dyn TransactionHandler>) {
        debug!("Registered handler {}", handler.name());
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch one transaction to all handlers, stopping at the first failure.
    pub async fn dispatch(&self, tx: &IndexedTransaction<'_>) -> Result<(), SyncError> {
        for handler in &self.handlers {
            if let Err(source) = handler.handle(tx).await {
                error!(
                    "Handler {} failed on transaction {} at block {} position {}: {}",
                    handler.name(),
                    tx.transaction.id,
                    tx.block_height,
                    tx.position,
                    source
                );
                return Err(SyncError::Handler {
                    handler: handler.name(),
                    block_height: tx.block_height,
                    position: tx.position,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Replay a block: every transaction in array order, tagged with its position.
    ///
    /// Returns the number of transactions dispatched.
    pub async fn replay_block(&self, block: &Block) -> Result<usize, SyncError> {
        for (position, transaction) in block.transactions.iter().enumerate() {
            let tx = IndexedTransaction {
                block_height: block.height,
                position,
                transaction,
            };
            self.dispatch(&tx).await?;
        }
        Ok(block.transactions.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::Transaction;
    use parking_lot::Mutex;

    /// Records `(handler, tx id, height, position)` for every call, optionally failing on one id.
    pub(crate) struct RecordingHandler {
        pub name: &'static str,
        pub log: Arc<Mutex<Vec<(&'static str, String, u64, usize)>>>,
        pub fail_on: Option<String>,
    }

    #[async_trait::async_trait]
    impl TransactionHandler for RecordingHandler {
        async fn handle(&self, tx: &IndexedTransaction<'_>) -> Result<(), IndexError> {
            if self.fail_on.as_deref() == Some(tx.transaction.id.as_str()) {
                return Err(IndexError::InvalidTransaction {
                    id: tx.transaction.id.clone(),
                    reason: "poison".to_string(),
                });
            }
            self.log.lock().push((
                self.name,
                tx.transaction.id.clone(),
                tx.block_height,
                tx.position,
            ));
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    pub(crate) fn transfer(id: &str, timestamp: u64) -> Transaction {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "type": 4,
            "sender": "3Nsender",
            "timestamp": timestamp,
            "fee": 1,
            "recipient": "3Nrecipient",
            "amount": 10
        }))
        .expect("valid transaction")
    }

    #[tokio::test]
    async fn test_every_handler_sees_a_transaction_before_the_next() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        for name in ["first", "second"] {
            dispatcher.register_handler(Arc::new(RecordingHandler {
                name,
                log: log.clone(),
                fail_on: None,
            }));
        }

        let block = Block {
            height: 7,
            timestamp: 0,
            transactions: vec![transfer("t0", 1), transfer("t1", 2), transfer("t2", 3)],
        };
        let count = dispatcher.replay_block(&block).await.expect("replay");

        assert_eq!(count, 3);
        let calls: Vec<(&str, String, usize)> = log
            .lock()
            .iter()
            .map(|(name, id, height, position)| {
                assert_eq!(*height, 7);
                (*name, id.clone(), *position)
            })
            .collect();
        assert_eq!(
            calls,
            vec![
                ("first", "t0".to_string(), 0),
                ("second", "t0".to_string(), 0),
                ("first", "t1".to_string(), 1),
                ("second", "t1".to_string(), 1),
                ("first", "t2".to_string(), 2),
                ("second", "t2".to_string(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_handler_error_stops_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Arc::new(RecordingHandler {
            name: "failing",
            log: log.clone(),
            fail_on: Some("t1".to_string()),
        }));
        dispatcher.register_handler(Arc::new(RecordingHandler {
            name: "after",
            log: log.clone(),
            fail_on: None,
        }));

        let block = Block {
            height: 3,
            timestamp: 0,
            transactions: vec![transfer("t0", 1), transfer("t1", 2), transfer("t2", 3)],
        };
        let err = dispatcher.replay_block(&block).await.expect_err("should fail");

        assert!(matches!(
            err,
            SyncError::Handler {
                handler: "failing",
                block_height: 3,
                position: 1,
                ..
            }
        ));
        // t0 went through both handlers; nothing after the failure did.
        assert_eq!(log.lock().len(), 2);
    }
}
