//! Storage contract shared by the sync engine and every indexer.
//!
//! `Storage` is backend-agnostic: scalar values, flat objects, unordered sets and score-ordered
//! sets, all keyed by strings. Two implementations exist:
//!
//! - `embedded`: a `sled` database behind a write-behind cache. Writes become durable on
//!   `flush()`, which the sync engine calls after every processed range, so a checkpoint and the
//!   writes that produced it land on disk together.
//! - `remote`: Redis. Every write is durable once acknowledged and `flush()` does nothing.
//!
//! Missing keys never produce errors: `get`-style calls return `None` or an empty container, and
//! every other operation treats a missing key as an empty one.

use async_trait::async_trait;
use std::collections::HashMap;

/// Write-behind `sled` backend
pub mod embedded;
/// Redis backend
pub mod remote;

pub use embedded::EmbeddedStorage;
pub use remote::RemoteStorage;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Embedded database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend-agnostic key/value/set store.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Store `value` unless the key already holds one. Returns whatever the key holds afterwards.
    async fn add_if_absent(&self, key: &str, value: &str) -> Result<String, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Add `amount` to the integer at `key` (missing counts as zero) and return the new value.
    async fn increment(&self, key: &str, amount: i64) -> Result<i64, StorageError>;

    async fn get_object(&self, key: &str) -> Result<HashMap<String, String>, StorageError>;

    /// Replace the whole object at `key`.
    async fn set_object(
        &self,
        key: &str,
        fields: &HashMap<String, String>,
    ) -> Result<(), StorageError>;

    /// Set a single field, leaving the other fields of the object untouched.
    async fn add_object_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StorageError>;

    async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StorageError>;

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StorageError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError>;

    /// Insert `member` with `score`, or move it to `score` if already present.
    async fn add_sorted(&self, key: &str, member: &str, score: u64) -> Result<(), StorageError>;

    async fn count_sorted(&self, key: &str) -> Result<u64, StorageError>;

    /// Members ordered by descending score (newest first), skipping `offset` and returning at
    /// most `limit`.
    async fn range_sorted(
        &self,
        key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, StorageError>;

    /// Make every preceding write durable.
    async fn flush(&self) -> Result<(), StorageError>;

    /// Flush and release background resources.
    async fn close(&self) -> Result<(), StorageError>;
}

/// Logical key namespace.
pub mod keys {
    /// Highest fully processed block height.
    pub const PROCESSING_HEIGHT: &str = "processing-height";

    pub fn anchor(hash: &str) -> String {
        format!("anchor:{}", hash)
    }

    pub fn address_transactions(category: &str, address: &str) -> String {
        format!("tx:{}:{}", category, address)
    }

    pub fn stats(category: &str, day_index: i64) -> String {
        format!("stats:{}:{}", category, day_index)
    }

    pub fn verification(address: &str) -> String {
        format!("verification:{}", address)
    }

    pub fn verified_by(address: &str) -> String {
        format!("verified-by:{}", address)
    }
}
