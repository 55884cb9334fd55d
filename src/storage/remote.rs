//! Remote storage backend on Redis.
//!
//! Every write goes straight to the server and is durable once acknowledged, so `flush()` is a
//! no-op. Counters use `INCRBY`, objects are Redis hashes and score-ordered sets are native sorted
//! sets. There is no grouping across keys: after a crash the checkpoint may lag behind side effects
//! that already landed, and replaying those blocks can double-count counters.

use super::{Storage, StorageError};
use async_trait::async_trait;
use backoff::{backoff::Constant, future::retry_notify};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Delay between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// `Storage` on a Redis server.
#[derive(Clone)]
pub struct RemoteStorage {
	conn: ConnectionManager,
}

impl RemoteStorage {
	/// Connect to `redis_url`, retrying every 2 seconds until the server answers.
	///
	/// Only a malformed URL fails; an unreachable server is waited for indefinitely.
	pub async fn connect(redis_url: &str) -> Result<Self, StorageError> {
		let conn = retry_notify(
			Constant::new(CONNECT_RETRY_DELAY),
			move || async move {
				let client = redis::Client::open(redis_url).map_err(backoff::Error::permanent)?;
				ConnectionManager::new(client)
					.await
					.map_err(backoff::Error::transient)
			},
			|e: redis::RedisError, next: Duration| {
				warn!(
					"Failed to connect to Redis: {}. Retrying in {}s",
					e,
					next.as_secs()
				);
			},
		)
		.await?;

		info!("Connected to Redis");
		Ok(Self { conn })
	}

	fn conn(&self) -> ConnectionManager {
		self.conn.clone()
	}
}

/// Inclusive ZREVRANGE indices for a page. `limit` must be non-zero. Indices past `isize::MAX`
/// are clamped, which Redis treats as "to the end".
fn zrevrange_bounds(limit: usize, offset: usize) -> (isize, isize) {
	let stop = offset.saturating_add(limit - 1);
	(
		isize::try_from(offset).unwrap_or(isize::MAX),
		isize::try_from(stop).unwrap_or(isize::MAX),
	)
}

#[async_trait]
impl Storage for RemoteStorage {
	async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.conn().get(key).await?)
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		let _: () = self.conn().set(key, value).await?;
		Ok(())
	}

	async fn add_if_absent(&self, key: &str, value: &str) -> Result<String, StorageError> {
		let mut conn = self.conn();
		let stored: bool = conn.set_nx(key, value).await?;
		if stored {
			return Ok(value.to_string());
		}
		let existing: Option<String> = conn.get(key).await?;
		Ok(existing.unwrap_or_else(|| value.to_string()))
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let _: () = self.conn().del(key).await?;
		Ok(())
	}

	async fn increment(&self, key: &str, amount: i64) -> Result<i64, StorageError> {
		Ok(self.conn().incr(key, amount).await?)
	}

	async fn get_object(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
		Ok(self.conn().hgetall(key).await?)
	}

	async fn set_object(
		&self,
		key: &str,
		fields: &HashMap<String, String>,
	) -> Result<(), StorageError> {
		let mut conn = self.conn();
		let mut pipe = redis::pipe();
		pipe.atomic().del(key).ignore();
		if !fields.is_empty() {
			let items: Vec<(&String, &String)> = fields.iter().collect();
			pipe.hset_multiple(key, &items[..]).ignore();
		}
		let _: () = pipe.query_async(&mut conn).await?;
		Ok(())
	}

	async fn add_object_field(
		&self,
		key: &str,
		field: &str,
		value: &str,
	) -> Result<(), StorageError> {
		let _: () = self.conn().hset(key, field, value).await?;
		Ok(())
	}

	async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StorageError> {
		let _: () = self.conn().sadd(key, member).await?;
		Ok(())
	}

	async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StorageError> {
		let _: () = self.conn().srem(key, member).await?;
		Ok(())
	}

	async fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError> {
		let mut members: Vec<String> = self.conn().smembers(key).await?;
		members.sort();
		Ok(members)
	}

	async fn add_sorted(&self, key: &str, member: &str, score: u64) -> Result<(), StorageError> {
		let _: () = self.conn().zadd(key, member, score).await?;
		Ok(())
	}

	async fn count_sorted(&self, key: &str) -> Result<u64, StorageError> {
		Ok(self.conn().zcard(key).await?)
	}

	async fn range_sorted(
		&self,
		key: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<String>, StorageError> {
		if limit == 0 {
			return Ok(Vec::new());
		}
		let (start, stop) = zrevrange_bounds(limit, offset);
		Ok(self.conn().zrevrange(key, start, stop).await?)
	}

	async fn flush(&self) -> Result<(), StorageError> {
		Ok(())
	}

	async fn close(&self) -> Result<(), StorageError> {
		info!("Closed Redis storage");
		Ok(())
	}
}
