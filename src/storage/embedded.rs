//! Embedded storage backend: `sled` behind a write-behind cache.
//!
//! Writes land in an in-memory map (`key -> value or tombstone`) and reach disk only when the
//! cache is flushed, either explicitly or by a background task every 10 seconds. A flush swaps the
//! live map out into a "flushing" snapshot, writes the snapshot as one `sled::Batch`, and only then
//! drops it. Reads check the live map, then the snapshot, then disk, so every write stays visible
//! while it is in flight.
//!
//! Flushes are serialized by an async lock. Reads and writes never wait for a flush: writes issued
//! during a flush go to the fresh live map.
//!
//! Score-ordered sets are stored as key fragments `{key}!{score:020}:{member}` holding the member,
//! plus a member index `{key}#{member}` holding its current score. Objects and unordered sets are
//! JSON values under a single key.

use super::{Storage, StorageError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Interval of the background flush task.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Pending writes. `None` marks a deletion.
type WriteCache = BTreeMap<String, Option<String>>;

struct Inner {
	db: sled::Db,
	cache: Mutex<WriteCache>,
	flushing: RwLock<Arc<WriteCache>>,
	flush_lock: tokio::sync::Mutex<()>,
}

impl Inner {
	/// Look a key up in the live cache and the flushing snapshot.
	///
	/// `Some(None)` means the key was deleted and the deletion is not on disk yet.
	fn cached(&self, cache: &WriteCache, key: &str) -> Option<Option<String>> {
		if let Some(value) = cache.get(key) {
			return Some(value.clone());
		}
		self.flushing.read().get(key).cloned()
	}

	fn read_disk(&self, key: &str) -> Result<Option<String>, StorageError> {
		match self.db.get(key.as_bytes())? {
			Some(bytes) => Ok(Some(decode_utf8(key, &bytes)?)),
			None => Ok(None),
		}
	}

	fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		{
			let cache = self.cache.lock();
			if let Some(value) = self.cached(&cache, key) {
				return Ok(value);
			}
		}
		self.read_disk(key)
	}

	fn put(&self, key: &str, value: Option<String>) {
		self.cache.lock().insert(key.to_string(), value);
	}

	/// Read-modify-write of a single key under the cache lock.
	///
	/// `update` receives the current value and returns the value to store (`None` deletes) along
	/// with the result of the operation.
	fn update<R>(
		&self,
		key: &str,
		update: impl FnOnce(Option<String>) -> Result<(Option<String>, R), StorageError>,
	) -> Result<R, StorageError> {
		let mut cache = self.cache.lock();
		let current = match self.cached(&cache, key) {
			Some(value) => value,
			None => self.read_disk(key)?,
		};
		let (next, result) = update(current)?;
		cache.insert(key.to_string(), next);
		Ok(result)
	}

	/// Insert or move a sorted-set member.
	///
	/// The member index, the new fragment and the tombstone for a moved fragment are written under
	/// one cache lock, so a flush never sees one without the others. The fragment is rewritten even
	/// when the score is unchanged, which repairs a member index left without its fragment.
	fn add_sorted(&self, key: &str, member: &str, score: u64) -> Result<(), StorageError> {
		let index_key = member_key(key, member);
		let mut cache = self.cache.lock();
		let previous = match self.cached(&cache, &index_key) {
			Some(value) => value,
			None => self.read_disk(&index_key)?,
		};

		if let Some(previous) = previous {
			let previous = previous.parse::<u64>().map_err(|e| StorageError::Corrupt {
				key: index_key.clone(),
				reason: format!("expected score: {}", e),
			})?;
			if previous != score {
				cache.insert(fragment_key(key, previous, member), None);
			}
		}

		cache.insert(index_key, Some(score.to_string()));
		cache.insert(fragment_key(key, score, member), Some(member.to_string()));
		Ok(())
	}

	/// Every live entry under `prefix`, merged from disk and both caches.
	fn scan_prefix(&self, prefix: &str) -> Result<BTreeMap<String, String>, StorageError> {
		// Snapshot the caches before touching disk: a flush finishing in between then only
		// moves entries we already hold.
		let overlay: Vec<(String, Option<String>)> = {
			let cache = self.cache.lock();
			let flushing = self.flushing.read();
			let mut overlay: Vec<(String, Option<String>)> = in_prefix(&flushing, prefix).collect();
			overlay.extend(in_prefix(&cache, prefix));
			overlay
		};

		let mut merged = BTreeMap::new();
		for entry in self.db.scan_prefix(prefix.as_bytes()) {
			let (key, value) = entry?;
			let key = decode_utf8(prefix, &key)?;
			let value = decode_utf8(&key, &value)?;
			merged.insert(key, value);
		}

		for (key, value) in overlay {
			match value {
				Some(value) => merged.insert(key, value),
				None => merged.remove(&key),
			};
		}

		Ok(merged)
	}

	/// Move the live cache into the flushing snapshot. Returns `None` if nothing is pending.
	fn take_snapshot(&self) -> Option<Arc<WriteCache>> {
		let mut cache = self.cache.lock();
		if cache.is_empty() {
			return None;
		}
		let snapshot = Arc::new(std::mem::take(&mut *cache));
		*self.flushing.write() = snapshot.clone();
		Some(snapshot)
	}

	/// Write a snapshot to disk as one batch, then drop it.
	///
	/// On failure the snapshot is merged back into the live cache underneath any newer writes.
	async fn write_snapshot(&self, snapshot: Arc<WriteCache>) -> Result<(), StorageError> {
		let mut batch = sled::Batch::default();
		for (key, value) in snapshot.iter() {
			match value {
				Some(value) => batch.insert(key.as_bytes(), value.as_bytes()),
				None => batch.remove(key.as_bytes()),
			}
		}

		let db = self.db.clone();
		let result = match tokio::task::spawn_blocking(move || {
			db.apply_batch(batch)?;
			db.flush()?;
			Ok::<(), sled::Error>(())
		})
		.await
		{
			Ok(result) => result.map_err(StorageError::from),
			Err(e) => Err(StorageError::Io(std::io::Error::other(e))),
		};

		match result {
			Ok(()) => {
				*self.flushing.write() = Arc::new(WriteCache::new());
				debug!("Flushed {} cached writes to disk", snapshot.len());
				Ok(())
			}
			Err(e) => {
				self.restore_snapshot(&snapshot);
				Err(e)
			}
		}
	}

	/// Put a snapshot that failed to reach disk back into the live cache. Entries written since
	/// the snapshot was taken win.
	fn restore_snapshot(&self, snapshot: &WriteCache) {
		let mut cache = self.cache.lock();
		for (key, value) in snapshot.iter() {
			cache.entry(key.clone()).or_insert_with(|| value.clone());
		}
		*self.flushing.write() = Arc::new(WriteCache::new());
	}

	async fn flush(&self) -> Result<(), StorageError> {
		let _guard = self.flush_lock.lock().await;
		match self.take_snapshot() {
			Some(snapshot) => self.write_snapshot(snapshot).await,
			None => Ok(()),
		}
	}
}

fn in_prefix<'a>(
	cache: &'a WriteCache,
	prefix: &'a str,
) -> impl Iterator<Item = (String, Option<String>)> + 'a {
	cache
		.range(prefix.to_string()..)
		.take_while(move |(key, _)| key.starts_with(prefix))
		.map(|(key, value)| (key.clone(), value.clone()))
}

fn decode_utf8(key: &str, bytes: &[u8]) -> Result<String, StorageError> {
	String::from_utf8(bytes.to_vec()).map_err(|e| StorageError::Corrupt {
		key: key.to_string(),
		reason: e.to_string(),
	})
}

fn fragment_prefix(key: &str) -> String {
	format!("{}!", key)
}

fn fragment_key(key: &str, score: u64, member: &str) -> String {
	format!("{}!{:020}:{}", key, score, member)
}

fn member_key(key: &str, member: &str) -> String {
	format!("{}#{}", key, member)
}

fn parse_object(key: &str, raw: Option<String>) -> Result<HashMap<String, String>, StorageError> {
	match raw {
		Some(raw) => serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
			key: key.to_string(),
			reason: format!("expected object: {}", e),
		}),
		None => Ok(HashMap::new()),
	}
}

fn parse_set(key: &str, raw: Option<String>) -> Result<BTreeSet<String>, StorageError> {
	match raw {
		Some(raw) => serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
			key: key.to_string(),
			reason: format!("expected set: {}", e),
		}),
		None => Ok(BTreeSet::new()),
	}
}

/// `Storage` on a local `sled` database with write-behind caching.
pub struct EmbeddedStorage {
	inner: Arc<Inner>,
	flusher: Mutex<Option<JoinHandle<()>>>,
	shutdown: CancellationToken,
}

impl EmbeddedStorage {
	/// Open (or create) the database at `path` and start the periodic flush task.
	///
	/// Must be called inside a Tokio runtime.
	pub fn open(path: impl AsRef<Path>, flush_interval: Duration) -> Result<Self, StorageError> {
		let path = path.as_ref();
		std::fs::create_dir_all(path)?;
		let db = sled::open(path)?;

		let inner = Arc::new(Inner {
			db,
			cache: Mutex::new(WriteCache::new()),
			flushing: RwLock::new(Arc::new(WriteCache::new())),
			flush_lock: tokio::sync::Mutex::new(()),
		});

		let shutdown = CancellationToken::new();
		let flusher = tokio::spawn(periodic_flush(
			inner.clone(),
			flush_interval,
			shutdown.clone(),
		));

		info!("Opened embedded storage at {:?}", path);

		Ok(Self {
			inner,
			flusher: Mutex::new(Some(flusher)),
			shutdown,
		})
	}
}

async fn periodic_flush(inner: Arc<Inner>, interval: Duration, shutdown: CancellationToken) {
	let mut ticker = tokio::time::interval(interval);
	ticker.tick().await;

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			_ = ticker.tick() => {
				if let Err(e) = inner.flush().await {
					error!("Periodic flush failed: {}", e);
				}
			}
		}
	}
}

impl Drop for EmbeddedStorage {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}

#[async_trait]
impl Storage for EmbeddedStorage {
	async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		self.inner.get(key)
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		self.inner.put(key, Some(value.to_string()));
		Ok(())
	}

	async fn add_if_absent(&self, key: &str, value: &str) -> Result<String, StorageError> {
		self.inner.update(key, |current| match current {
			Some(existing) => Ok((Some(existing.clone()), existing)),
			None => Ok((Some(value.to_string()), value.to_string())),
		})
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.inner.put(key, None);
		Ok(())
	}

	async fn increment(&self, key: &str, amount: i64) -> Result<i64, StorageError> {
		self.inner.update(key, |current| {
			let current = match current {
				Some(raw) => raw.parse::<i64>().map_err(|e| StorageError::Corrupt {
					key: key.to_string(),
					reason: format!("expected integer: {}", e),
				})?,
				None => 0,
			};
			let next = current + amount;
			Ok((Some(next.to_string()), next))
		})
	}

	async fn get_object(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
		parse_object(key, self.inner.get(key)?)
	}

	async fn set_object(
		&self,
		key: &str,
		fields: &HashMap<String, String>,
	) -> Result<(), StorageError> {
		let raw = serde_json::to_string(fields)?;
		self.inner.put(key, Some(raw));
		Ok(())
	}

	async fn add_object_field(
		&self,
		key: &str,
		field: &str,
		value: &str,
	) -> Result<(), StorageError> {
		self.inner.update(key, |current| {
			let mut object = parse_object(key, current)?;
			object.insert(field.to_string(), value.to_string());
			Ok((Some(serde_json::to_string(&object)?), ()))
		})
	}

	async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StorageError> {
		self.inner.update(key, |current| {
			let mut members = parse_set(key, current)?;
			members.insert(member.to_string());
			Ok((Some(serde_json::to_string(&members)?), ()))
		})
	}

	async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StorageError> {
		self.inner.update(key, |current| {
			let mut members = parse_set(key, current)?;
			members.remove(member);
			if members.is_empty() {
				Ok((None, ()))
			} else {
				Ok((Some(serde_json::to_string(&members)?), ()))
			}
		})
	}

	async fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError> {
		Ok(parse_set(key, self.inner.get(key)?)?.into_iter().collect())
	}

	async fn add_sorted(&self, key: &str, member: &str, score: u64) -> Result<(), StorageError> {
		self.inner.add_sorted(key, member, score)
	}

	async fn count_sorted(&self, key: &str) -> Result<u64, StorageError> {
		Ok(self.inner.scan_prefix(&fragment_prefix(key))?.len() as u64)
	}

	async fn range_sorted(
		&self,
		key: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<String>, StorageError> {
		let fragments = self.inner.scan_prefix(&fragment_prefix(key))?;
		Ok(fragments
			.into_values()
			.rev()
			.skip(offset)
			.take(limit)
			.collect())
	}

	async fn flush(&self) -> Result<(), StorageError> {
		self.inner.flush().await
	}

	async fn close(&self) -> Result<(), StorageError> {
		self.shutdown.cancel();
		let flusher = self.flusher.lock().take();
		if let Some(flusher) = flusher {
			if let Err(e) = flusher.await {
				error!("Flush task ended abnormally: {}", e);
			}
		}
		self.inner.flush().await?;
		info!("Closed embedded storage");
		Ok(())
	}
}
