//! Block sync engine and integration point for all sync services.
//!
//! This module defines the `SyncEngine`, which keeps the derived indexes in step with the chain.
//! It is the only driver of block replay:
//!
//! - `start` decides the initial height (checkpoint, chain head or a fixed height), optionally
//!   clearing the checkpoint first, and is retried every 2 seconds until it succeeds
//! - `catch_up` replays everything between the checkpoint and the chain head, one node-sized range
//!   at a time, advancing and flushing the checkpoint after each range
//! - `run` starts the engine and then polls `catch_up` at a fixed interval until cancelled
//!
//! Errors during a catch-up step are logged and the step is retried on the next poll, from the last
//! flushed checkpoint. A transaction that always fails therefore stalls the engine at its block.

use crate::chain::{ChainClient, ChainError, HttpNodeTransport, NodeTransport, split_range};
use crate::storage::Storage;
use crate::sync::{
	checkpoint::CheckpointService,
	events::EventDispatcher,
	progress_tracker::{SyncProgressTracker, SyncStats},
	types::SyncError,
};

use backoff::{backoff::Constant, future::retry_notify};
use parking_lot::{Mutex, RwLock};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Delay before retrying a failed `start`.
pub const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
	Stopped,
	Starting,
	Running,
}

/// Where syncing begins when the store holds no checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartingBlock {
	/// Resume from the checkpoint, or from the configured initial height on an empty store.
	Checkpoint,
	/// Only process blocks produced after startup.
	Last,
	/// Process starting at this block.
	Height(u64),
}

impl FromStr for StartingBlock {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"" | "checkpoint" => Ok(StartingBlock::Checkpoint),
			"last" => Ok(StartingBlock::Last),
			other => other
				.parse::<u64>()
				.map(StartingBlock::Height)
				.map_err(|_| format!("expected 'checkpoint', 'last' or a block height, got {:?}", s)),
		}
	}
}

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
	pub starting_block: StartingBlock,
	/// Height treated as already processed when the store has no checkpoint.
	pub initial_height: u64,
	/// Clear the checkpoint on startup and resync from the initial height.
	pub restart_sync: bool,
	/// Pause between catch-up steps.
	pub poll_interval: Duration,
	pub startup_retry_delay: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			starting_block: StartingBlock::Checkpoint,
			initial_height: 0,
			restart_sync: false,
			poll_interval: Duration::from_secs(1),
			startup_retry_delay: STARTUP_RETRY_DELAY,
		}
	}
}

/// Resets the `processing` flag when a catch-up step ends, however it ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

/// Main sync engine that coordinates chain access, replay and checkpointing.
pub struct SyncEngine<T = HttpNodeTransport> {
	chain: ChainClient<T>,
	storage: Arc<dyn Storage>,
	checkpoint: CheckpointService,
	dispatcher: EventDispatcher,
	config: SyncConfig,

	state: RwLock<SyncState>,
	processing: AtomicBool,
	initial_height: AtomicU64,
	progress: Mutex<SyncProgressTracker>,
}

impl<T: NodeTransport> SyncEngine<T> {
	/// Create a stopped engine. Nothing is read from the node or the store until `start`.
	pub fn new(
		chain: ChainClient<T>,
		storage: Arc<dyn Storage>,
		dispatcher: EventDispatcher,
		config: SyncConfig,
	) -> Self {
		let initial_height = config.initial_height;
		Self {
			chain,
			checkpoint: CheckpointService::new(storage.clone()),
			storage,
			dispatcher,
			config,
			state: RwLock::new(SyncState::Stopped),
			processing: AtomicBool::new(false),
			initial_height: AtomicU64::new(initial_height),
			progress: Mutex::new(SyncProgressTracker::new(initial_height)),
		}
	}

	pub fn state(&self) -> SyncState {
		*self.state.read()
	}

	/// Height used in place of a missing checkpoint, as decided by the last `start`.
	pub fn initial_height(&self) -> u64 {
		self.initial_height.load(Ordering::SeqCst)
	}

	pub fn stats(&self) -> SyncStats {
		self.progress.lock().get_stats()
	}

	/// The persisted checkpoint, or the initial height on an empty store.
	pub async fn processing_height(&self) -> Result<u64, SyncError> {
		self.checkpoint.processing_height(self.initial_height()).await
	}

	/// Determine the initial height and prepare the store. Returns the height sync resumes after.
	pub async fn start(&self) -> Result<u64, SyncError> {
		*self.state.write() = SyncState::Starting;

		let initial_height = match self.config.starting_block {
			StartingBlock::Checkpoint => self.config.initial_height,
			StartingBlock::Last => self.chain.get_height().await?,
			StartingBlock::Height(height) => height.saturating_sub(1),
		};

		if self.config.restart_sync {
			info!("Restart sync requested, clearing checkpoint");
			self.checkpoint.clear().await?;
		}

		self.initial_height.store(initial_height, Ordering::SeqCst);
		let resume_height = self.checkpoint.processing_height(initial_height).await?;
		*self.progress.lock() = SyncProgressTracker::new(resume_height);

		info!(
			"Sync engine started ({:?}): resuming after height {} with {} handler(s)",
			self.config.starting_block,
			resume_height,
			self.dispatcher.handler_count()
		);
		Ok(resume_height)
	}

	/// `start`, retried at a fixed delay until it succeeds or `cancel` fires.
	pub async fn start_with_retry(&self, cancel: &CancellationToken) -> Result<u64, SyncError> {
		let start = retry_notify(
			Constant::new(self.config.startup_retry_delay),
			move || async move { self.start().await.map_err(backoff::Error::transient) },
			|e: SyncError, next: Duration| {
				error!(
					"Failed to start sync engine: {}. Retrying in {}s",
					e,
					next.as_secs_f32()
				);
			},
		);

		tokio::select! {
			result = start => result,
			_ = cancel.cancelled() => {
				*self.state.write() = SyncState::Stopped;
				Err(SyncError::Cancelled)
			}
		}
	}

	/// Replay every block between the checkpoint and the chain head.
	///
	/// Returns the number of blocks processed, or `None` if another catch-up step was already
	/// running. Each node-sized range is flushed with its checkpoint before the next one starts; on
	/// error, ranges flushed so far stay processed and the failing one is left for the next call.
	pub async fn catch_up(&self) -> Result<Option<u64>, SyncError> {
		if self
			.processing
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			debug!("Catch-up already in progress, skipping");
			return Ok(None);
		}
		let _guard = ProcessingGuard(&self.processing);

		let chain_height = self.chain.get_height().await?;
		let checkpoint = self.processing_height().await?;

		if chain_height <= checkpoint {
			debug!(
				"Up to date at height {} (chain at {})",
				checkpoint, chain_height
			);
			return Ok(Some(0));
		}

		let ranges = split_range(checkpoint + 1, chain_height, self.chain.max_range());
		debug!(
			"Catching up from {} to {} in {} range(s)",
			checkpoint + 1,
			chain_height,
			ranges.len()
		);

		let mut processed = 0;
		for (from, to) in ranges {
			processed += self.process_range(from, to).await?;
			self.progress.lock().log_progress(chain_height, false);
		}

		self.progress.lock().log_progress(chain_height, true);
		Ok(Some(processed))
	}

	/// Fetch, replay and checkpoint one range.
	async fn process_range(&self, from: u64, to: u64) -> Result<u64, SyncError> {
		let blocks = self.chain.get_range(from, to).await?;

		let expected = to - from + 1;
		let contiguous = blocks
			.iter()
			.zip(from..=to)
			.all(|(block, height)| block.height == height);
		if blocks.len() as u64 != expected || !contiguous {
			return Err(ChainError::RangeError(format!(
				"node returned {} block(s) for range {}..={}",
				blocks.len(),
				from,
				to
			))
			.into());
		}

		for block in &blocks {
			let transactions = self.dispatcher.replay_block(block).await?;
			self.progress.lock().record_block(block.height, transactions);
		}

		self.checkpoint.save(to).await?;
		self.storage.flush().await?;
		self.progress.lock().record_range(to);

		debug!("Processed blocks {}..={}", from, to);
		Ok(expected)
	}

	/// Start, then poll the chain until `cancel` fires.
	pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
		match self.start_with_retry(&cancel).await {
			Ok(_) => {}
			Err(SyncError::Cancelled) => return Ok(()),
			Err(e) => return Err(e),
		}

		*self.state.write() = SyncState::Running;

		loop {
			if let Err(e) = self.catch_up().await {
				error!(
					"Catch-up failed, retrying in {}ms: {}",
					self.config.poll_interval.as_millis(),
					e
				);
			}

			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = tokio::time::sleep(self.config.poll_interval) => {}
			}
		}

		*self.state.write() = SyncState::Stopped;
		info!("Sync engine stopped: {}", self.stats().summary());
		Ok(())
	}
}
