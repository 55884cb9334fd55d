//! Command line and environment configuration.

use crate::chain::DEFAULT_MAX_RANGE;
use crate::sync::{StartingBlock, SyncConfig};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Which `Storage` backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
	/// Local `sled` database with write-behind caching
	Embedded,
	/// Remote Redis server
	Redis,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "ledger-index-sync")]
#[command(about = "Replays ledger blocks into derived indexes")]
#[command(version)]
pub struct Config {
	/// Base URL of the ledger node API
	#[arg(long, env = "NODE_URL", default_value = "http://localhost:6869")]
	pub node_url: String,

	/// Storage backend
	#[arg(long = "storage", env = "STORAGE_TYPE", value_enum, default_value_t = StorageKind::Embedded)]
	pub storage: StorageKind,

	/// Directory of the embedded database
	#[arg(long, env = "DB_PATH", default_value = "data")]
	pub db_path: PathBuf,

	/// Redis connection URL, required with `--storage redis`
	#[arg(long, env = "REDIS_URL", required_if_eq("storage", "redis"))]
	pub redis_url: Option<String>,

	/// Where to start without a checkpoint: `checkpoint`, `last` or a block height
	#[arg(long, env = "STARTING_BLOCK", default_value = "checkpoint")]
	pub starting_block: StartingBlock,

	/// Height treated as processed when starting from an empty store
	#[arg(long, default_value_t = 0)]
	pub initial_height: u64,

	/// Clear the checkpoint on startup and resync
	#[arg(long, env = "RESTART_SYNC")]
	pub restart_sync: bool,

	/// Pause between catch-up steps, in milliseconds
	#[arg(long, default_value_t = 1000)]
	pub poll_interval_ms: u64,

	/// Largest block range requested from the node at once
	#[arg(long, default_value_t = DEFAULT_MAX_RANGE)]
	pub max_range: u64,
}

impl Config {
	pub fn sync_config(&self) -> SyncConfig {
		SyncConfig {
			starting_block: self.starting_block,
			initial_height: self.initial_height,
			restart_sync: self.restart_sync,
			poll_interval: Duration::from_millis(self.poll_interval_ms),
			..SyncConfig::default()
		}
	}
}
