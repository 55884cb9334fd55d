mod chain;
mod config;
mod indexers;
mod storage;
mod sync;

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::{ChainClient, HttpNodeTransport};
use crate::config::{Config, StorageKind};
use crate::storage::embedded::DEFAULT_FLUSH_INTERVAL;
use crate::storage::{EmbeddedStorage, RemoteStorage, Storage};
use crate::sync::{EventDispatcher, SyncEngine};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config = Config::parse();
	info!("Starting ledger index sync against {}", config.node_url);

	if let Err(e) = run(config).await {
		error!("Ledger index sync failed: {}", e);
		std::process::exit(1);
	}
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
	let cancel = CancellationToken::new();

	let storage: Arc<dyn Storage> = match config.storage {
		StorageKind::Embedded => Arc::new(EmbeddedStorage::open(
			&config.db_path,
			DEFAULT_FLUSH_INTERVAL,
		)?),
		StorageKind::Redis => {
			let url = config
				.redis_url
				.as_deref()
				.ok_or("--redis-url is required with --storage redis")?;
			let remote = tokio::select! {
				storage = RemoteStorage::connect(url) => storage?,
				_ = tokio::signal::ctrl_c() => {
					info!("Interrupted while connecting to Redis");
					return Ok(());
				}
			};
			Arc::new(remote)
		}
	};

	let transport = HttpNodeTransport::new(&config.node_url)?;
	let chain = ChainClient::new(transport, config.max_range);
	if !chain.get_health().await {
		info!("Node is not healthy yet, startup will retry until it is");
	}

	let mut dispatcher = EventDispatcher::new();
	indexers::register_all(&mut dispatcher, storage.clone());

	let engine = SyncEngine::new(chain, storage.clone(), dispatcher, config.sync_config());

	tokio::spawn({
		let cancel = cancel.clone();
		async move {
			match tokio::signal::ctrl_c().await {
				Ok(()) => info!("Shutdown requested"),
				Err(e) => error!("Failed to listen for shutdown signal: {}", e),
			}
			cancel.cancel();
		}
	});

	let result = engine.run(cancel).await;

	storage.close().await?;
	info!("Ledger index sync stopped");
	Ok(result?)
}
