//!
//! HTTP client for the ledger node's block API.
//!
//! The node caps range requests at a fixed number of blocks. `ChainClient` hides that limit by
//! splitting larger requests into contiguous sub-ranges, fetching them concurrently and returning
//! one list sorted by height. The raw requests go through a `NodeTransport`, so the chunking logic
//! can be exercised without a running node.

use super::types::*;
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of blocks the node returns for a single range request.
pub const DEFAULT_MAX_RANGE: u64 = 100;

/// Raw access to the node API. One call is one request.
#[async_trait]
pub trait NodeTransport: Send + Sync {
	/// Current chain height.
	async fn height(&self) -> Result<u64, ChainError>;

	/// A single block.
	async fn block(&self, height: u64) -> Result<Block, ChainError>;

	/// An inclusive range of blocks. Callers keep `to - from` below the node's limit.
	async fn blocks(&self, from: u64, to: u64) -> Result<Vec<Block>, ChainError>;

	/// Node status endpoint. Any error means unhealthy.
	async fn status(&self) -> Result<(), ChainError>;
}

/// `NodeTransport` over the node's HTTP REST API.
#[derive(Clone)]
pub struct HttpNodeTransport {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the node, always ending in `/`.
	node_url: Url,
}

impl HttpNodeTransport {
	/// Create a new transport for the node at `node_url`.
	pub fn new(node_url: &str) -> Result<Self, ChainError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		let normalized = if node_url.ends_with('/') {
			node_url.to_string()
		} else {
			format!("{}/", node_url)
		};
		let node_url =
			Url::parse(&normalized).map_err(|e| ChainError::InvalidUrl(format!("{}: {}", node_url, e)))?;

		Ok(Self {
			http_client,
			node_url,
		})
	}

	async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
		let url = self
			.node_url
			.join(path)
			.map_err(|e| ChainError::InvalidUrl(format!("{}: {}", path, e)))?;

		debug!("GET {}", url);
		let response = self.http_client.get(url).send().await?;

		if !response.status().is_success() {
			return Err(ChainError::NodeStatus {
				status: response.status(),
				path: path.to_string(),
			});
		}

		let body = response.bytes().await?;
		Ok(serde_json::from_slice(&body)?)
	}
}

#[async_trait]
impl NodeTransport for HttpNodeTransport {
	async fn height(&self) -> Result<u64, ChainError> {
		let response: HeightResponse = self.get_json("blocks/height").await?;
		Ok(response.height)
	}

	async fn block(&self, height: u64) -> Result<Block, ChainError> {
		self.get_json(&format!("blocks/at/{}", height)).await
	}

	async fn blocks(&self, from: u64, to: u64) -> Result<Vec<Block>, ChainError> {
		self.get_json(&format!("blocks/seq/{}/{}", from, to)).await
	}

	async fn status(&self) -> Result<(), ChainError> {
		let _: serde_json::Value = self.get_json("node/status").await?;
		Ok(())
	}
}

/// Ledger node client enforcing the node's range limit.
pub struct ChainClient<T = HttpNodeTransport> {
	transport: Arc<T>,
	max_range: u64,
}

impl<T> Clone for ChainClient<T> {
	fn clone(&self) -> Self {
		Self {
			transport: self.transport.clone(),
			max_range: self.max_range,
		}
	}
}

impl<T: NodeTransport> ChainClient<T> {
	/// Create a client. A `max_range` of zero is treated as one.
	pub fn new(transport: T, max_range: u64) -> Self {
		Self::with_shared_transport(Arc::new(transport), max_range)
	}

	/// Create a client over a transport that is also used elsewhere.
	pub fn with_shared_transport(transport: Arc<T>, max_range: u64) -> Self {
		Self {
			transport,
			max_range: max_range.max(1),
		}
	}

	/// Largest number of blocks requested at once.
	pub fn max_range(&self) -> u64 {
		self.max_range
	}

	pub async fn get_height(&self) -> Result<u64, ChainError> {
		self.transport.height().await
	}

	pub async fn get_block(&self, height: u64) -> Result<Block, ChainError> {
		self.transport.block(height).await
	}

	/// Fetch the inclusive range `from..=to`, sorted by height.
	///
	/// Ranges larger than the node's limit are split and fetched concurrently. Any failing
	/// sub-request fails the whole call.
	pub async fn get_range(&self, from: u64, to: u64) -> Result<Vec<Block>, ChainError> {
		let chunks = split_range(from, to, self.max_range);
		if chunks.is_empty() {
			return Ok(Vec::new());
		}

		debug!(
			"Fetching blocks {}..={} in {} request(s)",
			from,
			to,
			chunks.len()
		);

		let requests = chunks
			.iter()
			.map(|&(start, end)| self.transport.blocks(start, end));
		let mut blocks: Vec<Block> = try_join_all(requests).await?.into_iter().flatten().collect();

		blocks.sort_by_key(|block| block.height);
		Ok(blocks)
	}

	/// Whether the node answers its status endpoint. Never fails.
	pub async fn get_health(&self) -> bool {
		match self.transport.status().await {
			Ok(()) => true,
			Err(e) => {
				warn!("Node health check failed: {}", e);
				false
			}
		}
	}
}

/// Split `from..=to` into contiguous inclusive sub-ranges of at most `max_range` blocks.
pub fn split_range(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
	let max_range = max_range.max(1);
	let mut ranges = Vec::new();
	let mut start = from;

	while start <= to {
		let end = start.saturating_add(max_range - 1).min(to);
		ranges.push((start, end));
		if end == u64::MAX {
			break;
		}
		start = end + 1;
	}

	ranges
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use parking_lot::Mutex;
	use std::collections::BTreeMap;
	use std::sync::atomic::{AtomicBool, Ordering};

	/// In-memory node that records every range request it serves.
	#[derive(Default)]
	pub(crate) struct MockNode {
		pub blocks: Mutex<BTreeMap<u64, Block>>,
		pub requests: Mutex<Vec<(u64, u64)>>,
		pub fail_from: Mutex<Option<u64>>,
		pub height_unavailable: AtomicBool,
		pub healthy: bool,
	}

	impl MockNode {
		pub fn with_empty_blocks(count: u64) -> Self {
			let node = MockNode {
				healthy: true,
				..Default::default()
			};
			for height in 1..=count {
				node.blocks.lock().insert(
					height,
					Block {
						height,
						timestamp: height * 1000,
						transactions: Vec::new(),
					},
				);
			}
			node
		}

		pub fn push_block(&self, block: Block) {
			self.blocks.lock().insert(block.height, block);
		}
	}

	#[async_trait]
	impl NodeTransport for MockNode {
		async fn height(&self) -> Result<u64, ChainError> {
			if self.height_unavailable.load(Ordering::SeqCst) {
				return Err(ChainError::RangeError("node starting".to_string()));
			}
			Ok(self.blocks.lock().keys().next_back().copied().unwrap_or(0))
		}

		async fn block(&self, height: u64) -> Result<Block, ChainError> {
			self.blocks
				.lock()
				.get(&height)
				.cloned()
				.ok_or_else(|| ChainError::RangeError(format!("no block {}", height)))
		}

		async fn blocks(&self, from: u64, to: u64) -> Result<Vec<Block>, ChainError> {
			self.requests.lock().push((from, to));
			if to - from + 1 > DEFAULT_MAX_RANGE {
				return Err(ChainError::RangeError("too many blocks".to_string()));
			}
			if let Some(fail_from) = *self.fail_from.lock() {
				if to >= fail_from {
					return Err(ChainError::RangeError("node unavailable".to_string()));
				}
			}
			// Serve in reverse so callers must sort.
			Ok(self.blocks.lock().range(from..=to).rev().map(|(_, b)| b.clone()).collect())
		}

		async fn status(&self) -> Result<(), ChainError> {
			if self.healthy {
				Ok(())
			} else {
				Err(ChainError::RangeError("unhealthy".to_string()))
			}
		}
	}

	#[test]
	fn test_split_range() {
		assert_eq!(
			split_range(1, 250, 100),
			vec![(1, 100), (101, 200), (201, 250)]
		);
		assert_eq!(split_range(5, 5, 100), vec![(5, 5)]);
		assert_eq!(split_range(1, 100, 100), vec![(1, 100)]);
		assert!(split_range(10, 9, 100).is_empty());
	}

	#[tokio::test]
	async fn test_get_range_chunks_requests() {
		let client = ChainClient::new(MockNode::with_empty_blocks(300), DEFAULT_MAX_RANGE);

		let blocks = client.get_range(1, 250).await.expect("range should succeed");

		let mut requests = client.transport.requests.lock().clone();
		requests.sort();
		assert_eq!(requests, vec![(1, 100), (101, 200), (201, 250)]);
		assert_eq!(blocks.len(), 250);
		let heights: Vec<u64> = blocks.iter().map(|b| b.height).collect();
		assert_eq!(heights, (1..=250).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn test_get_range_fails_without_partial_results() {
		let node = MockNode::with_empty_blocks(300);
		*node.fail_from.lock() = Some(150);
		let client = ChainClient::new(node, DEFAULT_MAX_RANGE);

		assert!(client.get_range(1, 250).await.is_err());
	}

	#[tokio::test]
	async fn test_empty_range_issues_no_requests() {
		let client = ChainClient::new(MockNode::with_empty_blocks(10), DEFAULT_MAX_RANGE);

		let blocks = client.get_range(11, 10).await.expect("empty range");
		assert!(blocks.is_empty());
		assert!(client.transport.requests.lock().is_empty());
	}

	#[tokio::test]
	async fn test_health_swallows_errors() {
		let client = ChainClient::new(MockNode::default(), DEFAULT_MAX_RANGE);
		assert!(!client.get_health().await);

		let client = ChainClient::new(MockNode::with_empty_blocks(1), DEFAULT_MAX_RANGE);
		assert!(client.get_health().await);
		assert_eq!(client.get_height().await.expect("height"), 1);
		assert_eq!(client.get_block(1).await.expect("block").height, 1);
	}

	#[test]
	fn test_http_transport_normalizes_url() {
		let transport = HttpNodeTransport::new("http://localhost:6869/api").expect("valid url");
		assert_eq!(
			transport.node_url.join("blocks/height").expect("join").as_str(),
			"http://localhost:6869/api/blocks/height"
		);
		assert!(HttpNodeTransport::new("not a url").is_err());
	}
}
