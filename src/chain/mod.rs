//! Ledger node integration module
//!
//! This module provides the client and types for reading blocks from the remote ledger node.
//! The node is the system of record; everything this service stores is derived from the blocks
//! fetched here.

/// HTTP client for the node's block API
mod client;
/// Type definitions for blocks and transactions
mod types;

pub use client::{ChainClient, DEFAULT_MAX_RANGE, HttpNodeTransport, NodeTransport, split_range};
pub use types::*;

#[cfg(test)]
pub(crate) use client::tests::MockNode;
