//! # Pool Sync SDK
//!
//! Incremental on-chain synchronization of Balancer-style liquidity pool state. The SDK keeps a
//! store of decoded pool records in step with the chain by reading only the pools that actually
//! changed since the last processed block.
//!
//! ## Overview
//!
//! - **Change detection**: vault event logs over a block range identify the pools that moved
//! - **Batched reads**: every per-pool view call is coalesced into Multicall3 `aggregate3` chunks
//! - **Decoding**: a per-pool-type strategy turns raw return data into normalized fields
//! - **Catalog**: pool descriptors are paged from a set of redundant indexing endpoints
//!
//! ## Architecture
//!
//! ### Chain Layer
//! A narrow [`chain_client::ChainClient`] seam (head block, logs, `aggregate3`) behind a
//! rate-limited `ethers` provider.
//!
//! ### State Layer
//! [`multicall::CallBatcher`] executes typed call specs in fixed-size chunks;
//! [`decoder::PoolStateDecoder`] plans and decodes them per pool type.
//!
//! ### Sync Layer
//! [`sync_orchestrator::SyncOrchestrator`] ties scanning, reading and persisting together and
//! advances a per `(category, chain)` cursor only after a cycle fully succeeds.

// Core Types
/// Pool types, descriptors and token metadata
pub mod pool_types;
/// Decimal and fixed-point normalization
pub mod normalization;

// Chain Layer
/// Chain access seam and the ethers-backed client
pub mod chain_client;
/// Chunked Multicall3 batching
pub mod multicall;
/// Vault event scanning for changed pools
pub mod change_log_scanner;

// State Layer
/// Per-pool-type call planning and decoding
pub mod decoder;
/// Catalog, cursor and pool state storage
pub mod storage;

// Indexing Service
/// GraphQL indexing client and pool catalog query
pub mod subgraph;
/// Rotating, retrying pool of indexing clients
pub mod indexing_client_pool;

// Sync Layer
/// Incremental sync cycle
pub mod sync_orchestrator;

// Infrastructure
/// Metrics and observability
pub mod metrics;

// Contracts (Public ABIs Only)
/// Smart contract ABIs (read-only, no execution contracts)
pub mod contracts;

// Settings & Configuration
/// Configuration management
pub mod settings;

#[cfg(test)]
mod test_utils;

// Re-exports for convenience
pub use chain_client::{ChainClient, EthersChainClient, FailoverChainClient};
pub use decoder::{DecodedPoolState, FieldValue, PoolStateDecoder};
pub use multicall::CallBatcher;
pub use pool_types::{PoolDescriptor, PoolType};
pub use settings::Settings;
pub use storage::MemoryStore;
pub use sync_orchestrator::{SyncError, SyncOrchestrator, SyncOutcome};
