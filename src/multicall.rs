use crate::chain_client::{AggregateCall, AggregateResult, ChainClient};
use crate::metrics;
use ethers::abi::{Function, Token};
use ethers::types::{Address, Bytes};
use futures::stream::{self, StreamExt};
use indexmap::IndexSet;
use log::{debug, warn};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Batch size used when a chain has no override.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Default calls-per-aggregate for `chain`.
///
/// Some providers truncate or reject large `eth_call` payloads, so those
/// chains get smaller batches.
pub fn default_batch_size_for_chain(chain: &str) -> usize {
    match chain.to_ascii_lowercase().as_str() {
        "zkevm" | "fantom" => 100,
        "avalanche" | "base" => 500,
        _ => DEFAULT_BATCH_SIZE,
    }
}

/// One read-only contract call, tagged with the caller's key.
#[derive(Debug, Clone)]
pub struct CallSpec<K> {
    pub key: K,
    pub target: Address,
    pub function: Function,
    pub args: Vec<Token>,
    pub allow_failure: bool,
}

impl<K> CallSpec<K> {
    /// A call that is allowed to fail without reverting its batch.
    pub fn new(key: K, target: Address, function: &Function, args: Vec<Token>) -> Self {
        Self {
            key,
            target,
            function: function.clone(),
            args,
            allow_failure: true,
        }
    }
}

/// Outcome of one `CallSpec`. `decoded` is `None` when the call failed or
/// its return data did not match the function's outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult<K> {
    pub key: K,
    pub success: bool,
    pub return_data: Option<Bytes>,
    pub decoded: Option<Vec<Token>>,
}

impl<K> CallResult<K> {
    fn failed(key: K) -> Self {
        Self {
            key,
            success: false,
            return_data: None,
            decoded: None,
        }
    }
}

/// Decoded outputs of every successful call, addressed by key.
pub type ResultTree<K> = HashMap<K, Vec<Token>>;

/// Folds batcher output into a `ResultTree`. Failed and undecodable calls are
/// left out.
pub fn build_result_tree<K: Eq + Hash>(results: Vec<CallResult<K>>) -> ResultTree<K> {
    results
        .into_iter()
        .filter(|r| r.success)
        .filter_map(|r| r.decoded.map(|tokens| (r.key, tokens)))
        .collect()
}

/// Executes many contract reads through a Multicall3 `aggregate3` contract.
///
/// Calls are coalesced, split into chunks of at most `batch_size`, and the
/// chunks are dispatched concurrently. A failing chunk only fails its own
/// calls; `execute` itself never errors.
#[derive(Clone)]
pub struct CallBatcher {
    client: Arc<dyn ChainClient>,
    aggregator: Address,
    chunk_timeout: Duration,
    max_concurrent_chunks: usize,
    shutdown: CancellationToken,
}

impl CallBatcher {
    pub fn new(client: Arc<dyn ChainClient>, aggregator: Address) -> Self {
        Self {
            client,
            aggregator,
            chunk_timeout: Duration::from_secs(10),
            max_concurrent_chunks: 4,
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the per-chunk timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Set how many chunks may be in flight at once
    pub fn with_max_concurrent_chunks(mut self, max: usize) -> Self {
        self.max_concurrent_chunks = max.max(1);
        self
    }

    /// Stop scheduling chunks once `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Runs `calls` at the latest block and returns exactly one result per
    /// call, in input order.
    pub async fn execute<K: Clone>(
        &self,
        calls: Vec<CallSpec<K>>,
        batch_size: usize,
    ) -> Vec<CallResult<K>> {
        self.execute_at(calls, batch_size, None).await
    }

    /// `execute` pinned to `block`.
    pub async fn execute_at<K: Clone>(
        &self,
        calls: Vec<CallSpec<K>>,
        batch_size: usize,
        block: Option<u64>,
    ) -> Vec<CallResult<K>> {
        if calls.is_empty() {
            return Vec::new();
        }
        let batch_size = batch_size.max(1);

        // Coalesce identical calls to reduce load
        let mut unique_calls: IndexSet<AggregateCall> = IndexSet::new();
        let mut original_indices: Vec<Option<usize>> = Vec::with_capacity(calls.len());
        for call in &calls {
            match call.function.encode_input(&call.args) {
                Ok(call_data) => {
                    let (index, _) = unique_calls.insert_full(AggregateCall {
                        target: call.target,
                        allow_failure: call.allow_failure,
                        call_data: Bytes::from(call_data),
                    });
                    original_indices.push(Some(index));
                }
                Err(e) => {
                    warn!(
                        "Failed to encode {} for {:?}: {}",
                        call.function.name, call.target, e
                    );
                    original_indices.push(None);
                }
            }
        }

        let unique_call_vec: Vec<AggregateCall> = unique_calls.into_iter().collect();
        debug!(
            "Multicall coalesced {} calls into {}",
            calls.len(),
            unique_call_vec.len()
        );

        let chunk_results: Vec<Vec<Option<AggregateResult>>> =
            stream::iter(unique_call_vec.chunks(batch_size).enumerate())
                .map(|(chunk_index, chunk)| self.run_chunk(chunk_index, chunk, block))
                .buffered(self.max_concurrent_chunks)
                .collect()
                .await;
        let unique_results: Vec<Option<AggregateResult>> =
            chunk_results.into_iter().flatten().collect();

        calls
            .into_iter()
            .zip(original_indices)
            .map(|(call, index)| {
                let raw = index.and_then(|i| unique_results.get(i).cloned().flatten());
                match raw {
                    Some(AggregateResult {
                        success: true,
                        return_data,
                    }) => {
                        let decoded = match call.function.decode_output(&return_data) {
                            Ok(tokens) => Some(tokens),
                            Err(e) => {
                                debug!(
                                    "Failed to decode {} from {:?}: {}",
                                    call.function.name, call.target, e
                                );
                                None
                            }
                        };
                        CallResult {
                            key: call.key,
                            success: true,
                            return_data: Some(return_data),
                            decoded,
                        }
                    }
                    Some(AggregateResult {
                        success: false,
                        return_data,
                    }) => CallResult {
                        key: call.key,
                        success: false,
                        return_data: Some(return_data),
                        decoded: None,
                    },
                    None => CallResult::failed(call.key),
                }
            })
            .collect()
    }

    /// One `aggregate3` round trip. Every failure mode maps to `None` entries.
    async fn run_chunk(
        &self,
        chunk_index: usize,
        chunk: &[AggregateCall],
        block: Option<u64>,
    ) -> Vec<Option<AggregateResult>> {
        let failed = || vec![None; chunk.len()];

        if self.shutdown.is_cancelled() {
            debug!(
                "Shutdown requested, skipping multicall chunk {} ({} calls)",
                chunk_index,
                chunk.len()
            );
            return failed();
        }

        metrics::record_multicall_batch_size(chunk.len());
        let request = self.client.aggregate(self.aggregator, chunk, block);
        match tokio::time::timeout(self.chunk_timeout, request).await {
            Ok(Ok(results)) if results.len() == chunk.len() => {
                results.into_iter().map(Some).collect()
            }
            Ok(Ok(results)) => {
                warn!(
                    "Multicall chunk {} returned {} results for {} calls",
                    chunk_index,
                    results.len(),
                    chunk.len()
                );
                metrics::increment_multicall_chunk_failures();
                failed()
            }
            Ok(Err(e)) => {
                warn!("Multicall chunk {} failed: {}", chunk_index, e);
                metrics::increment_multicall_chunk_failures();
                failed()
            }
            Err(_) => {
                warn!(
                    "Multicall chunk {} timed out after {:?}",
                    chunk_index, self.chunk_timeout
                );
                metrics::increment_multicall_chunk_failures();
                failed()
            }
        }
    }
}
