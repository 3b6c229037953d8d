//! # Chain Client
//!
//! The only chain operations the sync engine needs: current head, event logs,
//! and a read-only Multicall3 `aggregate3` round trip. No transaction or write
//! capability lives here.
//!
//! `ChainClient` is the seam the rest of the crate is written against; the
//! ethers-backed `EthersChainClient` is the production implementation and
//! applies a QPS limiter, a concurrency cap and a per-request timeout to every
//! call, the same way the provider pool guards its endpoints.
//! `FailoverChainClient` spreads requests over several such clients.

use crate::metrics;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, Filter, Log, TransactionRequest, H160,
};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, warn};
use once_cell::sync::Lazy;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Multicall3, deployed at the same address on every chain.
pub const MULTICALL3_ADDRESS: Address = H160([
    0xca, 0x11, 0xbd, 0xe0, 0x59, 0x77, 0xb3, 0x63, 0x11, 0x67, 0x02, 0x88, 0x62, 0xbe, 0x2a, 0x17,
    0x39, 0x76, 0xca, 0x11,
]);

/// One `Call3` entry of a Multicall3 `aggregate3` request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateCall {
    pub target: Address,
    pub allow_failure: bool,
    pub call_data: Bytes,
}

/// One `Result` entry of a Multicall3 `aggregate3` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateResult {
    pub success: bool,
    pub return_data: Bytes,
}

/// Read-only chain RPC boundary.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number reported by the provider.
    async fn block_number(&self) -> Result<u64>;

    /// Raw `eth_getLogs`. Range limits are the provider's; no pagination here.
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    /// Executes `calls` through the aggregator contract in one `eth_call`,
    /// at `block` or latest. Results are returned in request order.
    async fn aggregate(
        &self,
        aggregator: Address,
        calls: &[AggregateCall],
        block: Option<u64>,
    ) -> Result<Vec<AggregateResult>>;
}

/// `aggregate3((address,bool,bytes)[]) returns ((bool,bytes)[])`
#[allow(deprecated)]
static AGGREGATE3: Lazy<Function> = Lazy::new(|| Function {
    name: "aggregate3".to_string(),
    inputs: vec![Param {
        name: "calls".to_string(),
        kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
            ParamType::Address,
            ParamType::Bool,
            ParamType::Bytes,
        ]))),
        internal_type: None,
    }],
    outputs: vec![Param {
        name: "returnData".to_string(),
        kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
            ParamType::Bool,
            ParamType::Bytes,
        ]))),
        internal_type: None,
    }],
    constant: None,
    state_mutability: StateMutability::Payable,
});

/// ABI-encodes an `aggregate3` request.
pub fn encode_aggregate3(calls: &[AggregateCall]) -> Result<Bytes> {
    let call_tokens = calls
        .iter()
        .map(|call| {
            Token::Tuple(vec![
                Token::Address(call.target),
                Token::Bool(call.allow_failure),
                Token::Bytes(call.call_data.to_vec()),
            ])
        })
        .collect();
    let calldata = AGGREGATE3.encode_input(&[Token::Array(call_tokens)])?;
    Ok(Bytes::from(calldata))
}

/// Decodes an `aggregate3` response into `(success, returnData)` pairs.
pub fn decode_aggregate3(response: &[u8]) -> Result<Vec<AggregateResult>> {
    let decoded = AGGREGATE3.decode_output(response)?;

    let results_array = decoded
        .into_iter()
        .next()
        .and_then(|t| t.into_array())
        .ok_or_else(|| anyhow!("Invalid multicall response format"))?;

    let mut results = Vec::with_capacity(results_array.len());
    for result_token in results_array {
        let mut tuple = result_token
            .into_tuple()
            .filter(|t| t.len() == 2)
            .ok_or_else(|| anyhow!("Invalid multicall result entry"))?;
        let return_data = tuple
            .pop()
            .and_then(|t| t.into_bytes())
            .ok_or_else(|| anyhow!("Invalid multicall returnData"))?;
        let success = tuple
            .pop()
            .and_then(|t| t.into_bool())
            .ok_or_else(|| anyhow!("Invalid multicall success flag"))?;
        results.push(AggregateResult {
            success,
            return_data: Bytes::from(return_data),
        });
    }
    Ok(results)
}

/// Production `ChainClient` over any ethers `Middleware`.
pub struct EthersChainClient<M: Middleware> {
    provider: Arc<M>,
    endpoint: String,
    limiter: Arc<DefaultDirectRateLimiter>,
    semaphore: Arc<Semaphore>,
    request_timeout: Duration,
}

impl EthersChainClient<Provider<Http>> {
    /// Builds an HTTP client for `url`.
    pub fn from_url(
        url: &str,
        qps_limit: u32,
        max_concurrency: usize,
        request_timeout: Duration,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| anyhow!("Failed to create provider from {}: {}", url, e))?;
        Self::new(
            Arc::new(provider),
            url.to_string(),
            qps_limit,
            max_concurrency,
            request_timeout,
        )
    }
}

impl<M: Middleware + 'static> EthersChainClient<M> {
    pub fn new(
        provider: Arc<M>,
        endpoint: String,
        qps_limit: u32,
        max_concurrency: usize,
        request_timeout: Duration,
    ) -> Result<Self> {
        let quota = Quota::per_second(
            NonZeroU32::new(qps_limit).ok_or_else(|| anyhow!("QPS must be non-zero"))?,
        );
        Ok(Self {
            provider,
            endpoint,
            limiter: Arc::new(RateLimiter::direct(quota)),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            request_timeout,
        })
    }

    /// Runs `request` under the concurrency cap, the QPS limiter and the timeout.
    async fn guarded<T, F>(&self, method: &'static str, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.semaphore.acquire().await?;
        self.limiter.until_ready().await;

        let start = Instant::now();
        let result = match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "{} timed out after {:?}",
                method,
                self.request_timeout
            )),
        };
        let duration = start.elapsed();

        metrics::record_rpc_call(method, duration, result.is_ok());
        match &result {
            Ok(_) => debug!(
                "[RPC_TRACE] {} -> {}: duration={:?}",
                self.endpoint, method, duration
            ),
            Err(e) => warn!(
                "[RPC_TRACE] {} -> {} ERROR: {}, duration={:?}",
                self.endpoint, method, e, duration
            ),
        }
        result
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainClient for EthersChainClient<M> {
    async fn block_number(&self) -> Result<u64> {
        self.guarded("eth_blockNumber", async {
            let block = self
                .provider
                .get_block_number()
                .await
                .map_err(|e| anyhow!("eth_blockNumber failed: {}", e))?;
            Ok(block.as_u64())
        })
        .await
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.guarded("eth_getLogs", async {
            self.provider
                .get_logs(filter)
                .await
                .map_err(|e| anyhow!("eth_getLogs failed: {}", e))
        })
        .await
    }

    async fn aggregate(
        &self,
        aggregator: Address,
        calls: &[AggregateCall],
        block: Option<u64>,
    ) -> Result<Vec<AggregateResult>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let calldata = encode_aggregate3(calls)?;

        self.guarded("eth_call", async {
            let tx_request = TransactionRequest::new().to(aggregator).data(calldata);
            let typed_tx: TypedTransaction = tx_request.into();
            let block = block.map(|b| BlockId::Number(BlockNumber::Number(b.into())));
            let response = self
                .provider
                .call(&typed_tx, block)
                .await
                .map_err(|e| anyhow!("aggregate3 eth_call failed: {}", e))?;
            decode_aggregate3(&response)
        })
        .await
    }
}

/// Spreads requests over several endpoints and fails over on error.
///
/// Each request starts at the endpoint after the one the previous request
/// started at and tries every endpoint once before giving up.
pub struct FailoverChainClient {
    clients: Vec<Arc<dyn ChainClient>>,
    next: AtomicUsize,
}

impl FailoverChainClient {
    pub fn new(clients: Vec<Arc<dyn ChainClient>>) -> Result<Self> {
        if clients.is_empty() {
            return Err(anyhow!("No RPC endpoint configured"));
        }
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    pub fn endpoint_count(&self) -> usize {
        self.clients.len()
    }

    fn rotation(&self) -> impl Iterator<Item = &Arc<dyn ChainClient>> + Send + '_ {
        let len = self.clients.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % len;
        self.clients.iter().cycle().skip(start).take(len)
    }
}

fn exhausted(method: &str, attempts: usize, last_error: Option<anyhow::Error>) -> anyhow::Error {
    match last_error {
        Some(e) => e.context(format!("{} failed on all {} endpoints", method, attempts)),
        None => anyhow!("{} failed: no endpoint available", method),
    }
}

#[async_trait]
impl ChainClient for FailoverChainClient {
    async fn block_number(&self) -> Result<u64> {
        let mut last_error = None;
        for (attempt, client) in self.rotation().enumerate() {
            match client.block_number().await {
                Ok(block) => return Ok(block),
                Err(e) => {
                    warn!("eth_blockNumber attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }
        Err(exhausted("eth_blockNumber", self.clients.len(), last_error))
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let mut last_error = None;
        for (attempt, client) in self.rotation().enumerate() {
            match client.get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("eth_getLogs attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }
        Err(exhausted("eth_getLogs", self.clients.len(), last_error))
    }

    async fn aggregate(
        &self,
        aggregator: Address,
        calls: &[AggregateCall],
        block: Option<u64>,
    ) -> Result<Vec<AggregateResult>> {
        let mut last_error = None;
        for (attempt, client) in self.rotation().enumerate() {
            match client.aggregate(aggregator, calls, block).await {
                Ok(results) => return Ok(results),
                Err(e) => {
                    warn!("aggregate3 attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }
        Err(exhausted("aggregate3", self.clients.len(), last_error))
    }
}
