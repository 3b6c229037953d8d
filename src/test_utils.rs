// In-process chain client for unit tests.

use crate::chain_client::{AggregateCall, AggregateResult, ChainClient};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, Filter, FilterBlockOption, Log, H256, U64};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

type Responder = Box<dyn Fn(&AggregateCall) -> Option<Bytes> + Send + Sync>;

pub struct StubChainClient {
    head: AtomicU64,
    logs: Mutex<Vec<Log>>,
    responder: Responder,
    poisoned: Mutex<HashSet<Address>>,
    chunk_sizes: Mutex<Vec<usize>>,
    log_queries: Mutex<Vec<Filter>>,
}

impl StubChainClient {
    /// `responder` returns the call's return data, or `None` for a reverted call.
    pub fn new(responder: impl Fn(&AggregateCall) -> Option<Bytes> + Send + Sync + 'static) -> Self {
        Self {
            head: AtomicU64::new(0),
            logs: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            poisoned: Mutex::new(HashSet::new()),
            chunk_sizes: Mutex::new(Vec::new()),
            log_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_head(&self, block: u64) {
        self.head.store(block, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    /// Any aggregate request touching `target` fails as a whole.
    pub fn poison(&self, target: Address) {
        self.poisoned.lock().unwrap().insert(target);
    }

    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunk_sizes.lock().unwrap().clone()
    }

    pub fn log_queries(&self) -> Vec<Filter> {
        self.log_queries.lock().unwrap().clone()
    }
}

/// A vault log with `topic0` and the pool id as first indexed topic.
pub fn vault_log(address: Address, topic0: H256, pool_id: H256, block: u64) -> Log {
    Log {
        address,
        topics: vec![topic0, pool_id],
        block_number: Some(U64::from(block)),
        removed: Some(false),
        ..Default::default()
    }
}

fn block_bounds(filter: &Filter) -> (u64, u64) {
    match &filter.block_option {
        FilterBlockOption::Range {
            from_block,
            to_block,
        } => (
            from_block
                .as_ref()
                .and_then(|b| b.as_number())
                .map_or(0, |n| n.as_u64()),
            to_block
                .as_ref()
                .and_then(|b| b.as_number())
                .map_or(u64::MAX, |n| n.as_u64()),
        ),
        FilterBlockOption::AtBlockHash(_) => (0, u64::MAX),
    }
}

#[async_trait]
impl ChainClient for StubChainClient {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.log_queries.lock().unwrap().push(filter.clone());
        let (from, to) = block_bounds(filter);
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                let block = log.block_number.map_or(0, |b| b.as_u64());
                block >= from && block <= to
            })
            .cloned()
            .collect())
    }

    async fn aggregate(
        &self,
        _aggregator: Address,
        calls: &[AggregateCall],
        _block: Option<u64>,
    ) -> Result<Vec<AggregateResult>> {
        self.chunk_sizes.lock().unwrap().push(calls.len());
        let poisoned = self.poisoned.lock().unwrap();
        if calls.iter().any(|c| poisoned.contains(&c.target)) {
            return Err(anyhow!("execution reverted"));
        }
        Ok(calls
            .iter()
            .map(|call| match (self.responder)(call) {
                Some(return_data) => AggregateResult {
                    success: true,
                    return_data,
                },
                None => AggregateResult {
                    success: false,
                    return_data: Bytes::new(),
                },
            })
            .collect())
    }
}
