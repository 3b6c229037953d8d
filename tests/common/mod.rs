// Shared fixtures for the integration tests: a scripted chain answering
// `aggregate3` from a calldata table, plus pool and log builders.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, Filter, FilterBlockOption, Log, H160, H256, U256, U64};
use pool_sync_sdk::chain_client::{AggregateCall, AggregateResult, ChainClient};
use pool_sync_sdk::contracts::{BALANCER_VAULT_ADDRESS, IBALANCERPOOL_ABI, IBALANCERVAULT_ABI};
use pool_sync_sdk::pool_types::{format_pool_id, PoolDescriptor, PoolType, TokenInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const WETH: Address = H160([0x11; 20]);
pub const USDC: Address = H160([0x22; 20]);
pub const WSTETH: Address = H160([0x33; 20]);

pub fn e18(n: u64) -> U256 {
    U256::exp10(18) * U256::from(n)
}

/// Chain whose `aggregate3` answers come from an exact `(target, calldata)`
/// table; anything else reverts.
#[derive(Default)]
pub struct ScriptedChain {
    head: AtomicU64,
    logs: Mutex<Vec<Log>>,
    table: Mutex<HashMap<(Address, Bytes), Bytes>>,
    pinned_blocks: Mutex<Vec<Option<u64>>>,
}

impl ScriptedChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.set_head(head);
        chain
    }

    pub fn set_head(&self, block: u64) {
        self.head.store(block, Ordering::SeqCst);
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    /// Answers `function(args)` on `target` with the ABI encoding of `output`.
    pub fn answer_pool(&self, target: Address, function: &str, args: &[Token], output: &[Token]) {
        let calldata = IBALANCERPOOL_ABI
            .function(function)
            .unwrap()
            .encode_input(args)
            .unwrap();
        self.insert(target, calldata, output);
    }

    pub fn answer_vault(&self, function: &str, args: &[Token], output: &[Token]) {
        let calldata = IBALANCERVAULT_ABI
            .function(function)
            .unwrap()
            .encode_input(args)
            .unwrap();
        self.insert(BALANCER_VAULT_ADDRESS, calldata, output);
    }

    fn insert(&self, target: Address, calldata: Vec<u8>, output: &[Token]) {
        self.table
            .lock()
            .unwrap()
            .insert((target, Bytes::from(calldata)), Bytes::from(encode(output)));
    }

    /// Block each `aggregate` round trip was pinned to.
    pub fn pinned_blocks(&self) -> Vec<Option<u64>> {
        self.pinned_blocks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let (from, to) = match &filter.block_option {
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
        };
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
        block: Option<u64>,
    ) -> Result<Vec<AggregateResult>> {
        self.pinned_blocks.lock().unwrap().push(block);
        let table = self.table.lock().unwrap();
        Ok(calls
            .iter()
            .map(|call| match table.get(&(call.target, call.call_data.clone())) {
                Some(data) => AggregateResult {
                    success: true,
                    return_data: data.clone(),
                },
                None => AggregateResult {
                    success: false,
                    return_data: Bytes::new(),
                },
            })
            .collect())
    }
}

pub fn pool_id(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}

pub fn descriptor(
    n: u64,
    pool_type: PoolType,
    version: u32,
    tokens: &[(Address, u8)],
) -> PoolDescriptor {
    PoolDescriptor {
        id: format_pool_id(&pool_id(n)),
        address: Address::from_low_u64_be(0xb000 + n),
        pool_type,
        version,
        tokens: tokens
            .iter()
            .map(|&(address, decimals)| TokenInfo { address, decimals })
            .collect(),
    }
}

/// A vault event log for pool `n`, indexed by pool id.
pub fn vault_event(event: &str, n: u64, block: u64) -> Log {
    let topic0 = IBALANCERVAULT_ABI.event(event).unwrap().signature();
    Log {
        address: BALANCER_VAULT_ADDRESS,
        topics: vec![topic0, pool_id(n)],
        block_number: Some(U64::from(block)),
        removed: Some(false),
        ..Default::default()
    }
}
