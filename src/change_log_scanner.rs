//! # Change Log Scanner
//!
//! Finds which pools changed in a block range by reading the vault's
//! state-mutating events.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let scanner = ChangeLogScanner::new(chain_client);
//! let changed = scanner.scan(vault, cursor + 1, Some(head)).await?;
//! ```

use crate::chain_client::ChainClient;
use crate::contracts::IBALANCERVAULT_ABI;
use crate::pool_types::format_pool_id;
use anyhow::{Context, Result};
use ethers::types::{Address, BlockNumber, Filter, Log, ValueOrArray, H256};
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Vault events that move pool balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultEvent {
    Swap,
    PoolBalanceChanged,
    PoolBalanceManaged,
}

impl VaultEvent {
    pub const ALL: [VaultEvent; 3] = [
        VaultEvent::Swap,
        VaultEvent::PoolBalanceChanged,
        VaultEvent::PoolBalanceManaged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VaultEvent::Swap => "Swap",
            VaultEvent::PoolBalanceChanged => "PoolBalanceChanged",
            VaultEvent::PoolBalanceManaged => "PoolBalanceManaged",
        }
    }

    /// topic0 of the event
    pub fn signature(&self) -> Result<H256> {
        Ok(IBALANCERVAULT_ABI.event(self.as_str())?.signature())
    }
}

/// Pool ids touched in a scanned range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedPoolSet {
    pub pool_ids: BTreeSet<String>,
    /// Highest block among matched logs, 0 when there were none
    pub max_block_observed: u64,
}

impl ChangedPoolSet {
    pub fn is_empty(&self) -> bool {
        self.pool_ids.is_empty()
    }
}

pub struct ChangeLogScanner {
    client: Arc<dyn ChainClient>,
}

impl ChangeLogScanner {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    /// Scans `[from_block, to_block]` (`to_block = None` means latest) for
    /// vault events emitted by `contract`.
    ///
    /// The range is requested in one `eth_getLogs`; provider range limits
    /// surface as errors.
    pub async fn scan(
        &self,
        contract: Address,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<ChangedPoolSet> {
        let signatures = VaultEvent::ALL
            .iter()
            .map(|event| event.signature().map(Some))
            .collect::<Result<Vec<_>>>()?;

        let filter = Filter::new()
            .address(contract)
            .from_block(from_block)
            .to_block(to_block.map_or(BlockNumber::Latest, BlockNumber::from))
            .topic0(ValueOrArray::Array(signatures.clone()));

        let logs = self.client.get_logs(&filter).await.with_context(|| {
            format!(
                "Failed to scan vault {:?} from block {} to {:?}",
                contract, from_block, to_block
            )
        })?;

        let signatures: Vec<H256> = signatures.into_iter().flatten().collect();
        let changed = collect_changed_pools(contract, &signatures, &logs);
        info!(
            "Scanned blocks {}..{:?}: {} logs, {} changed pools, max block {}",
            from_block,
            to_block,
            logs.len(),
            changed.pool_ids.len(),
            changed.max_block_observed
        );
        Ok(changed)
    }
}

fn collect_changed_pools(contract: Address, signatures: &[H256], logs: &[Log]) -> ChangedPoolSet {
    let mut changed = ChangedPoolSet::default();
    for log in logs {
        if log.removed == Some(true) {
            debug!("Ignoring removed log {:?}", log.transaction_hash);
            continue;
        }
        if log.address != contract {
            continue;
        }
        let Some(topic0) = log.topics.first() else {
            continue;
        };
        if !signatures.contains(topic0) {
            continue;
        }
        let Some(pool_id) = log.topics.get(1) else {
            debug!("Vault log without pool id topic: {:?}", log.transaction_hash);
            continue;
        };

        changed.pool_ids.insert(format_pool_id(pool_id));
        if let Some(block) = log.block_number {
            changed.max_block_observed = changed.max_block_observed.max(block.as_u64());
        }
    }
    changed
}
