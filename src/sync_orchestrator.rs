//! # Sync Orchestrator
//!
//! Runs one incremental sync cycle for a `(category, chain)`:
//!
//! 1. load the cursor (last fully processed block, 0 if none)
//! 2. read the head, minus the configured confirmation depth
//! 3. scan `(cursor, head]` for vault events
//! 4. resolve the changed pools from the catalog
//! 5. plan, batch and decode their state at `head`
//! 6. persist the records, then compare-and-set the cursor to `head`
//!
//! A cycle either completes or fails with the cursor untouched, so the next
//! cycle rescans the same range. Shutdown is checked between steps and a
//! cancelled cycle writes nothing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = SyncOrchestrator::new(chain_client, store.clone(), store.clone(), store)
//!     .with_indexing_pool(indexing_pool);
//!
//! orchestrator.refresh_catalog(1000).await?;
//! let outcome = orchestrator.sync_changed_pools("pools", "mainnet").await?;
//! ```

use crate::{
    chain_client::{ChainClient, MULTICALL3_ADDRESS},
    change_log_scanner::{ChangeLogScanner, ChangedPoolSet},
    contracts::BALANCER_VAULT_ADDRESS,
    decoder::{CallKey, DecodedPoolState, PoolStateDecoder},
    indexing_client_pool::{IndexingClientPool, IndexingError},
    metrics,
    multicall::{build_result_tree, CallBatcher, CallSpec, DEFAULT_BATCH_SIZE},
    pool_types::PoolDescriptor,
    settings::Settings,
    storage::{CursorStore, PoolCatalog, PoolStateSink},
    subgraph::{fetch_pool_catalog, IndexingClient},
};
use ethers::types::Address;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("chain read failed: {0:#}")]
    Chain(anyhow::Error),
    #[error("cursor store failed: {0:#}")]
    Cursor(anyhow::Error),
    #[error("cursor moved concurrently (expected {expected:?})")]
    CursorConflict { expected: Option<u64> },
    #[error("pool catalog failed: {0:#}")]
    Catalog(anyhow::Error),
    #[error("persisting pool state failed: {0:#}")]
    Persistence(anyhow::Error),
    #[error(transparent)]
    Indexing(#[from] IndexingError),
    #[error("call planning task failed: {0}")]
    Planning(#[from] tokio::task::JoinError),
    #[error("sync cancelled")]
    Cancelled,
}

/// Result of one successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Pools whose state was written, in pool-id order
    pub updated_pool_ids: Vec<String>,
    /// Cursor after the cycle
    pub cursor: u64,
}

pub struct SyncOrchestrator {
    chain_client: Arc<dyn ChainClient>,
    scanner: ChangeLogScanner,
    decoder: PoolStateDecoder,
    batcher: CallBatcher,
    catalog: Arc<dyn PoolCatalog>,
    cursors: Arc<dyn CursorStore>,
    sink: Arc<dyn PoolStateSink>,
    indexing: Option<Arc<IndexingClientPool<dyn IndexingClient>>>,
    vault: Address,
    batch_size: usize,
    confirmation_depth: u64,
    shutdown: CancellationToken,
}

impl SyncOrchestrator {
    /// Orchestrator against the canonical vault and Multicall3 deployments.
    pub fn new(
        chain_client: Arc<dyn ChainClient>,
        catalog: Arc<dyn PoolCatalog>,
        cursors: Arc<dyn CursorStore>,
        sink: Arc<dyn PoolStateSink>,
    ) -> Self {
        Self {
            scanner: ChangeLogScanner::new(chain_client.clone()),
            decoder: PoolStateDecoder::new(BALANCER_VAULT_ADDRESS),
            batcher: CallBatcher::new(chain_client.clone(), MULTICALL3_ADDRESS),
            chain_client,
            catalog,
            cursors,
            sink,
            indexing: None,
            vault: BALANCER_VAULT_ADDRESS,
            batch_size: DEFAULT_BATCH_SIZE,
            confirmation_depth: 0,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wires everything `settings` configures: contracts, batching and
    /// confirmation depth.
    pub fn from_settings(
        settings: &Settings,
        chain_client: Arc<dyn ChainClient>,
        catalog: Arc<dyn PoolCatalog>,
        cursors: Arc<dyn CursorStore>,
        sink: Arc<dyn PoolStateSink>,
    ) -> Self {
        let batcher = CallBatcher::new(chain_client.clone(), settings.contracts.multicall)
            .with_timeout(Duration::from_secs(settings.multicall.timeout_seconds))
            .with_max_concurrent_chunks(settings.multicall.max_concurrent_chunks);
        Self::new(chain_client, catalog, cursors, sink)
            .with_vault(settings.contracts.vault)
            .with_batcher(batcher)
            .with_batch_size(settings.multicall.batch_size_for(&settings.chain.name))
            .with_confirmation_depth(settings.sync.confirmation_depth)
    }

    pub fn with_vault(mut self, vault: Address) -> Self {
        self.vault = vault;
        self.decoder = PoolStateDecoder::new(vault);
        self
    }

    pub fn with_batcher(mut self, batcher: CallBatcher) -> Self {
        self.batcher = batcher.with_shutdown(self.shutdown.clone());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_confirmation_depth(mut self, depth: u64) -> Self {
        self.confirmation_depth = depth;
        self
    }

    pub fn with_indexing_pool(mut self, pool: Arc<IndexingClientPool<dyn IndexingClient>>) -> Self {
        self.indexing = Some(pool);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.batcher = self.batcher.with_shutdown(shutdown.clone());
        self.shutdown = shutdown;
        self
    }

    fn ensure_running(&self) -> Result<(), SyncError> {
        if self.shutdown.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs one incremental cycle for `(category, chain)`.
    pub async fn sync_changed_pools(
        &self,
        category: &str,
        chain: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let span = info_span!(
            "sync_cycle",
            cycle_id = %Uuid::new_v4(),
            category = category,
            chain = chain
        );
        self.run_cycle(category, chain).instrument(span).await
    }

    async fn run_cycle(&self, category: &str, chain: &str) -> Result<SyncOutcome, SyncError> {
        let started = Instant::now();
        self.ensure_running()?;

        let previous = self
            .cursors
            .get_cursor(category, chain)
            .await
            .map_err(SyncError::Cursor)?
            .map(|c| c.block_number);
        let cursor = previous.unwrap_or(0);

        let head = self
            .chain_client
            .block_number()
            .await
            .map_err(SyncError::Chain)?
            .saturating_sub(self.confirmation_depth);
        if head <= cursor {
            debug!(cursor, head, "Nothing to sync");
            return Ok(SyncOutcome {
                updated_pool_ids: Vec::new(),
                cursor,
            });
        }

        self.ensure_running()?;
        let changed = self
            .scanner
            .scan(self.vault, cursor + 1, Some(head))
            .await
            .map_err(SyncError::Chain)?;

        let records = if changed.is_empty() {
            Vec::new()
        } else {
            self.fetch_states(&changed, head).await?
        };

        // Chunks skipped after shutdown leave holes; never persist those.
        self.ensure_running()?;
        if !records.is_empty() {
            self.sink
                .upsert_pool_state(&records)
                .await
                .map_err(SyncError::Persistence)?;
        }
        self.advance_cursor(category, chain, previous, head).await?;

        let updated_pool_ids: Vec<String> = records.into_iter().map(|r| r.pool_id).collect();
        metrics::record_sync_cycle(chain, started.elapsed(), updated_pool_ids.len(), head);
        info!(
            from = cursor + 1,
            to = head,
            changed = changed.pool_ids.len(),
            updated = updated_pool_ids.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync cycle complete"
        );
        Ok(SyncOutcome {
            updated_pool_ids,
            cursor: head,
        })
    }

    /// Plans, batches and decodes the state of every changed pool at `block`.
    async fn fetch_states(
        &self,
        changed: &ChangedPoolSet,
        block: u64,
    ) -> Result<Vec<DecodedPoolState>, SyncError> {
        let ids: Vec<String> = changed.pool_ids.iter().cloned().collect();
        let pools = self
            .catalog
            .get_pool_descriptors(&ids)
            .await
            .map_err(SyncError::Catalog)?;
        if pools.len() < ids.len() {
            let known: HashSet<&str> = pools.iter().map(|p| p.id.as_str()).collect();
            for id in ids.iter().filter(|id| !known.contains(id.as_str())) {
                warn!(pool_id = %id, "Changed pool missing from catalog, skipping");
            }
        }

        // Planning is CPU-bound; keep it off the async workers.
        let decoder = self.decoder.clone();
        let span = Span::current();
        let planned: Vec<(PoolDescriptor, Vec<CallSpec<CallKey>>)> =
            tokio::task::spawn_blocking(move || {
                let _entered = span.enter();
                pools
                    .into_par_iter()
                    .filter_map(|pool| match decoder.plan_calls(&pool) {
                        Ok(calls) => Some((pool, calls)),
                        Err(e) => {
                            warn!(pool_id = %pool.id, "Skipping pool: {}", e);
                            None
                        }
                    })
                    .collect()
            })
            .await?;
        let (planned_pools, call_lists): (Vec<PoolDescriptor>, Vec<Vec<CallSpec<CallKey>>>) =
            planned.into_iter().unzip();
        let calls: Vec<CallSpec<CallKey>> = call_lists.into_iter().flatten().collect();
        debug!(
            pools = planned_pools.len(),
            calls = calls.len(),
            "Executing state reads"
        );

        let results = self
            .batcher
            .execute_at(calls, self.batch_size, Some(block))
            .await;
        let tree = build_result_tree(results);

        let mut records = Vec::with_capacity(planned_pools.len());
        for pool in &planned_pools {
            match self.decoder.decode(pool, &tree, block) {
                Ok(state) if state.fields.is_empty() => {
                    warn!(pool_id = %pool.id, "No state could be read, skipping");
                }
                Ok(state) => records.push(state),
                Err(e) => warn!(pool_id = %pool.id, "Skipping pool: {}", e),
            }
        }
        Ok(records)
    }

    async fn advance_cursor(
        &self,
        category: &str,
        chain: &str,
        expected: Option<u64>,
        block: u64,
    ) -> Result<(), SyncError> {
        let written = self
            .cursors
            .compare_and_set_cursor(category, chain, expected, block)
            .await
            .map_err(SyncError::Cursor)?;
        if !written {
            return Err(SyncError::CursorConflict { expected });
        }
        Ok(())
    }

    /// Pages the pool catalog from the indexing service and upserts it.
    /// Returns the number of descriptors written.
    pub async fn refresh_catalog(&self, page_size: usize) -> Result<usize, SyncError> {
        self.ensure_running()?;
        let indexing = self.indexing.as_ref().ok_or(IndexingError::NoClients)?;

        let pools = fetch_pool_catalog(indexing.as_ref(), page_size)
            .await
            .map_err(|e| match e.downcast::<IndexingError>() {
                Ok(indexing_error) => SyncError::Indexing(indexing_error),
                Err(other) => SyncError::Catalog(other),
            })?;

        self.ensure_running()?;
        self.catalog
            .upsert_pool_descriptors(&pools)
            .await
            .map_err(SyncError::Catalog)?;
        info!(pools = pools.len(), "Pool catalog refreshed");
        Ok(pools.len())
    }

    /// Operator override: sets the cursor unconditionally, possibly backwards.
    /// `reset_cursor(category, chain, 0)` forces a full resync.
    pub async fn reset_cursor(
        &self,
        category: &str,
        chain: &str,
        block: u64,
    ) -> Result<(), SyncError> {
        warn!(category, chain, block, "Resetting sync cursor");
        self.cursors
            .set_cursor(category, chain, block)
            .await
            .map_err(SyncError::Cursor)
    }

    /// Runs a cycle every `interval` until shutdown. Failed cycles are logged
    /// and retried on the next tick.
    pub async fn run(&self, category: &str, chain: &str, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.sync_changed_pools(category, chain).await {
                Ok(outcome) => debug!(
                    updated = outcome.updated_pool_ids.len(),
                    cursor = outcome.cursor,
                    "Cycle finished"
                ),
                Err(SyncError::Cancelled) => break,
                Err(e) => error!(category, chain, "Sync cycle failed: {}", e),
            }
        }
        info!(category, chain, "Sync loop stopped");
    }
}
