//! # Storage
//!
//! The persistence collaborators the sync engine talks to: the pool catalog,
//! the per-(category, chain) sync cursor, and the sink for decoded pool
//! state. Schema and backend live outside this crate; `MemoryStore` backs all
//! three for tests and single-process runs.

use crate::decoder::DecodedPoolState;
use crate::pool_types::PoolDescriptor;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Last fully processed block for one (category, chain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub category: String,
    pub chain: String,
    pub block_number: u64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PoolCatalog: Send + Sync {
    /// Descriptors for the given ids. Unknown ids are simply missing from the
    /// result.
    async fn get_pool_descriptors(&self, ids: &[String]) -> Result<Vec<PoolDescriptor>>;

    async fn upsert_pool_descriptors(&self, pools: &[PoolDescriptor]) -> Result<()>;
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(&self, category: &str, chain: &str) -> Result<Option<SyncCursor>>;

    /// Writes `block_number` only if the stored block still equals `expected`
    /// (`None` meaning no cursor yet). Returns whether the write happened.
    async fn compare_and_set_cursor(
        &self,
        category: &str,
        chain: &str,
        expected: Option<u64>,
        block_number: u64,
    ) -> Result<bool>;

    /// Unconditional write. Operator override only; may move the cursor back.
    async fn set_cursor(&self, category: &str, chain: &str, block_number: u64) -> Result<()>;
}

/// Destination for decoded pool records.
///
/// A record is a snapshot at one block: writing one replaces whatever was
/// stored for that pool, including fields the new record lacks. Fields from
/// different blocks are never merged.
#[async_trait]
pub trait PoolStateSink: Send + Sync {
    async fn upsert_pool_state(&self, records: &[DecodedPoolState]) -> Result<()>;
}

/// In-memory implementation of every storage trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pools: DashMap<String, PoolDescriptor>,
    cursors: DashMap<(String, String), (u64, DateTime<Utc>)>,
    states: DashMap<String, DecodedPoolState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest stored state of `pool_id`.
    pub fn pool_state(&self, pool_id: &str) -> Option<DecodedPoolState> {
        self.states.get(pool_id).map(|s| s.clone())
    }

    pub fn pool_states(&self) -> HashMap<String, DecodedPoolState> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of catalog descriptors.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

#[async_trait]
impl PoolCatalog for MemoryStore {
    async fn get_pool_descriptors(&self, ids: &[String]) -> Result<Vec<PoolDescriptor>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.pools.get(id).map(|p| p.clone()))
            .collect())
    }

    async fn upsert_pool_descriptors(&self, pools: &[PoolDescriptor]) -> Result<()> {
        for pool in pools {
            self.pools.insert(pool.id.clone(), pool.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn get_cursor(&self, category: &str, chain: &str) -> Result<Option<SyncCursor>> {
        Ok(self
            .cursors
            .get(&(category.to_string(), chain.to_string()))
            .map(|entry| {
                let (block_number, updated_at) = *entry;
                SyncCursor {
                    category: category.to_string(),
                    chain: chain.to_string(),
                    block_number,
                    updated_at,
                }
            }))
    }

    async fn compare_and_set_cursor(
        &self,
        category: &str,
        chain: &str,
        expected: Option<u64>,
        block_number: u64,
    ) -> Result<bool> {
        match self
            .cursors
            .entry((category.to_string(), chain.to_string()))
        {
            Entry::Occupied(mut entry) if expected == Some(entry.get().0) => {
                entry.insert((block_number, Utc::now()));
                Ok(true)
            }
            Entry::Vacant(entry) if expected.is_none() => {
                entry.insert((block_number, Utc::now()));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_cursor(&self, category: &str, chain: &str, block_number: u64) -> Result<()> {
        self.cursors
            .insert((category.to_string(), chain.to_string()), (block_number, Utc::now()));
        Ok(())
    }
}

#[async_trait]
impl PoolStateSink for MemoryStore {
    async fn upsert_pool_state(&self, records: &[DecodedPoolState]) -> Result<()> {
        // whole-record replace, see `PoolStateSink`
        for record in records {
            self.states.insert(record.pool_id.clone(), record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FieldValue;
    use crate::pool_types::PoolType;
    use ethers::types::Address;

    #[tokio::test]
    async fn test_compare_and_set_cursor() {
        let store = MemoryStore::new();
        assert!(store.get_cursor("pools", "mainnet").await.unwrap().is_none());

        // stale expectation on an empty store
        assert!(!store
            .compare_and_set_cursor("pools", "mainnet", Some(5), 10)
            .await
            .unwrap());
        assert!(store
            .compare_and_set_cursor("pools", "mainnet", None, 10)
            .await
            .unwrap());
        assert!(!store
            .compare_and_set_cursor("pools", "mainnet", None, 20)
            .await
            .unwrap());
        assert!(store
            .compare_and_set_cursor("pools", "mainnet", Some(10), 20)
            .await
            .unwrap());

        let cursor = store.get_cursor("pools", "mainnet").await.unwrap().unwrap();
        assert_eq!(cursor.block_number, 20);
        // other chains are independent
        assert!(store.get_cursor("pools", "polygon").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_cursor_can_move_back() {
        let store = MemoryStore::new();
        store.set_cursor("pools", "mainnet", 50).await.unwrap();
        store.set_cursor("pools", "mainnet", 0).await.unwrap();
        let cursor = store.get_cursor("pools", "mainnet").await.unwrap().unwrap();
        assert_eq!(cursor.block_number, 0);
        assert!(cursor.updated_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_catalog_returns_only_known_ids() {
        let store = MemoryStore::new();
        let pool = PoolDescriptor {
            id: "0x01".to_string(),
            address: Address::from_low_u64_be(1),
            pool_type: PoolType::Weighted,
            version: 1,
            tokens: vec![],
        };
        store.upsert_pool_descriptors(&[pool.clone()]).await.unwrap();

        let found = store
            .get_pool_descriptors(&["0x01".to_string(), "0x02".to_string()])
            .await
            .unwrap();
        assert_eq!(found, vec![pool]);
        assert_eq!(store.pool_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_the_whole_record() {
        let store = MemoryStore::new();
        let snapshot = |block_number: u64, fields: &[(&str, &str)]| DecodedPoolState {
            pool_id: "0x01".to_string(),
            block_number,
            fields: fields
                .iter()
                .map(|(name, value)| (name.to_string(), FieldValue::Amount(value.to_string())))
                .collect(),
        };

        store
            .upsert_pool_state(&[snapshot(10, &[("totalShares", "1000"), ("rate", "1.01")])])
            .await
            .unwrap();
        // `rate` reverted at block 20
        store
            .upsert_pool_state(&[snapshot(20, &[("totalShares", "1200")])])
            .await
            .unwrap();

        let stored = store.pool_state("0x01").unwrap();
        assert_eq!(stored, snapshot(20, &[("totalShares", "1200")]));
        assert!(!stored.fields.contains_key("rate"));
        assert_eq!(store.pool_states().len(), 1);
    }
}
