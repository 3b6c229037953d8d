// src/pool_types.rs

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of a pool, determining which state fields exist and how
/// they are read from chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolType {
    Weighted,
    Investment,
    LiquidityBootstrapping,
    Stable,
    PhantomStable,
    ComposableStable,
    MetaStable,
    Linear,
    Gyro2,
    Gyro3,
    GyroE,
    Element,
    Fx,
}

impl PoolType {
    /// Every variant, in declaration order.
    pub const ALL: [PoolType; 13] = [
        PoolType::Weighted,
        PoolType::Investment,
        PoolType::LiquidityBootstrapping,
        PoolType::Stable,
        PoolType::PhantomStable,
        PoolType::ComposableStable,
        PoolType::MetaStable,
        PoolType::Linear,
        PoolType::Gyro2,
        PoolType::Gyro3,
        PoolType::GyroE,
        PoolType::Element,
        PoolType::Fx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Weighted => "WEIGHTED",
            PoolType::Investment => "INVESTMENT",
            PoolType::LiquidityBootstrapping => "LIQUIDITY_BOOTSTRAPPING",
            PoolType::Stable => "STABLE",
            PoolType::PhantomStable => "PHANTOM_STABLE",
            PoolType::ComposableStable => "COMPOSABLE_STABLE",
            PoolType::MetaStable => "META_STABLE",
            PoolType::Linear => "LINEAR",
            PoolType::Gyro2 => "GYRO2",
            PoolType::Gyro3 => "GYRO3",
            PoolType::GyroE => "GYROE",
            PoolType::Element => "ELEMENT",
            PoolType::Fx => "FX",
        }
    }
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported pool type: {0}")]
pub struct UnsupportedPoolType(pub String);

impl FromStr for PoolType {
    type Err = UnsupportedPoolType;

    /// Accepts both the subgraph spelling (`ComposableStable`, `AaveLinear`,
    /// `StablePhantom`) and the canonical upper snake case (`COMPOSABLE_STABLE`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        let pool_type = match normalized.as_str() {
            "weighted" => PoolType::Weighted,
            "investment" => PoolType::Investment,
            "liquiditybootstrapping" => PoolType::LiquidityBootstrapping,
            "stable" => PoolType::Stable,
            "phantomstable" | "stablephantom" => PoolType::PhantomStable,
            "composablestable" => PoolType::ComposableStable,
            "metastable" => PoolType::MetaStable,
            "gyro2" => PoolType::Gyro2,
            "gyro3" => PoolType::Gyro3,
            "gyroe" => PoolType::GyroE,
            "element" => PoolType::Element,
            "fx" => PoolType::Fx,
            // AaveLinear, ERC4626Linear, EulerLinear, ...
            other if other.ends_with("linear") => PoolType::Linear,
            _ => return Err(UnsupportedPoolType(s.to_string())),
        };
        Ok(pool_type)
    }
}

/// The accessor a pool exposes for its share count.
///
/// Picking the wrong one does not revert: `totalSupply()` on a pool with
/// pre-minted BPT silently returns the wrong share count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupplyAccessor {
    /// Plain ERC20 `totalSupply()`
    TotalSupply,
    /// `getActualSupply()`: nets out protocol fees owed but not yet minted
    ActualSupply,
    /// `getVirtualSupply()`: excludes pre-minted BPT held by the vault
    VirtualSupply,
}

impl SupplyAccessor {
    pub fn function_name(&self) -> &'static str {
        match self {
            SupplyAccessor::TotalSupply => "totalSupply",
            SupplyAccessor::ActualSupply => "getActualSupply",
            SupplyAccessor::VirtualSupply => "getVirtualSupply",
        }
    }
}

/// Maps `(type, version)` to the accessor returning the pool's real share count.
pub fn total_supply_accessor(pool_type: PoolType, version: u32) -> SupplyAccessor {
    match pool_type {
        PoolType::Linear | PoolType::PhantomStable => SupplyAccessor::VirtualSupply,
        PoolType::ComposableStable => SupplyAccessor::ActualSupply,
        PoolType::Weighted if version >= 2 => SupplyAccessor::ActualSupply,
        PoolType::Weighted
        | PoolType::Investment
        | PoolType::LiquidityBootstrapping
        | PoolType::Stable
        | PoolType::MetaStable
        | PoolType::Gyro2
        | PoolType::Gyro3
        | PoolType::GyroE
        | PoolType::Element
        | PoolType::Fx => SupplyAccessor::TotalSupply,
    }
}

/// A token held by a pool, as known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
}

/// Immutable catalog snapshot of a pool. Never mutated by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDescriptor {
    /// Vault pool id, `0x` + 64 lowercase hex chars
    pub id: String,
    pub address: Address,
    pub pool_type: PoolType,
    pub version: u32,
    pub tokens: Vec<TokenInfo>,
}

impl PoolDescriptor {
    /// Parses `id` as the bytes32 vault pool id.
    pub fn pool_id_bytes(&self) -> Option<H256> {
        H256::from_str(&self.id).ok()
    }

    /// Decimals of `token` as declared in the catalog.
    pub fn decimals_of(&self, token: &Address) -> Option<u8> {
        self.tokens
            .iter()
            .find(|t| &t.address == token)
            .map(|t| t.decimals)
    }
}

/// Canonical string form of a bytes32 pool id.
pub fn format_pool_id(id: &H256) -> String {
    format!("0x{}", hex::encode(id.as_bytes()))
}
