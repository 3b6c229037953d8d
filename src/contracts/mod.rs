// Contracts Module - Public ABIs Only

use ethers::types::{Address, H160};

pub mod i_balancer_pool;
pub mod i_balancer_vault;

// Public exports
pub use i_balancer_pool::{IBalancerPool, IBALANCERPOOL_ABI};
pub use i_balancer_vault::{
    IBalancerVault, PoolBalanceChangedFilter, PoolBalanceManagedFilter, SwapFilter,
    IBALANCERVAULT_ABI,
};

/// Balancer V2 Vault, deployed at the same address on every chain.
pub const BALANCER_VAULT_ADDRESS: Address = H160([
    0xba, 0x12, 0x22, 0x22, 0x22, 0x22, 0x8d, 0x8b, 0xa4, 0x45, 0x95, 0x8a, 0x75, 0xa0, 0x70, 0x4d,
    0x56, 0x6b, 0xf2, 0xc8,
]);
