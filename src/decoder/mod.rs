//! # Pool State Decoder
//!
//! Turns a [`PoolDescriptor`] into the contract reads needed to snapshot its
//! state, and turns the batched results back into a [`DecodedPoolState`].
//!
//! Every pool family shares a base plan (vault balances, share supply, swap
//! fee, rate). Family-specific reads are added by a [`Strategy`] picked from a
//! static table keyed on [`PoolType`]; adding a family means adding a match arm
//! in [`strategy_for`], which the compiler enforces.
//!
//! Decoding is lenient: a read that reverted or returned malformed data just
//! leaves its field out of the record. Only a descriptor the catalog should
//! never have produced (no address, unparseable id, no tokens) is an error.

mod base;
mod gyro;
mod linear;
mod stable;
mod weighted;

use crate::contracts::{IBALANCERPOOL_ABI, IBALANCERVAULT_ABI};
use crate::multicall::{CallSpec, ResultTree};
use crate::pool_types::{PoolDescriptor, PoolType};
use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output field names of a [`DecodedPoolState`].
pub mod field_names {
    pub const BALANCES: &str = "balances";
    pub const TOTAL_SHARES: &str = "totalShares";
    pub const SWAP_FEE: &str = "swapFee";
    pub const RATE: &str = "rate";
    pub const WEIGHTS: &str = "weights";
    pub const SWAP_ENABLED: &str = "swapEnabled";
    pub const AMP: &str = "amp";
    pub const TOKEN_RATES: &str = "tokenRates";
    pub const LOWER_TARGET: &str = "lowerTarget";
    pub const UPPER_TARGET: &str = "upperTarget";
    pub const WRAPPED_TOKEN_RATE: &str = "wrappedTokenRate";
    pub const MAIN_INDEX: &str = "mainIndex";
    pub const WRAPPED_INDEX: &str = "wrappedIndex";
}

/// The contract read a call result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolField {
    Balances,
    TotalShares,
    SwapFee,
    Rate,
    Weights,
    SwapEnabled,
    Amp,
    /// `getTokenRate(tokens[i])`
    TokenRate(usize),
    /// `getPriceRateCache(tokens[i])`
    PriceRateCache(usize),
    Targets,
    WrappedTokenRate,
    MainIndex,
    WrappedIndex,
    TokenRates,
}

/// Result key for every call the decoder plans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey {
    pub pool_id: String,
    pub field: PoolField,
}

impl CallKey {
    pub fn new(pool_id: &str, field: PoolField) -> Self {
        Self {
            pool_id: pool_id.to_string(),
            field,
        }
    }
}

/// A decoded, human-scaled state value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Index(u64),
    Amount(String),
    Amounts(Vec<String>),
    /// One entry per pool token; `None` where that token's read failed
    PerToken(Vec<Option<String>>),
}

/// Snapshot of one pool at one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPoolState {
    pub pool_id: String,
    pub block_number: u64,
    pub fields: BTreeMap<String, FieldValue>,
}

/// A descriptor the catalog should never have produced.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("pool {0} has no address")]
    MissingAddress(String),
    #[error("pool {0} has an invalid pool id")]
    InvalidPoolId(String),
    #[error("pool {0} has no tokens")]
    NoTokens(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("ABI lookup failed: {0}")]
    Abi(#[from] ethers::abi::Error),
}

/// Accumulates the calls of one pool's plan.
pub struct Planner<'a> {
    pool: &'a PoolDescriptor,
    pool_id: H256,
    vault: Address,
    calls: Vec<CallSpec<CallKey>>,
}

impl<'a> Planner<'a> {
    fn new(pool: &'a PoolDescriptor, pool_id: H256, vault: Address) -> Self {
        Self {
            pool,
            pool_id,
            vault,
            calls: Vec::new(),
        }
    }

    pub fn pool(&self) -> &'a PoolDescriptor {
        self.pool
    }

    pub fn pool_id(&self) -> H256 {
        self.pool_id
    }

    /// Plans `function(args)` on the pool contract.
    pub fn pool_call(
        &mut self,
        field: PoolField,
        function: &str,
        args: Vec<Token>,
    ) -> Result<(), DecoderError> {
        let function = IBALANCERPOOL_ABI.function(function)?;
        self.calls.push(CallSpec::new(
            CallKey::new(&self.pool.id, field),
            self.pool.address,
            function,
            args,
        ));
        Ok(())
    }

    /// Plans `function(args)` on the vault.
    pub fn vault_call(
        &mut self,
        field: PoolField,
        function: &str,
        args: Vec<Token>,
    ) -> Result<(), DecoderError> {
        let function = IBALANCERVAULT_ABI.function(function)?;
        self.calls.push(CallSpec::new(
            CallKey::new(&self.pool.id, field),
            self.vault,
            function,
            args,
        ));
        Ok(())
    }
}

/// Read access to one pool's slice of a [`ResultTree`].
pub struct Decoding<'a> {
    pool: &'a PoolDescriptor,
    results: &'a ResultTree<CallKey>,
}

impl<'a> Decoding<'a> {
    pub fn pool(&self) -> &'a PoolDescriptor {
        self.pool
    }

    /// Decoded outputs of `field`'s call, if it succeeded.
    pub fn output(&self, field: PoolField) -> Option<&'a [Token]> {
        match self.results.get(&CallKey::new(&self.pool.id, field)) {
            Some(tokens) => Some(tokens.as_slice()),
            None => {
                debug!("No result for {:?} of pool {}", field, self.pool.id);
                None
            }
        }
    }

    pub fn uint(&self, field: PoolField) -> Option<U256> {
        self.uint_at(field, 0)
    }

    /// The `index`-th output of `field`'s call as a uint.
    pub fn uint_at(&self, field: PoolField, index: usize) -> Option<U256> {
        let value = self
            .output(field)?
            .get(index)
            .cloned()
            .and_then(Token::into_uint);
        if value.is_none() {
            self.malformed(field);
        }
        value
    }

    /// The first output of `field`'s call as a `uint256[]`.
    pub fn uint_array(&self, field: PoolField) -> Option<Vec<U256>> {
        let values = self
            .output(field)?
            .first()
            .cloned()
            .and_then(Token::into_array)
            .and_then(|items| {
                items
                    .into_iter()
                    .map(Token::into_uint)
                    .collect::<Option<Vec<_>>>()
            });
        if values.is_none() {
            self.malformed(field);
        }
        values
    }

    pub fn flag(&self, field: PoolField) -> Option<bool> {
        let value = self
            .output(field)?
            .first()
            .cloned()
            .and_then(Token::into_bool);
        if value.is_none() {
            self.malformed(field);
        }
        value
    }

    /// Logs a result that was present but did not have the expected shape.
    pub fn malformed(&self, field: PoolField) {
        warn!(
            "Failed to decode {:?} for pool {}, leaving field out",
            field, self.pool.id
        );
    }
}

type PlanFn = fn(&mut Planner<'_>) -> Result<(), DecoderError>;
type DecodeFn = fn(&Decoding<'_>, &mut BTreeMap<String, FieldValue>);

/// Family-specific reads layered on top of the base plan.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub plan: PlanFn,
    pub decode: DecodeFn,
}

/// Static strategy table.
pub fn strategy_for(pool_type: PoolType) -> Strategy {
    match pool_type {
        PoolType::Weighted => Strategy {
            plan: weighted::plan,
            decode: weighted::decode,
        },
        PoolType::LiquidityBootstrapping | PoolType::Investment => Strategy {
            plan: weighted::plan_managed,
            decode: weighted::decode_managed,
        },
        PoolType::Stable | PoolType::PhantomStable | PoolType::ComposableStable => Strategy {
            plan: stable::plan,
            decode: stable::decode,
        },
        PoolType::MetaStable => Strategy {
            plan: stable::plan_meta,
            decode: stable::decode_meta,
        },
        PoolType::Linear => Strategy {
            plan: linear::plan,
            decode: linear::decode,
        },
        PoolType::Gyro2 | PoolType::Gyro3 | PoolType::GyroE => Strategy {
            plan: gyro::plan,
            decode: gyro::decode,
        },
        PoolType::Element | PoolType::Fx => Strategy {
            plan: base::plan_nothing,
            decode: base::decode_nothing,
        },
    }
}

/// Checks the descriptor and returns its parsed pool id.
fn validate(pool: &PoolDescriptor) -> Result<H256, CatalogError> {
    if pool.address.is_zero() {
        return Err(CatalogError::MissingAddress(pool.id.clone()));
    }
    let pool_id = pool
        .pool_id_bytes()
        .ok_or_else(|| CatalogError::InvalidPoolId(pool.id.clone()))?;
    if pool.tokens.is_empty() {
        return Err(CatalogError::NoTokens(pool.id.clone()));
    }
    Ok(pool_id)
}

/// Plans and decodes pool state reads. Holds no per-cycle state.
#[derive(Debug, Clone)]
pub struct PoolStateDecoder {
    vault: Address,
}

impl PoolStateDecoder {
    pub fn new(vault: Address) -> Self {
        Self { vault }
    }

    pub fn plan_calls(&self, pool: &PoolDescriptor) -> Result<Vec<CallSpec<CallKey>>, DecoderError> {
        let pool_id = validate(pool)?;
        let mut planner = Planner::new(pool, pool_id, self.vault);
        base::plan(&mut planner)?;
        (strategy_for(pool.pool_type).plan)(&mut planner)?;
        Ok(planner.calls)
    }

    /// Builds the record for `pool` from `results`. Fields whose reads failed
    /// are absent; the record may end up with no fields at all.
    pub fn decode(
        &self,
        pool: &PoolDescriptor,
        results: &ResultTree<CallKey>,
        block_number: u64,
    ) -> Result<DecodedPoolState, DecoderError> {
        validate(pool)?;
        let decoding = Decoding { pool, results };
        let mut fields = BTreeMap::new();
        base::decode(&decoding, &mut fields);
        (strategy_for(pool.pool_type).decode)(&decoding, &mut fields);
        Ok(DecodedPoolState {
            pool_id: pool.id.clone(),
            block_number,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool_types::TokenInfo;
    use ethers::types::Address;

    pub(super) const POOL_ID: &str =
        "0x5c6ee304399dbdb9c8ef030ab642b10820db8f56000200000000000000000014";

    pub(super) fn descriptor(pool_type: PoolType, version: u32, decimals: &[u8]) -> PoolDescriptor {
        PoolDescriptor {
            id: POOL_ID.to_string(),
            address: Address::from_low_u64_be(0xb00),
            pool_type,
            version,
            tokens: decimals
                .iter()
                .enumerate()
                .map(|(i, d)| TokenInfo {
                    address: Address::from_low_u64_be(0x100 + i as u64),
                    decimals: *d,
                })
                .collect(),
        }
    }

    pub(super) fn key(field: PoolField) -> CallKey {
        CallKey::new(POOL_ID, field)
    }

    pub(super) fn e18(n: u64) -> U256 {
        U256::exp10(18) * U256::from(n)
    }

    fn planned(pool: &PoolDescriptor) -> Vec<(PoolField, String)> {
        PoolStateDecoder::new(Address::from_low_u64_be(0xba))
            .plan_calls(pool)
            .unwrap()
            .into_iter()
            .map(|c| (c.key.field, c.function.name))
            .collect()
    }

    #[test]
    fn test_every_pool_type_has_a_plan() {
        for pool_type in PoolType::ALL {
            for version in [1, 2] {
                let calls = planned(&descriptor(pool_type, version, &[18, 6]));
                assert!(calls.len() >= 4, "{} v{} has no base plan", pool_type, version);
            }
        }
    }

    #[test]
    fn test_base_plan_uses_vault_and_supply_accessor() {
        let vault = Address::from_low_u64_be(0xba);
        let pool = descriptor(PoolType::Linear, 1, &[18, 6, 18]);
        let calls = PoolStateDecoder::new(vault).plan_calls(&pool).unwrap();

        let balances = calls
            .iter()
            .find(|c| c.key.field == PoolField::Balances)
            .unwrap();
        assert_eq!(balances.target, vault);
        assert_eq!(balances.function.name, "getPoolTokens");
        assert_eq!(
            balances.args,
            vec![Token::FixedBytes(pool.pool_id_bytes().unwrap().as_bytes().to_vec())]
        );

        let supply = calls
            .iter()
            .find(|c| c.key.field == PoolField::TotalShares)
            .unwrap();
        assert_eq!(supply.target, pool.address);
        assert_eq!(supply.function.name, "getVirtualSupply");
    }

    #[test]
    fn test_composable_stable_plans_rate_per_token() {
        let calls = planned(&descriptor(PoolType::ComposableStable, 3, &[18, 18, 6]));
        let fields: Vec<PoolField> = calls.iter().map(|(f, _)| *f).collect();
        assert_eq!(
            fields,
            vec![
                PoolField::Balances,
                PoolField::TotalShares,
                PoolField::SwapFee,
                PoolField::Rate,
                PoolField::Amp,
                PoolField::TokenRate(0),
                PoolField::TokenRate(1),
                PoolField::TokenRate(2),
            ]
        );
        assert_eq!(calls[1].1, "getActualSupply");
    }

    #[test]
    fn test_element_and_fx_only_read_the_base_plan() {
        for pool_type in [PoolType::Element, PoolType::Fx] {
            assert_eq!(planned(&descriptor(pool_type, 1, &[18, 18])).len(), 4);
        }
    }

    #[test]
    fn test_catalog_inconsistencies_are_errors() {
        let decoder = PoolStateDecoder::new(Address::zero());

        let mut no_tokens = descriptor(PoolType::Weighted, 1, &[]);
        no_tokens.tokens.clear();
        assert!(matches!(
            decoder.plan_calls(&no_tokens),
            Err(DecoderError::Catalog(CatalogError::NoTokens(_)))
        ));

        let mut no_address = descriptor(PoolType::Weighted, 1, &[18]);
        no_address.address = Address::zero();
        assert!(matches!(
            decoder.plan_calls(&no_address),
            Err(DecoderError::Catalog(CatalogError::MissingAddress(_)))
        ));

        let mut bad_id = descriptor(PoolType::Weighted, 1, &[18]);
        bad_id.id = "pool-1".to_string();
        assert!(matches!(
            decoder.decode(&bad_id, &ResultTree::new(), 1),
            Err(DecoderError::Catalog(CatalogError::InvalidPoolId(_)))
        ));
    }

    #[test]
    fn test_base_fields_decode_with_token_decimals() {
        let pool = descriptor(PoolType::Element, 1, &[18, 6]);
        let mut results = ResultTree::new();
        results.insert(
            key(PoolField::Balances),
            vec![
                Token::Array(vec![
                    Token::Address(pool.tokens[1].address),
                    Token::Address(pool.tokens[0].address),
                ]),
                Token::Array(vec![
                    Token::Uint(U256::from(2_500_000u64)),
                    Token::Uint(e18(3)),
                ]),
                Token::Uint(U256::from(99u64)),
            ],
        );
        results.insert(key(PoolField::TotalShares), vec![Token::Uint(e18(100))]);
        results.insert(
            key(PoolField::SwapFee),
            vec![Token::Uint(U256::exp10(15))],
        );

        let state = PoolStateDecoder::new(Address::zero())
            .decode(&pool, &results, 42)
            .unwrap();

        assert_eq!(state.block_number, 42);
        assert_eq!(
            state.fields[field_names::BALANCES],
            FieldValue::Amounts(vec!["2.5".to_string(), "3".to_string()])
        );
        assert_eq!(
            state.fields[field_names::TOTAL_SHARES],
            FieldValue::Amount("100".to_string())
        );
        assert_eq!(
            state.fields[field_names::SWAP_FEE],
            FieldValue::Amount("0.001".to_string())
        );
        assert!(!state.fields.contains_key(field_names::RATE));
    }

    #[test]
    fn test_balances_for_unknown_token_are_left_out() {
        let pool = descriptor(PoolType::Fx, 1, &[18]);
        let mut results = ResultTree::new();
        results.insert(
            key(PoolField::Balances),
            vec![
                Token::Array(vec![Token::Address(Address::from_low_u64_be(0xdead))]),
                Token::Array(vec![Token::Uint(e18(1))]),
                Token::Uint(U256::zero()),
            ],
        );
        let state = PoolStateDecoder::new(Address::zero())
            .decode(&pool, &results, 1)
            .unwrap();
        assert!(state.fields.is_empty());
    }

    #[test]
    fn test_malformed_result_is_left_out() {
        let pool = descriptor(PoolType::Element, 1, &[18]);
        let mut results = ResultTree::new();
        results.insert(key(PoolField::Rate), vec![Token::Bool(true)]);
        results.insert(key(PoolField::SwapFee), vec![Token::Uint(U256::exp10(16))]);

        let state = PoolStateDecoder::new(Address::zero())
            .decode(&pool, &results, 1)
            .unwrap();
        assert!(!state.fields.contains_key(field_names::RATE));
        assert_eq!(
            state.fields[field_names::SWAP_FEE],
            FieldValue::Amount("0.01".to_string())
        );
    }

    #[test]
    fn test_field_values_serialize_untagged() {
        let state = DecodedPoolState {
            pool_id: POOL_ID.to_string(),
            block_number: 7,
            fields: BTreeMap::from([
                (field_names::AMP.to_string(), FieldValue::Amount("200".into())),
                (field_names::MAIN_INDEX.to_string(), FieldValue::Index(1)),
                (
                    field_names::TOKEN_RATES.to_string(),
                    FieldValue::PerToken(vec![Some("1.01".into()), None]),
                ),
            ]),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["blockNumber"], 7);
        assert_eq!(json["fields"]["amp"], "200");
        assert_eq!(json["fields"]["mainIndex"], 1);
        assert_eq!(json["fields"]["tokenRates"][1], serde_json::Value::Null);

        let back: DecodedPoolState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
