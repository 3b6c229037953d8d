// Linear pools: main/wrapped token pair with rebalancing targets.

use super::field_names::{LOWER_TARGET, MAIN_INDEX, UPPER_TARGET, WRAPPED_INDEX, WRAPPED_TOKEN_RATE};
use super::{Decoding, DecoderError, FieldValue, Planner, PoolField};
use crate::normalization::{normalize_amount, normalize_fixed_point};
use ethers::abi::Token;
use ethers::types::U256;
use std::collections::BTreeMap;

pub fn plan(planner: &mut Planner<'_>) -> Result<(), DecoderError> {
    planner.pool_call(PoolField::Targets, "getTargets", vec![])?;
    planner.pool_call(PoolField::WrappedTokenRate, "getWrappedTokenRate", vec![])?;
    planner.pool_call(PoolField::MainIndex, "getMainIndex", vec![])?;
    planner.pool_call(PoolField::WrappedIndex, "getWrappedIndex", vec![])?;
    Ok(())
}

pub fn decode(decoding: &Decoding<'_>, fields: &mut BTreeMap<String, FieldValue>) {
    if let Some(rate) = decoding.uint(PoolField::WrappedTokenRate) {
        fields.insert(
            WRAPPED_TOKEN_RATE.to_string(),
            FieldValue::Amount(normalize_fixed_point(rate)),
        );
    }

    let main_index = index(decoding, PoolField::MainIndex);
    if let Some(main_index) = main_index {
        fields.insert(MAIN_INDEX.to_string(), FieldValue::Index(main_index));
    }
    if let Some(wrapped_index) = index(decoding, PoolField::WrappedIndex) {
        fields.insert(WRAPPED_INDEX.to_string(), FieldValue::Index(wrapped_index));
    }

    // Targets are denominated in the main token.
    let Some(decimals) = main_index.and_then(|i| main_token_decimals(decoding, i as usize)) else {
        return;
    };
    for (position, name) in [(0, LOWER_TARGET), (1, UPPER_TARGET)] {
        let target = decoding.uint_at(PoolField::Targets, position);
        if let Some(amount) = target.and_then(|t| normalize_amount(t, decimals)) {
            fields.insert(name.to_string(), FieldValue::Amount(amount));
        }
    }
}

fn index(decoding: &Decoding<'_>, field: PoolField) -> Option<u64> {
    let value = decoding.uint(field)?;
    if value > U256::from(u64::MAX) {
        decoding.malformed(field);
        return None;
    }
    Some(value.as_u64())
}

/// Decimals of the token at `main_index` in the vault's token order, falling
/// back to catalog order when balances were not read.
fn main_token_decimals(decoding: &Decoding<'_>, main_index: usize) -> Option<u8> {
    let pool = decoding.pool();
    let vault_order = decoding
        .output(PoolField::Balances)
        .and_then(|output| output.first().cloned())
        .and_then(Token::into_array)
        .and_then(|tokens| tokens.get(main_index).cloned())
        .and_then(Token::into_address);
    let address = vault_order.or_else(|| pool.tokens.get(main_index).map(|t| t.address))?;
    pool.decimals_of(&address)
}
