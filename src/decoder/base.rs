// Reads every pool family shares.

use super::field_names::{BALANCES, RATE, SWAP_FEE, TOTAL_SHARES};
use super::{Decoding, DecoderError, FieldValue, Planner, PoolField};
use crate::normalization::{normalize_amount, normalize_fixed_point};
use crate::pool_types::total_supply_accessor;
use ethers::abi::Token;
use std::collections::BTreeMap;

pub fn plan(planner: &mut Planner<'_>) -> Result<(), DecoderError> {
    let pool = planner.pool();
    let pool_id = planner.pool_id();
    planner.vault_call(
        PoolField::Balances,
        "getPoolTokens",
        vec![Token::FixedBytes(pool_id.as_bytes().to_vec())],
    )?;
    let accessor = total_supply_accessor(pool.pool_type, pool.version);
    planner.pool_call(PoolField::TotalShares, accessor.function_name(), vec![])?;
    planner.pool_call(PoolField::SwapFee, "getSwapFeePercentage", vec![])?;
    planner.pool_call(PoolField::Rate, "getRate", vec![])?;
    Ok(())
}

pub fn decode(decoding: &Decoding<'_>, fields: &mut BTreeMap<String, FieldValue>) {
    if let Some(balances) = decode_balances(decoding) {
        fields.insert(BALANCES.to_string(), FieldValue::Amounts(balances));
    }
    for (field, name) in [
        (PoolField::TotalShares, TOTAL_SHARES),
        (PoolField::SwapFee, SWAP_FEE),
        (PoolField::Rate, RATE),
    ] {
        if let Some(value) = decoding.uint(field) {
            fields.insert(
                name.to_string(),
                FieldValue::Amount(normalize_fixed_point(value)),
            );
        }
    }
}

/// `getPoolTokens` balances, each scaled by its own token's decimals.
fn decode_balances(decoding: &Decoding<'_>) -> Option<Vec<String>> {
    let output = decoding.output(PoolField::Balances)?;
    let columns = (
        output.first().cloned().and_then(Token::into_array),
        output.get(1).cloned().and_then(Token::into_array),
    );
    let (Some(tokens), Some(balances)) = columns else {
        decoding.malformed(PoolField::Balances);
        return None;
    };
    if tokens.len() != balances.len() {
        decoding.malformed(PoolField::Balances);
        return None;
    }

    let pool = decoding.pool();
    let mut scaled = Vec::with_capacity(balances.len());
    for (token, balance) in tokens.into_iter().zip(balances) {
        let (Some(token), Some(balance)) = (token.into_address(), balance.into_uint()) else {
            decoding.malformed(PoolField::Balances);
            return None;
        };
        let Some(decimals) = pool.decimals_of(&token) else {
            log::warn!(
                "Pool {} holds token {:?} missing from the catalog, skipping balances",
                pool.id,
                token
            );
            return None;
        };
        let Some(amount) = normalize_amount(balance, decimals) else {
            decoding.malformed(PoolField::Balances);
            return None;
        };
        scaled.push(amount);
    }
    Some(scaled)
}

pub fn plan_nothing(_planner: &mut Planner<'_>) -> Result<(), DecoderError> {
    Ok(())
}

pub fn decode_nothing(_decoding: &Decoding<'_>, _fields: &mut BTreeMap<String, FieldValue>) {}
