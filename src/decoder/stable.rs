// Stable-math families: amplification plus per-token rate providers.

use super::field_names::{AMP, TOKEN_RATES};
use super::{Decoding, DecoderError, FieldValue, Planner, PoolField};
use crate::normalization::{normalize_fixed_point, ratio_to_decimal_string};
use ethers::abi::Token;
use std::collections::BTreeMap;

pub fn plan(planner: &mut Planner<'_>) -> Result<(), DecoderError> {
    planner.pool_call(PoolField::Amp, "getAmplificationParameter", vec![])?;
    for (i, token) in planner.pool().tokens.iter().enumerate() {
        planner.pool_call(
            PoolField::TokenRate(i),
            "getTokenRate",
            vec![Token::Address(token.address)],
        )?;
    }
    Ok(())
}

pub fn decode(decoding: &Decoding<'_>, fields: &mut BTreeMap<String, FieldValue>) {
    decode_amp(decoding, fields);
    if let Some(rates) = per_token_rates(decoding, PoolField::TokenRate) {
        fields.insert(TOKEN_RATES.to_string(), FieldValue::PerToken(rates));
    }
}

/// MetaStable pools cache their rates instead of exposing `getTokenRate`.
pub fn plan_meta(planner: &mut Planner<'_>) -> Result<(), DecoderError> {
    planner.pool_call(PoolField::Amp, "getAmplificationParameter", vec![])?;
    for (i, token) in planner.pool().tokens.iter().enumerate() {
        planner.pool_call(
            PoolField::PriceRateCache(i),
            "getPriceRateCache",
            vec![Token::Address(token.address)],
        )?;
    }
    Ok(())
}

pub fn decode_meta(decoding: &Decoding<'_>, fields: &mut BTreeMap<String, FieldValue>) {
    decode_amp(decoding, fields);
    if let Some(rates) = per_token_rates(decoding, PoolField::PriceRateCache) {
        fields.insert(TOKEN_RATES.to_string(), FieldValue::PerToken(rates));
    }
}

/// amp = value / precision
fn decode_amp(decoding: &Decoding<'_>, fields: &mut BTreeMap<String, FieldValue>) {
    let (Some(value), Some(precision)) = (
        decoding.uint_at(PoolField::Amp, 0),
        decoding.uint_at(PoolField::Amp, 2),
    ) else {
        return;
    };
    match ratio_to_decimal_string(value, precision) {
        Some(amp) => {
            fields.insert(AMP.to_string(), FieldValue::Amount(amp));
        }
        None => decoding.malformed(PoolField::Amp),
    }
}

/// First output of `field(i)` for every token, `None` where it failed.
/// Absent altogether when no token's rate could be read.
fn per_token_rates(
    decoding: &Decoding<'_>,
    field: fn(usize) -> PoolField,
) -> Option<Vec<Option<String>>> {
    let rates: Vec<Option<String>> = (0..decoding.pool().tokens.len())
        .map(|i| decoding.uint(field(i)).map(normalize_fixed_point))
        .collect();
    if rates.iter().all(Option::is_none) {
        None
    } else {
        Some(rates)
    }
}
