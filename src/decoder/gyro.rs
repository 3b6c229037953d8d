// Gyroscope pools. Only GyroE v2+ exposes rate providers.

use super::field_names::TOKEN_RATES;
use super::{Decoding, DecoderError, FieldValue, Planner, PoolField};
use crate::normalization::normalize_fixed_point;
use crate::pool_types::PoolType;
use std::collections::BTreeMap;

fn has_rate_providers(pool_type: PoolType, version: u32) -> bool {
    pool_type == PoolType::GyroE && version >= 2
}

pub fn plan(planner: &mut Planner<'_>) -> Result<(), DecoderError> {
    let pool = planner.pool();
    if has_rate_providers(pool.pool_type, pool.version) {
        planner.pool_call(PoolField::TokenRates, "getTokenRates", vec![])?;
    }
    Ok(())
}

pub fn decode(decoding: &Decoding<'_>, fields: &mut BTreeMap<String, FieldValue>) {
    let pool = decoding.pool();
    if !has_rate_providers(pool.pool_type, pool.version) {
        return;
    }
    let (Some(rate0), Some(rate1)) = (
        decoding.uint_at(PoolField::TokenRates, 0),
        decoding.uint_at(PoolField::TokenRates, 1),
    ) else {
        return;
    };
    fields.insert(
        TOKEN_RATES.to_string(),
        FieldValue::PerToken(vec![
            Some(normalize_fixed_point(rate0)),
            Some(normalize_fixed_point(rate1)),
        ]),
    );
}
