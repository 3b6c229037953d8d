// Weighted, liquidity bootstrapping and investment pools.

use super::field_names::{SWAP_ENABLED, WEIGHTS};
use super::{Decoding, DecoderError, FieldValue, Planner, PoolField};
use crate::normalization::normalize_fixed_point;
use std::collections::BTreeMap;

pub fn plan(planner: &mut Planner<'_>) -> Result<(), DecoderError> {
    planner.pool_call(PoolField::Weights, "getNormalizedWeights", vec![])
}

pub fn decode(decoding: &Decoding<'_>, fields: &mut BTreeMap<String, FieldValue>) {
    if let Some(weights) = decoding.uint_array(PoolField::Weights) {
        fields.insert(
            WEIGHTS.to_string(),
            FieldValue::Amounts(weights.into_iter().map(normalize_fixed_point).collect()),
        );
    }
}

/// Weighted pools whose owner can pause swaps.
pub fn plan_managed(planner: &mut Planner<'_>) -> Result<(), DecoderError> {
    plan(planner)?;
    planner.pool_call(PoolField::SwapEnabled, "getSwapEnabled", vec![])
}

pub fn decode_managed(decoding: &Decoding<'_>, fields: &mut BTreeMap<String, FieldValue>) {
    decode(decoding, fields);
    if let Some(enabled) = decoding.flag(PoolField::SwapEnabled) {
        fields.insert(SWAP_ENABLED.to_string(), FieldValue::Flag(enabled));
    }
}
