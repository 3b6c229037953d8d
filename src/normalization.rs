// src/normalization.rs
//
// Conversion of on-chain fixed-point integers into human-readable decimal strings.

use ethers::types::U256;
use ethers::utils::format_units;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Decimals used by Balancer's FixedPoint math (fees, weights, rates, BPT supply).
pub const FIXED_POINT_DECIMALS: u8 = 18;

/// Normalize a base-unit amount (U256) into a decimal string using token decimals.
///
/// Trailing zeros (and a bare trailing `.`) are trimmed. Returns `None` for
/// decimals `format_units` cannot express.
///
/// ```
/// use ethers::types::U256;
/// use pool_sync_sdk::normalization::normalize_amount;
///
/// assert_eq!(normalize_amount(U256::from(1_500_000u64), 6).as_deref(), Some("1.5"));
/// assert_eq!(normalize_amount(U256::from(42u64), 0).as_deref(), Some("42"));
/// ```
pub fn normalize_amount(amount: U256, decimals: u8) -> Option<String> {
    let formatted = format_units(amount, decimals as u32).ok()?;
    let trimmed = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.')
    } else {
        formatted.as_str()
    };
    Some(trimmed.to_string())
}

/// Normalize an 18-decimal fixed-point value.
pub fn normalize_fixed_point(value: U256) -> String {
    // 18 decimals is always within format_units' range
    normalize_amount(value, FIXED_POINT_DECIMALS).unwrap_or_else(|| value.to_string())
}

/// Divides `value` by `precision` (e.g. amplification parameter / its precision).
///
/// Returns `None` if `precision` is zero or either operand does not fit a `Decimal`.
pub fn ratio_to_decimal_string(value: U256, precision: U256) -> Option<String> {
    if precision.is_zero() {
        return None;
    }
    let num = Decimal::from_str(&value.to_string()).ok()?;
    let den = Decimal::from_str(&precision.to_string()).ok()?;
    num.checked_div(den).map(|d| d.normalize().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(amount: U256, decimals: u8) -> String {
        normalize_amount(amount, decimals).unwrap()
    }

    #[test]
    fn test_normalize_amount_per_decimals() {
        assert_eq!(normalized(U256::from(1_000_000u64), 6), "1");
        assert_eq!(normalized(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(normalized(U256::from(1_234_567u64), 6), "1.234567");
        assert_eq!(normalized(U256::from(1u64), 6), "0.000001");
        assert_eq!(normalized(U256::from(250_000_000_000u64), 6), "250000");
        assert_eq!(normalized(U256::zero(), 18), "0");
        assert_eq!(normalized(U256::exp10(18) * U256::from(25u64), 18), "25");
    }

    #[test]
    fn test_normalize_amount_without_decimals() {
        assert_eq!(normalized(U256::from(42u64), 0), "42");
        assert_eq!(normalized(U256::from(100u64), 0), "100");
        assert_eq!(normalized(U256::zero(), 0), "0");
    }

    #[test]
    fn test_normalize_amount_full_u256_range() {
        // 10^40 raw units, far above what a 96-bit Decimal mantissa can hold
        assert_eq!(normalized(U256::exp10(40), 18), "10000000000000000000000");
        assert_eq!(
            normalized(U256::MAX, 18),
            "115792089237316195423570985008687907853269984665640564039457.584007913129639935"
        );
    }

    #[test]
    fn test_normalize_amount_rejects_unsupported_decimals() {
        assert!(normalize_amount(U256::one(), 200).is_none());
    }

    #[test]
    fn test_normalize_fixed_point() {
        // 0.3% swap fee
        assert_eq!(normalize_fixed_point(U256::exp10(15) * 3), "0.003");
        // 80/20 weight
        assert_eq!(normalize_fixed_point(U256::exp10(17) * 8), "0.8");
    }

    #[test]
    fn test_ratio_to_decimal_string() {
        assert_eq!(
            ratio_to_decimal_string(U256::from(200_000u64), U256::from(1_000u64)).as_deref(),
            Some("200")
        );
        assert_eq!(
            ratio_to_decimal_string(U256::from(1_500u64), U256::from(1_000u64)).as_deref(),
            Some("1.5")
        );
        assert!(ratio_to_decimal_string(U256::from(1u64), U256::zero()).is_none());
    }
}
