use alloy::primitives::U256;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;

/// Convert a raw on-chain fixed-point integer into a decimal quantity by
/// dividing by 10^decimals. Exact: no precision is lost.
pub fn scale_down(raw: U256, decimals: u8) -> BigDecimal {
    let digits = BigInt::from_bytes_be(Sign::Plus, &raw.to_be_bytes::<32>());
    BigDecimal::new(digits, decimals as i64)
}

/// Inverse of `scale_down`: multiply by 10^decimals. Exact.
pub fn scale_up(value: &BigDecimal, decimals: u8) -> BigDecimal {
    let (digits, exponent) = value.as_bigint_and_exponent();
    BigDecimal::new(digits, exponent - decimals as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_scale_down_wei() {
        let raw = U256::from(10u64) * U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(scale_down(raw, 18), BigDecimal::from(10));
    }

    #[test]
    fn test_scale_down_sub_unit() {
        let raw = U256::from(1_500_000u64);
        assert_eq!(scale_down(raw, 6), BigDecimal::from_str("1.5").unwrap());
    }

    #[test]
    fn test_round_trip_recovers_raw() {
        let raw = U256::from_str("123456789012345678901234567").unwrap();
        let scaled = scale_down(raw, 18);
        let recovered = scale_up(&scaled, 18);
        assert_eq!(recovered, BigDecimal::from_str("123456789012345678901234567").unwrap());
    }

    #[test]
    fn test_scale_down_max_u256() {
        // The full 32-byte range must stay exact
        let raw = U256::MAX;
        let scaled = scale_down(raw, 18);
        assert_eq!(scale_up(&scaled, 18), BigDecimal::from_str(&raw.to_string()).unwrap());
    }
}
