use crate::error::AmountError;
use rust_decimal::Decimal;
use std::str::FromStr;

/// `to_usd("10000000", 6)` is exactly `10`. The result is normalized so that
/// trailing zeros from the fixed scale do not leak into serialized output.
pub fn to_usd(raw: &str, decimals: u32) -> Result<Decimal, AmountError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::InvalidInteger(raw.to_string()));
    }

    let units: i128 = trimmed
        .parse()
        .map_err(|_| AmountError::Overflow(raw.to_string()))?;

    Decimal::try_from_i128_with_scale(units, decimals)
        .map(|d| d.normalize())
        .map_err(|_| AmountError::Overflow(raw.to_string()))
}

pub fn to_raw(amount: Decimal, decimals: u32) -> Result<String, AmountError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(AmountError::InvalidDecimal(amount.to_string()));
    }
    if amount.normalize().scale() > decimals {
        return Err(AmountError::InvalidDecimal(amount.to_string()));
    }

    let factor = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
    let scaled = amount
        .checked_mul(factor)
        .ok_or_else(|| AmountError::Overflow(amount.to_string()))?;

    Ok(scaled.trunc().normalize().to_string())
}

pub fn parse_decimal(value: &str) -> Result<Decimal, AmountError> {
    Decimal::from_str(value.trim())
        .map(|d| d.normalize())
        .map_err(|_| AmountError::InvalidDecimal(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_usdc_is_exactly_ten() {
        let usd = to_usd("10000000", 6).unwrap();
        assert_eq!(usd, Decimal::from(10));
        assert_eq!(usd.to_string(), "10");
    }

    #[test]
    fn repeated_conversion_does_not_drift() {
        let mut raw = "12345678".to_string();
        for _ in 0..100 {
            let usd = to_usd(&raw, 6).unwrap();
            raw = to_raw(usd, 6).unwrap();
        }
        assert_eq!(raw, "12345678");
        assert_eq!(to_usd(&raw, 6).unwrap().to_string(), "12.345678");
    }

    #[test]
    fn sub_cent_amounts_keep_precision() {
        assert_eq!(to_usd("1", 6).unwrap().to_string(), "0.000001");
        assert_eq!(to_usd("0", 6).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn rejects_non_integer_raw_amounts() {
        assert!(matches!(to_usd("", 6), Err(AmountError::InvalidInteger(_))));
        assert!(matches!(to_usd("-5", 6), Err(AmountError::InvalidInteger(_))));
        assert!(matches!(to_usd("1.5", 6), Err(AmountError::InvalidInteger(_))));
        assert!(matches!(to_usd("0x10", 6), Err(AmountError::InvalidInteger(_))));
    }

    #[test]
    fn rejects_amounts_beyond_decimal_range() {
        let huge = "9".repeat(40);
        assert!(matches!(to_usd(&huge, 6), Err(AmountError::Overflow(_))));
    }

    #[test]
    fn to_raw_rejects_excess_precision() {
        let too_precise = parse_decimal("1.0000001").unwrap();
        assert!(to_raw(too_precise, 6).is_err());
        assert_eq!(to_raw(parse_decimal("24.80").unwrap(), 6).unwrap(), "24800000");
    }
}
