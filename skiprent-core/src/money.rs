use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Monetary amount in euros, fixed-point.
pub type Amount = Decimal;

pub const DEFAULT_VAT_RATE: Decimal = dec!(0.20);

/// Round half-up to cents. Amounts here are never negative, so "away from zero" is "up".
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// VAT owed on a tax-exclusive total. `None` when the product overflows.
pub fn vat_on(total_ht: Amount, rate: Decimal) -> Option<Amount> {
    total_ht.checked_mul(rate).map(round2)
}

pub fn is_negative(value: Decimal) -> bool {
    value.is_sign_negative() && !value.is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_up() {
        assert_eq!(round2(dec!(10.005)), dec!(10.01));
        assert_eq!(round2(dec!(10.004)), dec!(10.00));
        assert_eq!(round2(dec!(0.125)), dec!(0.13));
    }

    #[test]
    fn test_vat() {
        assert_eq!(vat_on(dec!(165), DEFAULT_VAT_RATE), Some(dec!(33)));
        assert_eq!(vat_on(dec!(10.03), DEFAULT_VAT_RATE), Some(dec!(2.01)));
        assert_eq!(vat_on(dec!(0.025), DEFAULT_VAT_RATE), Some(dec!(0.01)));
        assert_eq!(vat_on(Decimal::MAX, dec!(2)), None);
    }

    #[test]
    fn test_negative_zero_is_not_negative() {
        assert!(!is_negative(dec!(-0)));
        assert!(is_negative(dec!(-0.01)));
        assert!(!is_negative(dec!(3)));
    }
}
