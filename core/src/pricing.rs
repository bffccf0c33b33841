//! Price snapshot computation.

use crate::types::{Currency, Pricing};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Default sales tax rate (8%).
pub const DEFAULT_TAX_RATE: Decimal = dec!(0.08);

/// Decimal places of the currency's minor unit.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Computes tax and totals for a booking.
///
/// ```text
/// taxable = service_price - discount
/// tax     = round_half_even(taxable * rate, 2)
/// total   = taxable + tax
/// ```
///
/// Tax is the only rounded quantity, so `total == taxable + tax` holds exactly.
/// Negative taxable amounts are passed through unchanged; callers decide
/// whether a discount may exceed the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingCalculator {
    tax_rate: Decimal,
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_TAX_RATE)
    }
}

impl PricingCalculator {
    /// Create a calculator with the given tax rate (e.g. `0.08`).
    #[must_use]
    pub const fn new(tax_rate: Decimal) -> Self {
        Self { tax_rate }
    }

    /// Configured tax rate.
    #[must_use]
    pub const fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    /// Compute the price snapshot.
    ///
    /// ```
    /// use chairbook_core::pricing::PricingCalculator;
    /// use chairbook_core::types::Currency;
    /// use rust_decimal_macros::dec;
    ///
    /// let pricing =
    ///     PricingCalculator::default().compute(dec!(50.00), dec!(5.00), Currency::usd());
    /// assert_eq!(pricing.tax_amount, dec!(3.60));
    /// assert_eq!(pricing.total_price, dec!(48.60));
    /// ```
    #[must_use]
    pub fn compute(
        &self,
        service_price: Decimal,
        discount_amount: Decimal,
        currency: Currency,
    ) -> Pricing {
        let taxable = service_price - discount_amount;
        let tax_amount = (taxable * self.tax_rate)
            .round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointNearestEven);

        Pricing {
            service_price,
            discount_amount,
            tax_amount,
            total_price: taxable + tax_amount,
            currency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn compute(price: Decimal, discount: Decimal) -> Pricing {
        PricingCalculator::default().compute(price, discount, Currency::usd())
    }

    #[test]
    fn computes_tax_on_discounted_price() {
        let pricing = compute(dec!(40.00), dec!(0));
        assert_eq!(pricing.tax_amount, dec!(3.20));
        assert_eq!(pricing.total_price, dec!(43.20));
    }

    #[test]
    fn rounds_half_to_even() {
        // 0.3125 * 0.08 = 0.025 → 0.02 ; 0.9375 * 0.08 = 0.075 → 0.08
        assert_eq!(compute(dec!(0.3125), dec!(0)).tax_amount, dec!(0.02));
        assert_eq!(compute(dec!(0.9375), dec!(0)).tax_amount, dec!(0.08));
    }

    #[test]
    fn discount_above_price_is_not_clamped() {
        let pricing = compute(dec!(10.00), dec!(15.00));
        assert_eq!(pricing.tax_amount, dec!(-0.40));
        assert_eq!(pricing.total_price, dec!(-5.40));
    }

    #[test]
    fn custom_rate() {
        let pricing =
            PricingCalculator::new(dec!(0.20)).compute(dec!(25), dec!(5), Currency::usd());
        assert_eq!(pricing.tax_amount, dec!(4.00));
        assert_eq!(pricing.total_price, dec!(24.00));
    }

    proptest! {
        #[test]
        fn total_is_taxable_plus_tax(
            price_cents in 0i64..1_000_000,
            discount_cents in 0i64..1_000_000,
        ) {
            let price = Decimal::new(price_cents, 2);
            let discount = Decimal::new(discount_cents.min(price_cents), 2);
            let pricing = compute(price, discount);

            prop_assert_eq!(pricing.total_price, (price - discount) + pricing.tax_amount);

            let exact_tax = (price - discount) * DEFAULT_TAX_RATE;
            prop_assert!((pricing.tax_amount - exact_tax).abs() <= dec!(0.005));
        }
    }
}
