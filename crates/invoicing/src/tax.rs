//! VAT math. Amounts are cents, rates are basis points.

use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainError, DomainResult, Money};

/// A VAT rate accepted on invoice lines: 0 %, 10.5 %, 21 % or 27 %.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct TaxRate(u32);

impl TaxRate {
    pub const EXEMPT: TaxRate = TaxRate(0);
    pub const REDUCED: TaxRate = TaxRate(1_050);
    pub const GENERAL: TaxRate = TaxRate(2_100);
    pub const INCREASED: TaxRate = TaxRate(2_700);

    pub fn basis_points(self) -> u32 {
        self.0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::GENERAL
    }
}

impl TryFrom<u32> for TaxRate {
    type Error = DomainError;

    fn try_from(bp: u32) -> Result<Self, Self::Error> {
        match bp {
            0 | 1_050 | 2_100 | 2_700 => Ok(TaxRate(bp)),
            other => Err(DomainError::validation(format!(
                "unsupported tax rate {other} (expected 0, 1050, 2100 or 2700 basis points)"
            ))),
        }
    }
}

impl From<TaxRate> for u32 {
    fn from(rate: TaxRate) -> u32 {
        rate.0
    }
}

/// `(subtotal, tax)` of a line; tax is zero when `discriminated` is false.
pub fn line_amounts(
    quantity: i64,
    unit_price: Money,
    rate: TaxRate,
    discriminated: bool,
) -> DomainResult<(Money, Money)> {
    let subtotal = unit_price.times(quantity)?;
    let tax = if discriminated {
        subtotal.basis_points(rate.basis_points())?
    } else {
        Money::ZERO
    };
    Ok((subtotal, tax))
}

/// Invoice totals. Invariant: `total == subtotal + tax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

impl Totals {
    pub fn from_lines(lines: impl IntoIterator<Item = (Money, Money)>) -> DomainResult<Self> {
        let mut subtotal = Money::ZERO;
        let mut tax = Money::ZERO;
        for (s, t) in lines {
            subtotal = subtotal.checked_add(s)?;
            tax = tax.checked_add(t)?;
        }
        Ok(Self {
            subtotal,
            tax,
            total: subtotal.checked_add(tax)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn general_rate_rounds_half_up() {
        // 3 × 0.05 = 0.15; 21 % of 15 cents = 3.15 cents -> 3
        let (s, t) = line_amounts(3, Money::from_cents(5), TaxRate::GENERAL, true).unwrap();
        assert_eq!((s.cents(), t.cents()), (15, 3));
        // 10.5 % of 1 000 cents = 105
        let (_, t) = line_amounts(1, Money::from_cents(1_000), TaxRate::REDUCED, true).unwrap();
        assert_eq!(t.cents(), 105);
        // 21 % of 50 cents = 10.5 -> 11
        let (_, t) = line_amounts(1, Money::from_cents(50), TaxRate::GENERAL, true).unwrap();
        assert_eq!(t.cents(), 11);
    }

    #[test]
    fn undiscriminated_lines_have_no_tax() {
        let (s, t) = line_amounts(2, Money::from_cents(10_000), TaxRate::GENERAL, false).unwrap();
        assert_eq!(s.cents(), 20_000);
        assert_eq!(t, Money::ZERO);
    }

    #[test]
    fn unknown_rates_are_rejected() {
        assert!(TaxRate::try_from(1_900).is_err());
        assert!(serde_json::from_str::<TaxRate>("2100").is_ok());
        assert!(serde_json::from_str::<TaxRate>("500").is_err());
    }

    fn rate() -> impl Strategy<Value = TaxRate> {
        prop_oneof![
            Just(TaxRate::EXEMPT),
            Just(TaxRate::REDUCED),
            Just(TaxRate::GENERAL),
            Just(TaxRate::INCREASED),
        ]
    }

    proptest! {
        #[test]
        fn total_is_subtotal_plus_tax(
            lines in proptest::collection::vec((1i64..1_000, 1i64..10_000_000, rate()), 1..20),
            discriminated in any::<bool>(),
        ) {
            let amounts: Vec<_> = lines
                .iter()
                .map(|(q, p, r)| line_amounts(*q, Money::from_cents(*p), *r, discriminated).unwrap())
                .collect();
            let totals = Totals::from_lines(amounts.iter().copied()).unwrap();
            prop_assert_eq!(totals.total.cents(), totals.subtotal.cents() + totals.tax.cents());
            if !discriminated {
                prop_assert_eq!(totals.tax, Money::ZERO);
            }
        }

        #[test]
        fn line_tax_is_within_half_a_cent(q in 1i64..1_000, p in 1i64..10_000_000, r in rate()) {
            let (s, t) = line_amounts(q, Money::from_cents(p), r, true).unwrap();
            let exact = s.cents() as i128 * r.basis_points() as i128;
            let diff = (t.cents() as i128 * 10_000 - exact).abs();
            prop_assert!(diff <= 5_000);
        }
    }
}
