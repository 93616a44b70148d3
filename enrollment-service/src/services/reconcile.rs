//! Amount and currency reconciliation against the expected course price.

use rust_decimal::Decimal;
use thiserror::Error;

/// Provider amount disagrees with the course price beyond tolerance.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("amount mismatch: provider reported {received}, course price is {expected}")]
pub struct AmountMismatch {
    pub received: Decimal,
    pub expected: Decimal,
}

/// Convert an amount in the smallest currency unit to its decimal major unit
/// (kobo -> naira, 500000 -> 5000.00).
pub fn amount_from_minor_units(minor: u64) -> Decimal {
    Decimal::from(minor) / Decimal::ONE_HUNDRED
}

/// Compare the provider-confirmed amount with the expected course price.
///
/// The absolute tolerance absorbs rounding noise; any larger discrepancy is a
/// hard rejection. Access is never granted for an amount smaller than the
/// course price beyond tolerance.
pub fn reconcile_amount(
    amount_minor: u64,
    expected: Decimal,
    tolerance: Decimal,
) -> Result<Decimal, AmountMismatch> {
    let received = amount_from_minor_units(amount_minor);
    let delta = (received - expected).abs();

    if delta > tolerance {
        return Err(AmountMismatch { received, expected });
    }

    Ok(received)
}

/// Validate the provider currency against the allow-list.
///
/// An unrecognized or missing currency falls back to the platform's home
/// currency with a warning rather than failing the payment; some providers
/// omit or vary this field.
pub fn normalize_currency(raw: Option<&str>, allowed: &[String], home: &str) -> String {
    match raw {
        Some(code) => {
            let upper = code.to_uppercase();
            if allowed.iter().any(|c| c == &upper) {
                upper
            } else {
                tracing::warn!(
                    currency = %code,
                    home_currency = %home,
                    "Unrecognized provider currency, defaulting to home currency"
                );
                home.to_string()
            }
        }
        None => {
            tracing::warn!(
                home_currency = %home,
                "Provider omitted currency, defaulting to home currency"
            );
            home.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tolerance() -> Decimal {
        dec!(0.01)
    }

    #[test]
    fn converts_minor_units() {
        assert_eq!(amount_from_minor_units(500000), dec!(5000));
        assert_eq!(amount_from_minor_units(123), dec!(1.23));
        assert_eq!(amount_from_minor_units(0), dec!(0));
    }

    #[test]
    fn exact_amount_reconciles() {
        let amount = reconcile_amount(500000, dec!(5000), tolerance()).unwrap();
        assert_eq!(amount, dec!(5000));
    }

    #[test]
    fn within_tolerance_reconciles() {
        assert!(reconcile_amount(500001, dec!(5000), tolerance()).is_ok());
        assert!(reconcile_amount(499999, dec!(5000), tolerance()).is_ok());
    }

    #[test]
    fn underpayment_is_rejected() {
        let err = reconcile_amount(400000, dec!(5000), tolerance()).unwrap_err();
        assert_eq!(err.received, dec!(4000));
        assert_eq!(err.expected, dec!(5000));
    }

    #[test]
    fn overpayment_beyond_tolerance_is_rejected() {
        assert!(reconcile_amount(500200, dec!(5000), tolerance()).is_err());
    }

    #[test]
    fn known_currency_is_kept() {
        let allowed = vec!["NGN".to_string(), "USD".to_string()];
        assert_eq!(normalize_currency(Some("ngn"), &allowed, "NGN"), "NGN");
        assert_eq!(normalize_currency(Some("USD"), &allowed, "NGN"), "USD");
    }

    #[test]
    fn unknown_or_missing_currency_defaults_to_home() {
        let allowed = vec!["NGN".to_string()];
        assert_eq!(normalize_currency(Some("EUR"), &allowed, "NGN"), "NGN");
        assert_eq!(normalize_currency(None, &allowed, "NGN"), "NGN");
    }
}
