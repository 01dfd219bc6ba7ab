//! Reward math. Pure functions over integers; every division floors.

use num_traits::Zero;
use rust_decimal::Decimal;

use crate::account::types::Amount;

pub const YEAR_SECS: u64 = 31_536_000;
pub const DAY_SECS: u64 = 86_400;

/// Fixed-point scale of the compounding growth factor (18 decimal places).
const GROWTH_SCALE: u64 = 1_000_000_000_000_000_000;

/// `rate` as an exact fraction `numerator / denominator`. Negative rates read as zero.
pub fn rate_parts(rate: Decimal) -> (Amount, Amount) {
    let numerator = u128::try_from(rate.mantissa()).map(Amount::from).unwrap_or_default();
    let denominator = Amount::from(10u32).pow(rate.scale());
    (numerator, denominator)
}

/// `floor(amount * fraction)`.
pub fn fraction_of(amount: &Amount, fraction: Decimal) -> Amount {
    let (num, den) = rate_parts(fraction);
    amount * num / den
}

/// `floor(principal * rate * secs / YEAR_SECS)`
pub fn simple_interest(principal: &Amount, rate: Decimal, secs: u64) -> Amount {
    if secs == 0 {
        return Amount::zero();
    }
    let (num, den) = rate_parts(rate);
    principal * num * Amount::from(secs) / (den * Amount::from(YEAR_SECS))
}

/// `(1 + rate / 365)^days`, scaled by [`GROWTH_SCALE`]. Square-and-multiply
/// keeps the work logarithmic in `days`.
fn daily_growth(rate: Decimal, days: u64) -> Amount {
    let one = Amount::from(GROWTH_SCALE);
    let (num, den) = rate_parts(rate);
    let daily_den = den * Amount::from(365u32);
    let mut base = (&daily_den + num) * &one / daily_den;
    let mut factor = one.clone();
    let mut exp = days;
    while exp > 0 {
        if exp & 1 == 1 {
            factor = factor * &base / &one;
        }
        exp >>= 1;
        if exp > 0 {
            base = &base * &base / &one;
        }
    }
    factor
}

/// Daily compounding at `rate / 365` over the whole days in `secs`, then
/// simple interest on the grown amount for the leftover seconds.
pub fn compound_interest(principal: &Amount, rate: Decimal, secs: u64) -> Amount {
    let growth = daily_growth(rate, secs / DAY_SECS);
    // growth >= GROWTH_SCALE, so grown never drops below principal
    let grown = principal * growth / Amount::from(GROWTH_SCALE);
    let tail = simple_interest(&grown, rate, secs % DAY_SECS);
    grown + tail - principal
}

/// Rewards earned by `principal` over `secs`.
pub fn accrued(principal: &Amount, rate: Decimal, secs: u64, compounding: bool) -> Amount {
    if compounding {
        compound_interest(principal, rate, secs)
    } else {
        simple_interest(principal, rate, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn amt(n: u64) -> Amount {
        Amount::from(n)
    }

    fn rate(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_simple_interest() {
        assert_eq!(simple_interest(&amt(1_000), rate("0.10"), YEAR_SECS), amt(100));
        assert_eq!(simple_interest(&amt(1_000), rate("0.10"), YEAR_SECS / 2), amt(50));
        assert_eq!(simple_interest(&amt(1_000), rate("0.10"), 0), amt(0));
        // 1000 * 0.10 * 1s / year floors to zero
        assert_eq!(simple_interest(&amt(1_000), rate("0.10"), 1), amt(0));
    }

    #[test]
    fn test_daily_compounding() {
        // 0.365 / 365 = 0.001 per day
        assert_eq!(compound_interest(&amt(1_000_000), rate("0.365"), DAY_SECS), amt(1_000));
        assert_eq!(compound_interest(&amt(1_000_000), rate("0.365"), 2 * DAY_SECS), amt(2_001));
        assert_eq!(simple_interest(&amt(1_000_000), rate("0.365"), 2 * DAY_SECS), amt(2_000));
        // small principals still compound: 1000 * (1 + 0.1/365)^365 = 1105.15...
        assert_eq!(compound_interest(&amt(1_000), rate("0.10"), 365 * DAY_SECS), amt(105));
    }

    #[test]
    fn test_compounding_partial_day_uses_grown_amount() {
        let one_day = compound_interest(&amt(1_000_000), rate("0.365"), DAY_SECS);
        let day_and_half = compound_interest(&amt(1_000_000), rate("0.365"), DAY_SECS + DAY_SECS / 2);
        // half a day of simple interest on 1_001_000 adds 500
        assert_eq!(day_and_half - one_day, amt(500));
    }

    #[test]
    fn test_compounding_cost_is_logarithmic_in_days() {
        // ~2000 years: only a few dozen multiplications
        let secs = 2_000 * YEAR_SECS;
        let started = std::time::Instant::now();
        let earned = compound_interest(&amt(1_000), rate("0.123456"), secs);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(earned > simple_interest(&amt(1_000), rate("0.123456"), secs));

        // Largest horizon a chrono timestamp can express
        let far = compound_interest(&amt(1_000), rate("0.01"), 260_000 * YEAR_SECS);
        assert!(far > amt(1_000));
        assert_eq!(compound_interest(&amt(1_000), rate("0"), secs), amt(0));
    }

    #[test]
    fn test_fraction_and_negative_rate() {
        assert_eq!(fraction_of(&amt(1_000), rate("0.10")), amt(100));
        assert_eq!(fraction_of(&amt(999), rate("0.5")), amt(499));
        assert_eq!(simple_interest(&amt(1_000), rate("-0.5"), YEAR_SECS), amt(0));
    }
}
