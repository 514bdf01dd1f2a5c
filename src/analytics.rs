//! Performance analytics over equity snapshot series.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Hours in a year; snapshots are hourly so this annualizes the Sharpe.
const HOURS_PER_YEAR: u32 = 8760;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfStats {
    /// Annualized Sharpe ratio, `None` with fewer than 2 returns or zero
    /// standard deviation.
    pub sharpe: Option<Decimal>,
    /// Peak-to-trough drawdown as a negative fraction, 5 decimal places.
    pub max_drawdown: Option<Decimal>,
}

impl PerfStats {
    pub const NONE: PerfStats = PerfStats {
        sharpe: None,
        max_drawdown: None,
    };
}

/// Sharpe and max drawdown from an hourly equity series.
pub fn sharpe_and_drawdown(values: &[Decimal]) -> PerfStats {
    if values.len() < 2 {
        return PerfStats::NONE;
    }

    let returns: Vec<Decimal> = values
        .windows(2)
        .filter(|w| w[0] > Decimal::ZERO)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    if returns.len() < 2 {
        return PerfStats::NONE;
    }

    let n = Decimal::from(returns.len());
    let mean = returns.iter().sum::<Decimal>() / n;
    let variance = returns
        .iter()
        .map(|r| {
            let d = *r - mean;
            d * d
        })
        .sum::<Decimal>()
        / (n - Decimal::ONE);
    let std_dev = decimal_sqrt(variance);

    let sharpe = if std_dev.is_zero() {
        None
    } else {
        Some(mean / std_dev * decimal_sqrt(Decimal::from(HOURS_PER_YEAR)))
    };

    PerfStats {
        sharpe,
        max_drawdown: Some(max_drawdown(values)),
    }
}

/// Largest decline from a running peak, negated (`-0.05` = 5% drawdown).
fn max_drawdown(values: &[Decimal]) -> Decimal {
    let mut peak = values[0];
    let mut worst = Decimal::ZERO;
    for &v in values {
        if v > peak {
            peak = v;
        }
        if peak > Decimal::ZERO {
            let dd = (peak - v) / peak;
            if dd > worst {
                worst = dd;
            }
        }
    }
    (-worst).round_dp(5)
}

/// Newton's method square root; good to ~10 decimal places.
fn decimal_sqrt(n: Decimal) -> Decimal {
    if n <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let mut x = n;
    let two = dec!(2);
    for _ in 0..32 {
        let next = (x + n / x) / two;
        if (next - x).abs() < Decimal::new(1, 12) {
            return next;
        }
        x = next;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_values_yields_nothing() {
        assert_eq!(sharpe_and_drawdown(&[]), PerfStats::NONE);
        assert_eq!(sharpe_and_drawdown(&[dec!(10000)]), PerfStats::NONE);
    }

    #[test]
    fn too_few_valid_returns_yields_nothing() {
        // Only one usable window: the zero start contributes no return.
        assert_eq!(
            sharpe_and_drawdown(&[dec!(0), dec!(10000), dec!(10100)]),
            PerfStats::NONE
        );
    }

    #[test]
    fn flat_series_has_no_sharpe_but_zero_drawdown() {
        let stats = sharpe_and_drawdown(&[dec!(10000), dec!(10000), dec!(10000)]);
        assert_eq!(stats.sharpe, None);
        assert_eq!(stats.max_drawdown, Some(Decimal::ZERO));
    }

    #[test]
    fn drawdown_picks_the_deeper_trough() {
        let values = [
            dec!(10000),
            dec!(10100),
            dec!(10050),
            dec!(10200),
            dec!(10150),
        ];
        let stats = sharpe_and_drawdown(&values);

        // (10100-10050)/10100 beats (10200-10150)/10200
        assert_eq!(stats.max_drawdown, Some(dec!(-0.00495)));
        let sharpe = stats.sharpe.unwrap();
        assert!(sharpe > Decimal::ZERO);
    }

    #[test]
    fn drawdown_is_bounded() {
        let stats = sharpe_and_drawdown(&[dec!(10000), dec!(1), dec!(10000)]);
        let dd = stats.max_drawdown.unwrap();
        assert!(dd >= dec!(-1) && dd <= Decimal::ZERO);
    }

    #[test]
    fn sqrt_converges() {
        assert!((decimal_sqrt(dec!(4)) - dec!(2)).abs() < Decimal::new(1, 9));
        assert!((decimal_sqrt(dec!(8760)) - dec!(93.5948717)).abs() < dec!(0.0001));
        assert_eq!(decimal_sqrt(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn sharpe_matches_hand_computation() {
        // Returns: +0.01, -0.00495..., +0.014925..., -0.004901...
        let values = [
            dec!(10000),
            dec!(10100),
            dec!(10050),
            dec!(10200),
            dec!(10150),
        ];
        let stats = sharpe_and_drawdown(&values);
        let sharpe = stats.sharpe.unwrap();

        // mean ≈ 0.0037682, sample std ≈ 0.0102389 -> sharpe ≈ 34.45
        assert!(sharpe > dec!(34.4) && sharpe < dec!(34.5));
    }
}
