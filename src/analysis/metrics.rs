use crate::analysis::aggregator::{Aggregator, ArithmeticMean, StandardDeviation};
use crate::consts::{MIN_CALMAR_DRAWDOWN, TRADING_DAYS_PER_YEAR, ZERO_VOLATILITY_EPSILON};
use crate::series::AssetSeries;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Error, Debug, PartialEq)]
pub enum MetricsError {
    #[error("Insufficient data for `{symbol}`: {observations} price points, at least 2 are required")]
    InsufficientData { symbol: String, observations: usize },
}

/// Risk/return statistics of a daily return series.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct PerformanceMetrics {
    /// Compounded return over the whole window.
    pub total_return: f64,
    /// Mean daily return times the periods per year.
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Largest peak-to-trough decline, as a non-negative fraction.
    pub max_drawdown: f64,
    /// Longest run of observations spent below the running peak.
    pub longest_drawdown_period: usize,
    pub calmar_ratio: f64,
    pub omega_ratio: f64,
    /// Trading days covered (return observations plus one).
    pub sample_count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct AssetMetrics {
    pub symbol: String,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub performance: PerformanceMetrics,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsCalculator {
    risk_free_rate: f64,
    periods_per_year: f64,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        MetricsCalculator::new(0.)
    }
}

impl MetricsCalculator {
    /// `risk_free_rate` is annual, in decimal form.
    pub fn new(risk_free_rate: f64) -> Self {
        MetricsCalculator {
            risk_free_rate,
            periods_per_year: TRADING_DAYS_PER_YEAR as f64,
        }
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    pub fn periods_per_year(&self) -> f64 {
        self.periods_per_year
    }

    /// Metrics of a single asset. Total return is taken straight from the prices.
    pub fn compute(&self, series: &AssetSeries) -> Result<AssetMetrics, MetricsError> {
        let (Some(first), Some(last)) = (series.first(), series.last()) else {
            return Err(MetricsError::InsufficientData {
                symbol: series.symbol().to_string(),
                observations: series.len(),
            });
        };
        if series.len() < 2 {
            return Err(MetricsError::InsufficientData {
                symbol: series.symbol().to_string(),
                observations: series.len(),
            });
        }

        let returns = series.daily_returns();
        let equity = series
            .points()
            .iter()
            .map(|p| p.price / first.price)
            .collect::<Vec<f64>>();
        let mut performance = self.performance_from(&returns, &equity);
        performance.total_return = last.price / first.price - 1.;

        Ok(AssetMetrics {
            symbol: series.symbol().to_string(),
            first_date: first.date,
            last_date: last.date,
            performance,
        })
    }

    /// Metrics of an arbitrary daily return series (e.g. a blended portfolio).
    pub fn performance(&self, returns: &[f64]) -> PerformanceMetrics {
        let equity = Self::equity_curve(returns, 1.);
        self.performance_from(returns, &equity)
    }

    fn performance_from(&self, returns: &[f64], equity: &[f64]) -> PerformanceMetrics {
        PerformanceMetrics {
            total_return: Self::total_return(equity),
            annualized_return: self.annualized_return(returns),
            annualized_volatility: self.annualized_volatility(returns),
            sharpe_ratio: self.sharpe_ratio(returns),
            sortino_ratio: self.sortino_ratio(returns),
            max_drawdown: Self::max_drawdown(equity),
            longest_drawdown_period: Self::longest_drawdown_period(equity),
            calmar_ratio: self.calmar_ratio(equity),
            omega_ratio: Self::omega_ratio(returns, 0.),
            sample_count: returns.len() + 1,
        }
    }

    pub fn annualized_return(&self, returns: &[f64]) -> f64 {
        ArithmeticMean.value(returns).unwrap_or(0.) * self.periods_per_year
    }

    pub fn annualized_volatility(&self, returns: &[f64]) -> f64 {
        guarded_deviation(returns) * self.periods_per_year.sqrt()
    }

    /// Annualized Sharpe-like ratio; 0 when the series has no volatility.
    pub fn sharpe_ratio(&self, returns: &[f64]) -> f64 {
        let deviation = guarded_deviation(returns);
        if deviation == 0. {
            return 0.;
        }
        let mean = ArithmeticMean.value(returns).unwrap_or(0.);
        let excess = mean - self.risk_free_rate / self.periods_per_year;
        excess / deviation * self.periods_per_year.sqrt()
    }

    /// Annualized Sortino ratio using the deviation of negative returns only.
    pub fn sortino_ratio(&self, returns: &[f64]) -> f64 {
        let negative = returns
            .iter()
            .copied()
            .filter(|r| *r < 0.)
            .collect::<Vec<f64>>();
        let downside = guarded_deviation(&negative);
        if downside == 0. {
            return 0.;
        }
        let mean = ArithmeticMean.value(returns).unwrap_or(0.);
        let excess = mean - self.risk_free_rate / self.periods_per_year;
        excess / downside * self.periods_per_year.sqrt()
    }

    /// Annualized compounded return over max drawdown; 0 without drawdown.
    pub fn calmar_ratio(&self, equity: &[f64]) -> f64 {
        let days = equity.len();
        if days < 2 {
            return 0.;
        }
        let max_drawdown = Self::max_drawdown(equity);
        if max_drawdown <= MIN_CALMAR_DRAWDOWN {
            return 0.;
        }
        let growth = equity[days - 1] / equity[0];
        let annualized = growth.powf(self.periods_per_year / days as f64) - 1.;
        annualized / max_drawdown
    }

    pub fn total_return(equity: &[f64]) -> f64 {
        match (equity.first(), equity.last()) {
            (Some(first), Some(last)) if *first != 0. => last / first - 1.,
            _ => 0.,
        }
    }

    /// Never above 1, a fully lost portfolio has drawn down 100%.
    pub fn max_drawdown(equity: &[f64]) -> f64 {
        let mut peak = f64::NEG_INFINITY;
        let mut worst: f64 = 0.;
        for &value in equity {
            peak = peak.max(value);
            if peak > 0. {
                worst = worst.max((peak - value) / peak);
            }
        }
        worst.min(1.)
    }

    pub fn longest_drawdown_period(equity: &[f64]) -> usize {
        let mut peak = f64::NEG_INFINITY;
        let mut current = 0;
        let mut longest = 0;
        for &value in equity {
            if value < peak {
                current += 1;
                longest = longest.max(current);
            } else {
                peak = value;
                current = 0;
            }
        }
        longest
    }

    /// Gains above `threshold` over losses below it; 0 when nothing is lost.
    pub fn omega_ratio(returns: &[f64], threshold: f64) -> f64 {
        let gains = returns
            .iter()
            .filter(|r| **r > threshold)
            .map(|r| r - threshold)
            .sum::<f64>();
        let losses = returns
            .iter()
            .filter(|r| **r < threshold)
            .map(|r| threshold - r)
            .sum::<f64>();
        if losses == 0. {
            0.
        } else {
            gains / losses
        }
    }

    /// Compounded equity starting at `base`. Equity stays at zero once lost.
    pub fn equity_curve(returns: &[f64], base: f64) -> Vec<f64> {
        let mut equity = Vec::with_capacity(returns.len() + 1);
        let mut value = base;
        equity.push(value);
        for r in returns {
            value = (value * (1. + r)).max(0.);
            equity.push(value);
        }
        equity
    }
}

/// Sample deviation of the series, with numerically flat series reported as 0.
pub(crate) fn guarded_deviation(series: &[f64]) -> f64 {
    match StandardDeviation.value(series) {
        Ok(deviation) if deviation.is_finite() && deviation >= ZERO_VOLATILITY_EPSILON => deviation,
        _ => 0.,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_support::{flat_series, series_from_returns};
    use crate::series::AssetSeries;
    use rand::prelude::*;

    fn noisy_returns(mean: f64, spread: f64, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| mean + rng.gen_range(-spread..spread))
            .collect()
    }

    #[test]
    fn test_total_return_comes_from_first_and_last_price() {
        let series = series_from_returns("ABC", &noisy_returns(0.001, 0.02, 300, 7));
        let metrics = MetricsCalculator::default().compute(&series).unwrap();
        let prices = series.prices();
        let expected = prices[prices.len() - 1] / prices[0] - 1.;
        assert!((metrics.performance.total_return - expected).abs() < 1e-9);
        assert_eq!(metrics.performance.sample_count, 301);
    }

    #[test]
    fn test_compute_needs_two_points() {
        let single = AssetSeries::from_pairs(
            "ONE",
            vec![(chrono::NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(), 10.)],
        )
        .unwrap();
        let err = MetricsCalculator::default().compute(&single).unwrap_err();
        assert_eq!(
            err,
            MetricsError::InsufficientData {
                symbol: "ONE".into(),
                observations: 1
            }
        );
    }

    #[test]
    fn test_flat_series_has_zero_volatility_and_ratios() {
        let series = flat_series("FLAT", 0.001, 400);
        let metrics = MetricsCalculator::default().compute(&series).unwrap();
        assert_eq!(metrics.performance.annualized_volatility, 0.);
        assert_eq!(metrics.performance.sharpe_ratio, 0.);
        assert_eq!(metrics.performance.sortino_ratio, 0.);
        assert_eq!(metrics.performance.calmar_ratio, 0.);
        assert_eq!(metrics.performance.max_drawdown, 0.);
        assert!(metrics.performance.total_return > 0.);
    }

    #[test]
    fn test_max_drawdown() {
        // biggest drop is from 120 -> 90 => 25%
        let drawdown = MetricsCalculator::max_drawdown(&[100., 110., 120., 90.]);
        assert_eq!(drawdown, 0.25);
    }

    #[test]
    fn test_longest_drawdown_period() {
        let equity = [100., 90., 95., 101., 99., 98., 97., 102.];
        assert_eq!(MetricsCalculator::longest_drawdown_period(&equity), 3);
    }

    #[test]
    fn test_sharpe_ratio_positive_for_positive_drift() {
        let returns = noisy_returns(0.002, 0.01, 500, 11);
        let sharpe = MetricsCalculator::default().sharpe_ratio(&returns);
        assert!(sharpe > 1., "sharpe was {}", sharpe);
    }

    #[test]
    fn test_sortino_ratio_positive_negative() {
        let calculator = MetricsCalculator::new(0.01);
        let data = [0.01, -0.005, 0.02, 0.0, -0.004].repeat(50);
        assert!(calculator.sortino_ratio(&data) != 0.);
    }

    #[test]
    fn test_omega_ratio_above_threshold() {
        let data = [0.01, 0.02, -0.01, 0.005, 0.03, -0.015];
        assert!(MetricsCalculator::omega_ratio(&data, 0.) > 1.);
        assert_eq!(MetricsCalculator::omega_ratio(&[0.01, 0.02], 0.), 0.);
    }

    #[test]
    fn test_calmar_ratio_uses_drawdown() {
        let calculator = MetricsCalculator::default();
        let equity = MetricsCalculator::equity_curve(&[0.01, -0.05, 0.02, 0.03, 0.01], 1.);
        let calmar = calculator.calmar_ratio(&equity);
        assert!(calmar > 0.);
    }

    #[test]
    fn test_ruined_portfolio_stays_ruined() {
        let mut returns = vec![0.003; 300];
        returns[100] = -2.4;
        returns[200] = -2.4;
        let metrics = MetricsCalculator::default().performance(&returns);
        assert_eq!(metrics.total_return, -1.);
        assert_eq!(metrics.max_drawdown, 1.);
        assert_eq!(metrics.calmar_ratio, -1.);

        let equity = MetricsCalculator::equity_curve(&returns, 1.);
        assert!(equity.iter().all(|e| *e >= 0.));
        assert!(equity[101..].iter().all(|e| *e == 0.));
    }
}
