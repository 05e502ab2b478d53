use crate::analysis::aggregator::{
    Aggregator, AggregatorError, ArithmeticMean, CompoundedReturn, StandardDeviation,
};
use crate::analysis::metrics::{guarded_deviation, MetricsCalculator};
use crate::consts::PERTURBATION;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

/// Objectives that can rank portfolios. Both are maximized.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ToSchema, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BuiltInObjective {
    #[default]
    SharpeRatio,
    TotalReturn,
}

impl BuiltInObjective {
    pub fn build(&self, calculator: MetricsCalculator) -> Box<dyn OptimizationObjective> {
        match self {
            BuiltInObjective::SharpeRatio => Box::new(SharpeRatio { calculator }),
            BuiltInObjective::TotalReturn => Box::new(TotalReturn),
        }
    }
}

/// Daily portfolio return `leverage * R w` for a `T x k` return matrix.
pub fn blended_series(returns: &DMatrix<f64>, weights: &[f64], leverage: f64) -> Vec<f64> {
    let weights = DVector::from_column_slice(weights);
    (returns * weights * leverage).iter().copied().collect()
}

/// A scalar objective over a blended daily return series.
pub trait OptimizationObjective: std::fmt::Debug + Send + Sync {
    fn score(&self, series: &[f64]) -> f64;

    fn gradient_wrt_series(&self, _series: &[f64]) -> Result<Vec<f64>, AggregatorError> {
        Err(AggregatorError::GradientUnimplemented)
    }

    fn value(&self, returns: &DMatrix<f64>, weights: &[f64], leverage: f64) -> f64 {
        self.score(&blended_series(returns, weights, leverage))
    }

    /// Gradient of the objective with respect to the weights.
    ///
    /// Chains the series gradient through the return matrix when it is known,
    /// otherwise falls back on central differences. Non-finite components are
    /// replaced with 0.
    fn gradient(&self, returns: &DMatrix<f64>, weights: &[f64], leverage: f64) -> Vec<f64> {
        let series = blended_series(returns, weights, leverage);
        let gradient = match self.gradient_wrt_series(&series) {
            Ok(wrt_series) => {
                let wrt_series = DVector::from_vec(wrt_series);
                (returns.tr_mul(&wrt_series) * leverage)
                    .iter()
                    .copied()
                    .collect::<Vec<f64>>()
            }
            Err(_) => self.numerical_gradient(returns, weights, leverage),
        };

        gradient
            .into_iter()
            .enumerate()
            .map(|(i, partial)| {
                if partial.is_finite() {
                    partial
                } else {
                    warn!(
                        "Non-finite gradient ({}) encountered. Index: {}, Objective: {:?}, Weights: {:?}. \
                         Substituting gradient component with 0.0.",
                        partial, i, self, weights
                    );
                    0.
                }
            })
            .collect()
    }

    fn numerical_gradient(&self, returns: &DMatrix<f64>, weights: &[f64], leverage: f64) -> Vec<f64> {
        (0..weights.len())
            .map(|i| {
                let mut plus = weights.to_vec();
                let mut minus = weights.to_vec();
                plus[i] += PERTURBATION;
                minus[i] -= PERTURBATION;
                (self.value(returns, &plus, leverage) - self.value(returns, &minus, leverage))
                    / (2. * PERTURBATION)
            })
            .collect()
    }
}

/// Annualized excess return over volatility. Flat series score 0.
#[derive(Debug, Clone, Copy)]
pub struct SharpeRatio {
    pub calculator: MetricsCalculator,
}

impl OptimizationObjective for SharpeRatio {
    fn score(&self, series: &[f64]) -> f64 {
        self.calculator.sharpe_ratio(series)
    }

    fn gradient_wrt_series(&self, series: &[f64]) -> Result<Vec<f64>, AggregatorError> {
        let deviation = guarded_deviation(series);
        if deviation == 0. {
            return Ok(vec![0.; series.len()]);
        }
        let periods = self.calculator.periods_per_year();
        let excess =
            ArithmeticMean.value(series)? - self.calculator.risk_free_rate() / periods;
        let mean_gradient = ArithmeticMean.gradient_wrt_series(series)?;
        let deviation_gradient = StandardDeviation.gradient_wrt_series(series)?;
        let scale = periods.sqrt();

        // d(e/s) = de/s - e ds/s^2
        Ok(mean_gradient
            .iter()
            .zip(&deviation_gradient)
            .map(|(dm, ds)| scale * (dm / deviation - excess * ds / (deviation * deviation)))
            .collect())
    }
}

/// Compounded return of the blended series.
#[derive(Debug, Clone, Copy)]
pub struct TotalReturn;

impl OptimizationObjective for TotalReturn {
    fn score(&self, series: &[f64]) -> f64 {
        CompoundedReturn.value(series).unwrap_or(0.)
    }

    fn gradient_wrt_series(&self, series: &[f64]) -> Result<Vec<f64>, AggregatorError> {
        CompoundedReturn.gradient_wrt_series(series)
    }
}
