use crate::analysis::metrics::{AssetMetrics, MetricsCalculator, MetricsError};
use crate::consts::{FLOAT_COMPARISON_EPSILON, TRADING_DAYS_PER_YEAR, WEIGHT_SUM_TOLERANCE};
use crate::optimization::portfolio_search::projection::{project_onto_box_simplex, project_onto_simplex};
use crate::optimization::portfolio_search::SearchError;
use crate::series::AssetSeries;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// How much history an asset needs before it may enter a portfolio.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MinimumHistory {
    /// Number of price observations.
    TradingDays(usize),
    /// Days between the first and the last observation.
    CalendarDays(i64),
}

impl Default for MinimumHistory {
    fn default() -> Self {
        MinimumHistory::TradingDays(TRADING_DAYS_PER_YEAR)
    }
}

impl MinimumHistory {
    pub fn is_met(&self, series: &AssetSeries) -> bool {
        match *self {
            MinimumHistory::TradingDays(days) => series.len() >= days,
            MinimumHistory::CalendarDays(days) => series.calendar_span_days() >= days,
        }
    }
}

#[derive(Error, Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    #[error("insufficient history: {observations} observations, required {required:?}")]
    InsufficientData {
        observations: usize,
        required: MinimumHistory,
    },
    #[error("total return {total_return} is not positive")]
    NonPositiveReturn { total_return: f64 },
    #[error("series unavailable: {detail}")]
    Unavailable { detail: String },
}

/// Per-asset weight limits applied to every subset.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WeightBounds {
    /// `0 <= w_i <= 1`.
    #[default]
    LongOnly,
    /// `1/(2k) <= w_i <= 2/k` for a subset of `k` assets.
    Relative,
    Absolute { min: f64, max: f64 },
}

impl WeightBounds {
    pub fn is_long_only(&self) -> bool {
        matches!(self, WeightBounds::LongOnly)
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if let WeightBounds::Absolute { min, max } = *self {
            if !min.is_finite() || !max.is_finite() || min < 0. || max <= 0. || min > max {
                return Err(SearchError::InvalidConfig(format!(
                    "Absolute weight bounds must satisfy 0 <= min <= max and max > 0, got [{}, {}]",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// Feasible weight region of a subset with `k` assets.
    pub fn region(&self, k: usize) -> Result<FeasibleRegion, SearchError> {
        if k == 0 {
            return Err(SearchError::NoFeasibleSolution(
                "Cannot weight an empty subset".into(),
            ));
        }
        let size = k as f64;
        let (lower, upper) = match *self {
            WeightBounds::LongOnly => (0., 1.),
            WeightBounds::Relative => (1. / (2. * size), (2. / size).min(1.)),
            WeightBounds::Absolute { min, max } => (min, max.min(1.)),
        };
        if size * lower > 1. + FLOAT_COMPARISON_EPSILON || size * upper < 1. - FLOAT_COMPARISON_EPSILON
        {
            return Err(SearchError::NoFeasibleSolution(format!(
                "No weights of {} assets within [{}, {}] sum to one",
                k, lower, upper
            )));
        }
        Ok(FeasibleRegion {
            dimension: k,
            lower,
            upper,
        })
    }
}

/// `{w : lower <= w_i <= upper, sum(w) = 1}` in `dimension` coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeasibleRegion {
    dimension: usize,
    lower: f64,
    upper: f64,
}

impl FeasibleRegion {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn uniform(&self) -> Vec<f64> {
        vec![1. / self.dimension as f64; self.dimension]
    }

    /// Closest point of the region to `v`.
    pub fn project(&self, v: &[f64]) -> Vec<f64> {
        if self.lower <= 0. && self.upper >= 1. {
            project_onto_simplex(v)
        } else {
            project_onto_box_simplex(v, self.lower, self.upper)
        }
    }

    pub fn contains(&self, weights: &[f64]) -> bool {
        weights.len() == self.dimension
            && weights.iter().all(|w| {
                *w >= self.lower - FLOAT_COMPARISON_EPSILON
                    && *w <= self.upper + FLOAT_COMPARISON_EPSILON
            })
            && (weights.iter().sum::<f64>() - 1.).abs() <= WEIGHT_SUM_TOLERANCE
    }
}

/// Eligibility rules and size limits of a portfolio search.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    #[serde(default)]
    pub minimum_history: MinimumHistory,
    #[serde(default)]
    pub max_darwins: Option<usize>,
    #[serde(default)]
    pub weight_bounds: WeightBounds,
}

impl Constraints {
    pub fn eligible(&self, series: &AssetSeries) -> bool {
        self.assess(series, &MetricsCalculator::default()).is_ok()
    }

    /// Metrics of an eligible asset, or why it cannot be used.
    pub fn assess(
        &self,
        series: &AssetSeries,
        calculator: &MetricsCalculator,
    ) -> Result<AssetMetrics, ExclusionReason> {
        let insufficient = || ExclusionReason::InsufficientData {
            observations: series.len(),
            required: self.minimum_history,
        };
        if !self.minimum_history.is_met(series) {
            return Err(insufficient());
        }
        let metrics = calculator.compute(series).map_err(|e| match e {
            MetricsError::InsufficientData { .. } => insufficient(),
        })?;
        if metrics.performance.total_return <= 0. {
            return Err(ExclusionReason::NonPositiveReturn {
                total_return: metrics.performance.total_return,
            });
        }
        Ok(metrics)
    }

    pub fn within_size_limit(&self, len: usize) -> bool {
        within_size_limit(len, self.max_darwins)
    }
}

/// Non-negative weights summing to one.
pub fn feasible_weight(weights: &[f64]) -> bool {
    !weights.is_empty()
        && weights.iter().all(|w| *w >= 0.)
        && (weights.iter().sum::<f64>() - 1.).abs() <= WEIGHT_SUM_TOLERANCE
}

pub fn within_size_limit(len: usize, max_darwins: Option<usize>) -> bool {
    max_darwins.map_or(true, |max| len <= max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_support::{day, flat_series, series_from_returns};

    #[test]
    fn test_short_history_is_excluded() {
        let constraints = Constraints::default();
        let short = flat_series("C", 0.001, 100);
        let reason = constraints
            .assess(&short, &MetricsCalculator::default())
            .unwrap_err();
        assert_eq!(
            reason,
            ExclusionReason::InsufficientData {
                observations: 100,
                required: MinimumHistory::TradingDays(252)
            }
        );
        assert!(!constraints.eligible(&short));
    }

    #[test]
    fn test_losing_asset_is_excluded() {
        let mut returns = vec![0.; 299];
        returns[150] = -0.01;
        let losing = series_from_returns("D", &returns);
        let reason = Constraints::default()
            .assess(&losing, &MetricsCalculator::default())
            .unwrap_err();
        match reason {
            ExclusionReason::NonPositiveReturn { total_return } => {
                assert!((total_return + 0.01).abs() < 1e-9)
            }
            other => panic!("unexpected reason {:?}", other),
        }
    }

    #[test]
    fn test_calendar_days_rule_uses_date_span() {
        let constraints = Constraints {
            minimum_history: MinimumHistory::CalendarDays(365),
            ..Default::default()
        };
        let pairs = vec![(day(0), 10.), (day(200), 11.), (day(366), 12.)];
        let sparse = AssetSeries::from_pairs("SPARSE", pairs).unwrap();
        assert!(constraints.eligible(&sparse));
        assert!(!Constraints::default().eligible(&sparse));
    }

    #[test]
    fn test_feasible_weight() {
        assert!(feasible_weight(&[0.25, 0.75]));
        assert!(!feasible_weight(&[-0.1, 1.1]));
        assert!(!feasible_weight(&[0.5, 0.4]));
        assert!(!feasible_weight(&[]));
    }

    #[test]
    fn test_within_size_limit() {
        assert!(within_size_limit(10, None));
        assert!(within_size_limit(3, Some(3)));
        assert!(!within_size_limit(4, Some(3)));
    }

    #[test]
    fn test_region_rejects_impossible_bounds() {
        let bounds = WeightBounds::Absolute { min: 0.3, max: 0.5 };
        assert!(bounds.region(2).is_ok());
        assert!(matches!(
            bounds.region(4),
            Err(SearchError::NoFeasibleSolution(_))
        ));
        assert!(matches!(
            bounds.region(1),
            Err(SearchError::NoFeasibleSolution(_))
        ));
    }

    #[test]
    fn test_relative_region_contains_uniform() {
        let region = WeightBounds::Relative.region(4).unwrap();
        assert_eq!(region.lower(), 0.125);
        assert_eq!(region.upper(), 0.5);
        assert!(region.contains(&region.uniform()));
        assert!(!region.contains(&[0.7, 0.1, 0.1, 0.1]));
    }
}
