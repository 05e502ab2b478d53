use statrs::statistics::Statistics;
use thiserror::Error;

/// Aggregator trait which reduces a return series to a single f64 number.
/// Objectives and metrics are built as aggregators over a (blended) series.
pub trait Aggregator: Sync + Send {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError>;
    fn gradient_wrt_series(&self, _series: &[f64]) -> Result<Vec<f64>, AggregatorError> {
        Err(AggregatorError::GradientUnimplemented)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum AggregatorError {
    #[error("Gradient is unimplemented for this aggregator")]
    GradientUnimplemented,
    #[error("Number of periods is invalid for aggregator: `{0}`")]
    InvalidNumberOfPeriods(String),
}

pub struct ArithmeticMean;
impl Aggregator for ArithmeticMean {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        if series.is_empty() {
            return Err(AggregatorError::InvalidNumberOfPeriods(
                "Mean cannot be computed for an empty series.".into(),
            ));
        }
        Ok(series.mean())
    }
    fn gradient_wrt_series(&self, series: &[f64]) -> Result<Vec<f64>, AggregatorError> {
        let inv_t = 1. / (series.len() as f64);
        Ok(vec![inv_t; series.len()])
    }
}

/// Sample standard deviation (`n - 1` denominator).
pub struct StandardDeviation;
impl Aggregator for StandardDeviation {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        if series.len() <= 1 {
            return Err(AggregatorError::InvalidNumberOfPeriods(
                "Standard deviation cannot be computed for series with less than 2 elements."
                    .into(),
            ));
        }
        Ok(series.std_dev())
    }
    fn gradient_wrt_series(&self, series: &[f64]) -> Result<Vec<f64>, AggregatorError> {
        let deviation = self.value(series)?;
        if deviation == 0. {
            return Ok(vec![0.; series.len()]);
        }
        let mean = series.mean();
        let denominator = (series.len() as f64 - 1.) * deviation;
        Ok(series.iter().map(|s| (s - mean) / denominator).collect())
    }
}

/// Growth factor of one period. Equity cannot fall below zero, so a loss of
/// 100% or more is absorbing.
fn growth_factor(r: f64) -> f64 {
    (1. + r).max(0.)
}

/// Compounded growth of the series: `prod(max(1 + r_t, 0)) - 1`, never below -1.
pub struct CompoundedReturn;
impl Aggregator for CompoundedReturn {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        Ok(series.iter().map(|r| growth_factor(*r)).product::<f64>() - 1.)
    }
    fn gradient_wrt_series(&self, series: &[f64]) -> Result<Vec<f64>, AggregatorError> {
        // prefix/suffix products, so a -100% day does not divide by zero
        let n = series.len();
        let mut prefix = vec![1.; n + 1];
        for (t, r) in series.iter().enumerate() {
            prefix[t + 1] = prefix[t] * growth_factor(*r);
        }
        let mut gradient = vec![0.; n];
        let mut suffix = 1.;
        for t in (0..n).rev() {
            // flat below ruin
            if 1. + series[t] >= 0. {
                gradient[t] = prefix[t] * suffix;
            }
            suffix *= growth_factor(series[t]);
        }
        Ok(gradient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_deviation_needs_two_periods() {
        assert!(StandardDeviation.value(&[0.1]).is_err());
        let deviation = StandardDeviation.value(&[1., 2., 3., 4.]).unwrap();
        assert!((deviation - 1.2909944487358056).abs() < 1e-12);
    }

    #[test]
    fn test_mean_of_empty_series_errors() {
        assert!(ArithmeticMean.value(&[]).is_err());
        assert_eq!(ArithmeticMean.value(&[1., 3.]).unwrap(), 2.);
    }

    #[test]
    fn test_compounded_return_gradient_matches_finite_difference() {
        let series = vec![0.01, -0.02, 0.03, -0.6, 0.05];
        let gradient = CompoundedReturn.gradient_wrt_series(&series).unwrap();
        let epsilon = 1e-7;
        for t in 0..series.len() {
            let mut plus = series.clone();
            let mut minus = series.clone();
            plus[t] += epsilon;
            minus[t] -= epsilon;
            let numerical = (CompoundedReturn.value(&plus).unwrap()
                - CompoundedReturn.value(&minus).unwrap())
                / (2. * epsilon);
            assert!(
                (numerical - gradient[t]).abs() < 1e-6,
                "component {} differs: {} vs {}",
                t,
                numerical,
                gradient[t]
            );
        }
    }

    #[test]
    fn test_standard_deviation_gradient_of_flat_series_is_zero() {
        let gradient = StandardDeviation
            .gradient_wrt_series(&[0.5, 0.5, 0.5])
            .unwrap();
        assert_eq!(gradient, vec![0., 0., 0.]);
    }

    #[test]
    fn test_compounded_return_stops_at_ruin() {
        // two losses beyond -100% must not multiply back into a gain
        let series = vec![0.003, -2.4, 0.003, -2.4, 0.003];
        assert_eq!(CompoundedReturn.value(&series).unwrap(), -1.);
        let gradient = CompoundedReturn.gradient_wrt_series(&series).unwrap();
        assert!(gradient.iter().all(|g| *g == 0.));

        assert!((CompoundedReturn.value(&[0.1, -1.0, 0.5]).unwrap() + 1.).abs() < 1e-15);
    }
}
