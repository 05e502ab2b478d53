/// Trading days used to annualize daily statistics.
pub const TRADING_DAYS_PER_YEAR: usize = 252;

/// Tolerance for generic float comparisons (weight sums, bounds checks).
pub const FLOAT_COMPARISON_EPSILON: f64 = 1e-9;

/// Tolerance used when checking that a weight vector sums to one.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// A daily standard deviation below this is treated as exactly zero.
pub const ZERO_VOLATILITY_EPSILON: f64 = 1e-12;

/// Drawdowns at or below this leave the Calmar ratio undefined (reported as 0).
pub const MIN_CALMAR_DRAWDOWN: f64 = 1e-12;

/// Optimized weights at or below this are considered inactive.
pub const ACTIVE_WEIGHT_THRESHOLD: f64 = 1e-4;

/// Default number of portfolios kept in a result set.
pub const DEFAULT_NUM_PORTFOLIOS: usize = 10;

/// Subset-count ceiling for exhaustive enumeration in equal-weights mode.
pub const EQUAL_WEIGHTS_EXHAUSTIVE_LIMIT: u64 = 1 << 20;

/// Subset-count ceiling for exhaustive enumeration in optimized mode.
pub const OPTIMIZED_EXHAUSTIVE_LIMIT: u64 = 1 << 12;

/// Step used by central-difference gradients.
pub const PERTURBATION: f64 = 1e-6;
