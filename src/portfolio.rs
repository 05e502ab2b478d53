use crate::analysis::metrics::{AssetMetrics, PerformanceMetrics};
use crate::optimization::constraints::ExclusionReason;
use crate::optimization::objective::BuiltInObjective;
use crate::optimization::portfolio_search::WeightingMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// A weighted set of DARWINs with its score.
///
/// `symbols` are sorted and `weights[i]` belongs to `symbols[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PortfolioCandidate {
    pub symbols: Vec<String>,
    pub weights: Vec<f64>,
    pub leverage: f64,
    pub objective_value: f64,
    /// Statistics of the leveraged blended return series.
    pub metrics: PerformanceMetrics,
}

impl PortfolioCandidate {
    pub fn size(&self) -> usize {
        self.symbols.len()
    }

    pub fn weight_of(&self, symbol: &str) -> Option<f64> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| self.weights[i])
    }

    pub fn allocations(&self) -> impl Iterator<Item = (&str, f64)> {
        self.symbols
            .iter()
            .map(String::as_str)
            .zip(self.weights.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Exhaustive,
    Greedy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExcludedAsset {
    pub symbol: String,
    pub reason: ExclusionReason,
}

/// Outcome of one portfolio search, best portfolio first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PortfolioResultSet {
    pub objective: BuiltInObjective,
    pub weighting: WeightingMode,
    pub leverage: f64,
    pub strategy: SearchStrategy,
    pub evaluated_subsets: usize,
    pub skipped_subsets: usize,
    pub portfolios: Vec<PortfolioCandidate>,
    /// Metrics of every eligible asset.
    pub universe: Vec<AssetMetrics>,
    pub excluded: Vec<ExcludedAsset>,
}

impl PortfolioResultSet {
    pub fn best(&self) -> Option<&PortfolioCandidate> {
        self.portfolios.first()
    }

    pub fn is_empty(&self) -> bool {
        self.portfolios.is_empty()
    }
}

impl fmt::Display for PortfolioResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:?} portfolios ({:?}, {:?} search, leverage {}): {} subsets evaluated, {} skipped",
            self.objective,
            self.weighting,
            self.strategy,
            self.leverage,
            self.evaluated_subsets,
            self.skipped_subsets
        )?;
        writeln!(
            f,
            "{:>4}  {:>10}  {:>10}  {:>10}  {:>10}  allocation",
            "rank", "objective", "return", "volatility", "drawdown"
        )?;
        for (rank, candidate) in self.portfolios.iter().enumerate() {
            let allocation = candidate
                .allocations()
                .map(|(symbol, weight)| format!("{}={:.2}%", symbol, weight * 100.))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(
                f,
                "{:>4}  {:>10.4}  {:>9.2}%  {:>9.2}%  {:>9.2}%  {}",
                rank + 1,
                candidate.objective_value,
                candidate.metrics.total_return * 100.,
                candidate.metrics.annualized_volatility * 100.,
                candidate.metrics.max_drawdown * 100.,
                allocation
            )?;
        }
        for excluded in &self.excluded {
            writeln!(f, "excluded {}: {}", excluded.symbol, excluded.reason)?;
        }
        Ok(())
    }
}
