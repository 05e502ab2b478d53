use crate::analysis::metrics::MetricsCalculator;
use crate::optimization::constraints::{ExclusionReason, MinimumHistory};
use crate::optimization::portfolio_search::{PortfolioSearch, SearchConfig, SearchError};
use crate::portfolio::{ExcludedAsset, PortfolioResultSet};
use crate::series::{AssetSeries, ReturnsPanel};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

/// Where per-DARWIN price series come from.
pub trait SeriesSource: Send + Sync {
    fn available_symbols(&self) -> anyhow::Result<Vec<String>>;

    /// `Ok(None)` when the source holds nothing for `symbol`. The window is a
    /// hint for sources that store several files per symbol.
    fn load(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> anyhow::Result<Option<AssetSeries>>;

    /// Loads every symbol of one request, in order.
    fn load_many(
        &self,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Vec<anyhow::Result<Option<AssetSeries>>> {
        symbols.iter().map(|s| self.load(s, start, end)).collect()
    }
}

impl<T: SeriesSource + ?Sized> SeriesSource for Arc<T> {
    fn available_symbols(&self) -> anyhow::Result<Vec<String>> {
        (**self).available_symbols()
    }

    fn load(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> anyhow::Result<Option<AssetSeries>> {
        (**self).load(symbol, start, end)
    }

    fn load_many(
        &self,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Vec<anyhow::Result<Option<AssetSeries>>> {
        (**self).load_many(symbols, start, end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    series: BTreeMap<String, AssetSeries>,
}

impl InMemorySource {
    pub fn new(series: impl IntoIterator<Item = AssetSeries>) -> Self {
        InMemorySource {
            series: series
                .into_iter()
                .map(|s| (s.symbol().to_string(), s))
                .collect(),
        }
    }
}

impl SeriesSource for InMemorySource {
    fn available_symbols(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.series.keys().cloned().collect())
    }

    fn load(
        &self,
        symbol: &str,
        _start: Option<NaiveDate>,
        _end: Option<NaiveDate>,
    ) -> anyhow::Result<Option<AssetSeries>> {
        Ok(self.series.get(symbol).cloned())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, ToSchema)]
pub struct PortfolioRequest {
    /// DARWINs to consider; every available one when empty.
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub minimum_history: MinimumHistory,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("No price series could be loaded")]
    EmptyUniverse,
    #[error("None of the {} loaded assets is eligible", .excluded.len())]
    NoEligibleAssets { excluded: Vec<ExcludedAsset> },
    #[error("Could not list available series: {0}")]
    Source(String),
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Loads series, filters the eligible ones and runs the portfolio search.
pub struct PortfolioService<S: SeriesSource> {
    source: S,
}

impl<S: SeriesSource> PortfolioService<S> {
    pub fn new(source: S) -> Self {
        PortfolioService { source }
    }

    pub fn generate_best_portfolios(
        &self,
        request: &PortfolioRequest,
    ) -> Result<PortfolioResultSet, ServiceError> {
        request.search.validate()?;

        let symbols = if request.symbols.is_empty() {
            self.source
                .available_symbols()
                .map_err(|e| ServiceError::Source(format!("{:#}", e)))?
        } else {
            request.symbols.clone()
        };
        let symbols = symbols
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        let outcomes = self
            .source
            .load_many(&symbols, request.start, request.end);

        let mut excluded = Vec::new();
        let mut loaded = Vec::new();
        for (symbol, outcome) in symbols.into_iter().zip(outcomes) {
            match outcome {
                Ok(Some(series)) => loaded.push(series.window(request.start, request.end)),
                Ok(None) => {
                    warn!("No series found for {}. Skipped.", symbol);
                    excluded.push(ExcludedAsset {
                        symbol,
                        reason: ExclusionReason::Unavailable {
                            detail: "no series found".into(),
                        },
                    });
                }
                Err(e) => {
                    warn!("Could not load {}: {:#}. Skipped.", symbol, e);
                    excluded.push(ExcludedAsset {
                        symbol,
                        reason: ExclusionReason::Unavailable {
                            detail: format!("{:#}", e),
                        },
                    });
                }
            }
        }
        if loaded.is_empty() {
            return Err(ServiceError::EmptyUniverse);
        }

        let constraints = request.search.constraints(request.minimum_history);
        let calculator = MetricsCalculator::new(request.search.risk_free_rate);
        let mut eligible = Vec::new();
        let mut universe = Vec::new();
        for series in loaded {
            match constraints.assess(&series, &calculator) {
                Ok(metrics) => {
                    universe.push(metrics);
                    eligible.push(series);
                }
                Err(reason) => {
                    info!("Excluding {}: {}", series.symbol(), reason);
                    excluded.push(ExcludedAsset {
                        symbol: series.symbol().to_string(),
                        reason,
                    });
                }
            }
        }
        excluded.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        if eligible.is_empty() {
            return Err(ServiceError::NoEligibleAssets { excluded });
        }
        info!(
            "{} eligible assets, {} excluded",
            eligible.len(),
            excluded.len()
        );

        let panel = ReturnsPanel::from_series(&eligible);
        let search = PortfolioSearch::new(request.search.clone())?;
        let report = search.run(&panel)?;

        Ok(PortfolioResultSet {
            objective: request.search.objective,
            weighting: request.search.weighting,
            leverage: request.search.leverage,
            strategy: report.strategy,
            evaluated_subsets: report.evaluated,
            skipped_subsets: report.skipped,
            portfolios: report.candidates,
            universe,
            excluded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::constraints::feasible_weight;
    use crate::optimization::portfolio_search::WeightingMode;
    use crate::series::test_support::{day, flat_series, series_from_returns};
    use rand::prelude::*;

    fn request(symbols: &[&str]) -> PortfolioRequest {
        PortfolioRequest {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            search: SearchConfig {
                max_concurrency: 2,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn losing_series(symbol: &str, days: usize) -> AssetSeries {
        let mut returns = vec![0.; days - 1];
        returns[days / 2] = -0.01;
        series_from_returns(symbol, &returns)
    }

    fn noisy(symbol: &str, mean: f64, seed: u64) -> AssetSeries {
        let mut rng = StdRng::seed_from_u64(seed);
        let returns = (0..399)
            .map(|_| mean + rng.gen_range(-0.01..0.01))
            .collect::<Vec<f64>>();
        series_from_returns(symbol, &returns)
    }

    #[test]
    fn test_two_flat_assets_rank_singletons_first() {
        let service = PortfolioService::new(InMemorySource::new([
            flat_series("A", 0.001, 400),
            flat_series("B", 0.0005, 400),
        ]));
        let mut request = request(&["A", "B"]);
        request.search.num_portfolios = 2;

        let results = service.generate_best_portfolios(&request).unwrap();
        let sets = results
            .portfolios
            .iter()
            .map(|p| p.symbols.clone())
            .collect::<Vec<_>>();
        assert_eq!(sets, vec![vec!["A".to_string()], vec!["B".to_string()]]);
        assert!(results.portfolios.iter().all(|p| p.objective_value == 0.));
    }

    #[test]
    fn test_ineligible_assets_are_reported() {
        let service = PortfolioService::new(InMemorySource::new([
            noisy("GOOD", 0.001, 1),
            flat_series("C", 0.001, 100),
            losing_series("D", 300),
        ]));
        let results = service
            .generate_best_portfolios(&request(&["GOOD", "C", "D", "NOPE"]))
            .unwrap();

        let reasons = results
            .excluded
            .iter()
            .map(|e| (e.symbol.as_str(), &e.reason))
            .collect::<Vec<_>>();
        assert!(matches!(reasons[0], ("C", ExclusionReason::InsufficientData { observations: 100, .. })));
        assert!(matches!(reasons[1], ("D", ExclusionReason::NonPositiveReturn { .. })));
        assert!(matches!(reasons[2], ("NOPE", ExclusionReason::Unavailable { .. })));
        assert_eq!(results.universe.len(), 1);
        assert_eq!(results.portfolios.len(), 1);
        assert_eq!(results.portfolios[0].symbols, vec!["GOOD".to_string()]);
    }

    #[test]
    fn test_total_return_of_universe_comes_from_prices() {
        let good = noisy("GOOD", 0.001, 4);
        let prices = good.prices();
        let service = PortfolioService::new(InMemorySource::new([good.clone()]));
        let results = service.generate_best_portfolios(&request(&[])).unwrap();
        let expected = prices[prices.len() - 1] / prices[0] - 1.;
        assert!((results.universe[0].performance.total_return - expected).abs() < 1e-9);
    }

    #[test]
    fn test_empty_universe_and_no_eligible_assets() {
        let service = PortfolioService::new(InMemorySource::default());
        assert!(matches!(
            service.generate_best_portfolios(&request(&[])),
            Err(ServiceError::EmptyUniverse)
        ));

        let service = PortfolioService::new(InMemorySource::new([flat_series("C", 0.001, 100)]));
        match service.generate_best_portfolios(&request(&[])) {
            Err(ServiceError::NoEligibleAssets { excluded }) => assert_eq!(excluded.len(), 1),
            other => panic!("unexpected outcome {:?}", other.map(|r| r.portfolios.len())),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected_before_loading() {
        let service = PortfolioService::new(InMemorySource::default());
        let mut request = request(&[]);
        request.search.leverage = -1.;
        assert!(matches!(
            service.generate_best_portfolios(&request),
            Err(ServiceError::Search(SearchError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_window_clips_history() {
        let service = PortfolioService::new(InMemorySource::new([noisy("GOOD", 0.002, 8)]));
        let mut request = request(&[]);
        request.start = Some(day(200));
        // 200 observations left, below one trading year
        assert!(matches!(
            service.generate_best_portfolios(&request),
            Err(ServiceError::NoEligibleAssets { .. })
        ));
    }

    #[test]
    fn test_full_run_produces_valid_portfolios() {
        let service = PortfolioService::new(InMemorySource::new([
            noisy("AAA", 0.0010, 11),
            noisy("BBB", 0.0009, 12),
            noisy("CCC", 0.0011, 13),
            noisy("DDD", 0.0008, 14),
        ]));
        for weighting in [WeightingMode::Optimized, WeightingMode::EqualWeights] {
            let mut request = request(&[]);
            request.search.weighting = weighting;
            request.search.max_darwins = Some(3);
            let results = service.generate_best_portfolios(&request).unwrap();
            assert!(!results.portfolios.is_empty());
            for pair in results.portfolios.windows(2) {
                assert!(pair[0].objective_value >= pair[1].objective_value);
            }
            for portfolio in &results.portfolios {
                assert!(feasible_weight(&portfolio.weights));
                assert!(portfolio.size() <= 3);
            }
        }
    }
}
