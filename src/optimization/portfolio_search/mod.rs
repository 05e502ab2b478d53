use crate::analysis::metrics::MetricsCalculator;
use crate::consts::{
    ACTIVE_WEIGHT_THRESHOLD, DEFAULT_NUM_PORTFOLIOS, EQUAL_WEIGHTS_EXHAUSTIVE_LIMIT,
    OPTIMIZED_EXHAUSTIVE_LIMIT,
};
use crate::optimization::constraints::{feasible_weight, Constraints, MinimumHistory, WeightBounds};
use crate::optimization::objective::{BuiltInObjective, OptimizationObjective};
use crate::portfolio::{PortfolioCandidate, SearchStrategy};
use crate::series::ReturnsPanel;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;

use self::subsets::{exhaustive_subsets, subset_count};
use self::weights::{EqualWeights, ProjectedGradient, SubsetProblem, WeightSolver};

pub mod projection;
pub mod subsets;
pub mod weights;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("No feasible solution: {0}")]
    NoFeasibleSolution(String),
    #[error("Invalid search configuration: {0}")]
    InvalidConfig(String),
    #[error("Could not build the worker pool: {0}")]
    ThreadPool(String),
}

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

fn default_leverage() -> f64 {
    1.
}

fn default_num_portfolios() -> usize {
    DEFAULT_NUM_PORTFOLIOS
}

fn default_seed() -> u64 {
    42
}

fn default_max_iters() -> usize {
    500
}

fn default_step_tolerance() -> f64 {
    1e-10
}

fn default_improvement_tolerance() -> f64 {
    1e-12
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WeightingMode {
    /// Weights maximize the objective inside the weight bounds.
    #[default]
    Optimized,
    /// Every member gets `1/k`, only the subset varies.
    EqualWeights,
}

/// How kept portfolios must differ from one another.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiversityPolicy {
    /// No two kept portfolios hold the same asset set.
    #[default]
    DistinctSets,
    /// Additionally, no kept portfolio's set is contained in a better one's.
    NoNestedSubsets,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, ToSchema)]
pub struct SolverSettings {
    #[serde(default = "default_max_iters")]
    pub max_iters: usize,
    #[serde(default = "default_step_tolerance")]
    pub step_tolerance: f64,
    #[serde(default = "default_improvement_tolerance")]
    pub improvement_tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            max_iters: default_max_iters(),
            step_tolerance: default_step_tolerance(),
            improvement_tolerance: default_improvement_tolerance(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct SearchConfig {
    #[serde(default)]
    pub objective: BuiltInObjective,
    #[serde(default)]
    pub weighting: WeightingMode,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    #[serde(default)]
    pub max_darwins: Option<usize>,
    #[serde(default = "default_num_portfolios")]
    pub num_portfolios: usize,
    #[serde(default)]
    pub diversity: DiversityPolicy,
    #[serde(default)]
    pub weight_bounds: WeightBounds,
    /// Annual, decimal form.
    #[serde(default)]
    pub risk_free_rate: f64,
    /// Extra random starting points for the optimizer.
    #[serde(default)]
    pub restarts: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Above this many subsets the search turns greedy.
    #[serde(default)]
    pub exhaustive_subset_limit: Option<u64>,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            objective: BuiltInObjective::default(),
            weighting: WeightingMode::default(),
            leverage: default_leverage(),
            max_darwins: None,
            num_portfolios: default_num_portfolios(),
            diversity: DiversityPolicy::default(),
            weight_bounds: WeightBounds::default(),
            risk_free_rate: 0.,
            restarts: 0,
            seed: default_seed(),
            exhaustive_subset_limit: None,
            solver: SolverSettings::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), SearchError> {
        if !self.leverage.is_finite() || self.leverage <= 0. {
            return Err(SearchError::InvalidConfig(format!(
                "Leverage must be positive and finite, got {}",
                self.leverage
            )));
        }
        if self.num_portfolios == 0 {
            return Err(SearchError::InvalidConfig(
                "Number of portfolios cannot be zero".into(),
            ));
        }
        if self.max_darwins == Some(0) {
            return Err(SearchError::InvalidConfig(
                "Maximum number of DARWINs cannot be zero".into(),
            ));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(SearchError::InvalidConfig(
                "Risk-free rate must be finite".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(SearchError::InvalidConfig(
                "Max concurrency cannot be zero".into(),
            ));
        }
        if self.solver.max_iters == 0 {
            return Err(SearchError::InvalidConfig(
                "Solver needs at least one iteration".into(),
            ));
        }
        self.weight_bounds.validate()
    }

    /// Size and weight limits of this search, with the given history rule.
    pub fn constraints(&self, minimum_history: MinimumHistory) -> Constraints {
        Constraints {
            minimum_history,
            max_darwins: self.max_darwins,
            weight_bounds: self.weight_bounds,
        }
    }

    pub fn exhaustive_limit(&self) -> u64 {
        self.exhaustive_subset_limit
            .unwrap_or(match self.weighting {
                WeightingMode::EqualWeights => EQUAL_WEIGHTS_EXHAUSTIVE_LIMIT,
                WeightingMode::Optimized => OPTIMIZED_EXHAUSTIVE_LIMIT,
            })
    }
}

/// A scored subset. `indices` are the active members, `origin` the
/// enumeration position of the subset it came from.
#[derive(Debug, Clone, PartialEq)]
struct ScoredSubset {
    indices: Vec<usize>,
    weights: Vec<f64>,
    value: f64,
    origin: usize,
}

/// Best first: higher value, fewer assets, lexically smaller set, earlier origin.
fn rank_order(a: &ScoredSubset, b: &ScoredSubset) -> Ordering {
    b.value
        .total_cmp(&a.value)
        .then_with(|| a.indices.len().cmp(&b.indices.len()))
        .then_with(|| a.indices.cmp(&b.indices))
        .then_with(|| a.origin.cmp(&b.origin))
}

fn is_subset_of(small: &[usize], large: &[usize]) -> bool {
    small.iter().all(|i| large.binary_search(i).is_ok())
}

/// Best candidate per asset set plus evaluation counters.
#[derive(Debug, Clone)]
struct Leaderboard {
    capacity: usize,
    diversity: DiversityPolicy,
    entries: HashMap<Vec<usize>, ScoredSubset>,
    evaluated: usize,
    skipped: usize,
}

impl Leaderboard {
    fn new(capacity: usize, diversity: DiversityPolicy) -> Self {
        Leaderboard {
            capacity,
            diversity,
            entries: HashMap::new(),
            evaluated: 0,
            skipped: 0,
        }
    }

    fn record(&mut self, outcome: Result<ScoredSubset, SearchError>) {
        match outcome {
            Ok(scored) => {
                self.evaluated += 1;
                self.insert(scored);
            }
            Err(e) => {
                self.skipped += 1;
                debug!("Skipping subset: {}", e);
            }
        }
    }

    fn insert(&mut self, scored: ScoredSubset) {
        match self.entries.get(&scored.indices) {
            Some(kept) if rank_order(&scored, kept) != Ordering::Less => {}
            _ => {
                self.entries.insert(scored.indices.clone(), scored);
            }
        }
        // nested-set filtering may need entries beyond the top `capacity`
        if self.diversity == DiversityPolicy::DistinctSets
            && self.entries.len() > 2 * self.capacity
        {
            let kept = self.ranked().into_iter().take(self.capacity).collect::<Vec<_>>();
            self.entries = kept.into_iter().map(|s| (s.indices.clone(), s)).collect();
        }
    }

    fn merge(mut self, other: Leaderboard) -> Leaderboard {
        self.evaluated += other.evaluated;
        self.skipped += other.skipped;
        for scored in other.entries.into_values() {
            self.insert(scored);
        }
        self
    }

    fn ranked(&self) -> Vec<ScoredSubset> {
        let mut ranked = self.entries.values().cloned().collect::<Vec<_>>();
        ranked.sort_by(rank_order);
        ranked
    }

    fn into_top(self) -> Vec<ScoredSubset> {
        let mut kept: Vec<ScoredSubset> = Vec::with_capacity(self.capacity);
        for scored in self.ranked() {
            if kept.len() == self.capacity {
                break;
            }
            if self.diversity == DiversityPolicy::NoNestedSubsets
                && kept.iter().any(|k| is_subset_of(&scored.indices, &k.indices))
            {
                continue;
            }
            kept.push(scored);
        }
        kept
    }
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub candidates: Vec<PortfolioCandidate>,
    pub strategy: SearchStrategy,
    pub evaluated: usize,
    pub skipped: usize,
}

/// Enumerates asset subsets, weights and scores each one and keeps the best.
pub struct PortfolioSearch {
    config: SearchConfig,
    constraints: Constraints,
    calculator: MetricsCalculator,
    objective: Box<dyn OptimizationObjective>,
    solver: Box<dyn WeightSolver>,
}

impl PortfolioSearch {
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        config.validate()?;
        let calculator = MetricsCalculator::new(config.risk_free_rate);
        let objective = config.objective.build(calculator);
        let solver: Box<dyn WeightSolver> = match config.weighting {
            WeightingMode::Optimized => Box::new(ProjectedGradient {
                settings: config.solver,
                restarts: config.restarts,
                seed: config.seed,
            }),
            WeightingMode::EqualWeights => Box::new(EqualWeights),
        };
        // asset history was checked before the panel was built
        let constraints = config.constraints(MinimumHistory::default());
        Ok(PortfolioSearch {
            config,
            constraints,
            calculator,
            objective,
            solver,
        })
    }

    pub fn run(&self, panel: &ReturnsPanel) -> Result<SearchReport, SearchError> {
        let n = panel.asset_count();
        let max_size = self.constraints.max_darwins.map_or(n, |max| max.min(n));
        let total = subset_count(n, max_size);
        let strategy = if total <= self.config.exhaustive_limit() {
            SearchStrategy::Exhaustive
        } else {
            SearchStrategy::Greedy
        };
        info!(
            "Searching {} assets (max {} per portfolio, {} subsets) with {:?} strategy",
            n, max_size, total, strategy
        );
        if let (Some(first), Some(last)) = (panel.dates().first(), panel.dates().last()) {
            debug!(
                "Return panel spans {} periods from {} to {}",
                panel.period_count(),
                first,
                last
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_concurrency)
            .build()
            .map_err(|e| SearchError::ThreadPool(e.to_string()))?;

        let board = pool.install(|| match strategy {
            SearchStrategy::Exhaustive => self.exhaustive(panel, max_size),
            SearchStrategy::Greedy => self.greedy(panel, max_size),
        });
        let (evaluated, skipped) = (board.evaluated, board.skipped);
        info!(
            "Evaluated {} subsets, skipped {} without feasible weights",
            evaluated, skipped
        );

        let candidates = board
            .into_top()
            .into_iter()
            .map(|scored| self.to_candidate(panel, scored))
            .collect();

        Ok(SearchReport {
            candidates,
            strategy,
            evaluated,
            skipped,
        })
    }

    fn new_board(&self) -> Leaderboard {
        Leaderboard::new(self.config.num_portfolios, self.config.diversity)
    }

    fn exhaustive(&self, panel: &ReturnsPanel, max_size: usize) -> Leaderboard {
        exhaustive_subsets(panel.asset_count(), max_size)
            .enumerate()
            .par_bridge()
            .fold(
                || self.new_board(),
                |mut board, (origin, indices)| {
                    board.record(self.evaluate(panel, &indices, origin));
                    board
                },
            )
            .reduce(|| self.new_board(), Leaderboard::merge)
    }

    /// Forward selection: start from the best single asset and keep adding the
    /// asset that improves the objective the most.
    fn greedy(&self, panel: &ReturnsPanel, max_size: usize) -> Leaderboard {
        let n = panel.asset_count();
        let mut board = self.new_board();

        let singles = (0..n)
            .into_par_iter()
            .map(|i| self.evaluate(panel, &[i], i))
            .collect::<Vec<_>>();
        let mut current: Option<ScoredSubset> = None;
        for outcome in singles {
            if let Ok(scored) = &outcome {
                let better = current
                    .as_ref()
                    .map_or(true, |c| rank_order(scored, c) == Ordering::Less);
                if better {
                    current = Some(scored.clone());
                }
            }
            board.record(outcome);
        }
        let Some(mut current) = current else {
            return board;
        };

        let mut origin = n;
        while current.indices.len() < max_size {
            let trials = (0..n)
                .into_par_iter()
                .filter(|j| current.indices.binary_search(j).is_err())
                .map(|j| {
                    let mut indices = current.indices.clone();
                    indices.push(j);
                    indices.sort_unstable();
                    (j, self.evaluate(panel, &indices, origin))
                })
                .collect::<Vec<_>>();

            let mut step: Option<(usize, ScoredSubset)> = None;
            for (j, outcome) in trials {
                match outcome {
                    Ok(scored) => {
                        board.evaluated += 1;
                        let grows = scored.indices.len() > current.indices.len();
                        let improves = scored.value > current.value;
                        // ties go to the lexically first addition
                        let beats_step = step.as_ref().map_or(true, |(best_j, best)| {
                            scored.value > best.value || (scored.value == best.value && j < *best_j)
                        });
                        if grows && improves && beats_step {
                            step = Some((j, scored));
                        }
                    }
                    Err(e) => {
                        board.skipped += 1;
                        debug!("Skipping subset: {}", e);
                    }
                }
            }

            match step {
                Some((j, scored)) => {
                    debug!(
                        "Greedy step {} adds {} (objective {})",
                        origin - n + 1,
                        panel.symbols()[j],
                        scored.value
                    );
                    board.insert(scored.clone());
                    current = scored;
                    origin += 1;
                }
                None => break,
            }
        }
        board
    }

    /// Solves and scores one subset. Oversized subsets are rejected before
    /// solving, and the resulting allocation must be a valid weight vector.
    fn evaluate(
        &self,
        panel: &ReturnsPanel,
        indices: &[usize],
        origin: usize,
    ) -> Result<ScoredSubset, SearchError> {
        if !self.constraints.within_size_limit(indices.len()) {
            return Err(SearchError::NoFeasibleSolution(format!(
                "Subset {:?} exceeds the maximum number of DARWINs",
                indices
            )));
        }
        let scored = self.score_subset(panel, indices, origin)?;
        if !feasible_weight(&scored.weights) {
            return Err(SearchError::NoFeasibleSolution(format!(
                "Weights {:?} of subset {:?} are not a valid allocation",
                scored.weights, scored.indices
            )));
        }
        Ok(scored)
    }

    fn score_subset(
        &self,
        panel: &ReturnsPanel,
        indices: &[usize],
        origin: usize,
    ) -> Result<ScoredSubset, SearchError> {
        let region = self.constraints.weight_bounds.region(indices.len())?;
        let problem = SubsetProblem::new(
            panel,
            indices,
            self.objective.as_ref(),
            region,
            self.config.leverage,
        );
        let solved = self.solver.solve(&problem)?;

        let prune = self.config.weighting == WeightingMode::Optimized
            && self.constraints.weight_bounds.is_long_only()
            && solved.weights.iter().any(|w| *w <= ACTIVE_WEIGHT_THRESHOLD);
        if !prune {
            return Ok(ScoredSubset {
                indices: indices.to_vec(),
                weights: solved.weights,
                value: solved.objective_value,
                origin,
            });
        }

        let (active, kept): (Vec<usize>, Vec<f64>) = indices
            .iter()
            .zip(&solved.weights)
            .filter(|(_, w)| **w > ACTIVE_WEIGHT_THRESHOLD)
            .map(|(i, w)| (*i, *w))
            .unzip();
        let total = kept.iter().sum::<f64>();
        if active.is_empty() || total <= 0. {
            return Err(SearchError::NoFeasibleSolution(format!(
                "All weights of subset {:?} were pruned",
                indices
            )));
        }
        let weights = kept.iter().map(|w| w / total).collect::<Vec<f64>>();
        let region = self.constraints.weight_bounds.region(active.len())?;
        let value = SubsetProblem::new(
            panel,
            &active,
            self.objective.as_ref(),
            region,
            self.config.leverage,
        )
        .evaluate(&weights);
        if !value.is_finite() {
            return Err(SearchError::NoFeasibleSolution(format!(
                "Objective is not finite for subset {:?}",
                active
            )));
        }
        Ok(ScoredSubset {
            indices: active,
            weights,
            value,
            origin,
        })
    }

    fn to_candidate(&self, panel: &ReturnsPanel, scored: ScoredSubset) -> PortfolioCandidate {
        let series = panel.blend(&scored.indices, &scored.weights, self.config.leverage);
        PortfolioCandidate {
            symbols: scored
                .indices
                .iter()
                .map(|i| panel.symbols()[*i].clone())
                .collect(),
            weights: scored.weights,
            leverage: self.config.leverage,
            objective_value: scored.value,
            metrics: self.calculator.performance(&series),
        }
    }
}
