use crate::optimization::constraints::FeasibleRegion;
use crate::optimization::objective::OptimizationObjective;
use crate::optimization::portfolio_search::{SearchError, SolverSettings};
use crate::series::ReturnsPanel;
use nalgebra::DMatrix;
use rand::distributions::Uniform;
use rand::prelude::*;
use tracing::debug;

/// Armijo sufficient-increase constant.
const ARMIJO_FRACTION: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 60;

/// Weighting problem of one asset subset: evaluate, differentiate and project.
pub struct SubsetProblem<'a> {
    indices: Vec<usize>,
    returns: DMatrix<f64>,
    objective: &'a dyn OptimizationObjective,
    region: FeasibleRegion,
    leverage: f64,
}

impl<'a> SubsetProblem<'a> {
    pub fn new(
        panel: &ReturnsPanel,
        indices: &[usize],
        objective: &'a dyn OptimizationObjective,
        region: FeasibleRegion,
        leverage: f64,
    ) -> Self {
        SubsetProblem {
            indices: indices.to_vec(),
            returns: panel.select(indices),
            objective,
            region,
            leverage,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn dimension(&self) -> usize {
        self.indices.len()
    }

    pub fn region(&self) -> &FeasibleRegion {
        &self.region
    }

    pub fn evaluate(&self, weights: &[f64]) -> f64 {
        self.objective.value(&self.returns, weights, self.leverage)
    }

    pub fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        self.objective.gradient(&self.returns, weights, self.leverage)
    }

    pub fn project(&self, v: &[f64]) -> Vec<f64> {
        self.region.project(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolvedWeights {
    pub weights: Vec<f64>,
    pub objective_value: f64,
}

pub trait WeightSolver: Send + Sync {
    fn solve(&self, problem: &SubsetProblem) -> Result<SolvedWeights, SearchError>;
}

/// Every asset gets exactly `1/k`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualWeights;

impl WeightSolver for EqualWeights {
    fn solve(&self, problem: &SubsetProblem) -> Result<SolvedWeights, SearchError> {
        let weights = problem.region().uniform();
        if !problem.region().contains(&weights) {
            return Err(SearchError::NoFeasibleSolution(format!(
                "Equal weight 1/{} is outside the weight bounds",
                problem.dimension()
            )));
        }
        let objective_value = problem.evaluate(&weights);
        if !objective_value.is_finite() {
            return Err(SearchError::NoFeasibleSolution(format!(
                "Objective is not finite for subset {:?}",
                problem.indices()
            )));
        }
        Ok(SolvedWeights {
            weights,
            objective_value,
        })
    }
}

/// Projected-gradient ascent with Armijo backtracking.
///
/// Starts from uniform weights, then from `restarts` random points drawn with
/// a generator seeded from `seed` and the subset itself. The best result wins,
/// earlier starts win ties.
#[derive(Debug, Clone)]
pub struct ProjectedGradient {
    pub settings: SolverSettings,
    pub restarts: usize,
    pub seed: u64,
}

impl ProjectedGradient {
    fn starting_points(&self, problem: &SubsetProblem) -> Vec<Vec<f64>> {
        let mut starts = vec![problem.region().uniform()];
        if self.restarts == 0 || problem.dimension() < 2 {
            return starts;
        }
        let mut rng = StdRng::seed_from_u64(self.seed ^ subset_fingerprint(problem.indices()));
        let uniform = Uniform::new(0., 1.);
        for _ in 0..self.restarts {
            let raw = (&mut rng)
                .sample_iter(uniform)
                .take(problem.dimension())
                .collect::<Vec<f64>>();
            let magnitude = raw.iter().sum::<f64>();
            let normalized = raw.iter().map(|x| x / magnitude).collect::<Vec<f64>>();
            starts.push(problem.project(&normalized));
        }
        starts
    }

    fn ascend(&self, problem: &SubsetProblem, start: &[f64]) -> Result<SolvedWeights, SearchError> {
        let mut weights = problem.project(start);
        let mut value = problem.evaluate(&weights);
        if !value.is_finite() {
            return Err(SearchError::NoFeasibleSolution(format!(
                "Objective is not finite at the starting point of subset {:?}",
                problem.indices()
            )));
        }
        if problem.dimension() == 1 {
            return Ok(SolvedWeights {
                weights,
                objective_value: value,
            });
        }

        let mut step = 1.;
        for iteration in 0..self.settings.max_iters {
            let gradient = problem.gradient(&weights);

            let mut accepted = None;
            let mut trial_step = step;
            for _ in 0..MAX_BACKTRACKS {
                let moved = weights
                    .iter()
                    .zip(&gradient)
                    .map(|(w, g)| w + trial_step * g)
                    .collect::<Vec<f64>>();
                let candidate = problem.project(&moved);
                let candidate_value = problem.evaluate(&candidate);
                let predicted = gradient
                    .iter()
                    .zip(candidate.iter().zip(&weights))
                    .map(|(g, (c, w))| g * (c - w))
                    .sum::<f64>();
                if candidate_value.is_finite()
                    && candidate_value >= value + ARMIJO_FRACTION * predicted
                {
                    accepted = Some((candidate, candidate_value));
                    break;
                }
                trial_step *= 0.5;
            }

            // no ascent direction left inside the region
            let Some((candidate, candidate_value)) = accepted else {
                debug!(
                    "Subset {:?} stationary after {} iterations",
                    problem.indices(),
                    iteration
                );
                return Ok(SolvedWeights {
                    weights,
                    objective_value: value,
                });
            };

            let displacement = candidate
                .iter()
                .zip(&weights)
                .map(|(c, w)| (c - w).powi(2))
                .sum::<f64>()
                .sqrt();
            let improvement = candidate_value - value;
            weights = candidate;
            value = candidate_value;
            step = trial_step * 2.;

            if displacement <= self.settings.step_tolerance
                || improvement.abs() <= self.settings.improvement_tolerance
            {
                return Ok(SolvedWeights {
                    weights,
                    objective_value: value,
                });
            }
        }

        Err(SearchError::NoFeasibleSolution(format!(
            "No convergence within {} iterations for subset {:?}",
            self.settings.max_iters,
            problem.indices()
        )))
    }
}

impl WeightSolver for ProjectedGradient {
    fn solve(&self, problem: &SubsetProblem) -> Result<SolvedWeights, SearchError> {
        let mut best: Option<SolvedWeights> = None;
        let mut last_error = None;
        for start in self.starting_points(problem) {
            match self.ascend(problem, &start) {
                Ok(solved) => {
                    if best
                        .as_ref()
                        .map_or(true, |b| solved.objective_value > b.objective_value)
                    {
                        best = Some(solved);
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }
        match (best, last_error) {
            (Some(solved), _) => Ok(solved),
            (None, Some(e)) => Err(e),
            (None, None) => Err(SearchError::NoFeasibleSolution(format!(
                "No starting point for subset {:?}",
                problem.indices()
            ))),
        }
    }
}

/// FNV-1a over the subset indices.
fn subset_fingerprint(indices: &[usize]) -> u64 {
    indices.iter().fold(0xcbf29ce484222325, |hash, i| {
        (hash ^ *i as u64).wrapping_mul(0x100000001b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::metrics::MetricsCalculator;
    use crate::optimization::constraints::{feasible_weight, WeightBounds};
    use crate::optimization::objective::{BuiltInObjective, SharpeRatio};
    use crate::series::test_support::series_from_returns;
    use crate::series::ReturnsPanel;

    fn noisy(mean: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..400).map(|_| mean + rng.gen_range(-0.01..0.01)).collect()
    }

    fn panel() -> ReturnsPanel {
        ReturnsPanel::from_series(&[
            series_from_returns("A", &noisy(0.001, 1)),
            series_from_returns("B", &noisy(0.001, 2)),
            series_from_returns("C", &noisy(0.0002, 3)),
        ])
    }

    fn solver(restarts: usize) -> ProjectedGradient {
        ProjectedGradient {
            settings: SolverSettings::default(),
            restarts,
            seed: 42,
        }
    }

    #[test]
    fn test_optimized_weights_beat_uniform_and_single_assets() {
        let panel = panel();
        let objective = SharpeRatio {
            calculator: MetricsCalculator::default(),
        };
        let region = WeightBounds::LongOnly.region(2).unwrap();
        let problem = SubsetProblem::new(&panel, &[0, 1], &objective, region, 1.);

        let solved = solver(0).solve(&problem).unwrap();
        assert!(feasible_weight(&solved.weights));
        assert!(solved.objective_value >= problem.evaluate(&[0.5, 0.5]) - 1e-12);
        assert!(solved.objective_value > problem.evaluate(&[1., 0.]));
        assert!(solved.objective_value > problem.evaluate(&[0., 1.]));
    }

    #[test]
    fn test_restarts_are_deterministic() {
        let panel = panel();
        let objective = BuiltInObjective::SharpeRatio.build(MetricsCalculator::default());
        let region = WeightBounds::LongOnly.region(3).unwrap();
        let problem = SubsetProblem::new(&panel, &[0, 1, 2], objective.as_ref(), region, 1.);

        let first = solver(3).solve(&problem).unwrap();
        let second = solver(3).solve(&problem).unwrap();
        assert_eq!(first, second);
        assert!(feasible_weight(&first.weights));
    }

    #[test]
    fn test_bounded_solution_respects_bounds() {
        let panel = panel();
        let objective = BuiltInObjective::TotalReturn.build(MetricsCalculator::default());
        let region = WeightBounds::Relative.region(3).unwrap();
        let problem = SubsetProblem::new(&panel, &[0, 1, 2], objective.as_ref(), region, 1.);

        let solved = solver(0).solve(&problem).unwrap();
        assert!(region.contains(&solved.weights));
    }

    #[test]
    fn test_equal_weights_are_exact() {
        let panel = panel();
        let objective = BuiltInObjective::SharpeRatio.build(MetricsCalculator::default());
        let region = WeightBounds::LongOnly.region(3).unwrap();
        let problem = SubsetProblem::new(&panel, &[0, 1, 2], objective.as_ref(), region, 1.);

        let solved = EqualWeights.solve(&problem).unwrap();
        assert_eq!(solved.weights, vec![1. / 3.; 3]);
    }

    #[test]
    fn test_subset_fingerprint_depends_on_members() {
        assert_ne!(subset_fingerprint(&[0, 1]), subset_fingerprint(&[0, 2]));
        assert_eq!(subset_fingerprint(&[3, 4]), subset_fingerprint(&[3, 4]));
    }
}
