use crate::analysis::metrics::{AssetMetrics, PerformanceMetrics};
use crate::handlers::{ErrorResponse, HealthResponse, PortfolioResponse};
use crate::optimization::constraints::{ExclusionReason, MinimumHistory, WeightBounds};
use crate::optimization::objective::BuiltInObjective;
use crate::optimization::portfolio_search::{
    DiversityPolicy, SearchConfig, SolverSettings, WeightingMode,
};
use crate::optimization::portfolio_service::PortfolioRequest;
use crate::portfolio::{ExcludedAsset, PortfolioCandidate, PortfolioResultSet, SearchStrategy};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_best_portfolios,
        crate::handlers::handle_health
    ),
    components(
        schemas(
            PortfolioRequest,
            PortfolioResponse,
            PortfolioResultSet,
            PortfolioCandidate,
            PerformanceMetrics,
            AssetMetrics,
            ExcludedAsset,
            ExclusionReason,
            SearchConfig,
            SolverSettings,
            BuiltInObjective,
            WeightingMode,
            DiversityPolicy,
            WeightBounds,
            MinimumHistory,
            SearchStrategy,
            ErrorResponse,
            HealthResponse
        )
    ),
    tags(
        (name = "Portfolios", description = "Portfolio construction and ranking"),
        (name = "Health", description = "Liveness")
    )
)]
pub struct ApiDoc;
