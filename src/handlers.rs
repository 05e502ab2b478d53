use crate::optimization::portfolio_search::SearchError;
use crate::optimization::portfolio_service::{PortfolioRequest, PortfolioService, ServiceError};
use crate::portfolio::PortfolioResultSet;
use crate::web_app::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct PortfolioResponse {
    pub run_id: Uuid,
    pub result: PortfolioResultSet,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn status_for(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::Search(SearchError::InvalidConfig(_)) => StatusCode::BAD_REQUEST,
        ServiceError::EmptyUniverse | ServiceError::NoEligibleAssets { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[utoipa::path(
    post,
    path = "/portfolios",
    request_body = PortfolioRequest,
    responses(
        (status = 200, description = "Ranked portfolios", body = PortfolioResponse),
        (status = 400, description = "Invalid search configuration", body = ErrorResponse),
        (status = 422, description = "No usable DARWINs", body = ErrorResponse),
        (status = 500, description = "Search failed", body = ErrorResponse)
    ),
    tag = "Portfolios"
)]
pub async fn handle_best_portfolios(
    State(state): State<AppState>,
    Json(payload): Json<PortfolioRequest>,
) -> Result<Json<PortfolioResponse>, ApiError> {
    let run_id = Uuid::new_v4();
    info!(%run_id, "Portfolio search requested for {} symbols", payload.symbols.len());

    // the search is CPU bound
    let source = state.source.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        PortfolioService::new(source).generate_best_portfolios(&payload)
    })
    .await
    .map_err(|e| {
        error!(%run_id, "Portfolio search task failed: {}", e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
    })?;

    match outcome {
        Ok(result) => {
            info!(%run_id, "Returning {} portfolios", result.portfolios.len());
            Ok(Json(PortfolioResponse { run_id, result }))
        }
        Err(e) => {
            let status = status_for(&e);
            error!(%run_id, "Portfolio search failed ({}): {}", status, e);
            Err(error_response(status, e))
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "Health"
)]
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}
