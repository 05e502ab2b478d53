use crate::docs::ApiDoc;
use crate::handlers::{handle_best_portfolios, handle_health};
use crate::optimization::portfolio_service::SeriesSource;
use axum::{
    routing::{get, post},
    Router,
};
use http::header::HeaderName;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn SeriesSource>,
}

impl AppState {
    pub fn new(source: impl SeriesSource + 'static) -> Self {
        AppState {
            source: Arc::new(source),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/portfolios", post(handle_best_portfolios))
        .route("/health", get(handle_health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(x_request_id))
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
}
