pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::CompressionConfig;
use crate::services::executor::Executor;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::compress::compress_single,
        api::handlers::compress::compress_batch,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            models::OutputFormat,
            models::FitPolicy,
            models::ResizeSpec,
            models::BatchItem,
            models::BatchError,
            models::BatchReport,
        )
    ),
    tags(
        (name = "compression", description = "Image and document compression endpoints"),
        (name = "system", description = "Health and diagnostics")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub config: CompressionConfig,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/api/compress",
            post(api::handlers::compress::compress_single)
                .layer(from_fn(api::middleware::usage::require_usage_allowance)),
        )
        .route(
            "/api/compress/batch",
            post(api::handlers::compress::compress_batch)
                .layer(from_fn(api::middleware::usage::require_usage_allowance)),
        )
        .with_state(state)
}
