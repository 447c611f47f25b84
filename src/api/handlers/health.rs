use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Whether the external document tool answered a version probe
    pub tool_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (tool_available, tool_version) = state.executor.tool_health().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        tool_available,
        tool_version,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
