pub mod balance;
pub mod transactions;
pub mod webhook;
pub mod ws;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::health::{check_health, HealthResponse};
use crate::AppState;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "All dependencies are reachable", body = HealthResponse),
        (status = 503, description = "Service is degraded or unhealthy", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = check_health(&state.health_checks, state.start_time).await;

    let status_code = if report.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(report))
}
