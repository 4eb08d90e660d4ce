use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use keeper_core::problemdetails::{self, Problem, ProblemDetails};
use keeper_database::DbConnection;
use serde::Serialize;
use tracing::warn;
use utoipa::{OpenApi, ToSchema};

pub struct SystemState {
    pub db: Arc<DbConnection>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct VersionResponse {
    pub version: String,
    pub build_time: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(health, ready, version),
    components(schemas(HealthResponse, VersionResponse, ProblemDetails)),
    tags((name = "System", description = "Service health and telemetry"))
)]
pub struct SystemApiDoc;

pub fn configure_routes() -> Router<Arc<SystemState>> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
}

#[utoipa::path(
    tag = "System",
    get,
    path = "/health",
    responses((status = 200, description = "Process is alive", body = HealthResponse))
)]
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    tag = "System",
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Serving requests", body = HealthResponse),
        (status = 503, description = "Database unavailable", body = ProblemDetails)
    )
)]
async fn ready(State(state): State<Arc<SystemState>>) -> Result<impl IntoResponse, Problem> {
    state.db.ping().await.map_err(|e| {
        warn!("Readiness check failed: {}", e);
        problemdetails::new(StatusCode::SERVICE_UNAVAILABLE)
            .with_title("Not Ready")
            .with_detail(e.to_string())
    })?;
    Ok(Json(HealthResponse {
        status: "ready".to_string(),
    }))
}

#[utoipa::path(
    tag = "System",
    get,
    path = "/version",
    responses((status = 200, description = "Build information", body = VersionResponse))
)]
async fn version() -> impl IntoResponse {
    Json(VersionResponse {
        version: env!("KEEPER_VERSION").to_string(),
        build_time: env!("KEEPER_BUILD_TIME").to_string(),
    })
}
