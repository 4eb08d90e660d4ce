use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use keeper_core::problemdetails::{self, Problem};
use tracing::error;
use utoipa::OpenApi;

use crate::metrics::KeeperMetrics;

#[derive(OpenApi)]
#[openapi(
    paths(get_metrics),
    tags((name = "System", description = "Service health and telemetry"))
)]
pub struct MetricsApiDoc;

pub fn configure_routes() -> Router<Arc<KeeperMetrics>> {
    Router::new().route("/metrics", get(get_metrics))
}

#[utoipa::path(
    tag = "System",
    get,
    path = "/metrics",
    responses((status = 200, description = "Prometheus text exposition", body = String, content_type = "text/plain"))
)]
async fn get_metrics(State(metrics): State<Arc<KeeperMetrics>>) -> Result<impl IntoResponse, Problem> {
    let body = metrics.encode().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_title("Metrics Error")
            .with_detail(e.to_string())
    })?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
