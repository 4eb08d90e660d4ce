use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use keeper_core::problemdetails::{self, Problem, ProblemDetails};
use keeper_jobs::JobManager;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::error::QueueError;
use crate::model::{Mutation, QueueEntry, QueueStats};
use crate::recovery::{RecoveryParams, QUEUE_RECOVERY_JOB};
use crate::service::QueueService;

impl From<QueueError> for Problem {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::UnknownDatacenter(_) | QueueError::UnknownBackup(_) => {
                problemdetails::new(StatusCode::NOT_FOUND)
                    .with_title("Not Found")
                    .with_detail(error.to_string())
            }
            QueueError::InvalidDigest(_) | QueueError::Validation(_) => {
                problemdetails::new(StatusCode::BAD_REQUEST)
                    .with_title("Bad Request")
                    .with_detail(error.to_string())
            }
            QueueError::Job(e) => Problem::from(e),
            _ => {
                error!("Queue error: {}", error);
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Internal Server Error")
                    .with_detail(error.to_string())
            }
        }
    }
}

pub struct QueueAppState {
    pub queue: Arc<QueueService>,
    pub jobs: Arc<JobManager>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    pub accepted: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueState {
    pub paused: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobAccepted {
    pub id: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(ingest, pause, resume, stats, claim, recover),
    components(schemas(
        Mutation,
        QueueEntry,
        QueueStats,
        IngestResponse,
        QueueState,
        JobAccepted,
        ProblemDetails,
    )),
    tags((name = "Queue", description = "Shipped mutation ingestion and processing"))
)]
pub struct QueueApiDoc;

pub fn configure_routes() -> Router<Arc<QueueAppState>> {
    Router::new()
        .route("/v1/ingest/{dc}", post(ingest))
        .route("/v1/queue/pause", post(pause))
        .route("/v1/queue/resume", post(resume))
        .route("/v1/queue/stats", get(stats))
        .route("/v1/queue/claim", post(claim))
        .route("/v1/queue/recover", post(recover))
}

#[utoipa::path(
    tag = "Queue",
    post,
    path = "/v1/ingest/{dc}",
    params(("dc" = String, Path, description = "Datacenter the mutations were shipped to")),
    request_body = Vec<Mutation>,
    responses(
        (status = 202, description = "Mutations enqueued", body = IngestResponse),
        (status = 400, description = "Malformed mutation", body = ProblemDetails),
        (status = 404, description = "No connection ships to the datacenter", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn ingest(
    State(state): State<Arc<QueueAppState>>,
    Path(dc): Path<String>,
    Json(mutations): Json<Vec<Mutation>>,
) -> Result<impl IntoResponse, Problem> {
    let accepted = state.queue.ingest(&dc, mutations).await?;
    Ok((StatusCode::ACCEPTED, Json(IngestResponse { accepted })))
}

#[utoipa::path(
    tag = "Queue",
    post,
    path = "/v1/queue/pause",
    responses((status = 200, description = "Processing paused", body = QueueState)),
    security(("bearer_auth" = []))
)]
async fn pause(State(state): State<Arc<QueueAppState>>) -> Json<QueueState> {
    state.queue.pause();
    Json(QueueState { paused: true })
}

#[utoipa::path(
    tag = "Queue",
    post,
    path = "/v1/queue/resume",
    responses((status = 200, description = "Processing resumed", body = QueueState)),
    security(("bearer_auth" = []))
)]
async fn resume(State(state): State<Arc<QueueAppState>>) -> Json<QueueState> {
    state.queue.resume();
    Json(QueueState { paused: false })
}

#[utoipa::path(
    tag = "Queue",
    get,
    path = "/v1/queue/stats",
    responses((status = 200, description = "Record counts per status", body = QueueStats)),
    security(("bearer_auth" = []))
)]
async fn stats(State(state): State<Arc<QueueAppState>>) -> Result<Json<QueueStats>, Problem> {
    Ok(Json(state.queue.stats().await?))
}

#[derive(Debug, Deserialize, IntoParams)]
struct ClaimQuery {
    #[serde(rename = "backupNS")]
    backup_ns: Option<String>,
    set: Option<String>,
    limit: Option<u64>,
}

#[utoipa::path(
    tag = "Queue",
    post,
    path = "/v1/queue/claim",
    params(ClaimQuery),
    responses((status = 200, description = "Claimed records", body = Vec<QueueEntry>)),
    security(("bearer_auth" = []))
)]
async fn claim(
    State(state): State<Arc<QueueAppState>>,
    Query(query): Query<ClaimQuery>,
) -> Result<Json<Vec<QueueEntry>>, Problem> {
    let rows = state
        .queue
        .claim_for_namespace(
            query.backup_ns.as_deref(),
            query.set.as_deref(),
            query.limit.unwrap_or(1000),
        )
        .await?;
    Ok(Json(rows.into_iter().map(QueueEntry::from).collect()))
}

#[utoipa::path(
    tag = "Queue",
    post,
    path = "/v1/queue/recover",
    responses((status = 202, description = "Recovery job started", body = JobAccepted)),
    security(("bearer_auth" = []))
)]
async fn recover(State(state): State<Arc<QueueAppState>>) -> Result<impl IntoResponse, Problem> {
    let params = serde_json::to_value(RecoveryParams::default()).map_err(QueueError::from)?;
    let id = state
        .jobs
        .submit(QUEUE_RECOVERY_JOB, params)
        .await
        .map_err(QueueError::from)?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { id })))
}
