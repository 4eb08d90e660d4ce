use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use keeper_core::problemdetails::{self, Problem, ProblemDetails};
use keeper_core::TimeBounds;
use keeper_metadata::handlers::JobAccepted;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::continuous::ContinuousRestorer;
use crate::error::RestoreError;
use crate::model::{
    ContinuousRestoreRequest, ContinuousScope, RestoreJobState, RestoreJobStatus,
    RestoreNamespace, RestorePolicy, RestoreRequest, RestoreStats, RestoreTask,
    RestoreTimestampRequest,
};
use crate::service::RestoreService;

impl From<RestoreError> for Problem {
    fn from(error: RestoreError) -> Self {
        match error {
            RestoreError::Validation(_) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Validation Error")
                .with_detail(error.to_string()),
            RestoreError::NotFound(_) => problemdetails::new(StatusCode::NOT_FOUND)
                .with_title("Not Found")
                .with_detail(error.to_string()),
            RestoreError::AlreadyFinished { .. } => problemdetails::new(StatusCode::CONFLICT)
                .with_title("Invalid Job State")
                .with_detail(error.to_string()),
            RestoreError::Cluster(_) => problemdetails::new(StatusCode::BAD_GATEWAY)
                .with_title("Cluster Error")
                .with_detail(error.to_string()),
            RestoreError::Config(e) => Problem::from(e),
            RestoreError::Metadata(e) => Problem::from(e),
            RestoreError::Backup(e) => Problem::from(e),
            RestoreError::Job(e) => Problem::from(e),
            _ => {
                error!("Restore error: {}", error);
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Internal Server Error")
                    .with_detail(error.to_string())
            }
        }
    }
}

pub struct RestoreAppState {
    pub service: Arc<RestoreService>,
    pub continuous: Arc<ContinuousRestorer>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecordsRestored {
    /// Records written to the target namespace
    pub success: usize,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        restore_full,
        restore_incremental,
        restore_timestamp,
        restore_status,
        cancel_restore,
        retrieve_jobs,
        restore_set,
        restore_namespace,
        restore_records,
    ),
    components(schemas(
        RestoreRequest,
        RestoreTimestampRequest,
        RestorePolicy,
        RestoreNamespace,
        RestoreJobStatus,
        RestoreJobState,
        RestoreStats,
        ContinuousRestoreRequest,
        RecordsRestored,
        JobAccepted,
        ProblemDetails
    )),
    tags((name = "Restore", description = "Restore jobs from snapshots and continuous backups"))
)]
pub struct RestoreApiDoc;

pub fn configure_routes() -> Router<Arc<RestoreAppState>> {
    Router::new()
        .route("/v1/restore/full", post(restore_full))
        .route("/v1/restore/incremental", post(restore_incremental))
        .route("/v1/restore/timestamp", post(restore_timestamp))
        .route("/v1/restore/status/{id}", get(restore_status))
        .route("/v1/restore/cancel/{id}", post(cancel_restore))
        .route("/v1/restore/jobs", get(retrieve_jobs))
        .route("/v1/restore/set", post(restore_set))
        .route("/v1/restore/namespace", post(restore_namespace))
        .route("/v1/restore/records", post(restore_records))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct JobsQuery {
    /// Created at or after, epoch millis
    pub from: Option<i64>,
    /// Created at or before, epoch millis
    pub to: Option<i64>,
    /// Running, Done, Failed or Cancelled
    pub status: Option<String>,
}

impl JobsQuery {
    fn parse(&self) -> Result<(TimeBounds, Option<RestoreJobState>), RestoreError> {
        let bounds = TimeBounds::new(self.from, self.to)
            .map_err(|e| e.context("invalid query param time bounds"))?;
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<RestoreJobState>)
            .transpose()
            .map_err(|e| e.context("invalid query param status"))?;
        Ok((bounds, status))
    }
}

#[utoipa::path(
    tag = "Restore",
    post,
    path = "/v1/restore/full",
    request_body = RestoreRequest,
    responses(
        (status = 202, description = "Restore job started", body = i32),
        (status = 400, description = "Invalid request", body = ProblemDetails),
        (status = 404, description = "Unknown destination", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn restore_full(
    State(state): State<Arc<RestoreAppState>>,
    Json(request): Json<RestoreRequest>,
) -> Result<impl IntoResponse, Problem> {
    let id = state.service.submit(RestoreTask::Full(request)).await?;
    Ok((StatusCode::ACCEPTED, Json(id)))
}

#[utoipa::path(
    tag = "Restore",
    post,
    path = "/v1/restore/incremental",
    request_body = RestoreRequest,
    responses(
        (status = 202, description = "Restore job started", body = i32),
        (status = 400, description = "Invalid request", body = ProblemDetails),
        (status = 404, description = "Unknown destination", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn restore_incremental(
    State(state): State<Arc<RestoreAppState>>,
    Json(request): Json<RestoreRequest>,
) -> Result<impl IntoResponse, Problem> {
    let id = state.service.submit(RestoreTask::Incremental(request)).await?;
    Ok((StatusCode::ACCEPTED, Json(id)))
}

#[utoipa::path(
    tag = "Restore",
    post,
    path = "/v1/restore/timestamp",
    request_body = RestoreTimestampRequest,
    responses(
        (status = 202, description = "Restore job started", body = i32),
        (status = 400, description = "Invalid request", body = ProblemDetails),
        (status = 404, description = "Unknown routine or destination", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn restore_timestamp(
    State(state): State<Arc<RestoreAppState>>,
    Json(request): Json<RestoreTimestampRequest>,
) -> Result<impl IntoResponse, Problem> {
    let id = state.service.submit(RestoreTask::Timestamp(request)).await?;
    Ok((StatusCode::ACCEPTED, Json(id)))
}

#[utoipa::path(
    tag = "Restore",
    get,
    path = "/v1/restore/status/{id}",
    params(("id" = i32, Path, description = "Restore job id")),
    responses(
        (status = 200, description = "Job state and counters", body = RestoreJobStatus),
        (status = 404, description = "Unknown job", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn restore_status(
    State(state): State<Arc<RestoreAppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(state.service.status(id).await?))
}

#[utoipa::path(
    tag = "Restore",
    post,
    path = "/v1/restore/cancel/{id}",
    params(("id" = i32, Path, description = "Restore job id")),
    responses(
        (status = 202, description = "Job cancelled"),
        (status = 404, description = "Unknown job", body = ProblemDetails),
        (status = 409, description = "Job already finished", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn cancel_restore(
    State(state): State<Arc<RestoreAppState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    state.service.cancel(id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    tag = "Restore",
    get,
    path = "/v1/restore/jobs",
    params(JobsQuery),
    responses(
        (status = 200, description = "Restore jobs by id", body = BTreeMap<i32, RestoreJobStatus>),
        (status = 400, description = "Invalid query", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn retrieve_jobs(
    State(state): State<Arc<RestoreAppState>>,
    Query(query): Query<JobsQuery>,
) -> Result<impl IntoResponse, Problem> {
    let (bounds, status) = query.parse()?;
    Ok(Json(state.service.list(&bounds, status).await?))
}

#[utoipa::path(
    tag = "Restore",
    post,
    path = "/v1/restore/set",
    request_body = ContinuousRestoreRequest,
    responses(
        (status = 202, description = "Restore job started", body = JobAccepted),
        (status = 400, description = "Invalid request", body = ProblemDetails),
        (status = 404, description = "Unknown backup, cluster or namespace", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn restore_set(
    State(state): State<Arc<RestoreAppState>>,
    Json(request): Json<ContinuousRestoreRequest>,
) -> Result<impl IntoResponse, Problem> {
    let id = state.continuous.submit(request, ContinuousScope::Set).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { id })))
}

#[utoipa::path(
    tag = "Restore",
    post,
    path = "/v1/restore/namespace",
    request_body = ContinuousRestoreRequest,
    responses(
        (status = 202, description = "Restore job started", body = JobAccepted),
        (status = 400, description = "Invalid request", body = ProblemDetails),
        (status = 404, description = "Unknown backup, cluster or namespace", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn restore_namespace(
    State(state): State<Arc<RestoreAppState>>,
    Json(request): Json<ContinuousRestoreRequest>,
) -> Result<impl IntoResponse, Problem> {
    let id = state
        .continuous
        .submit(request, ContinuousScope::Namespace)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { id })))
}

#[utoipa::path(
    tag = "Restore",
    post,
    path = "/v1/restore/records",
    request_body = ContinuousRestoreRequest,
    responses(
        (status = 200, description = "Records restored", body = RecordsRestored),
        (status = 400, description = "Invalid request", body = ProblemDetails),
        (status = 404, description = "Unknown backup, cluster or namespace", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn restore_records(
    State(state): State<Arc<RestoreAppState>>,
    Json(request): Json<ContinuousRestoreRequest>,
) -> Result<impl IntoResponse, Problem> {
    let success = state.continuous.restore_records(request).await?;
    Ok(Json(RecordsRestored { success }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use keeper_backup::BackupType;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::continuous::tests as continuous;
    use crate::service::tests as snapshot;

    fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn app() -> (snapshot::Fixture, continuous::Fixture, Router) {
        let s = snapshot::fixture().await;
        let c = continuous::fixture().await;
        let app = configure_routes().with_state(Arc::new(RestoreAppState {
            service: s.service.clone(),
            continuous: c.restorer.clone(),
        }));
        (s, c, app)
    }

    #[tokio::test]
    async fn test_restore_full_validation_errors() {
        let (s, _c, app) = app().await;
        let storage = serde_json::to_value(s.storage()).unwrap();

        let cases = vec![
            (
                json!({"source": storage, "destination-name": "target"}),
                "\"backup-data-path\" required",
            ),
            (
                json!({"backup-data-path": "daily/backup", "source": storage}),
                "must specify either \"destination\" or \"destination-name\"",
            ),
            (
                json!({
                    "backup-data-path": "daily/backup",
                    "source": storage,
                    "destination-name": "target",
                    "policy": {"bandwidth": -1}
                }),
                "negative value validation error: \"bandwidth\" -1 invalid, should not be negative number",
            ),
        ];
        for (body, detail) in cases {
            let response = app
                .clone()
                .oneshot(request("POST", "/v1/restore/full", Some(body)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await["detail"], detail);
        }

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/v1/restore/timestamp",
                Some(json!({"routine": "daily", "time": -1, "destination-name": "target"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["detail"],
            "\"time\" -1 invalid, should not be negative number"
        );

        let response = app
            .oneshot(request(
                "POST",
                "/v1/restore/timestamp",
                Some(json!({"routine": "weekly", "time": 10, "destination-name": "target"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_restore_job_lifecycle_over_http() {
        let (s, _c, app) = app().await;
        let created = s.backup(BackupType::Full).await;
        let body = serde_json::to_value(s.request(&format!("daily/backup/{}", created))).unwrap();

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/restore/full", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id = body_json(response).await.as_i64().unwrap() as i32;
        s.service.join(id).await;

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/v1/restore/status/{}", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["status"], "Done");
        assert_eq!(status["inserted-records"], 3);

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/restore/jobs?status=done", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await.get(id.to_string()).is_some());

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/restore/jobs?status=wrong", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["detail"],
            "invalid query param status: invalid value validation error: 'wrong' is not a valid status."
        );

        let response = app
            .clone()
            .oneshot(request("POST", &format!("/v1/restore/cancel/{}", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .oneshot(request("GET", "/v1/restore/status/999", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_continuous_restore_endpoints() {
        let (_s, c, app) = app().await;
        let digest = keeper_cluster::Digest::of("users", "a").to_hex();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/v1/restore/records",
                Some(json!({
                    "srcClusterName": "src",
                    "trgClusterName": "dst",
                    "srcNS": "source",
                    "trgNS": "target",
                    "srcDigests": [digest]
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], 1);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/v1/restore/namespace",
                Some(json!({
                    "srcClusterName": "src",
                    "trgClusterName": "dst",
                    "srcNS": "source",
                    "trgNS": "target"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();
        c.jobs.join(&id).await;

        let response = app
            .oneshot(request(
                "POST",
                "/v1/restore/set",
                Some(json!({
                    "srcClusterName": "src",
                    "trgClusterName": "dst",
                    "srcNS": "source",
                    "trgNS": ""
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "\"trgNS\" must not be blank");
    }
}
