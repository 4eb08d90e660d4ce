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
use keeper_core::{TimeBounds, ValidationError};
use serde::Deserialize;
use tracing::error;
use utoipa::{IntoParams, OpenApi};

use crate::error::BackupError;
use crate::model::{BackupDetails, BackupType, CurrentBackups, RunProgress};
use crate::scheduler::BackupScheduler;

impl From<BackupError> for Problem {
    fn from(error: BackupError) -> Self {
        match error {
            BackupError::RoutineNotFound(_) => problemdetails::new(StatusCode::NOT_FOUND)
                .with_title("Routine Not Found")
                .with_detail(error.to_string()),
            BackupError::Validation(_) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Bad Request")
                .with_detail(error.to_string()),
            BackupError::Config(e) => Problem::from(e),
            _ => {
                error!("Backup error: {}", error);
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Internal Server Error")
                    .with_detail(error.to_string())
            }
        }
    }
}

pub struct BackupAppState {
    pub scheduler: Arc<BackupScheduler>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        schedule_full_backup,
        get_current_backup,
        cancel_current_backup,
        list_full_backups,
        list_full_backups_for_routine,
        list_incremental_backups,
        list_incremental_backups_for_routine,
    ),
    components(schemas(BackupDetails, BackupType, CurrentBackups, RunProgress, ProblemDetails)),
    tags((name = "Backup", description = "Backup routines and completed backups"))
)]
pub struct BackupApiDoc;

pub fn configure_routes() -> Router<Arc<BackupAppState>> {
    Router::new()
        .route("/v1/backups/schedule/{name}", post(schedule_full_backup))
        .route("/v1/backups/currentBackup/{name}", get(get_current_backup))
        .route("/v1/backups/cancel/{name}", post(cancel_current_backup))
        .route("/v1/backups/full", get(list_full_backups))
        .route("/v1/backups/full/{name}", get(list_full_backups_for_routine))
        .route("/v1/backups/incremental", get(list_incremental_backups))
        .route(
            "/v1/backups/incremental/{name}",
            get(list_incremental_backups_for_routine),
        )
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ScheduleQuery {
    /// Milliseconds to wait before the backup starts
    pub delay: Option<String>,
}

impl ScheduleQuery {
    fn delay_ms(&self) -> Result<u64, ValidationError> {
        match self.delay.as_deref() {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|delay| *delay > 0)
                .ok_or_else(|| {
                    ValidationError::new("invalid query param delay: should be a positive integer")
                }),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TimeQuery {
    /// Lower bound, epoch millis, inclusive
    pub from: Option<i64>,
    /// Upper bound, epoch millis, inclusive
    pub to: Option<i64>,
}

impl TimeQuery {
    fn bounds(&self) -> Result<TimeBounds, BackupError> {
        TimeBounds::new(self.from, self.to)
            .map_err(|e| BackupError::Validation(e.context("invalid query param time bounds")))
    }
}

#[utoipa::path(
    tag = "Backup",
    post,
    path = "/v1/backups/schedule/{name}",
    params(("name" = String, Path, description = "Routine name"), ScheduleQuery),
    responses(
        (status = 202, description = "Full backup scheduled"),
        (status = 400, description = "Invalid delay", body = ProblemDetails),
        (status = 404, description = "Unknown routine", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn schedule_full_backup(
    State(state): State<Arc<BackupAppState>>,
    Path(name): Path<String>,
    Query(query): Query<ScheduleQuery>,
) -> Result<impl IntoResponse, Problem> {
    let delay = query.delay_ms().map_err(BackupError::from)?;
    state.scheduler.schedule_full(&name, delay)?;
    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    tag = "Backup",
    get,
    path = "/v1/backups/currentBackup/{name}",
    params(("name" = String, Path, description = "Routine name")),
    responses(
        (status = 200, description = "Last and in-flight backups", body = CurrentBackups),
        (status = 404, description = "Unknown routine", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn get_current_backup(
    State(state): State<Arc<BackupAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(state.scheduler.current(&name).await?))
}

#[utoipa::path(
    tag = "Backup",
    post,
    path = "/v1/backups/cancel/{name}",
    params(("name" = String, Path, description = "Routine name")),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "Unknown routine", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn cancel_current_backup(
    State(state): State<Arc<BackupAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state.scheduler.cancel(&name)?;
    Ok(StatusCode::ACCEPTED)
}

async fn grouped_by_routine(
    state: &BackupAppState,
    backup_type: BackupType,
    query: &TimeQuery,
) -> Result<BTreeMap<String, Vec<BackupDetails>>, BackupError> {
    let bounds = query.bounds()?;
    let runs = state
        .scheduler
        .runner()
        .list_runs(None, backup_type, &bounds)
        .await?;
    let mut grouped: BTreeMap<String, Vec<BackupDetails>> = BTreeMap::new();
    for run in runs {
        grouped
            .entry(run.routine.clone())
            .or_default()
            .push(BackupDetails::from(run));
    }
    Ok(grouped)
}

async fn for_routine(
    state: &BackupAppState,
    name: &str,
    backup_type: BackupType,
    query: &TimeQuery,
) -> Result<Vec<BackupDetails>, BackupError> {
    let bounds = query.bounds()?;
    let scheduler = &state.scheduler;
    if !scheduler.runner().store().snapshot().backup_routines.contains_key(name) {
        return Err(BackupError::RoutineNotFound(name.to_string()));
    }
    let runs = scheduler
        .runner()
        .list_runs(Some(name), backup_type, &bounds)
        .await?;
    Ok(runs.into_iter().map(BackupDetails::from).collect())
}

#[utoipa::path(
    tag = "Backup",
    get,
    path = "/v1/backups/full",
    params(TimeQuery),
    responses(
        (status = 200, description = "Full backups by routine", body = BTreeMap<String, Vec<BackupDetails>>),
        (status = 400, description = "Invalid time bounds", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn list_full_backups(
    State(state): State<Arc<BackupAppState>>,
    Query(query): Query<TimeQuery>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(grouped_by_routine(&state, BackupType::Full, &query).await?))
}

#[utoipa::path(
    tag = "Backup",
    get,
    path = "/v1/backups/full/{name}",
    params(("name" = String, Path, description = "Routine name"), TimeQuery),
    responses(
        (status = 200, description = "Full backups of the routine", body = Vec<BackupDetails>),
        (status = 400, description = "Invalid time bounds", body = ProblemDetails),
        (status = 404, description = "Unknown routine", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn list_full_backups_for_routine(
    State(state): State<Arc<BackupAppState>>,
    Path(name): Path<String>,
    Query(query): Query<TimeQuery>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(for_routine(&state, &name, BackupType::Full, &query).await?))
}

#[utoipa::path(
    tag = "Backup",
    get,
    path = "/v1/backups/incremental",
    params(TimeQuery),
    responses(
        (status = 200, description = "Incremental backups by routine", body = BTreeMap<String, Vec<BackupDetails>>),
        (status = 400, description = "Invalid time bounds", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn list_incremental_backups(
    State(state): State<Arc<BackupAppState>>,
    Query(query): Query<TimeQuery>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(
        grouped_by_routine(&state, BackupType::Incremental, &query).await?,
    ))
}

#[utoipa::path(
    tag = "Backup",
    get,
    path = "/v1/backups/incremental/{name}",
    params(("name" = String, Path, description = "Routine name"), TimeQuery),
    responses(
        (status = 200, description = "Incremental backups of the routine", body = Vec<BackupDetails>),
        (status = 400, description = "Invalid time bounds", body = ProblemDetails),
        (status = 404, description = "Unknown routine", body = ProblemDetails)
    ),
    security(("bearer_auth" = []))
)]
async fn list_incremental_backups_for_routine(
    State(state): State<Arc<BackupAppState>>,
    Path(name): Path<String>,
    Query(query): Query<TimeQuery>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(
        for_routine(&state, &name, BackupType::Incremental, &query).await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunState;
    use crate::runner::tests::{fixture, Fixture};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use keeper_metrics::KeeperMetrics;
    use tower::ServiceExt;

    async fn app() -> (Fixture, Router) {
        let f = fixture().await;
        let scheduler = Arc::new(BackupScheduler::new(
            f.store.clone(),
            f.runner.clone(),
            Arc::new(KeeperMetrics::new().unwrap()),
            2,
        ));
        let app = configure_routes().with_state(Arc::new(BackupAppState { scheduler }));
        (f, app)
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_schedule_validates_delay_and_routine() {
        let (_f, app) = app().await;

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/backups/schedule/daily?delay=0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(
            body["detail"],
            "invalid query param delay: should be a positive integer"
        );

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/backups/schedule/nope?delay=10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["detail"], "routine \"nope\" not found");

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/backups/schedule/daily?delay=60000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_list_backups_and_bounds() {
        let (f, app) = app().await;
        f.runner
            .run("daily", BackupType::Full, &RunState::new("daily", BackupType::Full))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/backups/full"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let daily = body["daily"].as_array().unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0]["record-count"], 5);
        assert_eq!(daily[0]["type"], "full");

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/backups/incremental/daily"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!([]));

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/backups/full/daily?from=-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["detail"],
            "invalid query param time bounds: negative value validation error: \"from\" -1 invalid, should not be negative number"
        );

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/backups/full?from=10&to=5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/backups/full/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_current_backup_and_cancel() {
        let (_f, app) = app().await;
        let response = app
            .clone()
            .oneshot(request("GET", "/v1/backups/currentBackup/daily"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["last-full"].is_null());
        assert!(body.get("full").is_none());

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/backups/cancel/daily"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(request("GET", "/v1/backups/currentBackup/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
