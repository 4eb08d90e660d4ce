use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use keeper_core::problemdetails::{self, Problem, ProblemDetails};
use utoipa::OpenApi;

use crate::error::JobError;
use crate::manager::JobManager;
use crate::model::{JobInfo, JobStatus};

impl From<JobError> for Problem {
    fn from(error: JobError) -> Self {
        match error {
            JobError::NotFound(_) => problemdetails::new(StatusCode::NOT_FOUND)
                .with_title("Job Not Found")
                .with_detail(error.to_string()),
            JobError::UnknownKind(_) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Invalid Job")
                .with_detail(error.to_string()),
            JobError::InvalidState { .. } => problemdetails::new(StatusCode::CONFLICT)
                .with_title("Invalid Job State")
                .with_detail(error.to_string()),
            _ => problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                .with_title("Internal Server Error")
                .with_detail(error.to_string()),
        }
    }
}

pub struct JobsAppState {
    pub manager: Arc<JobManager>,
}

#[derive(OpenApi)]
#[openapi(
    paths(get_job, resume_job, cancel_job),
    components(schemas(JobInfo, JobStatus, ProblemDetails)),
    tags((name = "Jobs", description = "Background job status and control"))
)]
pub struct JobsApiDoc;

pub fn configure_routes() -> Router<Arc<JobsAppState>> {
    Router::new()
        .route("/v1/job/{id}", get(get_job))
        .route("/v1/job/resume/{id}", post(resume_job))
        .route("/v1/job/cancel/{id}", post(cancel_job))
}

#[utoipa::path(
    tag = "Jobs",
    get,
    path = "/v1/job/{id}",
    params(("id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job state", body = JobInfo),
        (status = 404, description = "Unknown job", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn get_job(
    State(state): State<Arc<JobsAppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, Problem> {
    Ok(Json(state.manager.get(&id).await?))
}

#[utoipa::path(
    tag = "Jobs",
    post,
    path = "/v1/job/resume/{id}",
    params(("id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job resumed", body = JobInfo),
        (status = 404, description = "Unknown job", body = ProblemDetails),
        (status = 409, description = "Job finished or cancelled", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn resume_job(
    State(state): State<Arc<JobsAppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, Problem> {
    Ok(Json(state.manager.resume(&id).await?))
}

#[utoipa::path(
    tag = "Jobs",
    post,
    path = "/v1/job/cancel/{id}",
    params(("id" = String, Path, description = "Job id")),
    responses(
        (status = 202, description = "Cancellation accepted", body = JobInfo),
        (status = 404, description = "Unknown job", body = ProblemDetails),
        (status = 409, description = "Job already finished", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn cancel_job(
    State(state): State<Arc<JobsAppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let info = state.manager.cancel(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(info)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use keeper_database::test_utils::TestDatabase;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let test_db = TestDatabase::new().await.unwrap();
        let manager = Arc::new(JobManager::new(test_db.connection()));
        let app = configure_routes().with_state(Arc::new(JobsAppState { manager }));

        for request in [
            Request::get("/v1/job/abc").body(Body::empty()).unwrap(),
            Request::post("/v1/job/resume/abc").body(Body::empty()).unwrap(),
            Request::post("/v1/job/cancel/abc").body(Body::empty()).unwrap(),
        ] {
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }
}
