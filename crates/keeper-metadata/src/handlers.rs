use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use keeper_core::problemdetails::{self, Problem, ProblemDetails};
use keeper_core::{validation, TimeBounds, ValidationError};
use keeper_jobs::JobManager;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{OpenApi, ToSchema};

use crate::delete::{DeleteBackupDataRequest, DELETE_BACKUP_DATA_JOB};
use crate::error::MetadataError;
use crate::index::MetadataIndex;

impl From<MetadataError> for Problem {
    fn from(error: MetadataError) -> Self {
        match error {
            MetadataError::Validation(e) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Validation Error")
                .with_detail(e.to_string()),
            MetadataError::Job(e) => Problem::from(e),
            _ => {
                error!("Metadata index error: {}", error);
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Internal Server Error")
                    .with_detail(error.to_string())
            }
        }
    }
}

pub struct MetadataAppState {
    pub index: Arc<MetadataIndex>,
    pub jobs: Arc<JobManager>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobAccepted {
    pub id: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(read_backup_timestamps, delete_backup_data),
    components(schemas(DeleteBackupDataRequest, JobAccepted, ProblemDetails)),
    tags((name = "Metadata", description = "Continuous backup version index"))
)]
pub struct MetadataApiDoc;

pub fn configure_routes() -> Router<Arc<MetadataAppState>> {
    Router::new()
        .route("/v1/metadata/backup", get(read_backup_timestamps))
        .route("/v1/metadata/delete", post(delete_backup_data))
}

/// Query of the timestamp lookup. `srcDigest` repeats once per key.
#[derive(Debug, Default)]
struct TimestampQuery {
    continuous_backup: Option<String>,
    from: Option<i64>,
    to: Option<i64>,
    digests: Vec<String>,
}

impl TimestampQuery {
    fn parse(raw: Option<&str>) -> Result<Self, ValidationError> {
        let mut query = TimestampQuery::default();
        for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "continuousBackup" => query.continuous_backup = Some(value.into_owned()),
                "from" => query.from = Some(parse_millis("from", &value)?),
                "to" => query.to = Some(parse_millis("to", &value)?),
                "srcDigest" => query.digests.extend(
                    value
                        .split(',')
                        .filter(|d| !d.is_empty())
                        .map(str::to_string),
                ),
                _ => {}
            }
        }
        Ok(query)
    }
}

fn parse_millis(field: &str, value: &str) -> Result<i64, ValidationError> {
    value
        .parse()
        .map_err(|_| ValidationError::new(format!("invalid query param {}: {}", field, value)))
}

#[utoipa::path(
    tag = "Metadata",
    get,
    path = "/v1/metadata/backup",
    params(
        ("continuousBackup" = String, Query, description = "Continuous backup name"),
        ("from" = Option<i64>, Query, description = "Lower bound, epoch millis"),
        ("to" = Option<i64>, Query, description = "Upper bound, epoch millis"),
        ("srcDigest" = Vec<String>, Query, description = "Record digests, hex"),
    ),
    responses(
        (status = 200, description = "Committed timestamps per digest", body = BTreeMap<String, Vec<i64>>),
        (status = 400, description = "Invalid query", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn read_backup_timestamps(
    State(state): State<Arc<MetadataAppState>>,
    RawQuery(raw): RawQuery,
) -> Result<Json<BTreeMap<String, Vec<i64>>>, Problem> {
    let query = TimestampQuery::parse(raw.as_deref()).map_err(MetadataError::from)?;
    let backup = query.continuous_backup.unwrap_or_default();
    validation::required("continuousBackup", Some(&backup)).map_err(MetadataError::from)?;
    let bounds = TimeBounds::new(query.from, query.to).map_err(MetadataError::from)?;
    Ok(Json(
        state
            .index
            .timestamps_for_keys(&backup, bounds, &query.digests)
            .await?,
    ))
}

#[utoipa::path(
    tag = "Metadata",
    post,
    path = "/v1/metadata/delete",
    request_body = DeleteBackupDataRequest,
    responses(
        (status = 202, description = "Deletion job started", body = JobAccepted),
        (status = 400, description = "Invalid request", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn delete_backup_data(
    State(state): State<Arc<MetadataAppState>>,
    Json(request): Json<DeleteBackupDataRequest>,
) -> Result<impl IntoResponse, Problem> {
    request.validate().map_err(MetadataError::from)?;
    let params = serde_json::to_value(&request).map_err(MetadataError::from)?;
    let id = state
        .jobs
        .submit(DELETE_BACKUP_DATA_JOB, params)
        .await
        .map_err(MetadataError::from)?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delete::DeleteBackupDataExecutor;
    use crate::index::tests::{fixture, hex};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_timestamp_lookup_over_http() {
        let f = fixture().await;
        let jobs = Arc::new(JobManager::new(f.db.connection()));
        let app = configure_routes().with_state(Arc::new(MetadataAppState {
            index: f.index.clone(),
            jobs,
        }));

        let uri = format!(
            "/v1/metadata/backup?continuousBackup=b1&from=0&to=25&srcDigest={}&srcDigest={}",
            hex("a"),
            hex("b")
        );
        let response = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[hex("a")], serde_json::json!([10, 20]));
        assert_eq!(body[hex("b")], serde_json::json!([15]));

        let response = app
            .clone()
            .oneshot(get("/v1/metadata/backup?continuousBackup=b1&from=10&to=5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["detail"],
            "fromTime should be less than toTime"
        );

        let response = app
            .oneshot(get("/v1/metadata/backup?continuousBackup=b1&from=-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_returns_job_handle() {
        let f = fixture().await;
        let jobs = Arc::new(JobManager::new(f.db.connection()));
        jobs.register_executor(Arc::new(DeleteBackupDataExecutor::new(
            f.db.connection(),
            f.index.clone(),
        )));
        let app = configure_routes().with_state(Arc::new(MetadataAppState {
            index: f.index.clone(),
            jobs: jobs.clone(),
        }));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/metadata/delete")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "continuousBackupName": "b1",
                            "set": "users",
                            "fromTime": 0,
                            "toTime": 100,
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();
        jobs.join(&id).await;
        assert_eq!(jobs.get(&id).await.unwrap().processed, 4);
    }
}
