use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use keeper_core::problemdetails::{self, Problem, ProblemDetails};
use tracing::{error, info};
use utoipa::OpenApi;

use crate::error::ConfigError;
use crate::model::*;
use crate::store::ConfigStore;

impl From<ConfigError> for Problem {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::NotFound { .. } => problemdetails::new(StatusCode::NOT_FOUND)
                .with_title("Not Found")
                .with_detail(error.to_string()),
            ConfigError::Validation(e) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Validation Error")
                .with_detail(e.to_string()),
            ConfigError::DuplicateKey(_) => problemdetails::new(StatusCode::CONFLICT)
                .with_title("Conflict")
                .with_detail(error.to_string()),
            ConfigError::File(msg) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Configuration File Error")
                .with_detail(msg),
            ConfigError::Database(e) => {
                error!("Configuration store database error: {}", e);
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Database Error")
                    .with_detail(e.to_string())
            }
            ConfigError::Serialization(e) => problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                .with_title("Internal Server Error")
                .with_detail(e.to_string()),
        }
    }
}

pub struct ConfigAppState {
    pub store: Arc<ConfigStore>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_config,
        update_config,
        apply_config,
        list_clusters,
        get_cluster,
        add_cluster,
        update_cluster,
        delete_cluster,
        list_storage,
        get_storage,
        add_storage,
        update_storage,
        delete_storage,
        list_policies,
        get_policy,
        add_policy,
        update_policy,
        delete_policy,
        list_routines,
        get_routine,
        add_routine,
        update_routine,
        delete_routine,
        enable_routine,
        disable_routine,
    ),
    components(schemas(
        Config,
        Cluster,
        SeedNode,
        Credentials,
        Storage,
        LocalStorage,
        S3Storage,
        BackupPolicy,
        RetryPolicy,
        EncryptionPolicy,
        CompressionPolicy,
        RetentionPolicy,
        BackupRoutine,
        ProblemDetails,
    )),
    tags((name = "Configuration", description = "Clusters, storage, policies and routines"))
)]
pub struct ConfigApiDoc;

pub fn configure_routes() -> Router<Arc<ConfigAppState>> {
    Router::new()
        .route("/v1/config", get(get_config).put(update_config))
        .route("/v1/config/apply", post(apply_config))
        .route("/v1/config/clusters", get(list_clusters))
        .route(
            "/v1/config/clusters/{name}",
            get(get_cluster)
                .post(add_cluster)
                .put(update_cluster)
                .delete(delete_cluster),
        )
        .route("/v1/config/storage", get(list_storage))
        .route(
            "/v1/config/storage/{name}",
            get(get_storage)
                .post(add_storage)
                .put(update_storage)
                .delete(delete_storage),
        )
        .route("/v1/config/policies", get(list_policies))
        .route(
            "/v1/config/policies/{name}",
            get(get_policy)
                .post(add_policy)
                .put(update_policy)
                .delete(delete_policy),
        )
        .route("/v1/config/routines", get(list_routines))
        .route(
            "/v1/config/routines/{name}",
            get(get_routine)
                .post(add_routine)
                .put(update_routine)
                .delete(delete_routine),
        )
        .route("/v1/config/routines/{name}/enable", put(enable_routine))
        .route("/v1/config/routines/{name}/disable", put(disable_routine))
}

fn lookup<T: Clone>(
    map: &BTreeMap<String, T>,
    kind: &'static str,
    name: &str,
) -> Result<Json<T>, Problem> {
    map.get(name)
        .cloned()
        .map(Json)
        .ok_or_else(|| ConfigError::not_found(kind, name).into())
}

#[utoipa::path(
    tag = "Configuration",
    get,
    path = "/v1/config",
    responses(
        (status = 200, description = "Current configuration", body = Config),
    ),
    security(("bearer_auth" = []))
)]
async fn get_config(State(state): State<Arc<ConfigAppState>>) -> impl IntoResponse {
    Json((*state.store.snapshot()).clone())
}

#[utoipa::path(
    tag = "Configuration",
    put,
    path = "/v1/config",
    request_body = Config,
    responses(
        (status = 200, description = "Configuration replaced"),
        (status = 400, description = "Invalid configuration", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn update_config(
    State(state): State<Arc<ConfigAppState>>,
    Json(config): Json<Config>,
) -> Result<impl IntoResponse, Problem> {
    state.store.replace(config).await?;
    info!("Configuration replaced through the API");
    Ok(StatusCode::OK)
}

#[utoipa::path(
    tag = "Configuration",
    post,
    path = "/v1/config/apply",
    responses(
        (status = 200, description = "Configuration file applied"),
        (status = 400, description = "File missing or invalid", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn apply_config(State(state): State<Arc<ConfigAppState>>) -> Result<impl IntoResponse, Problem> {
    state.store.apply().await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    tag = "Configuration",
    get,
    path = "/v1/config/clusters",
    responses((status = 200, description = "Clusters by name", body = BTreeMap<String, Cluster>)),
    security(("bearer_auth" = []))
)]
async fn list_clusters(State(state): State<Arc<ConfigAppState>>) -> impl IntoResponse {
    Json(state.store.snapshot().aerospike_clusters.clone())
}

#[utoipa::path(
    tag = "Configuration",
    get,
    path = "/v1/config/clusters/{name}",
    params(("name" = String, Path, description = "Cluster name")),
    responses(
        (status = 200, description = "Cluster", body = Cluster),
        (status = 404, description = "Unknown cluster", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn get_cluster(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<Json<Cluster>, Problem> {
    lookup(&state.store.snapshot().aerospike_clusters, "cluster", &name)
}

#[utoipa::path(
    tag = "Configuration",
    post,
    path = "/v1/config/clusters/{name}",
    params(("name" = String, Path, description = "Cluster name")),
    request_body = Cluster,
    responses(
        (status = 201, description = "Cluster added"),
        (status = 400, description = "Invalid cluster", body = ProblemDetails),
        (status = 409, description = "Name already used", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn add_cluster(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
    Json(cluster): Json<Cluster>,
) -> Result<impl IntoResponse, Problem> {
    state.store.add_cluster(&name, cluster).await?;
    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    tag = "Configuration",
    put,
    path = "/v1/config/clusters/{name}",
    params(("name" = String, Path, description = "Cluster name")),
    request_body = Cluster,
    responses(
        (status = 200, description = "Cluster updated"),
        (status = 400, description = "Invalid cluster", body = ProblemDetails),
        (status = 404, description = "Unknown cluster", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn update_cluster(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
    Json(cluster): Json<Cluster>,
) -> Result<impl IntoResponse, Problem> {
    state.store.update_cluster(&name, cluster).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    tag = "Configuration",
    delete,
    path = "/v1/config/clusters/{name}",
    params(("name" = String, Path, description = "Cluster name")),
    responses(
        (status = 204, description = "Cluster removed"),
        (status = 400, description = "Cluster still referenced", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn delete_cluster(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state.store.delete_cluster(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    tag = "Configuration",
    get,
    path = "/v1/config/storage",
    responses((status = 200, description = "Storage by name", body = BTreeMap<String, Storage>)),
    security(("bearer_auth" = []))
)]
async fn list_storage(State(state): State<Arc<ConfigAppState>>) -> impl IntoResponse {
    Json(state.store.snapshot().storage.clone())
}

#[utoipa::path(
    tag = "Configuration",
    get,
    path = "/v1/config/storage/{name}",
    params(("name" = String, Path, description = "Storage name")),
    responses(
        (status = 200, description = "Storage", body = Storage),
        (status = 404, description = "Unknown storage", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn get_storage(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<Json<Storage>, Problem> {
    lookup(&state.store.snapshot().storage, "storage", &name)
}

#[utoipa::path(
    tag = "Configuration",
    post,
    path = "/v1/config/storage/{name}",
    params(("name" = String, Path, description = "Storage name")),
    request_body = Storage,
    responses(
        (status = 201, description = "Storage added"),
        (status = 400, description = "Invalid storage", body = ProblemDetails),
        (status = 409, description = "Name already used", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn add_storage(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
    Json(storage): Json<Storage>,
) -> Result<impl IntoResponse, Problem> {
    state.store.add_storage(&name, storage).await?;
    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    tag = "Configuration",
    put,
    path = "/v1/config/storage/{name}",
    params(("name" = String, Path, description = "Storage name")),
    request_body = Storage,
    responses(
        (status = 200, description = "Storage updated"),
        (status = 400, description = "Invalid storage", body = ProblemDetails),
        (status = 404, description = "Unknown storage", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn update_storage(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
    Json(storage): Json<Storage>,
) -> Result<impl IntoResponse, Problem> {
    state.store.update_storage(&name, storage).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    tag = "Configuration",
    delete,
    path = "/v1/config/storage/{name}",
    params(("name" = String, Path, description = "Storage name")),
    responses(
        (status = 204, description = "Storage removed"),
        (status = 400, description = "Storage still referenced", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn delete_storage(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state.store.delete_storage(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    tag = "Configuration",
    get,
    path = "/v1/config/policies",
    responses((status = 200, description = "Backup policies by name", body = BTreeMap<String, BackupPolicy>)),
    security(("bearer_auth" = []))
)]
async fn list_policies(State(state): State<Arc<ConfigAppState>>) -> impl IntoResponse {
    Json(state.store.snapshot().backup_policies.clone())
}

#[utoipa::path(
    tag = "Configuration",
    get,
    path = "/v1/config/policies/{name}",
    params(("name" = String, Path, description = "Policy name")),
    responses(
        (status = 200, description = "Backup policy", body = BackupPolicy),
        (status = 404, description = "Unknown policy", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn get_policy(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<Json<BackupPolicy>, Problem> {
    lookup(&state.store.snapshot().backup_policies, "policy", &name)
}

#[utoipa::path(
    tag = "Configuration",
    post,
    path = "/v1/config/policies/{name}",
    params(("name" = String, Path, description = "Policy name")),
    request_body = BackupPolicy,
    responses(
        (status = 201, description = "Policy added"),
        (status = 400, description = "Invalid policy", body = ProblemDetails),
        (status = 409, description = "Name already used", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn add_policy(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
    Json(policy): Json<BackupPolicy>,
) -> Result<impl IntoResponse, Problem> {
    state.store.add_policy(&name, policy).await?;
    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    tag = "Configuration",
    put,
    path = "/v1/config/policies/{name}",
    params(("name" = String, Path, description = "Policy name")),
    request_body = BackupPolicy,
    responses(
        (status = 200, description = "Policy updated"),
        (status = 400, description = "Invalid policy", body = ProblemDetails),
        (status = 404, description = "Unknown policy", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn update_policy(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
    Json(policy): Json<BackupPolicy>,
) -> Result<impl IntoResponse, Problem> {
    state.store.update_policy(&name, policy).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    tag = "Configuration",
    delete,
    path = "/v1/config/policies/{name}",
    params(("name" = String, Path, description = "Policy name")),
    responses(
        (status = 204, description = "Policy removed"),
        (status = 400, description = "Policy still referenced", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn delete_policy(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state.store.delete_policy(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    tag = "Configuration",
    get,
    path = "/v1/config/routines",
    responses((status = 200, description = "Backup routines by name", body = BTreeMap<String, BackupRoutine>)),
    security(("bearer_auth" = []))
)]
async fn list_routines(State(state): State<Arc<ConfigAppState>>) -> impl IntoResponse {
    Json(state.store.snapshot().backup_routines.clone())
}

#[utoipa::path(
    tag = "Configuration",
    get,
    path = "/v1/config/routines/{name}",
    params(("name" = String, Path, description = "Routine name")),
    responses(
        (status = 200, description = "Backup routine", body = BackupRoutine),
        (status = 404, description = "Unknown routine", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn get_routine(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<Json<BackupRoutine>, Problem> {
    lookup(&state.store.snapshot().backup_routines, "routine", &name)
}

#[utoipa::path(
    tag = "Configuration",
    post,
    path = "/v1/config/routines/{name}",
    params(("name" = String, Path, description = "Routine name")),
    request_body = BackupRoutine,
    responses(
        (status = 201, description = "Routine added"),
        (status = 400, description = "Invalid routine", body = ProblemDetails),
        (status = 409, description = "Name already used", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn add_routine(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
    Json(routine): Json<BackupRoutine>,
) -> Result<impl IntoResponse, Problem> {
    state.store.add_routine(&name, routine).await?;
    info!("Backup routine {} added", name);
    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    tag = "Configuration",
    put,
    path = "/v1/config/routines/{name}",
    params(("name" = String, Path, description = "Routine name")),
    request_body = BackupRoutine,
    responses(
        (status = 200, description = "Routine updated"),
        (status = 400, description = "Invalid routine", body = ProblemDetails),
        (status = 404, description = "Unknown routine", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn update_routine(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
    Json(routine): Json<BackupRoutine>,
) -> Result<impl IntoResponse, Problem> {
    state.store.update_routine(&name, routine).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    tag = "Configuration",
    delete,
    path = "/v1/config/routines/{name}",
    params(("name" = String, Path, description = "Routine name")),
    responses((status = 204, description = "Routine removed")),
    security(("bearer_auth" = []))
)]
async fn delete_routine(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state.store.delete_routine(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    tag = "Configuration",
    put,
    path = "/v1/config/routines/{name}/enable",
    params(("name" = String, Path, description = "Routine name")),
    responses(
        (status = 200, description = "Routine enabled"),
        (status = 404, description = "Unknown routine", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn enable_routine(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state.store.set_routine_enabled(&name, true).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    tag = "Configuration",
    put,
    path = "/v1/config/routines/{name}/disable",
    params(("name" = String, Path, description = "Routine name")),
    responses(
        (status = 200, description = "Routine disabled"),
        (status = 404, description = "Unknown routine", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn disable_routine(
    State(state): State<Arc<ConfigAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state.store.set_routine_enabled(&name, false).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use keeper_database::test_utils::TestDatabase;
    use tower::ServiceExt;

    async fn app() -> (TestDatabase, Router) {
        let test_db = TestDatabase::new().await.unwrap();
        let store = Arc::new(ConfigStore::load(test_db.connection(), None).await.unwrap());
        let app = configure_routes().with_state(Arc::new(ConfigAppState { store }));
        (test_db, app)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_routine_lifecycle_over_http() {
        let (_db, app) = app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/config/clusters/c",
                serde_json::json!({"seed-nodes": [{"host-name": "localhost", "port": 3000}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        for (uri, body) in [
            ("/v1/config/storage/s", serde_json::json!({"local-storage": {"path": "/tmp/s"}})),
            ("/v1/config/policies/p", serde_json::json!({"parallel": 8})),
            (
                "/v1/config/routines/r",
                serde_json::json!({
                    "backup-policy": "p",
                    "source-cluster": "c",
                    "storage": "s",
                    "interval-cron": "@daily",
                }),
            ),
        ] {
            let response = app.clone().oneshot(json_request("POST", uri, body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::CREATED, "{}", uri);
        }

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/v1/config/routines/r/disable", serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/v1/config/routines/r").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let routine = body_json(response).await;
        assert_eq!(routine["disabled"], true);
    }

    #[tokio::test]
    async fn test_routine_with_unknown_policy_is_rejected() {
        let (_db, app) = app().await;
        let response = app
            .oneshot(json_request(
                "POST",
                "/v1/config/routines/r",
                serde_json::json!({
                    "backup-policy": "missing",
                    "source-cluster": "c",
                    "storage": "s",
                    "interval-cron": "@daily",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let problem = body_json(response).await;
        assert_eq!(
            problem["detail"],
            "not found validation error: backup policy \"missing\""
        );
    }

    #[tokio::test]
    async fn test_unknown_routine_is_not_found() {
        let (_db, app) = app().await;
        let response = app
            .clone()
            .oneshot(Request::get("/v1/config/routines/X").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let problem = body_json(response).await;
        assert_eq!(problem["detail"], "routine \"X\" not found");

        let response = app
            .oneshot(Request::delete("/v1/config/routines/X").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_apply_without_file_is_bad_request() {
        let (_db, app) = app().await;
        let response = app
            .oneshot(Request::post("/v1/config/apply").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
