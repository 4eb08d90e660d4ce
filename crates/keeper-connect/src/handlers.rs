use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use keeper_cluster::{Role, SecondaryIndex, Udf, User};
use keeper_config::{ClusterConnection, ClusterRole, ContinuousBackup, ContinuousPolicy, SmdPolicy};
use keeper_core::problemdetails::{self, Problem, ProblemDetails};
use keeper_core::{validation, TimeBounds};
use serde::Deserialize;
use tracing::error;
use utoipa::{IntoParams, OpenApi};

use crate::error::ConnectError;
use crate::service::ConnectionService;
use crate::smd::{SmdConnection, SmdService, SmdSnapshot, SmdState};

impl From<ConnectError> for Problem {
    fn from(error: ConnectError) -> Self {
        match error {
            ConnectError::NotFound(_) => problemdetails::new(StatusCode::NOT_FOUND)
                .with_title("Connection Not Found")
                .with_detail(error.to_string()),
            ConnectError::Conflict(_) => problemdetails::new(StatusCode::CONFLICT)
                .with_title("Conflict")
                .with_detail(error.to_string()),
            ConnectError::Upstream(_) => keeper_core::bad_gateway()
                .detail(error.to_string())
                .build(),
            ConnectError::StaticConfiguration
            | ConnectError::InUse { .. }
            | ConnectError::Validation(_) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Bad Request")
                .with_detail(error.to_string()),
            ConnectError::Config(e) => Problem::from(e),
            ConnectError::Database(_) | ConnectError::Serialization(_) => {
                error!("Connection manager error: {}", error);
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Internal Server Error")
                    .with_detail(error.to_string())
            }
        }
    }
}

pub struct ConnectAppState {
    pub connections: Arc<ConnectionService>,
    pub smd: Arc<SmdService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        create_connection,
        update_connection,
        list_connections,
        get_connection,
        delete_connection,
        create_policy,
        update_policy,
        list_policies,
        get_policy,
        delete_policy,
        create_backup,
        update_backup,
        enable_backup,
        disable_backup,
        list_backups,
        get_backup,
        delete_backup,
        backup_sets,
        smd_latest,
        smd_history,
        smd_remove,
        smd_connections,
    ),
    components(schemas(
        ClusterConnection,
        ClusterRole,
        SmdPolicy,
        ContinuousPolicy,
        ContinuousBackup,
        SmdSnapshot,
        SmdState,
        SmdConnection,
        User,
        Role,
        Udf,
        SecondaryIndex,
        ProblemDetails,
    )),
    tags(
        (name = "Connections", description = "Shipping links to source clusters"),
        (name = "Continuous Backup", description = "Continuous policies and backups"),
        (name = "SMD", description = "Shipped system metadata"),
    )
)]
pub struct ConnectApiDoc;

pub fn configure_routes() -> Router<Arc<ConnectAppState>> {
    Router::new()
        .route("/v1/connect/create", post(create_connection))
        .route("/v1/connect/update", put(update_connection))
        .route("/v1/connect/all", get(list_connections))
        .route("/v1/connect/{name}", get(get_connection).delete(delete_connection))
        .route("/v1/policy/create", post(create_policy))
        .route("/v1/policy/update", put(update_policy))
        .route("/v1/policy/all", get(list_policies))
        .route("/v1/policy/{name}", get(get_policy).delete(delete_policy))
        .route("/v1/backup/create", post(create_backup))
        .route("/v1/backup/update/{name}", put(update_backup))
        .route("/v1/backup/enable/{name}", put(enable_backup))
        .route("/v1/backup/disable/{name}", put(disable_backup))
        .route("/v1/backup/all", get(list_backups))
        .route("/v1/backup/sets/{name}", get(backup_sets))
        .route("/v1/backup/{name}", get(get_backup).delete(delete_backup))
        .route("/v1/smd/latest", get(smd_latest))
        .route("/v1/smd/remove", post(smd_remove))
        .route("/v1/smd/connections", get(smd_connections))
        .route("/v1/smd/{kind}", get(smd_history))
}

async fn with_smd_status(
    smd: &SmdService,
    mut connection: ClusterConnection,
) -> Result<ClusterConnection, ConnectError> {
    connection.smd_last_executed = smd.last_executed(&connection.src_cluster_name).await?;
    Ok(connection)
}

#[utoipa::path(
    tag = "Connections",
    post,
    path = "/v1/connect/create",
    request_body = ClusterConnection,
    responses(
        (status = 201, description = "Connection created", body = ClusterConnection),
        (status = 400, description = "Invalid connection", body = ProblemDetails),
        (status = 409, description = "Connection already exists", body = ProblemDetails),
        (status = 502, description = "Source cluster unreachable", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn create_connection(
    State(state): State<Arc<ConnectAppState>>,
    Json(connection): Json<ClusterConnection>,
) -> Result<impl IntoResponse, Problem> {
    let created = state.connections.create_connection(connection).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    tag = "Connections",
    put,
    path = "/v1/connect/update",
    request_body = ClusterConnection,
    responses(
        (status = 200, description = "Connection updated", body = ClusterConnection),
        (status = 400, description = "Invalid connection or static topology", body = ProblemDetails),
        (status = 404, description = "Unknown connection", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn update_connection(
    State(state): State<Arc<ConnectAppState>>,
    Json(connection): Json<ClusterConnection>,
) -> Result<Json<ClusterConnection>, Problem> {
    Ok(Json(state.connections.update_connection(connection).await?))
}

#[utoipa::path(
    tag = "Connections",
    get,
    path = "/v1/connect/all",
    responses((status = 200, description = "All connections", body = Vec<ClusterConnection>)),
    security(("bearer_auth" = []))
)]
async fn list_connections(
    State(state): State<Arc<ConnectAppState>>,
) -> Result<Json<Vec<ClusterConnection>>, Problem> {
    let mut out = Vec::new();
    for connection in state.connections.list_connections() {
        out.push(with_smd_status(&state.smd, connection).await?);
    }
    Ok(Json(out))
}

#[utoipa::path(
    tag = "Connections",
    get,
    path = "/v1/connect/{name}",
    params(("name" = String, Path, description = "Source cluster name")),
    responses(
        (status = 200, description = "Connection", body = ClusterConnection),
        (status = 404, description = "Unknown connection", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn get_connection(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
) -> Result<Json<ClusterConnection>, Problem> {
    let connection = state.connections.get_connection(&name)?;
    Ok(Json(with_smd_status(&state.smd, connection).await?))
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
struct DeleteConnectionQuery {
    #[serde(default)]
    disable_connected_backups: bool,
}

#[utoipa::path(
    tag = "Connections",
    delete,
    path = "/v1/connect/{name}",
    params(
        ("name" = String, Path, description = "Source cluster name"),
        DeleteConnectionQuery,
    ),
    responses(
        (status = 204, description = "Connection removed"),
        (status = 400, description = "Connection in use or static topology", body = ProblemDetails),
        (status = 404, description = "Unknown connection", body = ProblemDetails),
        (status = 502, description = "Source cluster unreachable", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn delete_connection(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
    Query(query): Query<DeleteConnectionQuery>,
) -> Result<impl IntoResponse, Problem> {
    state
        .connections
        .delete_connection(&name, query.disable_connected_backups)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    tag = "Continuous Backup",
    post,
    path = "/v1/policy/create",
    request_body = ContinuousPolicy,
    responses(
        (status = 201, description = "Policy created", body = ContinuousPolicy),
        (status = 400, description = "Invalid policy", body = ProblemDetails),
        (status = 409, description = "Policy exists", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn create_policy(
    State(state): State<Arc<ConnectAppState>>,
    Json(policy): Json<ContinuousPolicy>,
) -> Result<impl IntoResponse, Problem> {
    let created = state.connections.create_policy(policy).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    tag = "Continuous Backup",
    put,
    path = "/v1/policy/update",
    request_body = ContinuousPolicy,
    responses(
        (status = 200, description = "Policy updated", body = ContinuousPolicy),
        (status = 404, description = "Unknown policy", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn update_policy(
    State(state): State<Arc<ConnectAppState>>,
    Json(policy): Json<ContinuousPolicy>,
) -> Result<Json<ContinuousPolicy>, Problem> {
    Ok(Json(state.connections.update_policy(policy).await?))
}

#[utoipa::path(
    tag = "Continuous Backup",
    get,
    path = "/v1/policy/all",
    responses((status = 200, description = "All continuous policies", body = Vec<ContinuousPolicy>)),
    security(("bearer_auth" = []))
)]
async fn list_policies(State(state): State<Arc<ConnectAppState>>) -> Json<Vec<ContinuousPolicy>> {
    Json(state.connections.list_policies())
}

#[utoipa::path(
    tag = "Continuous Backup",
    get,
    path = "/v1/policy/{name}",
    params(("name" = String, Path, description = "Policy name")),
    responses(
        (status = 200, description = "Policy", body = ContinuousPolicy),
        (status = 404, description = "Unknown policy", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn get_policy(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
) -> Result<Json<ContinuousPolicy>, Problem> {
    Ok(Json(state.connections.get_policy(&name)?))
}

#[utoipa::path(
    tag = "Continuous Backup",
    delete,
    path = "/v1/policy/{name}",
    params(("name" = String, Path, description = "Policy name")),
    responses(
        (status = 200, description = "Policy removed or already absent"),
        (status = 400, description = "Policy still referenced", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn delete_policy(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state.connections.delete_policy(&name).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    tag = "Continuous Backup",
    post,
    path = "/v1/backup/create",
    request_body = ContinuousBackup,
    responses(
        (status = 201, description = "Backup created", body = ContinuousBackup),
        (status = 400, description = "Invalid backup", body = ProblemDetails),
        (status = 409, description = "Backup exists", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn create_backup(
    State(state): State<Arc<ConnectAppState>>,
    Json(backup): Json<ContinuousBackup>,
) -> Result<impl IntoResponse, Problem> {
    let created = state.connections.create_backup(backup).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    tag = "Continuous Backup",
    put,
    path = "/v1/backup/update/{name}",
    params(("name" = String, Path, description = "Backup name")),
    request_body = ContinuousBackup,
    responses(
        (status = 200, description = "Backup updated", body = ContinuousBackup),
        (status = 404, description = "Unknown backup", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn update_backup(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
    Json(backup): Json<ContinuousBackup>,
) -> Result<Json<ContinuousBackup>, Problem> {
    Ok(Json(state.connections.update_backup(&name, backup).await?))
}

#[utoipa::path(
    tag = "Continuous Backup",
    put,
    path = "/v1/backup/enable/{name}",
    params(("name" = String, Path, description = "Backup name")),
    responses(
        (status = 200, description = "Backup enabled", body = ContinuousBackup),
        (status = 404, description = "Unknown backup", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn enable_backup(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
) -> Result<Json<ContinuousBackup>, Problem> {
    Ok(Json(state.connections.set_backup_enabled(&name, true).await?))
}

#[utoipa::path(
    tag = "Continuous Backup",
    put,
    path = "/v1/backup/disable/{name}",
    params(("name" = String, Path, description = "Backup name")),
    responses(
        (status = 200, description = "Backup disabled", body = ContinuousBackup),
        (status = 404, description = "Unknown backup", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn disable_backup(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
) -> Result<Json<ContinuousBackup>, Problem> {
    Ok(Json(state.connections.set_backup_enabled(&name, false).await?))
}

#[utoipa::path(
    tag = "Continuous Backup",
    get,
    path = "/v1/backup/all",
    responses((status = 200, description = "All continuous backups", body = Vec<ContinuousBackup>)),
    security(("bearer_auth" = []))
)]
async fn list_backups(State(state): State<Arc<ConnectAppState>>) -> Json<Vec<ContinuousBackup>> {
    Json(state.connections.list_backups())
}

#[utoipa::path(
    tag = "Continuous Backup",
    get,
    path = "/v1/backup/{name}",
    params(("name" = String, Path, description = "Backup name")),
    responses(
        (status = 200, description = "Backup", body = ContinuousBackup),
        (status = 404, description = "Unknown backup", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn get_backup(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
) -> Result<Json<ContinuousBackup>, Problem> {
    Ok(Json(state.connections.get_backup(&name)?))
}

#[utoipa::path(
    tag = "Continuous Backup",
    delete,
    path = "/v1/backup/{name}",
    params(("name" = String, Path, description = "Backup name")),
    responses((status = 200, description = "Backup removed or already absent")),
    security(("bearer_auth" = []))
)]
async fn delete_backup(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    state.connections.delete_backup(&name).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    tag = "Continuous Backup",
    get,
    path = "/v1/backup/sets/{name}",
    params(("name" = String, Path, description = "Backup name")),
    responses(
        (status = 200, description = "Sets with committed versions", body = Vec<String>),
        (status = 404, description = "Unknown backup", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn backup_sets(
    State(state): State<Arc<ConnectAppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<String>>, Problem> {
    Ok(Json(state.connections.backup_sets(&name).await?))
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
struct SmdQuery {
    src_cluster_name: Option<String>,
    from_time: Option<i64>,
    to_time: Option<i64>,
}

impl SmdQuery {
    fn cluster(&self) -> Result<&str, ConnectError> {
        validation::required("srcClusterName", self.src_cluster_name.as_deref())?;
        Ok(self.src_cluster_name.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
struct SmdRemoveQuery {
    src_cluster_name: Option<String>,
    older_than: Option<i64>,
}

#[utoipa::path(
    tag = "SMD",
    get,
    path = "/v1/smd/latest",
    params(SmdQuery),
    responses(
        (status = 200, description = "Newest snapshot of every kind", body = SmdState),
        (status = 400, description = "Invalid query", body = ProblemDetails),
        (status = 404, description = "Unknown connection", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn smd_latest(
    State(state): State<Arc<ConnectAppState>>,
    Query(query): Query<SmdQuery>,
) -> Result<Json<SmdState>, Problem> {
    let name = query.cluster()?;
    let bounds = TimeBounds::new(query.from_time, query.to_time).map_err(ConnectError::from)?;
    Ok(Json(state.smd.latest(name, bounds).await?))
}

#[utoipa::path(
    tag = "SMD",
    get,
    path = "/v1/smd/{kind}",
    params(
        ("kind" = String, Path, description = "users, roles, udf or sindex"),
        SmdQuery,
    ),
    responses(
        (status = 200, description = "Snapshots, newest first", body = Vec<SmdSnapshot>),
        (status = 400, description = "Invalid query", body = ProblemDetails),
        (status = 404, description = "Unknown kind or connection", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn smd_history(
    State(state): State<Arc<ConnectAppState>>,
    Path(kind): Path<String>,
    Query(query): Query<SmdQuery>,
) -> Result<Json<Vec<SmdSnapshot>>, Problem> {
    let kind = match kind.as_str() {
        "users" => "users",
        "roles" => "roles",
        "udf" => "udfs",
        "sindex" => "sindexes",
        _ => {
            return Err(problemdetails::new(StatusCode::NOT_FOUND)
                .with_title("Not Found")
                .with_detail(format!("unknown metadata kind \"{}\"", kind)))
        }
    };
    let name = query.cluster()?;
    Ok(Json(state.smd.history(name, kind).await?))
}

#[utoipa::path(
    tag = "SMD",
    post,
    path = "/v1/smd/remove",
    params(SmdRemoveQuery),
    responses(
        (status = 200, description = "Number of snapshots removed", body = u64),
        (status = 400, description = "Invalid query", body = ProblemDetails),
        (status = 404, description = "Unknown connection", body = ProblemDetails),
    ),
    security(("bearer_auth" = []))
)]
async fn smd_remove(
    State(state): State<Arc<ConnectAppState>>,
    Query(query): Query<SmdRemoveQuery>,
) -> Result<Json<u64>, Problem> {
    validation::required("srcClusterName", query.src_cluster_name.as_deref()).map_err(ConnectError::from)?;
    let name = query.src_cluster_name.unwrap_or_default();
    validation::non_negative("olderThan", query.older_than).map_err(ConnectError::from)?;
    state.smd.connection(&name)?;
    let older_than = query.older_than.unwrap_or_else(keeper_core::now_millis);
    Ok(Json(state.smd.purge(&name, older_than).await?))
}

#[utoipa::path(
    tag = "SMD",
    get,
    path = "/v1/smd/connections",
    responses((status = 200, description = "SMD shipping state per connection", body = Vec<SmdConnection>)),
    security(("bearer_auth" = []))
)]
async fn smd_connections(
    State(state): State<Arc<ConnectAppState>>,
) -> Result<Json<Vec<SmdConnection>>, Problem> {
    Ok(Json(state.smd.connections().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{connection, fixture};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use keeper_metrics::KeeperMetrics;
    use tower::ServiceExt;

    async fn app(static_xdr: bool) -> (crate::service::tests::Fixture, Router) {
        let f = fixture(static_xdr).await;
        let connections = Arc::new(ConnectionService::new(
            f.store.clone(),
            f.connector.clone(),
            f.db.connection(),
            static_xdr,
        ));
        let smd = Arc::new(SmdService::new(
            f.store.clone(),
            f.connector.clone(),
            f.db.connection(),
            Arc::new(KeeperMetrics::new().unwrap()),
        ));
        let app = configure_routes().with_state(Arc::new(ConnectAppState { connections, smd }));
        (f, app)
    }

    fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn connection_json(host: &str) -> serde_json::Value {
        serde_json::to_value(connection(host)).unwrap()
    }

    #[tokio::test]
    async fn test_connection_create_conflict_and_bad_gateway() {
        let (_f, app) = app(false).await;

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/connect/create", Some(connection_json("src"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/connect/create", Some(connection_json("src"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let mut other = connection_json("nowhere");
        other["srcClusterName"] = "other".into();
        let response = app
            .clone()
            .oneshot(request("POST", "/v1/connect/create", Some(other)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = app
            .oneshot(request("GET", "/v1/connect/all", None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_static_topology_rejects_delete() {
        let (_f, app) = app(true).await;
        app.clone()
            .oneshot(request("POST", "/v1/connect/create", Some(connection_json("src"))))
            .await
            .unwrap();

        let response = app
            .oneshot(request("DELETE", "/v1/connect/src?disableConnectedBackups=true", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .contains("ClusterConnection cannot be deleted"));
    }

    #[tokio::test]
    async fn test_continuous_backup_routes() {
        let (_f, app) = app(false).await;
        app.clone()
            .oneshot(request("POST", "/v1/connect/create", Some(connection_json("src"))))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/v1/policy/create",
                Some(serde_json::json!({"name": "p", "duration": 60})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let backup = serde_json::json!({
            "name": "b1",
            "srcClusterName": "src",
            "srcNS": "source",
            "backupNS": "backup",
            "policy": "p",
        });
        let response = app
            .clone()
            .oneshot(request("POST", "/v1/backup/create", Some(backup.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = app
            .clone()
            .oneshot(request("POST", "/v1/backup/create", Some(backup)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(request("PUT", "/v1/backup/disable/b1", None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["enabled"], false);

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/backup/sets/b1", None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!([]));

        let response = app
            .clone()
            .oneshot(request("DELETE", "/v1/policy/unknown", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/v1/backup/missing", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_smd_queries_validate_parameters() {
        let (_f, app) = app(false).await;
        app.clone()
            .oneshot(request("POST", "/v1/connect/create", Some(connection_json("src"))))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/smd/latest", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "\"srcClusterName\" required");

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/smd/latest?srcClusterName=src&fromTime=5&toTime=1", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/smd/users?srcClusterName=unknown", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/smd/udf?srcClusterName=src", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("POST", "/v1/smd/remove?srcClusterName=src", None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!(0));
    }
}
