use std::sync::Arc;

use axum::{middleware, Router};
use keeper_backup::BackupPlugin;
use keeper_cluster::ClusterConnector;
use keeper_config::{ConfigPlugin, ServerConfig};
use keeper_connect::ConnectPlugin;
use keeper_core::plugin::PluginManager;
use keeper_database::DbConnection;
use keeper_jobs::JobsPlugin;
use keeper_metadata::MetadataPlugin;
use keeper_metrics::MetricsPlugin;
use keeper_queue::QueuePlugin;
use keeper_restore::RestorePlugin;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};
use utoipa::OpenApi as OpenApiTrait;
use utoipa_swagger_ui::SwaggerUi;

use super::middleware::{rate_limit, require_token, ApiToken, RateLimiter};
use super::system::{self, SystemApiDoc, SystemState};

/// Register plugins in dependency order.
pub fn register_plugins(manager: &mut PluginManager) {
    // 1. MetricsPlugin - prometheus registry used by every service below
    debug!("Registering MetricsPlugin");
    manager.register_plugin(Box::new(MetricsPlugin::new()));

    // 2. ConfigPlugin - configuration store and revisions
    debug!("Registering ConfigPlugin");
    manager.register_plugin(Box::new(ConfigPlugin::new()));

    // 3. JobsPlugin - background jobs (depends on database)
    debug!("Registering JobsPlugin");
    manager.register_plugin(Box::new(JobsPlugin::new()));

    // 4. ConnectPlugin - connections and SMD shipping (depends on config and cluster connector)
    debug!("Registering ConnectPlugin");
    manager.register_plugin(Box::new(ConnectPlugin::new()));

    // 5. QueuePlugin - continuous ingestion (depends on config and jobs)
    debug!("Registering QueuePlugin");
    manager.register_plugin(Box::new(QueuePlugin::new()));

    // 6. MetadataPlugin - version index (depends on queue storage)
    debug!("Registering MetadataPlugin");
    manager.register_plugin(Box::new(MetadataPlugin::new()));

    // 7. BackupPlugin - routine scheduler (depends on config and metrics)
    debug!("Registering BackupPlugin");
    manager.register_plugin(Box::new(BackupPlugin::new()));

    // 8. RestorePlugin - restores (depends on backup runner and metadata index)
    debug!("Registering RestorePlugin");
    manager.register_plugin(Box::new(RestorePlugin::new()));
}

/// OpenAPI document of all plugins plus the system routes.
pub fn api_document(manager: &PluginManager) -> utoipa::openapi::OpenApi {
    let mut document = manager.get_unified_openapi();
    document.merge(SystemApiDoc::openapi());
    document
}

pub fn build_router(manager: &PluginManager, config: &ServerConfig, db: Arc<DbConnection>) -> Router {
    let system_routes = system::configure_routes().with_state(Arc::new(SystemState { db }));

    let mut app = manager
        .build_application()
        .merge(system_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_document(manager)));

    match &config.api_token {
        Some(token) => {
            app = app.layer(middleware::from_fn_with_state(
                Arc::new(ApiToken(token.clone())),
                require_token,
            ));
        }
        None => debug!("No API token configured, API is open"),
    }

    app.layer(middleware::from_fn_with_state(
        Arc::new(RateLimiter::new(&config.service.http.rate)),
        rate_limit,
    ))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http())
}

/// Initialize the plugins and serve until `shutdown` is cancelled.
pub async fn start_server(
    config: Arc<ServerConfig>,
    db: Arc<DbConnection>,
    connector: Arc<dyn ClusterConnector>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut manager = PluginManager::new();
    let services = manager.service_context();
    services.register_service(db.clone());
    services.register_service(config.clone());
    services.register_service::<dyn ClusterConnector>(connector);
    services.register_service(Arc::new(shutdown.clone()));

    register_plugins(&mut manager);

    debug!("Initializing plugins");
    if let Err(e) = manager.initialize_plugins().await {
        tracing::error!("Plugin initialization failed: {}", e);
        return Err(anyhow::anyhow!("Plugin initialization failed: {}", e));
    }
    debug!("All plugins initialized successfully");

    let app = build_router(&manager, &config, db);

    let listener = TcpListener::bind(&config.address).await?;
    info!("Keeper API listening on {}", config.address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("Keeper API server exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use keeper_cluster::MemoryConnector;
    use keeper_database::test_utils::TestDatabase;
    use tower::ServiceExt;

    fn request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_router_serves_system_routes_and_guards_api() {
        let test_db = TestDatabase::new().await.unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let config = Arc::new(
            ServerConfig::new(
                "127.0.0.1:0".to_string(),
                None,
                Some(data_dir.path().to_path_buf()),
                None,
                Some("secret".to_string()),
                false,
            )
            .unwrap(),
        );
        let shutdown = CancellationToken::new();

        let mut manager = PluginManager::new();
        let services = manager.service_context();
        services.register_service(test_db.connection());
        services.register_service(config.clone());
        services.register_service::<dyn ClusterConnector>(Arc::new(MemoryConnector::new()));
        services.register_service(Arc::new(shutdown.clone()));
        register_plugins(&mut manager);
        manager.initialize_plugins().await.unwrap();

        let app = build_router(&manager, &config, test_db.connection());

        let response = app.clone().oneshot(request("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");

        let response = app.clone().oneshot(request("/ready", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(request("/version", None)).await.unwrap();
        assert_eq!(body_json(response).await["version"], env!("KEEPER_VERSION"));

        let response = app.clone().oneshot(request("/metrics", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("/v1/restore/jobs", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(request("/v1/restore/jobs", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request("/v1/restore/jobs", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("/api-docs/openapi.json", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let document = body_json(response).await;
        for path in ["/health", "/v1/restore/full", "/v1/backups/full", "/v1/config"] {
            assert!(document["paths"].get(path).is_some(), "missing {}", path);
        }
        shutdown.cancel();
    }

    #[test]
    fn test_api_document_without_services() {
        let mut manager = PluginManager::new();
        register_plugins(&mut manager);
        let document = api_document(&manager);
        assert!(document.paths.paths.contains_key("/ready"));
        assert!(document.paths.paths.contains_key("/v1/restore/records"));
    }
}
