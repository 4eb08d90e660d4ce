use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keeper_cluster::ClusterConnector;
use keeper_config::{ConfigStore, ServerConfig};
use keeper_core::plugin::{
    KeeperPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use keeper_metrics::KeeperMetrics;
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use utoipa::openapi::OpenApi;
use utoipa::OpenApi as OpenApiTrait;

use crate::handlers::{self, ConnectApiDoc, ConnectAppState};
use crate::service::ConnectionService;
use crate::smd::SmdService;

/// Connections, continuous backup configuration and the SMD shipping loop.
#[derive(Default)]
pub struct ConnectPlugin;

impl ConnectPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl KeeperPlugin for ConnectPlugin {
    fn name(&self) -> &'static str {
        "connect"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DatabaseConnection>()?;
            let store = context.require_service::<ConfigStore>()?;
            let server_config = context.require_service::<ServerConfig>()?;
            let connector = context.require_service::<dyn ClusterConnector>()?;
            let metrics = context.require_service::<KeeperMetrics>()?;
            let shutdown = context
                .get_service::<CancellationToken>()
                .map(|token| token.as_ref().clone())
                .unwrap_or_default();

            let connections = Arc::new(ConnectionService::new(
                store.clone(),
                connector.clone(),
                db.clone(),
                server_config.static_xdr,
            ));
            let smd = Arc::new(SmdService::new(store, connector, db, metrics));
            tokio::spawn(smd.clone().run(shutdown));

            context.register_service(connections.clone());
            context.register_service(smd.clone());
            context.register_service(Arc::new(ConnectAppState { connections, smd }));
            tracing::debug!("Connect plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<ConnectAppState>().ok()?;
        Some(PluginRoutes::new(handlers::configure_routes().with_state(state)))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(<ConnectApiDoc as OpenApiTrait>::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_cluster::MemoryConnector;
    use keeper_config::ConfigPlugin;
    use keeper_core::plugin::PluginManager;
    use keeper_database::test_utils::TestDatabase;
    use keeper_metrics::MetricsPlugin;

    #[tokio::test]
    async fn test_connect_plugin_wires_services() {
        let test_db = TestDatabase::new().await.unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let server_config = ServerConfig::new(
            "127.0.0.1:0".to_string(),
            None,
            Some(data_dir.path().to_path_buf()),
            None,
            None,
            true,
        )
        .unwrap();
        let shutdown = CancellationToken::new();

        let mut manager = PluginManager::new();
        let services = manager.service_context();
        services.register_service(test_db.connection());
        services.register_service(Arc::new(server_config));
        services.register_service::<dyn ClusterConnector>(Arc::new(MemoryConnector::new()));
        services.register_service(Arc::new(shutdown.clone()));
        manager.register_plugin(Box::new(MetricsPlugin::new()));
        manager.register_plugin(Box::new(ConfigPlugin::new()));
        manager.register_plugin(Box::new(ConnectPlugin::new()));
        manager.initialize_plugins().await.unwrap();

        let connections = manager
            .service_context()
            .get_service::<ConnectionService>()
            .unwrap();
        assert!(connections.is_static());
        let openapi = manager.get_unified_openapi();
        assert!(openapi.paths.paths.contains_key("/v1/smd/latest"));
        shutdown.cancel();
    }
}
