use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keeper_core::plugin::{
    KeeperPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use sea_orm::DatabaseConnection;
use utoipa::openapi::OpenApi;
use utoipa::OpenApi as OpenApiTrait;

use crate::handlers::{self, ConfigAppState, ConfigApiDoc};
use crate::server::ServerConfig;
use crate::store::ConfigStore;

/// Owns the configuration store and its HTTP surface
pub struct ConfigPlugin;

impl ConfigPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConfigPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl KeeperPlugin for ConfigPlugin {
    fn name(&self) -> &'static str {
        "config"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DatabaseConnection>()?;
            let server_config = context.require_service::<ServerConfig>()?;

            let store = ConfigStore::load(db, server_config.config_file.clone())
                .await
                .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;
            let store = Arc::new(store);

            context.register_service(store.clone());
            context.register_service(Arc::new(ConfigAppState { store }));

            tracing::debug!("Config plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<ConfigAppState>().ok()?;
        Some(PluginRoutes::new(handlers::configure_routes().with_state(state)))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(<ConfigApiDoc as OpenApiTrait>::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::plugin::PluginManager;
    use keeper_database::test_utils::TestDatabase;

    #[tokio::test]
    async fn test_config_plugin_registers_store() {
        let test_db = TestDatabase::new().await.unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let server_config = ServerConfig::new(
            "127.0.0.1:0".to_string(),
            None,
            Some(data_dir.path().to_path_buf()),
            None,
            None,
            false,
        )
        .unwrap();

        let mut manager = PluginManager::new();
        manager.service_context().register_service(test_db.connection());
        manager
            .service_context()
            .register_service(Arc::new(server_config));
        manager.register_plugin(Box::new(ConfigPlugin::new()));
        manager.initialize_plugins().await.unwrap();

        assert!(manager.service_context().get_service::<ConfigStore>().is_some());
        let openapi = manager.get_unified_openapi();
        assert!(openapi.paths.paths.contains_key("/v1/config/routines/{name}"));
    }
}
