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

use crate::handlers::{self, BackupApiDoc, BackupAppState};
use crate::runner::BackupRunner;
use crate::scheduler::BackupScheduler;

/// Scheduled backups of configured routines.
#[derive(Default)]
pub struct BackupPlugin;

impl BackupPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl KeeperPlugin for BackupPlugin {
    fn name(&self) -> &'static str {
        "backup"
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

            let runner = Arc::new(BackupRunner::new(db, store.clone(), connector));
            let scheduler = Arc::new(BackupScheduler::new(
                store,
                runner.clone(),
                metrics,
                server_config.service.max_concurrent_backups,
            ));
            tokio::spawn(scheduler.clone().run(shutdown));

            context.register_service(runner);
            context.register_service(scheduler.clone());
            context.register_service(Arc::new(BackupAppState { scheduler }));
            tracing::debug!("Backup plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<BackupAppState>().ok()?;
        Some(PluginRoutes::new(handlers::configure_routes().with_state(state)))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(<BackupApiDoc as OpenApiTrait>::openapi())
    }
}
