use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keeper_backup::BackupRunner;
use keeper_cluster::ClusterConnector;
use keeper_config::ConfigStore;
use keeper_core::plugin::{
    KeeperPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use keeper_jobs::JobManager;
use keeper_metadata::MetadataIndex;
use keeper_metrics::KeeperMetrics;
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use utoipa::openapi::OpenApi;
use utoipa::OpenApi as OpenApiTrait;

use crate::continuous::{ContinuousRestoreExecutor, ContinuousRestorer};
use crate::handlers::{self, RestoreApiDoc, RestoreAppState};
use crate::model::ContinuousScope;
use crate::service::RestoreService;

/// Snapshot and continuous restores. Register after backup and metadata.
#[derive(Default)]
pub struct RestorePlugin;

impl RestorePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl KeeperPlugin for RestorePlugin {
    fn name(&self) -> &'static str {
        "restore"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DatabaseConnection>()?;
            let store = context.require_service::<ConfigStore>()?;
            let connector = context.require_service::<dyn ClusterConnector>()?;
            let metrics = context.require_service::<KeeperMetrics>()?;
            let jobs = context.require_service::<JobManager>()?;
            let index = context.require_service::<MetadataIndex>()?;
            let runner = context.require_service::<BackupRunner>()?;
            let shutdown = context
                .get_service::<CancellationToken>()
                .map(|token| token.as_ref().clone())
                .unwrap_or_default();

            let service = Arc::new(RestoreService::new(
                db,
                runner,
                connector.clone(),
                metrics,
            ));
            service
                .recover_interrupted()
                .await
                .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;
            {
                let service = service.clone();
                tokio::spawn(async move {
                    shutdown.cancelled().await;
                    service.shutdown();
                });
            }

            for scope in [ContinuousScope::Set, ContinuousScope::Namespace] {
                jobs.register_executor(Arc::new(ContinuousRestoreExecutor::new(
                    scope,
                    connector.clone(),
                    index.clone(),
                )));
            }
            let continuous = Arc::new(ContinuousRestorer::new(store, connector, index, jobs));

            context.register_service(service.clone());
            context.register_service(continuous.clone());
            context.register_service(Arc::new(RestoreAppState {
                service,
                continuous,
            }));
            tracing::debug!("Restore plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<RestoreAppState>().ok()?;
        Some(PluginRoutes::new(handlers::configure_routes().with_state(state)))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(<RestoreApiDoc as OpenApiTrait>::openapi())
    }
}
