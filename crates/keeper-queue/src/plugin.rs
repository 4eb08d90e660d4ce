use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keeper_config::{ConfigStore, ServerConfig};
use keeper_core::plugin::{
    KeeperPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use keeper_jobs::JobManager;
use keeper_metrics::KeeperMetrics;
use keeper_storage::open_storage;
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use utoipa::openapi::OpenApi;
use utoipa::OpenApi as OpenApiTrait;

use crate::handlers::{self, QueueApiDoc, QueueAppState};
use crate::recovery::QueueRecoveryExecutor;
use crate::service::QueueService;

/// Ingestion endpoint and the queue processor.
#[derive(Default)]
pub struct QueuePlugin;

impl QueuePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl KeeperPlugin for QueuePlugin {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DatabaseConnection>()?;
            let store = context.require_service::<ConfigStore>()?;
            let server_config = context.require_service::<ServerConfig>()?;
            let metrics = context.require_service::<KeeperMetrics>()?;
            let jobs = context.require_service::<JobManager>()?;
            let shutdown = context
                .get_service::<CancellationToken>()
                .map(|token| token.as_ref().clone())
                .unwrap_or_default();

            let storage = open_storage(&server_config.continuous_storage())
                .await
                .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;
            let queue = Arc::new(QueueService::new(
                db,
                store,
                storage,
                server_config.service.queue.clone(),
                metrics,
            ));
            jobs.register_executor(Arc::new(QueueRecoveryExecutor::new(queue.clone())));
            tokio::spawn(queue.clone().run(shutdown));

            context.register_service(queue.clone());
            context.register_service(Arc::new(QueueAppState { queue, jobs }));
            tracing::debug!("Queue plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<QueueAppState>().ok()?;
        Some(PluginRoutes::new(handlers::configure_routes().with_state(state)))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(<QueueApiDoc as OpenApiTrait>::openapi())
    }
}
