use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keeper_core::plugin::{
    KeeperPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use keeper_jobs::JobManager;
use keeper_queue::QueueService;
use sea_orm::DatabaseConnection;
use utoipa::openapi::OpenApi;
use utoipa::OpenApi as OpenApiTrait;

use crate::delete::DeleteBackupDataExecutor;
use crate::handlers::{self, MetadataApiDoc, MetadataAppState};
use crate::index::MetadataIndex;

/// Version index over the continuous storage. Register after the queue.
#[derive(Default)]
pub struct MetadataPlugin;

impl MetadataPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl KeeperPlugin for MetadataPlugin {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DatabaseConnection>()?;
            let queue = context.require_service::<QueueService>()?;
            let jobs = context.require_service::<JobManager>()?;

            let index = Arc::new(MetadataIndex::new(db.clone(), queue.storage()));
            jobs.register_executor(Arc::new(DeleteBackupDataExecutor::new(db, index.clone())));

            context.register_service(index.clone());
            context.register_service(Arc::new(MetadataAppState { index, jobs }));
            tracing::debug!("Metadata plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<MetadataAppState>().ok()?;
        Some(PluginRoutes::new(handlers::configure_routes().with_state(state)))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(<MetadataApiDoc as OpenApiTrait>::openapi())
    }
}
