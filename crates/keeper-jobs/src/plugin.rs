use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keeper_core::plugin::{
    KeeperPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use sea_orm::DatabaseConnection;
use utoipa::openapi::OpenApi;
use utoipa::OpenApi as OpenApiTrait;

use crate::handlers::{self, JobsApiDoc, JobsAppState};
use crate::manager::JobManager;

/// Provides the shared `JobManager`. Register before plugins that add executors.
#[derive(Default)]
pub struct JobsPlugin;

impl JobsPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl KeeperPlugin for JobsPlugin {
    fn name(&self) -> &'static str {
        "jobs"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DatabaseConnection>()?;
            let manager = Arc::new(JobManager::new(db));
            manager
                .recover_interrupted()
                .await
                .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

            context.register_service(manager.clone());
            context.register_service(Arc::new(JobsAppState { manager }));
            tracing::debug!("Jobs plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = context.require_service::<JobsAppState>().ok()?;
        Some(PluginRoutes::new(handlers::configure_routes().with_state(state)))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(<JobsApiDoc as OpenApiTrait>::openapi())
    }
}
