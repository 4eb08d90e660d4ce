use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keeper_core::plugin::{
    KeeperPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use utoipa::openapi::OpenApi;
use utoipa::OpenApi as OpenApiTrait;

use crate::handlers::{self, MetricsApiDoc};
use crate::metrics::KeeperMetrics;

/// Provides `KeeperMetrics` and serves `/metrics`. Register first.
#[derive(Default)]
pub struct MetricsPlugin;

impl MetricsPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl KeeperPlugin for MetricsPlugin {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let metrics = KeeperMetrics::new()
                .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;
            context.register_service(Arc::new(metrics));
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let metrics = context.require_service::<KeeperMetrics>().ok()?;
        Some(PluginRoutes::new(handlers::configure_routes().with_state(metrics)))
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(<MetricsApiDoc as OpenApiTrait>::openapi())
    }
}
