mod middleware;
mod server;
mod shutdown;
mod system;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use keeper_cluster::{ClusterConnector, GatewayConnector, MemoryConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use server::{api_document, register_plugins, start_server};

/// How cluster addresses are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClusterMode {
    /// REST gateway in front of every cluster
    Gateway,
    /// In-process clusters created on first connect
    Embedded,
}

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the server to
    #[arg(long, default_value = "0.0.0.0:8080", env = "KEEPER_ADDRESS")]
    pub address: String,

    /// Database connection URL (defaults to SQLite in the data directory)
    #[arg(long, env = "KEEPER_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Data directory for the database and continuous backup storage
    #[arg(long, env = "KEEPER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// YAML configuration document applied at startup
    #[arg(long, env = "KEEPER_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Bearer token required on API calls
    #[arg(long, env = "KEEPER_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Shipping topology is fixed at deploy time
    #[arg(long, env = "KEEPER_STATIC_XDR")]
    pub static_xdr: bool,

    #[arg(long, value_enum, default_value = "gateway", env = "KEEPER_CLUSTER_MODE")]
    pub cluster_mode: ClusterMode,

    /// Reach the cluster gateway over https
    #[arg(long, env = "KEEPER_GATEWAY_TLS")]
    pub gateway_tls: bool,

    /// Namespaces of clusters created in embedded mode
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "test",
        env = "KEEPER_EMBEDDED_NAMESPACES"
    )]
    pub embedded_namespaces: Vec<String>,

    /// Seconds granted to running work after a shutdown signal
    #[arg(long, default_value_t = 30, env = "KEEPER_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: u64,
}

impl ServeCommand {
    fn connector(&self) -> Arc<dyn ClusterConnector> {
        match self.cluster_mode {
            ClusterMode::Gateway => Arc::new(GatewayConnector::new(self.gateway_tls)),
            ClusterMode::Embedded => {
                Arc::new(MemoryConnector::auto_provision(self.embedded_namespaces.clone()))
            }
        }
    }

    pub fn execute(self) -> anyhow::Result<()> {
        let config = Arc::new(keeper_config::ServerConfig::new(
            self.address.clone(),
            self.database_url.clone(),
            self.data_dir.clone(),
            self.config_file.clone(),
            self.api_token.clone(),
            self.static_xdr,
        )?);
        let connector = self.connector();

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async move {
            debug!("Initializing database connection...");
            let db = keeper_database::establish_connection(&config.database_url).await?;

            info!(
                "Starting Keeper on {} (cluster mode {:?}, static xdr {})",
                config.address, self.cluster_mode, config.static_xdr
            );

            let token = CancellationToken::new();
            tokio::spawn(shutdown::cancel_on_signal(token.clone()));

            start_server(config, db.clone(), connector, token).await?;
            shutdown::cleanup(db, Duration::from_secs(self.shutdown_timeout)).await;
            Ok::<(), anyhow::Error>(())
        })
    }
}
