//! Keeper CLI - entrypoint of the backup service
//!
//! Wires every library crate into one HTTP server and offers a few
//! offline helpers around it.

mod commands;

use clap::{Parser, Subcommand};
use commands::{OpenApiCommand, ServeCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

const KEEPER_TARGETS: &[&str] = &[
    "keeper",
    "keeper_cli",
    "keeper_core",
    "keeper_config",
    "keeper_cluster",
    "keeper_storage",
    "keeper_database",
    "keeper_migrations",
    "keeper_jobs",
    "keeper_connect",
    "keeper_queue",
    "keeper_metadata",
    "keeper_backup",
    "keeper_restore",
    "keeper_metrics",
];

#[derive(Parser)]
#[command(
    author,
    version = env!("KEEPER_VERSION"),
    about,
    long_about = None
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "KEEPER_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "KEEPER_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Print the OpenAPI document of every plugin
    Openapi(OpenApiCommand),
}

fn env_filter(level: &str) -> anyhow::Result<tracing_subscriber::EnvFilter> {
    // RUST_LOG wins when set
    if std::env::var("RUST_LOG").is_ok() {
        return Ok(tracing_subscriber::EnvFilter::try_from_default_env()?);
    }

    let mut directives: Vec<String> = KEEPER_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect();
    for noisy in ["sqlx", "sea_orm", "h2", "tower", "hyper", "reqwest", "aws_config", "aws_smithy_runtime"] {
        directives.push(format!("{}=warn", noisy));
    }
    Ok(tracing_subscriber::EnvFilter::try_new(directives.join(","))?)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = env_filter(&cli.log_level)?;
    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute(),
        Commands::Openapi(openapi_cmd) => openapi_cmd.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_arguments() {
        let cli = Cli::try_parse_from([
            "keeper",
            "serve",
            "--address",
            "0.0.0.0:8080",
            "--static-xdr",
            "--cluster-mode",
            "embedded",
            "--embedded-namespaces",
            "test,bar",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Serve(serve) => {
                assert_eq!(serve.address, "0.0.0.0:8080");
                assert!(serve.static_xdr);
                assert_eq!(serve.embedded_namespaces, vec!["test", "bar"]);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_env_filter_covers_keeper_targets() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = env_filter("debug").unwrap().to_string();
        assert!(filter.contains("keeper_restore=debug"));
        assert!(filter.contains("sea_orm=warn"));
    }
}
