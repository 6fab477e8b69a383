//! dbrelay gateway daemon
//!
//! The `dbrelayd` binary:
//! - Loads the provider table and server settings
//! - Starts the gRPC (and gRPC-Web) endpoint
//! - Closes every open session on SIGTERM/SIGINT
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings
//! dbrelayd
//!
//! # Start on a custom port
//! dbrelayd --port 7500
//!
//! # Use a configuration file
//! dbrelayd --config /etc/dbrelay/dbrelayd.toml
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dbrelay_server::config::ServerConfig;
use dbrelay_server::grpc::GrpcServer;

/// dbrelay gateway daemon
#[derive(Parser, Debug)]
#[command(
    name = "dbrelayd",
    version,
    about = "Remote database gateway",
    long_about = "dbrelay exposes native database drivers to remote clients over gRPC.\n\n\
                  This daemon hosts the gateway and listens for client connections."
)]
struct Args {
    /// Host address to bind to
    #[arg(short = 'H', long, env = "DBRELAY_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long, env = "DBRELAY_PORT")]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", env = "DBRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Disable HTTP/1.1 gRPC-Web
    #[arg(long)]
    no_grpc_web: bool,

    /// Log statement text at debug level
    #[arg(long)]
    log_statements: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "DBRELAY_LOG_LEVEL")]
    log_level: String,

    /// Print configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    run_server(config).await
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "dbrelay_server={level},dbrelay_common={level},dbrelayd={level}"
            ))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}

// Defaults, then the config file, then command-line arguments.
fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = if let Some(path) = &args.config {
        ServerConfig::from_file(path).context("Failed to load config file")?
    } else {
        ServerConfig::default()
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.no_grpc_web {
        config.grpc_web = false;
    }
    if args.log_statements {
        config.log_statements = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let server = GrpcServer::from_config(&config)?;
    let registry = server.registry();

    info!("Server configuration:");
    info!("  Listen address: {}", server.addr());
    info!("  gRPC-Web: {}", config.grpc_web);
    for provider in &config.providers {
        info!("  Provider: {} ({:?})", provider.invariant_name, provider.driver);
    }
    if let Some(table) = &config.remote_transaction_table {
        info!("  Remote transaction table: {}", table);
    }
    info!("Press Ctrl+C to shutdown");

    server
        .serve_with_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!("Server error: {}", e);
            anyhow::anyhow!("Server error: {}", e)
        })?;

    if !registry.is_empty() {
        warn!("{} sessions were still registered after shutdown", registry.len());
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
