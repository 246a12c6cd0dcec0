//! wharfgate - package-registry runtime proxy.
//!
//! Boots the reverse proxy from a YAML configuration file and serves
//! until interrupted.
//!
//! ## Usage
//!
//! ```sh
//! wharfgate -c config.yaml
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wharfgate::constants::SHUTDOWN_GRACE;
use wharfgate::{Config, ProxyServer};

#[derive(Parser)]
#[command(name = "wharfgate")]
#[command(version, about = "On-demand package-registry runtime proxy")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("configuration error")?;

    let host = config.host.clone();
    let port = config.port;
    let server = ProxyServer::new(config);

    if let Err(e) = server.engine_status().await {
        warn!("container engine not reachable: {}", e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = std::sync::Arc::new(server);
    let mut serve_handle = {
        let server = std::sync::Arc::clone(&server);
        tokio::spawn(async move { server.serve(shutdown_rx).await })
    };

    info!("server is listening at {}:{}", host, port);

    tokio::select! {
        result = &mut serve_handle => {
            match result {
                Ok(Ok(())) => anyhow::bail!("server exited unexpectedly"),
                Ok(Err(e)) => anyhow::bail!("server error: {}", e),
                Err(e) => anyhow::bail!("server task failed: {}", e),
            }
        }
        result = wait_for_signal() => {
            result?;
            info!("gracefully shutting down the server");
            let _ = shutdown_tx.send(true);
            match tokio::time::timeout(SHUTDOWN_GRACE, serve_handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("server error during shutdown: {}", e),
                Ok(Err(e)) => error!("server task failed: {}", e),
                Err(_) => warn!("shutdown grace period elapsed; exiting"),
            }
        }
    }

    info!("server is shutdown");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("signal handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("signal handler")?;
        Ok(())
    }
}
