//! `redis-proxy` binary.
//!
//! Serves the pipelining proxy filter over TCP. Commands are answered by
//! the built-in loopback splitter, which handles `PING` and `ECHO`.

mod cli;

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use redis_proxy::{
    ProxyError,
    config::{ProxyFilterConfig, ProxySettings},
    server::ProxyServer,
    splitter::LoopbackSplitter,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(cli::Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "redis-proxy failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: cli::Cli) -> Result<(), ProxyError> {
    // Stat handles bind to the recorder installed when they are created.
    install_metrics_exporter(&cli)?;

    let config = match &cli.config {
        Some(path) => ProxyFilterConfig::from_file(path)?,
        None => ProxyFilterConfig::new(ProxySettings::new(cli.cluster, cli.stat_prefix))?,
    };
    log::info!(
        "loaded config: cluster={}, stat_prefix={}, high_watermark={}, low_watermark={}",
        config.cluster_name(),
        config.stat_prefix(),
        config.high_watermark(),
        config.low_watermark()
    );

    let server = ProxyServer::bind(cli.listen, Arc::new(LoopbackSplitter), Arc::new(config)).await?;
    server.run().await?;
    Ok(())
}

#[cfg(feature = "metrics")]
fn install_metrics_exporter(cli: &cli::Cli) -> Result<(), ProxyError> {
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| ProxyError::Metrics(e.to_string()))?;
        log::info!("prometheus exporter listening: addr={addr}");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics_exporter(cli: &cli::Cli) -> Result<(), ProxyError> {
    if cli.metrics_addr.is_some() {
        log::warn!("built without the metrics feature; --metrics-addr ignored");
    }
    Ok(())
}
