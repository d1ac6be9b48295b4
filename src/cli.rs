//! Command line interface for the `redis-proxy` binary.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `redis-proxy` binary.
#[derive(Debug, Parser)]
#[command(
    name = "redis-proxy",
    version,
    about = "Pipelining Redis proxy that answers commands in arrival order"
)]
pub struct Cli {
    /// JSON filter configuration; overrides `--cluster` and `--stat-prefix`.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Address to accept client connections on.
    #[arg(short, long, default_value = "127.0.0.1:6380")]
    pub listen: SocketAddr,
    /// Cluster name used when no configuration file is given.
    #[arg(long, default_value = "local")]
    pub cluster: String,
    /// Stat prefix used when no configuration file is given.
    #[arg(long, default_value = "redis_proxy")]
    pub stat_prefix: String,
    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}
