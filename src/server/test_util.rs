//! Fixtures shared by server tests.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use rstest::fixture;

use crate::config::{ProxyFilterConfig, ProxyFilterConfigRef, ProxySettings};

/// A listener bound to a free local port.
///
/// Holding the socket open avoids racing other processes for the port.
#[fixture]
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("failed to bind free port listener")
}

#[fixture]
pub fn proxy_config() -> ProxyFilterConfigRef {
    Arc::new(
        ProxyFilterConfig::new(ProxySettings::new("local", "server_test"))
            .expect("valid settings"),
    )
}
