//! Errors raised by [`ProxyServer`](super::ProxyServer) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while binding or running the proxy server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listening socket failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// The bound listener could not report its address.
    #[error("listener address unavailable: {0}")]
    LocalAddr(#[source] io::Error),
}
