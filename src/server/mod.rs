//! Tokio TCP server running one [`ProxyFilter`](crate::filter::ProxyFilter)
//! per accepted client connection.
//!
//! [`ProxyServer`] accepts connections on a bound listener and serves each
//! on its own task through [`serve_connection`]. All connections share one
//! [`CommandSplitter`] and one [`ProxyFilterConfig`](crate::config::ProxyFilterConfig).

use std::{fmt, net::SocketAddr, sync::Arc};

use tokio::{net::TcpListener, sync::oneshot};

use crate::{config::ProxyFilterConfigRef, splitter::CommandSplitter};

mod connection;
pub mod error;
mod runtime;

pub use connection::serve_connection;
pub use error::ServerError;
pub use runtime::BackoffConfig;

#[cfg(test)]
pub(crate) mod test_util;

/// TCP front end of the proxy.
pub struct ProxyServer {
    listener: Arc<TcpListener>,
    splitter: Arc<dyn CommandSplitter>,
    config: ProxyFilterConfigRef,
    backoff: BackoffConfig,
    /// Fired once the accept loop is running; single use.
    ready_tx: Option<oneshot::Sender<()>>,
}

impl ProxyServer {
    /// Bind a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        splitter: Arc<dyn CommandSplitter>,
        config: ProxyFilterConfigRef,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
        Ok(Self::from_listener(listener, splitter, config))
    }

    /// Adopt an already bound standard library listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be registered
    /// with the runtime.
    pub fn bind_existing_listener(
        listener: std::net::TcpListener,
        splitter: Arc<dyn CommandSplitter>,
        config: ProxyFilterConfigRef,
    ) -> Result<Self, ServerError> {
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(listener).map_err(ServerError::Bind)?;
        Ok(Self::from_listener(listener, splitter, config))
    }

    fn from_listener(
        listener: TcpListener,
        splitter: Arc<dyn CommandSplitter>,
        config: ProxyFilterConfigRef,
    ) -> Self {
        Self {
            listener: Arc::new(listener),
            splitter,
            config,
            backoff: BackoffConfig::default(),
            ready_tx: None,
        }
    }

    /// Replace the accept-loop back-off.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Notify `tx` once the server starts accepting.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::LocalAddr`] if the socket cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }
}

impl fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("cluster", &self.config.cluster_name())
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
