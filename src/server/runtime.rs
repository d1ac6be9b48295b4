//! Runtime control for [`ProxyServer`].

mod accept;
mod backoff;
#[cfg(test)]
mod tests;

use std::future::Future;

use accept::{AcceptLoopOptions, ProxyContext, accept_loop};
pub use backoff::BackoffConfig;
use log::{info, warn};
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{ProxyServer, ServerError};
use crate::metrics::active_connection_count;

impl ProxyServer {
    /// Serve connections until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept failures are retried with
    /// exponential back-off rather than surfaced.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: error={e}");
            }
        })
        .await
    }

    /// Serve connections until `shutdown` resolves.
    ///
    /// On shutdown the accept loop stops, every open connection is closed
    /// with its outstanding requests cancelled, and this returns once all
    /// connection tasks have finished.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use redis_proxy::{config::ProxyFilterConfig, server::ProxyServer, splitter::LoopbackSplitter};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ProxyFilterConfig::from_json(r#"{"cluster_name": "local", "stat_prefix": "doc"}"#)?;
    /// let server = ProxyServer::bind(
    ///     ([127, 0, 0, 1], 0).into(),
    ///     Arc::new(LoopbackSplitter),
    ///     Arc::new(config),
    /// )
    /// .await?;
    /// server.run_with_shutdown(async {}).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Currently infallible once bound.
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let ProxyServer {
            listener,
            splitter,
            config,
            backoff,
            ready_tx,
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let local_addr = listener.local_addr().ok();

        tracker.spawn(accept_loop(
            listener,
            ProxyContext { splitter, config },
            AcceptLoopOptions {
                shutdown: shutdown_token.clone(),
                tracker: tracker.clone(),
                backoff,
            },
        ));
        info!("proxy listening: local_addr={local_addr:?}");

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("failed to send readiness signal: receiver dropped");
        }

        shutdown.await;
        info!(
            "proxy shutting down: active_connections={}",
            active_connection_count()
        );
        shutdown_token.cancel();
        tracker.close();
        tracker.wait().await;
        Ok(())
    }
}
