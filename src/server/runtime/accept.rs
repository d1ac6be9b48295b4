//! Accept loop feeding new connections to the proxy.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::BackoffConfig;
use crate::{
    config::ProxyFilterConfigRef,
    server::connection::spawn_connection_task,
    splitter::CommandSplitter,
};

/// Source of incoming connections consumed by the accept loop.
///
/// Dropping a pending `accept()` future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// State every spawned connection is built from.
#[derive(Clone)]
pub(in crate::server) struct ProxyContext {
    pub splitter: Arc<dyn CommandSplitter>,
    pub config: ProxyFilterConfigRef,
}

#[derive(Debug)]
pub(in crate::server) struct AcceptLoopOptions {
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
}

/// Accept connections from `listener` until `options.shutdown` fires.
///
/// Each accepted stream is served on its own task registered with
/// `options.tracker`. Accept failures are retried after an exponential
/// back-off that resets on the next success.
pub(in crate::server) async fn accept_loop<L>(
    listener: Arc<L>,
    context: ProxyContext,
    options: AcceptLoopOptions,
) where
    L: AcceptListener + 'static,
{
    let AcceptLoopOptions {
        shutdown,
        tracker,
        backoff,
    } = options;
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next) =
        accept_iteration(listener.as_ref(), &context, &shutdown, &tracker, &backoff, delay).await
    {
        delay = next;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<L>(
    listener: &L,
    context: &ProxyContext,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener,
{
    select! {
        biased;

        () = shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, _)) => {
                spawn_connection_task(
                    stream,
                    Arc::clone(&context.splitter),
                    Arc::clone(&context.config),
                    shutdown.child_token(),
                    tracker,
                );
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                select! {
                    biased;

                    () = shutdown.cancelled() => return None,
                    () = sleep(delay) => {}
                }
                backoff.next_delay(delay)
            }
        }),
    }
}
