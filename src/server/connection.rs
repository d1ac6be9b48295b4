//! Tokio driver for one proxied client connection.

use std::{any::Any, io, net::SocketAddr, sync::Arc};

use bytes::{Buf, BytesMut};
use futures::FutureExt;
use log::{debug, error, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::ProxyFilterConfigRef,
    filter::{ConnectionEvent, DownstreamConnection, ProxyFilter},
    splitter::{CommandSplitter, completion_channel},
};

const READ_CHUNK: usize = 16 * 1024;

/// Reply bytes queued by the filter until the socket accepts them.
#[derive(Debug, Default)]
struct SocketState {
    outbound: BytesMut,
    read_disabled: bool,
    closed: bool,
}

impl DownstreamConnection for SocketState {
    fn write(&mut self, data: BytesMut) {
        if !self.closed {
            self.outbound.unsplit(data);
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.outbound.clear();
    }

    fn read_disable(&mut self, disable: bool) { self.read_disabled = disable; }

    fn buffered_bytes(&self) -> usize { self.outbound.len() }
}

/// Proxy a single client stream until it closes or `shutdown` fires.
///
/// Reads are fed to a fresh [`ProxyFilter`], splitter completions are
/// routed back to it, and queued replies are written as the socket allows.
/// Reading stops while the filter has paused it for backpressure.
///
/// # Errors
///
/// Returns the I/O error that ended the connection. Outstanding requests
/// are cancelled before returning in every case.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
pub async fn serve_connection<S>(
    stream: S,
    splitter: Arc<dyn CommandSplitter>,
    config: ProxyFilterConfigRef,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (tx, mut completions) = completion_channel();
    let mut filter = ProxyFilter::new(splitter, config, SocketState::default(), tx);
    filter.on_event(ConnectionEvent::Connected);
    let mut inbound = BytesMut::with_capacity(READ_CHUNK);

    loop {
        if filter.connection().closed {
            // Closed by the filter itself; queued replies are discarded.
            return Ok(());
        }
        let reading = !filter.connection().read_disabled;
        let writing = !filter.connection().outbound.is_empty();

        select! {
            biased;

            () = shutdown.cancelled() => {
                filter.on_event(ConnectionEvent::LocalClose);
                return Ok(());
            }
            Some(done) = completions.recv() => filter.on_response(done),
            res = writer.write(&filter.connection().outbound), if writing => match res {
                Ok(0) => {
                    filter.on_event(ConnectionEvent::RemoteClose);
                    return Err(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => {
                    filter.connection_mut().outbound.advance(n);
                    filter.on_write_buffer_changed();
                }
                Err(e) => {
                    filter.on_event(ConnectionEvent::RemoteClose);
                    return Err(e);
                }
            },
            res = reader.read_buf(&mut inbound), if reading => match res {
                Ok(0) => {
                    // A half-close counts as a full close: requests still
                    // outstanding are cancelled and get no reply.
                    debug!("client closed connection: pending={}", filter.pending_requests());
                    filter.on_event(ConnectionEvent::RemoteClose);
                    return Ok(());
                }
                Ok(_) => {
                    filter.on_data(&inbound);
                    inbound.clear();
                }
                Err(e) => {
                    filter.on_event(ConnectionEvent::RemoteClose);
                    return Err(e);
                }
            },
        }
    }
}

/// Spawn a tracked task serving `stream`, logging and discarding panics.
pub(super) fn spawn_connection_task(
    stream: TcpStream,
    splitter: Arc<dyn CommandSplitter>,
    config: ProxyFilterConfigRef,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) {
    let peer_addr: Option<SocketAddr> = match stream.peer_addr() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!("failed to retrieve peer address: error={e}");
            None
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to disable nagle: error={e}, peer_addr={peer_addr:?}");
    }
    tracker.spawn(async move {
        let fut = std::panic::AssertUnwindSafe(serve_connection(
            stream, splitter, config, shutdown,
        ))
        .catch_unwind();
        match fut.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("connection ended with error: error={e}, peer_addr={peer_addr:?}"),
            Err(panic) => {
                let panic_msg = panic_message(panic.as_ref());
                error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
                tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
            }
        }
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{payload:?}")
    }
}
