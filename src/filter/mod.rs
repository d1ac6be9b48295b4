//! Pipelining proxy filter.
//!
//! [`ProxyFilter`] sits between one downstream client connection and a
//! [`CommandSplitter`]. Commands are decoded from the client's byte stream,
//! submitted to the splitter as they arrive, and their replies are written
//! back in arrival order no matter which order the splitter completes them
//! in. A completed reply waits behind any earlier request that is still
//! outstanding; once the head of the queue completes, every consecutive
//! completed reply is encoded and handed to the connection in one write.
//!
//! The filter is a synchronous state machine. A host drives it through
//! [`ProxyFilter::on_data`], [`ProxyFilter::on_response`], and
//! [`ProxyFilter::on_event`] from a single task; see
//! [`crate::server::serve_connection`] for the tokio driver.

mod pending;
mod watermark;


use std::{io, sync::Arc};

use bytes::BytesMut;
use log::{debug, info, trace, warn};
use pending::{PendingQueue, PendingRequest};
use tokio_util::codec::{Decoder, Encoder};
pub use watermark::{WatermarkEvent, WriteWatermarks};

use crate::{
    config::ProxyFilterConfig,
    metrics::{ActiveConnection, ActiveRequest, GaugeShare, active_connection_count},
    resp::{RespCodec, RespValue},
    splitter::{CommandSplitter, CompletedRequest, Completion, CompletionSender},
};

/// Connection lifecycle notifications delivered to the filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection was established.
    Connected,
    /// The peer closed or reset the connection.
    RemoteClose,
    /// The proxy closed the connection.
    LocalClose,
}

/// Downstream connection capabilities used by the filter.
pub trait DownstreamConnection: Send {
    /// Queue encoded reply bytes for delivery to the client.
    fn write(&mut self, data: BytesMut);

    /// Close the connection without flushing queued bytes.
    fn close(&mut self);

    /// Pause (`true`) or resume (`false`) reading from the client.
    fn read_disable(&mut self, disable: bool);

    /// Reply bytes queued but not yet written to the client.
    fn buffered_bytes(&self) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FilterState {
    Open,
    Closed,
}

/// Per-connection pipelining filter.
pub struct ProxyFilter<C, K = RespCodec> {
    codec: K,
    splitter: Arc<dyn CommandSplitter>,
    config: Arc<ProxyFilterConfig>,
    connection: C,
    completions: CompletionSender,
    pending: PendingQueue,
    inbound: BytesMut,
    /// Bytes of the command being decoded that the codec already holds.
    partial_frame: usize,
    encoder_buffer: BytesMut,
    watermarks: WriteWatermarks,
    read_disabled: bool,
    state: FilterState,
    active: Option<ActiveConnection>,
    rx_buffered: GaugeShare,
    tx_buffered: GaugeShare,
}

impl<C> ProxyFilter<C>
where
    C: DownstreamConnection,
{
    /// Create a filter speaking RESP with the configured frame limit.
    ///
    /// Completions produced by the splitter are delivered to the receiver
    /// paired with `completions`; the host passes each one to
    /// [`ProxyFilter::on_response`].
    #[must_use]
    pub fn new(
        splitter: Arc<dyn CommandSplitter>,
        config: Arc<ProxyFilterConfig>,
        connection: C,
        completions: CompletionSender,
    ) -> Self {
        let codec = RespCodec::new(config.max_frame_length());
        Self::with_codec(codec, splitter, config, connection, completions)
    }
}

impl<C, K> ProxyFilter<C, K>
where
    C: DownstreamConnection,
    K: Decoder<Item = RespValue, Error = io::Error> + Encoder<RespValue, Error = io::Error>,
{
    /// Create a filter with a custom codec.
    #[must_use]
    pub fn with_codec(
        codec: K,
        splitter: Arc<dyn CommandSplitter>,
        config: Arc<ProxyFilterConfig>,
        connection: C,
        completions: CompletionSender,
    ) -> Self {
        let watermarks = WriteWatermarks::new(config.low_watermark(), config.high_watermark());
        let rx_buffered = GaugeShare::new(config.stats().cx_rx_bytes_buffered.clone());
        let tx_buffered = GaugeShare::new(config.stats().cx_tx_bytes_buffered.clone());
        Self {
            codec,
            splitter,
            config,
            connection,
            completions,
            pending: PendingQueue::default(),
            inbound: BytesMut::new(),
            partial_frame: 0,
            encoder_buffer: BytesMut::new(),
            watermarks,
            read_disabled: false,
            state: FilterState::Open,
            active: None,
            rx_buffered,
            tx_buffered,
        }
    }

    /// Downstream connection owned by the filter.
    pub fn connection(&self) -> &C { &self.connection }

    /// Mutable access to the downstream connection.
    pub fn connection_mut(&mut self) -> &mut C { &mut self.connection }

    /// Number of requests awaiting delivery to the client.
    #[must_use]
    pub fn pending_requests(&self) -> usize { self.pending.len() }

    /// Returns `true` once the connection has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.state == FilterState::Closed }

    /// Returns `true` while client reads are paused for backpressure.
    #[must_use]
    pub fn is_read_disabled(&self) -> bool { self.read_disabled }

    /// Account for a newly accepted connection.
    pub fn on_new_connection(&mut self) {
        if self.is_closed() || self.active.is_some() {
            return;
        }
        self.active = Some(ActiveConnection::new(self.config.stats()));
        info!(
            "connection opened: cluster={}, active_connections={}",
            self.config.cluster_name(),
            active_connection_count()
        );
    }

    /// Feed bytes read from the client.
    ///
    /// Every complete command is submitted before this returns. Bytes
    /// arriving while reads are paused are kept and decoded on resume.
    pub fn on_data(&mut self, data: &[u8]) {
        if self.is_closed() {
            return;
        }
        self.config.stats().cx_rx_bytes_total.increment(data.len() as u64);
        self.inbound.extend_from_slice(data);
        self.decode_inbound();
    }

    fn decode_inbound(&mut self) {
        while !self.read_disabled && !self.is_closed() {
            let before = self.inbound.len();
            let decoded = self.codec.decode(&mut self.inbound);
            self.partial_frame += before.saturating_sub(self.inbound.len());
            match decoded {
                Ok(Some(command)) => {
                    // A decode call stops at the end of the command it returns.
                    self.partial_frame = 0;
                    self.submit(command);
                }
                Ok(None) => break,
                Err(err) => {
                    self.on_protocol_error(&err);
                    return;
                }
            }
        }
        self.rx_buffered.set(self.inbound.len() + self.partial_frame);
    }

    fn submit(&mut self, command: RespValue) {
        let entry = PendingRequest::new(ActiveRequest::new(self.config.stats()));
        let token = self.pending.push(entry);
        let completion = Completion::new(token, self.completions.clone());
        let request = self.splitter.submit(command, completion);
        if let Some(entry) = self.pending.get_mut(token) {
            entry.attach(request);
        } else if let Some(request) = request {
            request.cancel();
        }
    }

    /// Record a splitter completion and flush any replies now in order.
    ///
    /// Completions for requests that were cancelled or already answered,
    /// and completions arriving after teardown, are ignored.
    pub fn on_response(&mut self, done: CompletedRequest) {
        let CompletedRequest { token, result } = done;
        if self.is_closed() {
            trace!("completion after teardown ignored: token={token:?}");
            return;
        }
        let Some(entry) = self.pending.get_mut(token) else {
            trace!("stale completion ignored: token={token:?}");
            return;
        };
        if !entry.complete(result) {
            trace!("duplicate completion ignored: token={token:?}");
            return;
        }
        self.flush();
    }

    fn flush(&mut self) {
        while let Some(result) = self.pending.pop_completed() {
            let reply = result.unwrap_or_else(RespValue::error);
            if let Err(err) = self.codec.encode(reply, &mut self.encoder_buffer) {
                warn!("failed to encode reply: error={err}");
                self.connection.close();
                self.teardown(ConnectionEvent::LocalClose);
                return;
            }
        }
        if self.encoder_buffer.is_empty() {
            return;
        }
        let data = self.encoder_buffer.split();
        self.config.stats().cx_tx_bytes_total.increment(data.len() as u64);
        self.connection.write(data);
        self.on_write_buffer_changed();
    }

    /// Re-evaluate the connection's write buffer against the watermarks.
    ///
    /// Called after the filter queues bytes and by the host whenever queued
    /// bytes are written out.
    pub fn on_write_buffer_changed(&mut self) {
        if self.is_closed() {
            return;
        }
        let buffered = self.connection.buffered_bytes();
        self.tx_buffered.set(buffered);
        match self.watermarks.observe(buffered) {
            Some(WatermarkEvent::AboveHigh) => self.on_above_write_buffer_high_watermark(),
            Some(WatermarkEvent::BelowLow) => self.on_below_write_buffer_low_watermark(),
            None => {}
        }
    }

    /// Pause client reads while the write buffer is over its high mark.
    pub fn on_above_write_buffer_high_watermark(&mut self) {
        if self.is_closed() || self.read_disabled {
            return;
        }
        self.read_disabled = true;
        self.connection.read_disable(true);
        debug!(
            "write buffer above high watermark; reads disabled: buffered={}",
            self.connection.buffered_bytes()
        );
    }

    /// Resume client reads and decode anything received in the meantime.
    pub fn on_below_write_buffer_low_watermark(&mut self) {
        if self.is_closed() || !self.read_disabled {
            return;
        }
        self.read_disabled = false;
        self.connection.read_disable(false);
        debug!(
            "write buffer below low watermark; reads enabled: buffered={}",
            self.connection.buffered_bytes()
        );
        self.decode_inbound();
    }

    /// Handle a connection lifecycle event.
    pub fn on_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => self.on_new_connection(),
            ConnectionEvent::RemoteClose | ConnectionEvent::LocalClose => self.teardown(event),
        }
    }

    fn on_protocol_error(&mut self, err: &io::Error) {
        self.config.stats().cx_protocol_error.increment(1);
        warn!(
            "protocol error from downstream; closing connection: error={err}, pending={}",
            self.pending.len()
        );
        self.connection.close();
        self.teardown(ConnectionEvent::LocalClose);
    }

    fn teardown(&mut self, event: ConnectionEvent) {
        if self.is_closed() {
            return;
        }
        self.state = FilterState::Closed;
        let cancelled = self.pending.cancel_all();
        self.inbound.clear();
        self.partial_frame = 0;
        self.encoder_buffer.clear();
        self.rx_buffered.set(0);
        self.tx_buffered.set(0);
        debug!("connection torn down: event={event:?}, cancelled_requests={cancelled}");
        if self.active.take().is_some() {
            info!(
                "connection closed: cluster={}, active_connections={}",
                self.config.cluster_name(),
                active_connection_count()
            );
        }
    }
}
