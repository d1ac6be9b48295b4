//! Proxy statistics.
//!
//! Stats are recorded through the [`metrics`](https://docs.rs/metrics)
//! facade under `redis.<stat_prefix>.`. Gauges are shared by every
//! connection built from one configuration, so each connection reports
//! its contribution as deltas through [`GaugeShare`] and returns it on drop.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{Counter, Gauge, counter, gauge};

/// Suffix of the counter tracking bytes read from clients.
pub const DOWNSTREAM_CX_RX_BYTES_TOTAL: &str = "downstream_cx_rx_bytes_total";
/// Suffix of the gauge tracking read bytes not yet decoded.
pub const DOWNSTREAM_CX_RX_BYTES_BUFFERED: &str = "downstream_cx_rx_bytes_buffered";
/// Suffix of the counter tracking bytes written to clients.
pub const DOWNSTREAM_CX_TX_BYTES_TOTAL: &str = "downstream_cx_tx_bytes_total";
/// Suffix of the gauge tracking reply bytes not yet written.
pub const DOWNSTREAM_CX_TX_BYTES_BUFFERED: &str = "downstream_cx_tx_bytes_buffered";
/// Suffix of the counter tracking malformed client input.
pub const DOWNSTREAM_CX_PROTOCOL_ERROR: &str = "downstream_cx_protocol_error";
/// Suffix of the counter tracking accepted connections.
pub const DOWNSTREAM_CX_TOTAL: &str = "downstream_cx_total";
/// Suffix of the gauge tracking open connections.
pub const DOWNSTREAM_CX_ACTIVE: &str = "downstream_cx_active";
/// Suffix of the counter tracking decoded commands.
pub const DOWNSTREAM_RQ_TOTAL: &str = "downstream_rq_total";
/// Suffix of the gauge tracking commands awaiting their reply.
pub const DOWNSTREAM_RQ_ACTIVE: &str = "downstream_rq_active";

static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Number of proxy connections currently open in this process.
#[must_use]
pub fn active_connection_count() -> u64 { ACTIVE_CONNECTIONS.load(Ordering::Relaxed) }

/// Handles for every stat the proxy filter records.
#[derive(Clone)]
pub struct ProxyStats {
    prefix: String,
    pub(crate) cx_rx_bytes_total: Counter,
    pub(crate) cx_rx_bytes_buffered: Gauge,
    pub(crate) cx_tx_bytes_total: Counter,
    pub(crate) cx_tx_bytes_buffered: Gauge,
    pub(crate) cx_protocol_error: Counter,
    pub(crate) cx_total: Counter,
    pub(crate) cx_active: Gauge,
    pub(crate) rq_total: Counter,
    pub(crate) rq_active: Gauge,
}

impl ProxyStats {
    /// Register the stat handles for `stat_prefix` with the current recorder.
    ///
    /// # Examples
    ///
    /// ```
    /// use redis_proxy::metrics::ProxyStats;
    ///
    /// let stats = ProxyStats::new("front");
    /// assert_eq!(stats.name("downstream_rq_total"), "redis.front.downstream_rq_total");
    /// ```
    #[must_use]
    pub fn new(stat_prefix: &str) -> Self {
        let prefix = format!("redis.{stat_prefix}.");
        let name = |suffix: &str| format!("{prefix}{suffix}");
        Self {
            cx_rx_bytes_total: counter!(name(DOWNSTREAM_CX_RX_BYTES_TOTAL)),
            cx_rx_bytes_buffered: gauge!(name(DOWNSTREAM_CX_RX_BYTES_BUFFERED)),
            cx_tx_bytes_total: counter!(name(DOWNSTREAM_CX_TX_BYTES_TOTAL)),
            cx_tx_bytes_buffered: gauge!(name(DOWNSTREAM_CX_TX_BYTES_BUFFERED)),
            cx_protocol_error: counter!(name(DOWNSTREAM_CX_PROTOCOL_ERROR)),
            cx_total: counter!(name(DOWNSTREAM_CX_TOTAL)),
            cx_active: gauge!(name(DOWNSTREAM_CX_ACTIVE)),
            rq_total: counter!(name(DOWNSTREAM_RQ_TOTAL)),
            rq_active: gauge!(name(DOWNSTREAM_RQ_ACTIVE)),
            prefix,
        }
    }

    /// Fully qualified metric name for `suffix`.
    #[must_use]
    pub fn name(&self, suffix: &str) -> String { format!("{}{suffix}", self.prefix) }
}

impl std::fmt::Debug for ProxyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyStats")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// One connection's contribution to a shared gauge.
pub(crate) struct GaugeShare {
    gauge: Gauge,
    reported: usize,
}

impl GaugeShare {
    pub(crate) fn new(gauge: Gauge) -> Self { Self { gauge, reported: 0 } }

    /// Move this connection's contribution to `value`.
    #[expect(
        clippy::cast_precision_loss,
        reason = "gauges are f64; byte counts stay far below 2^52"
    )]
    pub(crate) fn set(&mut self, value: usize) {
        if value >= self.reported {
            self.gauge.increment((value - self.reported) as f64);
        } else {
            self.gauge.decrement((self.reported - value) as f64);
        }
        self.reported = value;
    }
}

impl Drop for GaugeShare {
    fn drop(&mut self) { self.set(0); }
}

/// RAII guard counting one open connection in the process-wide count and
/// the configuration's `downstream_cx_active` gauge.
pub(crate) struct ActiveConnection {
    gauge: Gauge,
}

impl ActiveConnection {
    pub(crate) fn new(stats: &ProxyStats) -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        stats.cx_total.increment(1);
        stats.cx_active.increment(1.0);
        Self {
            gauge: stats.cx_active.clone(),
        }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        self.gauge.decrement(1.0);
    }
}

/// RAII guard counting one request in `downstream_rq_active`.
pub(crate) struct ActiveRequest {
    gauge: Gauge,
}

impl ActiveRequest {
    pub(crate) fn new(stats: &ProxyStats) -> Self {
        stats.rq_total.increment(1);
        stats.rq_active.increment(1.0);
        Self {
            gauge: stats.rq_active.clone(),
        }
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) { self.gauge.decrement(1.0); }
}
