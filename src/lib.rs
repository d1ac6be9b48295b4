//! Pipelining Redis proxy.
//!
//! Clients may pipeline any number of commands on one connection. Each
//! command is handed to a [`CommandSplitter`](splitter::CommandSplitter) as
//! soon as it is decoded, and replies are written back strictly in the order
//! the commands arrived, however the splitter orders its completions.
//!
//! - [`resp`] decodes and encodes the RESP wire format.
//! - [`filter`] holds the per-connection [`ProxyFilter`] state machine.
//! - [`splitter`] defines the splitter capability and two implementations.
//! - [`server`] drives filters over TCP with tokio.

pub mod config;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod resp;
pub mod server;
pub mod splitter;

pub use config::{ConfigError, ProxyFilterConfig, ProxyFilterConfigRef, ProxySettings};
pub use error::ProxyError;
pub use filter::{ConnectionEvent, DownstreamConnection, ProxyFilter};
pub use resp::{RespCodec, RespValue};
pub use server::{ProxyServer, ServerError, serve_connection};
pub use splitter::{
    CommandSplitter,
    CompletedRequest,
    Completion,
    RequestToken,
    SplitError,
    SplitRequest,
    SplitResult,
};
