//! Command splitting capability consumed by the proxy filter.
//!
//! A [`CommandSplitter`] receives one decoded command together with a
//! one-shot [`Completion`] and eventually reports exactly one reply for it,
//! unless the returned [`SplitRequest`] is cancelled first. Replies flow back
//! to the owning connection as [`CompletedRequest`] messages over an
//! unbounded channel, so completions may be produced on any task or thread.

pub mod loopback;
pub mod task;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::resp::RespValue;

pub use loopback::LoopbackSplitter;
pub use task::TaskSplitter;

/// Identifies one submitted command within its connection.
///
/// Tokens are issued in strictly increasing order and never reused, so a
/// token that outlives its request can never address a newer one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(pub(crate) u64);

impl RequestToken {
    /// Raw sequence number of the token.
    #[must_use]
    pub fn sequence(self) -> u64 { self.0 }
}

/// Failure reported by a splitter in place of a reply.
///
/// Failures occupy the request's slot in the pipeline and are written to
/// the client as RESP error replies.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    /// The command is not supported by the splitter.
    #[error("ERR unsupported command '{0}'")]
    UnsupportedCommand(String),
    /// The command was not a non-empty array of bulk strings.
    #[error("ERR invalid request")]
    InvalidRequest,
    /// No backend was available to serve the command.
    #[error("ERR no upstream host")]
    NoUpstreamHost,
    /// The backend failed while serving the command.
    #[error("ERR upstream failure: {0}")]
    Upstream(String),
}

/// Outcome of one split request.
pub type SplitResult = Result<RespValue, SplitError>;

/// Message delivered to a connection when a request finishes.
#[derive(Debug)]
pub struct CompletedRequest {
    /// Request the reply belongs to.
    pub token: RequestToken,
    /// Reply or failure produced by the splitter.
    pub result: SplitResult,
}

/// Sending half of a connection's completion channel.
pub type CompletionSender = mpsc::UnboundedSender<CompletedRequest>;
/// Receiving half of a connection's completion channel.
pub type CompletionReceiver = mpsc::UnboundedReceiver<CompletedRequest>;

/// Create the completion channel for one connection.
#[must_use]
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) { mpsc::unbounded_channel() }

/// One-shot callback bound to a single submitted command.
#[derive(Debug)]
pub struct Completion {
    token: RequestToken,
    tx: CompletionSender,
}

impl Completion {
    pub(crate) fn new(token: RequestToken, tx: CompletionSender) -> Self { Self { token, tx } }

    /// Token of the request this completion answers.
    #[must_use]
    pub fn token(&self) -> RequestToken { self.token }

    /// Deliver the outcome of the request.
    ///
    /// Delivery to a connection that has already gone away is discarded.
    pub fn complete(self, result: SplitResult) {
        let Self { token, tx } = self;
        if tx.send(CompletedRequest { token, result }).is_err() {
            log::trace!("completion dropped after connection teardown: token={token:?}");
        }
    }

    /// Deliver a successful reply.
    pub fn respond(self, value: RespValue) { self.complete(Ok(value)); }
}

/// Handle to an in-flight split request.
pub trait SplitRequest: Send {
    /// Cancel the request.
    ///
    /// After this returns the request's [`Completion`] must never be
    /// delivered.
    fn cancel(self: Box<Self>);
}

/// Maps decoded commands onto backend work.
#[cfg_attr(test, mockall::automock)]
pub trait CommandSplitter: Send + Sync {
    /// Start processing `command`.
    ///
    /// Returns `None` when the request was answered before `submit`
    /// returned and there is nothing left to cancel.
    fn submit(&self, command: RespValue, completion: Completion) -> Option<Box<dyn SplitRequest>>;
}
