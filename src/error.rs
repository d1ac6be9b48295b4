//! Top-level error type for hosts embedding the proxy.
//!
//! Each layer has its own error enum; [`ProxyError`] collects the ones a
//! host sees while starting and running the proxy. Splitter failures are
//! not part of it: a [`SplitError`](crate::splitter::SplitError) is answered
//! to the client as a RESP error reply and never ends the process.

use thiserror::Error;

use crate::{config::ConfigError, server::ServerError};

/// Failure starting or running the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The filter configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The TCP server failed.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// The metrics exporter could not be installed.
    #[error("metrics exporter: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_layer_errors_transparently() {
        let err = ProxyError::from(ConfigError::EmptyField("stat_prefix"));
        assert_eq!(err.to_string(), "config field 'stat_prefix' must not be empty");

        let err = ProxyError::from(ServerError::Bind(std::io::Error::other("in use")));
        assert_eq!(err.to_string(), "bind error: in use");
    }
}
