use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to a printer or searching for one.
///
/// Every transport-level variant is raised only after the underlying socket
/// has been closed, so the next request starts from a fresh connection.
#[derive(Debug, Error)]
pub enum Error {
    /// The TCP handshake did not complete within the connect timeout.
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// `host:port` that was dialled.
        addr: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The printer actively refused the connection.
    #[error("connection to {addr} refused")]
    ConnectRefused {
        /// `host:port` that was dialled.
        addr: String,
        /// OS-level cause.
        #[source]
        source: std::io::Error,
    },

    /// Any other OS-level failure to reach the printer (no route, bad
    /// address, name resolution).
    #[error("{addr} is unreachable: {source}")]
    Unreachable {
        /// `host:port` that was dialled.
        addr: String,
        /// OS-level cause.
        #[source]
        source: std::io::Error,
    },

    /// Writing a command failed (reset, broken pipe).
    #[error("failed to write command: {0}")]
    Write(#[source] std::io::Error),

    /// Reading a reply failed (reset, unexpected end of stream).
    #[error("failed to read reply: {0}")]
    Read(#[source] std::io::Error),

    /// No reply bytes arrived within the read timeout.
    #[error("no reply within {timeout:?}")]
    ReadTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A reply grew past the configured size bound without completing.
    #[error("reply exceeded {limit} bytes without a terminal marker")]
    ReplyOverflow {
        /// The configured bound.
        limit: usize,
    },

    /// Setting up the discovery socket failed.
    #[error("discovery socket error: {0}")]
    Discovery(#[source] std::io::Error),
}

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
