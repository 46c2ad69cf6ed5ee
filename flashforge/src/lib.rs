//! Rust client for the FlashForge LAN protocol.
//!
//! FlashForge printers (Adventurer 3/4/5, Finder, Guider and friends) speak a
//! line-oriented text protocol on TCP port 8899, and answer a UDP multicast
//! probe so they can be found on the local network. This crate provides the
//! connection handling, the command catalogue, the reply parsers and the
//! discovery exchange.

#![deny(missing_docs)]
#![deny(trivial_casts)]
#![deny(unused_import_braces)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod command;
pub mod discover;
mod error;
pub mod parser;
pub mod session;
pub mod snapshot;
pub mod tools;
pub mod transport;


pub use command::Command;
pub use discover::{DiscoveryClient, DiscoveryConfig, DiscoveryRecord};
pub use error::{Error, Result};
pub use session::{ConnectionState, DeviceSession};
pub use snapshot::DeviceSnapshot;
pub use tools::{TemperatureReading, ToolRegistry};
pub use transport::{ReplyFraming, Transport, TransportConfig};

/// Logger used by components constructed without one.
pub(crate) fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
