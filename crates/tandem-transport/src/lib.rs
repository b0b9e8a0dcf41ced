//! Byte-stream transports for tandem peers.
//!
//! A peer needs nothing more than an ordered, reliable pair of byte streams.
//! This crate provides the ones tandem ships with:
//! - The current process's stdin/stdout
//! - A spawned child process's stdin/stdout
//! - Unix domain sockets (Linux/macOS) for long-lived agents

pub mod connection;
pub mod error;
pub mod pipe;

#[cfg(unix)]
pub mod uds;

pub use connection::{BoxReader, BoxWriter, Connection};
pub use error::{Result, TransportError};
pub use pipe::spawn;

#[cfg(unix)]
pub use uds::{connect, SocketListener};
