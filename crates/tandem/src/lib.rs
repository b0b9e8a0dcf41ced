//! Two-sided remote operations between paired processes.
//!
//! tandem connects two processes over an ordered byte stream, multiplexes
//! named channels over it and runs operations whose halves execute on both
//! sides at once.
//!
//! # Crate Structure
//!
//! - [`frame`]: Checksummed, optionally compressed chunk framing
//! - [`transport`]: stdio, child-process pipes and Unix domain sockets
//! - [`peer`]: Named channels, acknowledgements and the transport pump
//! - [`command`]: Plugins, operations, invocation and sessions
//! - [`demo`]: Example operations (behind the `demo` feature)

/// Re-export frame types.
pub mod frame {
    pub use tandem_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use tandem_transport::*;
}

/// Re-export peer types.
pub mod peer {
    pub use tandem_peer::*;
}

/// Re-export command types.
pub mod command {
    pub use tandem_command::*;
}

#[cfg(feature = "demo")]
pub mod demo;

pub use tandem_command::{Command, CommandError, LocalContext, Registry, RemoteContext, Session};
pub use tandem_peer::{Channel, PeerConfig};
