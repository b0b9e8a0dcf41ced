//! Two-sided commands over a tandem connection.
//!
//! An operation is a type implementing [`Command`]: its local half runs on the
//! peer that invokes it, its remote half on the other peer, and the two talk
//! over a private channel named after the invocation. Operations are grouped
//! into plugins and looked up by `plugin:Operation` name in a [`Registry`].
//!
//! A [`Session`] wires a registry to a connection and serves the other side's
//! invocations while letting this side make its own.

pub mod command;
pub mod error;
pub mod executor;
pub mod export;
pub mod invocation;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod session;

pub use command::{
    Command, CommandDefinition, ErasedCommand, LocalContext, RemoteContext, RemoteFuture,
};
pub use error::{CommandError, Result};
pub use executor::{Executor, ExecutorHandle};
pub use export::Export;
pub use invocation::{Invocation, InvocationTable};
pub use pending::PendingInvocations;
pub use protocol::{Fqin, InvocationRequest, RemoteResult, EXECUTE_CHANNEL, RESULT_CHANNEL};
pub use registry::{
    Capabilities, Entry, Plugin, PluginDescriptor, Registry, BUILTIN_PLUGIN, SEPARATOR,
};
pub use session::Session;
