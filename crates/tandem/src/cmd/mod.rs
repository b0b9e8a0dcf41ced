use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde_json::Value;
use tandem::frame::DEFAULT_CHUNK_SIZE;
use tandem::peer::{PeerConfig, DEFAULT_COMPRESSION, DEFAULT_MAX_MESSAGE};

use crate::exit::CliResult;
use crate::logging::LogLevel;
use crate::output::OutputFormat;

pub mod agent;
pub mod call;
pub mod list;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo operations to a peer over stdio or a Unix socket.
    Agent(AgentArgs),
    /// Invoke an operation on an agent and print its result.
    Call(CallArgs),
    /// List the operations this build can run.
    List(ListArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Copy)]
pub struct Globals {
    pub format: OutputFormat,
    pub log_level: LogLevel,
}

pub async fn run(command: Command, globals: Globals) -> CliResult<i32> {
    match command {
        Command::Agent(args) => agent::run(args).await,
        Command::Call(args) => call::run(args, globals).await,
        Command::List(args) => list::run(args, globals.format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Size serialized messages are split into, in bytes.
    #[arg(long, env = "TANDEM_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Compression level for outgoing chunks (0-15, 0 disables).
    #[arg(long, env = "TANDEM_COMPRESSION", default_value_t = DEFAULT_COMPRESSION)]
    pub compression: u8,
    /// Largest message accepted from the peer after decompression, in bytes.
    #[arg(long, env = "TANDEM_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE)]
    pub max_message_size: usize,
}

impl ConnectionArgs {
    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            chunk_size: self.chunk_size,
            compression: self.compression,
            max_message_size: self.max_message_size,
            ..PeerConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Accept peers on this Unix socket instead of serving stdio.
    #[arg(long, value_name = "PATH")]
    pub listen: Option<PathBuf>,
    /// Only deploy the demo plugin; peers activate it with `tandem:Export`.
    #[arg(long)]
    pub on_demand: bool,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Qualified operation name, e.g. demo:Echo.
    pub operation: String,
    /// Operation parameter; the value is parsed as JSON, falling back to a string.
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,
    /// Connect to an agent on this Unix socket instead of spawning one.
    #[arg(long, value_name = "PATH")]
    pub connect: Option<PathBuf>,
    /// Activate the demo plugin on the agent before invoking.
    #[arg(long)]
    pub negotiate: bool,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
