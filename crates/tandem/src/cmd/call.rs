use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tandem::command::{Registry, Session};
use tandem::demo;
use tandem::transport::Connection;
use tokio::process::Child;
use tracing::{debug, warn};

use crate::cmd::{CallArgs, Globals};
use crate::exit::{command_error, io_error, peer_error, transport_error, CliResult, SUCCESS};
use crate::output::print_value;

/// How long a spawned agent gets to exit after the session closes.
const AGENT_EXIT_GRACE: Duration = Duration::from_secs(5);

pub async fn run(args: CallArgs, globals: Globals) -> CliResult<i32> {
    let config = args.connection.peer_config();
    config
        .validate()
        .map_err(|err| peer_error("invalid configuration", err))?;

    let registry = Registry::new();
    demo::register(&registry).map_err(|err| command_error("registering operations", err))?;
    // Reject unknown operations and bad parameters before starting an agent.
    registry
        .instantiate(&args.operation, params_object(&args.params))
        .map_err(|err| command_error("call failed", err))?;

    let (child, connection) = open(&args, globals).await?;
    let (reader, writer) = connection.into_split();
    let session = Session::start(reader, writer, Arc::new(registry), config)
        .map_err(|err| command_error("starting session", err))?;

    let result = invoke(&session, &args).await;
    if let Err(err) = session.shutdown().await {
        warn!(error = %err, "session ended with an error");
    }
    if let Some(child) = child {
        reap(child).await;
    }

    let value = result?;
    print_value(&value, globals.format);
    Ok(SUCCESS)
}

async fn invoke(session: &Session, args: &CallArgs) -> CliResult<Value> {
    if args.negotiate {
        let capabilities = session
            .negotiate(demo::PLUGIN)
            .await
            .map_err(|err| command_error("negotiation failed", err))?;
        debug!(
            commands = ?capabilities.commands,
            missing = ?capabilities.missing,
            "agent capabilities"
        );
    }
    session
        .invoke_named(&args.operation, params_object(&args.params))
        .await
        .map_err(|err| command_error("call failed", err))
}

async fn open(args: &CallArgs, globals: Globals) -> CliResult<(Option<Child>, Connection)> {
    if let Some(path) = &args.connect {
        return connect(path).await.map(|connection| (None, connection));
    }

    let exe = std::env::current_exe().map_err(|err| io_error("locating tandem executable", err))?;
    let agent_args = [
        "--log-level".to_string(),
        globals.log_level.as_arg().to_string(),
        "agent".to_string(),
        "--chunk-size".to_string(),
        args.connection.chunk_size.to_string(),
        "--compression".to_string(),
        args.connection.compression.to_string(),
    ];
    let (child, connection) = tandem::transport::spawn(exe, agent_args)
        .map_err(|err| transport_error("starting agent failed", err))?;
    Ok((Some(child), connection))
}

#[cfg(unix)]
async fn connect(path: &std::path::Path) -> CliResult<Connection> {
    tandem::transport::connect(path)
        .await
        .map_err(|err| transport_error("connect failed", err))
}

#[cfg(not(unix))]
async fn connect(_path: &std::path::Path) -> CliResult<Connection> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "--connect requires Unix domain sockets",
    ))
}

async fn reap(mut child: Child) {
    match tokio::time::timeout(AGENT_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "agent exited"),
        Ok(Err(err)) => warn!(error = %err, "waiting for agent failed"),
        Err(_) => {
            warn!("agent did not exit, killing it");
            let _ = child.kill().await;
        }
    }
}

fn params_object(params: &[(String, Value)]) -> Value {
    Value::Object(params.iter().cloned().collect::<Map<String, Value>>())
}
