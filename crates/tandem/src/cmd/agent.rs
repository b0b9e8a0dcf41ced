use std::sync::Arc;

use tandem::command::{Registry, Session};
use tandem::demo;
use tandem::peer::PeerConfig;
use tandem::transport::Connection;
use tracing::info;

use crate::cmd::AgentArgs;
use crate::exit::{command_error, peer_error, CliResult, SUCCESS};

pub async fn run(args: AgentArgs) -> CliResult<i32> {
    let config = args.connection.peer_config();
    config
        .validate()
        .map_err(|err| peer_error("invalid configuration", err))?;

    let registry = Registry::new();
    let installed = if args.on_demand {
        demo::deploy(&registry)
    } else {
        demo::register(&registry)
    };
    installed.map_err(|err| command_error("registering operations", err))?;
    let registry = Arc::new(registry);

    match &args.listen {
        Some(path) => serve_socket(path, registry, config).await,
        None => serve_stdio(registry, config).await,
    }
}

async fn serve_stdio(registry: Arc<Registry>, config: PeerConfig) -> CliResult<i32> {
    let (reader, writer) = Connection::stdio().into_split();
    let mut session = Session::start(reader, writer, registry, config)
        .map_err(|err| command_error("starting session", err))?;
    info!("agent serving stdio");

    let interrupted = tokio::select! {
        result = session.wait() => {
            result.map_err(|err| command_error("session failed", err))?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        info!("interrupted, stopping agent");
        session
            .shutdown()
            .await
            .map_err(|err| command_error("session failed", err))?;
    }
    info!("agent stopped");
    Ok(SUCCESS)
}

#[cfg(unix)]
async fn serve_socket(
    path: &std::path::Path,
    registry: Arc<Registry>,
    config: PeerConfig,
) -> CliResult<i32> {
    use tandem::transport::SocketListener;
    use tokio::task::JoinSet;
    use tracing::warn;

    use crate::exit::transport_error;

    let listener = SocketListener::bind(path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = %path.display(), "agent listening");

    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let connection = accepted.map_err(|err| transport_error("accept failed", err))?;
                let (reader, writer) = connection.into_split();
                let registry = Arc::clone(&registry);
                let mut session = Session::start(reader, writer, registry, config.clone())
                    .map_err(|err| command_error("starting session", err))?;
                info!(peers = sessions.len() + 1, "peer connected");
                sessions.spawn(async move { session.wait().await });
            }
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => match finished {
                Ok(Ok(())) => info!("peer disconnected"),
                Ok(Err(err)) => warn!(error = %err, "peer session failed"),
                Err(err) => warn!(error = %err, "peer session task ended abnormally"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping agent");
                break;
            }
        }
    }

    sessions.shutdown().await;
    Ok(SUCCESS)
}

#[cfg(not(unix))]
async fn serve_socket(
    _path: &std::path::Path,
    _registry: Arc<Registry>,
    _config: PeerConfig,
) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "--listen requires Unix domain sockets",
    ))
}
