use std::sync::Arc;

use serde_json::Value;
use tandem_peer::{Channel, IoQueues, PeerConfig, Pump};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::command::Command;
use crate::error::Result;
use crate::executor::{Executor, ExecutorHandle};
use crate::export::Export;
use crate::registry::{Capabilities, Registry};

/// One side of a connected pair of peers.
///
/// Owns the pump moving chunks over the connection and the executor loops
/// serving the other side's invocations. Both sides are symmetric: either may
/// invoke operations on the other at any time.
pub struct Session {
    executor: Executor,
    pump: Pump,
    loops: Option<ExecutorHandle>,
}

impl Session {
    /// Start a session over a connected reader/writer pair.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        registry: Arc<Registry>,
        config: PeerConfig,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        config.validate()?;
        let queues = IoQueues::new(config);
        let pump = Pump::spawn(queues.clone(), reader, writer)?;
        let executor = Executor::new(registry, queues);
        let loops = executor.start(pump.token());
        info!("session started");
        Ok(Self {
            executor,
            pump,
            loops: Some(loops),
        })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn queues(&self) -> &IoQueues {
        self.executor.queues()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.executor.registry()
    }

    /// Run `command` on both sides and return its local result.
    pub async fn invoke<C: Command>(&self, command: C) -> Result<C::Output> {
        self.executor.invoke(command).await
    }

    /// Run an operation by `plugin:Operation` name.
    pub async fn invoke_named(&self, qualified_name: &str, params: Value) -> Result<Value> {
        self.executor.invoke_named(qualified_name, params).await
    }

    /// Ask the peer to activate `plugin` from its deployed definitions.
    pub async fn negotiate(&self, plugin: &str) -> Result<Capabilities> {
        self.invoke(Export::new(plugin)).await
    }

    /// An application channel outside any invocation.
    pub fn channel(&self, name: &str) -> Channel {
        Channel::new(name, self.executor.queues().clone())
    }

    /// Token cancelled once the connection is gone.
    pub fn token(&self) -> CancellationToken {
        self.pump.token()
    }

    pub fn is_closed(&self) -> bool {
        self.executor.queues().is_closed()
    }

    /// Resolves once the connection is gone.
    pub async fn closed(&self) {
        self.pump.token().cancelled().await;
    }

    /// Wait for the connection to end and the executor to wind down.
    ///
    /// Returns the fatal error that ended the connection, if any.
    pub async fn wait(&mut self) -> Result<()> {
        let pumped = self.pump.wait().await;
        if let Some(mut loops) = self.loops.take() {
            loops.wait().await;
        }
        pumped?;
        Ok(())
    }

    /// Drop the connection and wait for everything to stop.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("session shutting down");
        self.pump.shutdown();
        self.wait().await
    }
}
