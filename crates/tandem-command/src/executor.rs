use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tandem_frame::Uid;
use tandem_peer::{Channel, IoQueues, PeerError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{Command, LocalContext, RemoteContext, RemoteFuture};
use crate::error::{CommandError, Result};
use crate::invocation::{Invocation, InvocationTable};
use crate::pending::PendingInvocations;
use crate::protocol::{Fqin, InvocationRequest, RemoteResult, EXECUTE_CHANNEL, RESULT_CHANNEL};
use crate::registry::Registry;

/// Drives invocations over one connection, on both the initiating and the
/// receiving side.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<Registry>,
    queues: IoQueues,
    invocations: InvocationTable,
    pending: Arc<PendingInvocations>,
}

/// Clears an initiator's per-invocation state however the local half ends.
struct LocalCleanup<'a> {
    executor: &'a Executor,
    fqin: &'a Fqin,
}

impl Drop for LocalCleanup<'_> {
    fn drop(&mut self) {
        self.executor.queues.remove(&self.fqin.channel_name());
        self.executor.pending.remove(self.fqin);
    }
}

impl Executor {
    pub fn new(registry: Arc<Registry>, queues: IoQueues) -> Self {
        Self {
            registry,
            queues,
            invocations: InvocationTable::new(),
            pending: Arc::new(PendingInvocations::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn queues(&self) -> &IoQueues {
        &self.queues
    }

    pub fn invocations(&self) -> &InvocationTable {
        &self.invocations
    }

    pub fn pending(&self) -> &PendingInvocations {
        &self.pending
    }

    /// Instantiate `fqin.name` with `params` and start tracking it.
    ///
    /// Fails with `UnknownOperation` if the name is not registered.
    pub fn create_invocation(&self, fqin: Fqin, params: Value) -> Result<Arc<Invocation>> {
        let definition = self.registry.definition(&fqin.name)?;
        let command = definition.instantiate(params)?;
        self.invocations.track(fqin, definition, command)
    }

    /// Invoke an operation by qualified name with JSON parameters.
    pub async fn invoke_named(&self, qualified_name: &str, params: Value) -> Result<Value> {
        let invocation = self.create_invocation(Fqin::new(qualified_name, Uid::new()), params)?;
        self.run_local(invocation).await
    }

    /// Invoke `command` and decode its local result.
    pub async fn invoke<C: Command>(&self, command: C) -> Result<C::Output> {
        let qualified_name = C::qualified_name();
        let definition = self.registry.definition(&qualified_name)?;
        let fqin = Fqin::new(qualified_name, Uid::new());
        let invocation = self.invocations.track(fqin, definition, Arc::new(command))?;
        let value = self.run_local(invocation).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn run_local(&self, invocation: Arc<Invocation>) -> Result<Value> {
        let fqin = invocation.fqin().clone();
        let abandoned = |err: PeerError| match err {
            PeerError::AckAbandoned(_) | PeerError::Disconnected => {
                CommandError::AbandonedInvocation(fqin.clone())
            }
            other => other.into(),
        };

        let outcome = self.pending.register(&fqin)?;
        let _cleanup = LocalCleanup {
            executor: self,
            fqin: &fqin,
        };
        let remote = RemoteFuture::<Value>::new(fqin.clone(), outcome);

        let request = InvocationRequest {
            fqin: fqin.clone(),
            params: invocation.params().clone(),
        };
        let ack = Channel::new(EXECUTE_CHANNEL, self.queues.clone())
            .send_ack(&request)
            .await
            .map_err(abandoned)?;
        debug!(%fqin, round_trip = ?ack.round_trip, "invocation request delivered");

        let ctx = LocalContext {
            fqin: fqin.clone(),
            channel: Channel::new(fqin.channel_name(), self.queues.clone()),
            remote: remote.clone(),
            registry: Arc::clone(&self.registry),
        };
        let value = match invocation.command().run_local(ctx).await {
            Ok(value) => value,
            Err(err) => return Err(self.local_failure(&fqin, err)),
        };
        // Surface a remote failure even if the local half never looked.
        remote.value().await?;
        Ok(value)
    }

    fn local_failure(&self, fqin: &Fqin, err: anyhow::Error) -> CommandError {
        match err.downcast::<CommandError>() {
            Ok(err) => err,
            Err(_) if self.queues.is_closed() => CommandError::AbandonedInvocation(fqin.clone()),
            Err(err) => {
                let trace = format!("{err:?}");
                error!(%fqin, %trace, "local half failed");
                CommandError::LocalFailure {
                    fqin: fqin.clone(),
                    trace,
                }
            }
        }
    }

    /// Spawn the control loop and the result correlation loop.
    pub fn start(&self, token: CancellationToken) -> ExecutorHandle {
        let mut tasks = JoinSet::new();
        tasks.spawn(self.clone().serve(token.clone()));
        tasks.spawn(self.clone().correlate(token.clone()));
        ExecutorHandle { token, tasks }
    }

    /// Receive invocation requests and run their remote halves until the
    /// control channel closes or `token` is cancelled.
    pub async fn serve(self, token: CancellationToken) {
        let control = Channel::new(EXECUTE_CHANNEL, self.queues.clone());
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        info!("control loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            error!(error = %err, "remote task panicked");
                        }
                    }
                }
                received = control.receive_value() => match received {
                    Ok(value) => self.dispatch(&mut tasks, value),
                    Err(PeerError::EndOfIteration(_)) => continue,
                    Err(err) => {
                        debug!(error = %err, "control channel ended");
                        break;
                    }
                },
            }
        }

        if !tasks.is_empty() {
            warn!(running = tasks.len(), "aborting remote invocations");
        }
        tasks.shutdown().await;
        self.queues.remove(EXECUTE_CHANNEL);
        info!("control loop stopped");
    }

    fn dispatch(&self, tasks: &mut JoinSet<Result<()>>, value: Value) {
        let request: InvocationRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "malformed invocation request dropped");
                return;
            }
        };
        let fqin = request.fqin.clone();
        debug!(%fqin, "invocation requested");

        match self.create_invocation(request.fqin, request.params) {
            Ok(invocation) => {
                tasks.spawn(self.clone().run_remote(invocation));
            }
            Err(err) => {
                warn!(%fqin, error = %err, "rejecting invocation");
                let result = RemoteResult::failure(fqin, err.to_string());
                let results = Channel::new(RESULT_CHANNEL, self.queues.clone());
                tasks.spawn(async move {
                    results.send(&result).await?;
                    Ok::<_, CommandError>(())
                });
            }
        }
    }

    /// Run one remote half and report its outcome to the initiator.
    ///
    /// A failure is reported and then also returned.
    async fn run_remote(self, invocation: Arc<Invocation>) -> Result<()> {
        let fqin = invocation.fqin().clone();
        let channel_name = fqin.channel_name();
        let ctx = RemoteContext {
            fqin: fqin.clone(),
            channel: Channel::new(channel_name.clone(), self.queues.clone()),
            registry: Arc::clone(&self.registry),
        };

        let outcome = AssertUnwindSafe(invocation.command().run_remote(ctx))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(Ok(value)) => RemoteResult::success(fqin.clone(), value),
            Ok(Err(err)) => {
                let trace = format!("{err:?}");
                error!(%fqin, %trace, "remote half failed");
                RemoteResult::failure(fqin.clone(), trace)
            }
            Err(panic) => {
                let trace = format!("panicked: {}", panic_message(panic.as_ref()));
                error!(%fqin, %trace, "remote half panicked");
                RemoteResult::failure(fqin.clone(), trace)
            }
        };

        let sent = Channel::new(RESULT_CHANNEL, self.queues.clone())
            .send(&result)
            .await;
        self.queues.remove(&channel_name);
        sent?;

        match result.traceback {
            Some(trace) if result.failed => Err(CommandError::RemoteFailure { fqin, trace }),
            _ => {
                debug!(%fqin, "remote half finished");
                Ok(())
            }
        }
    }

    /// Resolve pending invocations from incoming results until the result
    /// channel closes or `token` is cancelled, then abandon what is left.
    pub async fn correlate(self, token: CancellationToken) {
        let results = Channel::new(RESULT_CHANNEL, self.queues.clone());
        loop {
            let received = tokio::select! {
                biased;
                received = results.receive_value() => received,
                _ = token.cancelled() => break,
            };
            match received {
                Ok(value) => match serde_json::from_value::<RemoteResult>(value) {
                    Ok(result) => {
                        self.pending.resolve(result);
                    }
                    Err(err) => warn!(error = %err, "malformed remote result dropped"),
                },
                Err(PeerError::EndOfIteration(_)) => continue,
                Err(err) => {
                    debug!(error = %err, "result channel ended");
                    break;
                }
            }
        }
        self.pending.cancel_all();
        self.queues.remove(RESULT_CHANNEL);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

/// The executor's running loops.
pub struct ExecutorHandle {
    token: CancellationToken,
    tasks: JoinSet<()>,
}

impl ExecutorHandle {
    /// Wait for both loops to stop on their own.
    pub async fn wait(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "executor loop ended abnormally");
            }
        }
    }

    /// Stop both loops and wait for them.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tandem_peer::Delivery;

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct Double {
        n: i64,
    }

    #[async_trait]
    impl Command for Double {
        const PLUGIN: &'static str = "math";
        const NAME: &'static str = "Double";
        type Output = i64;
        type Remote = i64;

        async fn local(&self, ctx: LocalContext<i64>) -> anyhow::Result<i64> {
            Ok(ctx.remote().await?)
        }

        async fn remote(&self, _ctx: RemoteContext) -> anyhow::Result<i64> {
            Ok(self.n * 2)
        }
    }

    fn executor() -> Executor {
        let registry = Arc::new(Registry::new());
        registry.register::<Double>().unwrap();
        Executor::new(registry, IoQueues::default())
    }

    #[tokio::test]
    async fn test_unknown_operation_sends_nothing() {
        let executor = executor();
        let mut outbound = executor.queues().take_outbound().unwrap();

        let err = executor
            .invoke_named("math:Triple", json!({"n": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::UnknownOperation(name) if name == "math:Triple"));
        assert!(outbound.try_recv().is_err());
        assert!(executor.invocations().is_empty());
        assert!(executor.pending().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_params_send_nothing() {
        let executor = executor();
        let mut outbound = executor.queues().take_outbound().unwrap();

        let err = executor
            .invoke_named("math:Double", json!({"m": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidParams { .. }));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_connection_abandons() {
        let executor = executor();
        executor.queues().close();

        let err = executor.invoke(Double { n: 2 }).await.unwrap_err();
        assert!(matches!(err, CommandError::AbandonedInvocation(_)));
        assert!(executor.pending().is_empty());
        assert!(executor.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_remote_half_reports_result() {
        let executor = executor();
        let mut outbound = executor.queues().take_outbound().unwrap();
        let fqin = Fqin::new("math:Double", Uid::new());
        let invocation = executor
            .create_invocation(fqin.clone(), json!({"n": 21}))
            .unwrap();

        executor.clone().run_remote(invocation).await.unwrap();
        assert!(executor.invocations().is_empty());

        let first = outbound.try_recv().unwrap();
        assert_eq!(first.channel_name.as_deref(), Some(RESULT_CHANNEL));
        assert!(!executor.queues().contains(&fqin.channel_name()));

        // A straggler for the finished invocation must not bring its queue back.
        let late = Delivery::Message(json!("late"));
        assert!(!executor.queues().deliver(&fqin.channel_name(), late));
        assert!(!executor.queues().contains(&fqin.channel_name()));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
