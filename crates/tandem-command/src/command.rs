use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::Shared;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tandem_peer::Channel;
use tokio::sync::oneshot;

use crate::error::{CommandError, Result};
use crate::protocol::Fqin;
use crate::registry::Registry;

/// What the remote half produced: its value, or its formatted failure.
pub(crate) type Outcome = std::result::Result<Value, String>;

pub(crate) type OutcomeReceiver = Shared<oneshot::Receiver<Outcome>>;

/// A named operation with a local half and a remote half.
///
/// The implementing type is the parameter set: its `Default` declares the
/// parameter defaults and its serialized fields are the parameter names.
/// Every field should serialize, so that unknown names can be rejected.
///
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// #[serde(default)]
/// struct Echo { data: String }
///
/// #[async_trait]
/// impl Command for Echo {
///     const PLUGIN: &'static str = "demo";
///     const NAME: &'static str = "Echo";
///     type Output = Value;
///     type Remote = Value;
///
///     async fn local(&self, ctx: LocalContext<Value>) -> anyhow::Result<Value> {
///         Ok(ctx.remote().await?)
///     }
///
///     async fn remote(&self, _ctx: RemoteContext) -> anyhow::Result<Value> {
///         Ok(json!({ "echo": self.data }))
///     }
/// }
/// ```
#[async_trait]
pub trait Command: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Module name of the owning plugin.
    const PLUGIN: &'static str;
    /// Operation name within the plugin.
    const NAME: &'static str;

    /// What the local half returns to the caller.
    type Output: Serialize + DeserializeOwned + Send + 'static;
    /// What the remote half sends back.
    type Remote: Serialize + DeserializeOwned + Send + 'static;

    /// Runs on the initiating peer.
    async fn local(&self, ctx: LocalContext<Self::Remote>) -> anyhow::Result<Self::Output>;

    /// Runs on the receiving peer.
    async fn remote(&self, ctx: RemoteContext) -> anyhow::Result<Self::Remote>;

    fn qualified_name() -> String {
        format!("{}:{}", Self::PLUGIN, Self::NAME)
    }
}

/// Object-safe form of [`Command`] used when invoking by name.
#[async_trait]
pub trait ErasedCommand: Send + Sync {
    /// Current parameters as a JSON object.
    fn params(&self) -> serde_json::Result<Value>;

    async fn run_local(&self, ctx: LocalContext<Value>) -> anyhow::Result<Value>;

    async fn run_remote(&self, ctx: RemoteContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<C: Command> ErasedCommand for C {
    fn params(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    async fn run_local(&self, ctx: LocalContext<Value>) -> anyhow::Result<Value> {
        let output = <C as Command>::local(self, ctx.retype()).await?;
        Ok(serde_json::to_value(output)?)
    }

    async fn run_remote(&self, ctx: RemoteContext) -> anyhow::Result<Value> {
        let output = <C as Command>::remote(self, ctx).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Handle on the eventual outcome of an invocation's remote half.
pub struct RemoteFuture<T> {
    fqin: Fqin,
    outcome: OutcomeReceiver,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RemoteFuture<T> {
    fn clone(&self) -> Self {
        Self {
            fqin: self.fqin.clone(),
            outcome: self.outcome.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for RemoteFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFuture").field("fqin", &self.fqin).finish()
    }
}

impl<T> RemoteFuture<T> {
    pub(crate) fn new(fqin: Fqin, outcome: OutcomeReceiver) -> Self {
        Self {
            fqin,
            outcome,
            _marker: PhantomData,
        }
    }

    pub fn fqin(&self) -> &Fqin {
        &self.fqin
    }

    /// View the same outcome as a different type.
    pub fn retype<U>(self) -> RemoteFuture<U> {
        RemoteFuture::new(self.fqin, self.outcome)
    }

    /// Wait for the outcome as untyped JSON.
    pub async fn value(&self) -> Result<Value> {
        match self.outcome.clone().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(trace)) => Err(CommandError::RemoteFailure {
                fqin: self.fqin.clone(),
                trace,
            }),
            Err(_) => Err(CommandError::AbandonedInvocation(self.fqin.clone())),
        }
    }
}

impl<T: DeserializeOwned> RemoteFuture<T> {
    /// Wait for the remote half and decode its value.
    ///
    /// Can be awaited any number of times; every wait sees the same outcome.
    pub async fn result(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value().await?)?)
    }
}

/// What the local half of an invocation gets to work with.
pub struct LocalContext<T> {
    pub(crate) fqin: Fqin,
    pub(crate) channel: Channel,
    pub(crate) remote: RemoteFuture<T>,
    pub(crate) registry: Arc<Registry>,
}

impl<T> LocalContext<T> {
    pub fn fqin(&self) -> &Fqin {
        &self.fqin
    }

    /// The invocation's private channel, shared with the remote half.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn remote_future(&self) -> &RemoteFuture<T> {
        &self.remote
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn retype<U>(self) -> LocalContext<U> {
        LocalContext {
            fqin: self.fqin,
            channel: self.channel,
            remote: self.remote.retype(),
            registry: self.registry,
        }
    }
}

impl<T: DeserializeOwned> LocalContext<T> {
    /// Wait for the remote half's value.
    pub async fn remote(&self) -> Result<T> {
        self.remote.result().await
    }
}

/// What the remote half of an invocation gets to work with.
pub struct RemoteContext {
    pub(crate) fqin: Fqin,
    pub(crate) channel: Channel,
    pub(crate) registry: Arc<Registry>,
}

impl RemoteContext {
    pub fn fqin(&self) -> &Fqin {
        &self.fqin
    }

    /// The invocation's private channel, shared with the local half.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

type Factory = fn(Value) -> serde_json::Result<Arc<dyn ErasedCommand>>;

fn instantiate_as<C: Command>(params: Value) -> serde_json::Result<Arc<dyn ErasedCommand>> {
    let command: C = serde_json::from_value(params)?;
    Ok(Arc::new(command))
}

/// A registered operation: its names, declared defaults and constructor.
pub struct CommandDefinition {
    plugin: String,
    name: String,
    qualified_name: String,
    defaults: Value,
    factory: Factory,
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("qualified_name", &self.qualified_name)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl CommandDefinition {
    /// Describe `C`, capturing its default parameters.
    pub fn of<C: Command>() -> Result<Self> {
        let defaults = serde_json::to_value(C::default())?;
        Ok(Self {
            plugin: C::PLUGIN.to_string(),
            name: C::NAME.to_string(),
            qualified_name: C::qualified_name(),
            defaults,
            factory: instantiate_as::<C>,
        })
    }

    /// Module name of the owning plugin.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `plugin:Operation` using the plugin's module name.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Declared parameter defaults.
    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    /// Build an instance from `params` overlaid on the defaults.
    ///
    /// `null` counts as no parameters. Names the operation does not declare
    /// are rejected.
    pub fn instantiate(&self, params: Value) -> Result<Arc<dyn ErasedCommand>> {
        let invalid = |reason: String| CommandError::InvalidParams {
            name: self.qualified_name.clone(),
            reason,
        };

        let supplied = match params {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => return Err(invalid(format!("expected an object, got {other}"))),
        };

        let merged = match &self.defaults {
            Value::Object(defaults) => {
                let mut merged = defaults.clone();
                for (key, value) in supplied {
                    if !defaults.contains_key(&key) {
                        return Err(invalid(format!("unknown parameter `{key}`")));
                    }
                    merged.insert(key, value);
                }
                Value::Object(merged)
            }
            other => {
                if let Some(key) = supplied.keys().next() {
                    return Err(invalid(format!("unknown parameter `{key}`")));
                }
                other.clone()
            }
        };

        (self.factory)(merged).map_err(|err| invalid(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(default)]
    struct Greet {
        who: String,
        times: u32,
    }

    impl Default for Greet {
        fn default() -> Self {
            Self {
                who: "world".into(),
                times: 1,
            }
        }
    }

    #[async_trait]
    impl Command for Greet {
        const PLUGIN: &'static str = "test";
        const NAME: &'static str = "Greet";
        type Output = String;
        type Remote = String;

        async fn local(&self, ctx: LocalContext<String>) -> anyhow::Result<String> {
            Ok(ctx.remote().await?)
        }

        async fn remote(&self, _ctx: RemoteContext) -> anyhow::Result<String> {
            Ok(format!("hello {}", self.who).repeat(self.times as usize))
        }
    }

    #[test]
    fn test_definition_captures_defaults() {
        let definition = CommandDefinition::of::<Greet>().unwrap();
        assert_eq!(definition.qualified_name(), "test:Greet");
        assert_eq!(definition.plugin(), "test");
        assert_eq!(definition.name(), "Greet");
        assert_eq!(definition.defaults(), &json!({"who": "world", "times": 1}));
    }

    #[test]
    fn test_params_overlay_defaults() {
        let definition = CommandDefinition::of::<Greet>().unwrap();
        let command = definition.instantiate(json!({"who": "tandem"})).unwrap();
        assert_eq!(command.params().unwrap(), json!({"who": "tandem", "times": 1}));

        let command = definition.instantiate(Value::Null).unwrap();
        assert_eq!(command.params().unwrap(), json!({"who": "world", "times": 1}));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let definition = CommandDefinition::of::<Greet>().unwrap();
        let err = definition.instantiate(json!({"whom": "x"})).err().unwrap();
        assert!(
            matches!(err, CommandError::InvalidParams { reason, .. } if reason.contains("whom"))
        );
    }

    #[test]
    fn test_mistyped_param_rejected() {
        let definition = CommandDefinition::of::<Greet>().unwrap();
        let err = definition.instantiate(json!({"times": "many"})).err().unwrap();
        assert!(matches!(err, CommandError::InvalidParams { .. }));
        let err = definition.instantiate(json!([1, 2])).err().unwrap();
        assert!(matches!(err, CommandError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn test_remote_future_outcomes() {
        use futures_util::FutureExt;

        let fqin = Fqin::new("test:Greet", tandem_frame::Uid::new());
        let (tx, rx) = oneshot::channel();
        let future: RemoteFuture<String> = RemoteFuture::new(fqin.clone(), rx.shared());
        tx.send(Ok(json!("done"))).unwrap();
        assert_eq!(future.result().await.unwrap(), "done");
        assert_eq!(future.clone().result().await.unwrap(), "done");

        let (tx, rx) = oneshot::channel::<Outcome>();
        let future: RemoteFuture<String> = RemoteFuture::new(fqin.clone(), rx.shared());
        tx.send(Err("trace".into())).unwrap();
        assert!(matches!(
            future.result().await,
            Err(CommandError::RemoteFailure { trace, .. }) if trace == "trace"
        ));

        let (tx, rx) = oneshot::channel::<Outcome>();
        let future: RemoteFuture<String> = RemoteFuture::new(fqin, rx.shared());
        drop(tx);
        assert!(matches!(
            future.result().await,
            Err(CommandError::AbandonedInvocation(_))
        ));
    }
}
