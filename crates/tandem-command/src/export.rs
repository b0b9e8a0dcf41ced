use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::command::{Command, LocalContext, RemoteContext};
use crate::registry::{Capabilities, PluginDescriptor, BUILTIN_PLUGIN};

/// Capability negotiation: ask the peer to activate a plugin.
///
/// The local half describes the plugin as registered here and sends the
/// description over the invocation channel. The remote half activates it from
/// the definitions it has deployed and reports what it can now run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Export {
    /// Module name or alias of the plugin to activate.
    pub plugin: String,
}

impl Export {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }
}

#[async_trait]
impl Command for Export {
    const PLUGIN: &'static str = BUILTIN_PLUGIN;
    const NAME: &'static str = "Export";
    type Output = Capabilities;
    type Remote = Capabilities;

    async fn local(&self, ctx: LocalContext<Capabilities>) -> anyhow::Result<Capabilities> {
        let descriptor = ctx.registry().describe(&self.plugin)?;
        ctx.channel().send(&descriptor).await?;
        let capabilities = ctx.remote().await?;
        if !capabilities.missing.is_empty() {
            info!(plugin = %self.plugin, missing = ?capabilities.missing, "peer lacks operations");
        }
        Ok(capabilities)
    }

    async fn remote(&self, ctx: RemoteContext) -> anyhow::Result<Capabilities> {
        let descriptor: PluginDescriptor = ctx.channel().receive().await?;
        Ok(ctx.registry().activate(&descriptor)?)
    }
}
