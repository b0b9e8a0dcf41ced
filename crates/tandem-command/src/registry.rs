use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::command::{Command, CommandDefinition, ErasedCommand};
use crate::error::{CommandError, Result};
use crate::export::Export;

/// Separates the plugin from the operation in a qualified name.
pub const SEPARATOR: char = ':';

/// Module name of the built-in plugin.
pub const BUILTIN_PLUGIN: &str = "tandem";

/// A namespace of operations.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub module_name: String,
    /// Optional human-facing alias, also usable in qualified names.
    pub name: Option<String>,
    commands: BTreeMap<String, Arc<CommandDefinition>>,
}

impl Plugin {
    fn new(module_name: &str, name: Option<&str>) -> Self {
        Self {
            module_name: module_name.to_string(),
            name: name.map(str::to_string),
            commands: BTreeMap::new(),
        }
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.module_name.as_str())
            .chain(self.name.as_deref().filter(|name| *name != self.module_name))
    }

    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            module_name: self.module_name.clone(),
            name: self.name.clone(),
            commands: self.commands.keys().cloned().collect(),
        }
    }
}

/// A plugin as exchanged between peers: names only, no behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub module_name: String,
    pub name: Option<String>,
    /// Operation names, unqualified.
    pub commands: Vec<String>,
}

/// What a peer can run after activating a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Registered plugin module names.
    pub plugins: Vec<String>,
    /// Every qualified operation name the peer accepts.
    pub commands: Vec<String>,
    /// Requested operations the peer has no definition for.
    pub missing: Vec<String>,
}

/// Result of [`Registry::lookup`].
#[derive(Debug, Clone)]
pub enum Entry {
    Plugin(PluginDescriptor),
    Command(Arc<CommandDefinition>),
}

#[derive(Default)]
struct Tables {
    plugins: Vec<Plugin>,
    plugin_index: HashMap<String, usize>,
    commands: HashMap<String, Arc<CommandDefinition>>,
    /// Deployed but not yet active, keyed by module-qualified name.
    catalog: HashMap<String, Arc<CommandDefinition>>,
}

impl Tables {
    fn plugin_slot(&mut self, module_name: &str, name: Option<&str>) -> Result<usize> {
        if let Some(&slot) = self.plugin_index.get(module_name) {
            let plugin = &mut self.plugins[slot];
            if plugin.module_name != module_name {
                return Err(CommandError::AlreadyRegistered(module_name.to_string()));
            }
            if let Some(name) = name {
                match &plugin.name {
                    Some(existing) if existing != name => {
                        return Err(CommandError::AlreadyRegistered(format!(
                            "{module_name} (as {existing})"
                        )));
                    }
                    Some(_) => {}
                    None => {
                        if self.plugin_index.contains_key(name) {
                            return Err(CommandError::AlreadyRegistered(name.to_string()));
                        }
                        plugin.name = Some(name.to_string());
                        self.plugin_index.insert(name.to_string(), slot);
                        let aliases: Vec<String> = plugin
                            .commands
                            .iter()
                            .map(|(op, _)| format!("{name}{SEPARATOR}{op}"))
                            .collect();
                        let definitions: Vec<Arc<CommandDefinition>> =
                            plugin.commands.values().cloned().collect();
                        for (alias, definition) in aliases.into_iter().zip(definitions) {
                            self.commands.insert(alias, definition);
                        }
                    }
                }
            }
            return Ok(slot);
        }

        if let Some(name) = name {
            if self.plugin_index.contains_key(name) {
                return Err(CommandError::AlreadyRegistered(name.to_string()));
            }
        }
        let slot = self.plugins.len();
        let plugin = Plugin::new(module_name, name);
        for alias in plugin.names() {
            self.plugin_index.insert(alias.to_string(), slot);
        }
        info!(plugin = %module_name, alias = ?name, "plugin registered");
        self.plugins.push(plugin);
        Ok(slot)
    }

    fn bind(&mut self, slot: usize, definition: Arc<CommandDefinition>) -> Result<()> {
        let plugin = &self.plugins[slot];
        let qualified: Vec<String> = plugin
            .names()
            .map(|alias| format!("{alias}{SEPARATOR}{}", definition.name()))
            .collect();
        if let Some(taken) = qualified.iter().find(|q| self.commands.contains_key(*q)) {
            return Err(CommandError::AlreadyRegistered(taken.clone()));
        }
        for name in qualified {
            self.commands.insert(name, Arc::clone(&definition));
        }
        debug!(command = %definition.qualified_name(), "command bound");
        self.plugins[slot]
            .commands
            .insert(definition.name().to_string(), definition);
        Ok(())
    }
}

/// Plugins and their operations, keyed by qualified name.
///
/// Populated at startup, read during steady-state operation and cleared on
/// teardown. Operations compiled into the process but not yet active live in
/// the catalog until a peer asks for them with [`Export`].
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry holding only the built-in plugin.
    pub fn new() -> Self {
        let registry = Self::empty();
        // The built-in table is fixed, so binding it cannot collide.
        let _ = registry.register::<Export>();
        registry
    }

    /// A registry with nothing in it, not even the built-ins.
    pub fn empty() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or update a plugin, indexing it under its module name and alias.
    pub fn register_plugin(&self, module_name: &str, name: Option<&str>) -> Result<()> {
        self.write().plugin_slot(module_name, name).map(|_| ())
    }

    /// Activate `C`, creating its plugin if needed.
    pub fn register<C: Command>(&self) -> Result<()> {
        let definition = Arc::new(CommandDefinition::of::<C>()?);
        let mut tables = self.write();
        let slot = tables.plugin_slot(C::PLUGIN, None)?;
        tables.bind(slot, definition)
    }

    /// Make `C` available for activation by a peer without activating it.
    pub fn deploy<C: Command>(&self) -> Result<()> {
        let definition = Arc::new(CommandDefinition::of::<C>()?);
        let qualified = definition.qualified_name().to_string();
        debug!(command = %qualified, "command deployed");
        self.write().catalog.insert(qualified, definition);
        Ok(())
    }

    /// Activate a plugin from deployed definitions.
    ///
    /// Operations already active are kept; operations with no deployed
    /// definition are reported in `missing`.
    pub fn activate(&self, descriptor: &PluginDescriptor) -> Result<Capabilities> {
        let mut missing = Vec::new();
        {
            let mut tables = self.write();
            let slot = tables.plugin_slot(&descriptor.module_name, descriptor.name.as_deref())?;
            for op in &descriptor.commands {
                if tables.plugins[slot].commands.contains_key(op) {
                    continue;
                }
                let qualified = format!("{}{SEPARATOR}{op}", descriptor.module_name);
                match tables.catalog.get(&qualified).cloned() {
                    Some(definition) => tables.bind(slot, definition)?,
                    None => missing.push(qualified),
                }
            }
        }
        info!(plugin = %descriptor.module_name, missing = missing.len(), "plugin activated");
        Ok(Capabilities {
            plugins: self.plugin_names(),
            commands: self.command_names(),
            missing,
        })
    }

    /// Describe a registered plugin by module name or alias.
    pub fn describe(&self, plugin: &str) -> Result<PluginDescriptor> {
        let tables = self.read();
        let slot = tables
            .plugin_index
            .get(plugin)
            .ok_or_else(|| CommandError::NotFound(plugin.to_string()))?;
        Ok(tables.plugins[*slot].descriptor())
    }

    /// Resolve `plugin` or `plugin:Operation`.
    pub fn lookup(&self, qualified: &str) -> Result<Entry> {
        let (plugin_name, op) = match qualified.split_once(SEPARATOR) {
            Some((plugin, op)) => (plugin, Some(op)),
            None => (qualified, None),
        };
        let tables = self.read();
        let slot = tables
            .plugin_index
            .get(plugin_name)
            .ok_or_else(|| CommandError::NotFound(plugin_name.to_string()))?;
        let plugin = &tables.plugins[*slot];
        match op {
            None => Ok(Entry::Plugin(plugin.descriptor())),
            Some(op) => plugin
                .commands
                .get(op)
                .map(|definition| Entry::Command(Arc::clone(definition)))
                .ok_or_else(|| CommandError::NotFound(qualified.to_string())),
        }
    }

    /// The definition active under `qualified`.
    pub fn definition(&self, qualified: &str) -> Result<Arc<CommandDefinition>> {
        self.read()
            .commands
            .get(qualified)
            .cloned()
            .ok_or_else(|| CommandError::UnknownOperation(qualified.to_string()))
    }

    /// Build an instance of `qualified` from `params`.
    pub fn instantiate(&self, qualified: &str, params: Value) -> Result<Arc<dyn ErasedCommand>> {
        self.definition(qualified)?.instantiate(params)
    }

    /// Every active qualified name, aliases included, sorted.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered plugin module names, sorted.
    pub fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .plugins
            .iter()
            .map(|plugin| plugin.module_name.clone())
            .collect();
        names.sort();
        names
    }

    /// One entry per active operation, sorted by module-qualified name.
    pub fn definitions(&self) -> Vec<Arc<CommandDefinition>> {
        let tables = self.read();
        let mut definitions: Vec<Arc<CommandDefinition>> = tables
            .plugins
            .iter()
            .flat_map(|plugin| plugin.commands.values().cloned())
            .collect();
        definitions.sort_by(|a, b| a.qualified_name().cmp(b.qualified_name()));
        definitions
    }

    /// Drop every plugin, operation and deployed definition.
    pub fn clear(&self) {
        *self.write() = Tables::default();
        debug!("registry cleared");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::command::{LocalContext, RemoteContext};

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct Ping {
        note: String,
    }

    #[async_trait]
    impl Command for Ping {
        const PLUGIN: &'static str = "net.tools";
        const NAME: &'static str = "Ping";
        type Output = Value;
        type Remote = Value;

        async fn local(&self, ctx: LocalContext<Value>) -> anyhow::Result<Value> {
            Ok(ctx.remote().await?)
        }

        async fn remote(&self, _ctx: RemoteContext) -> anyhow::Result<Value> {
            Ok(json!("pong"))
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Trace {}

    #[async_trait]
    impl Command for Trace {
        const PLUGIN: &'static str = "net.tools";
        const NAME: &'static str = "Trace";
        type Output = ();
        type Remote = ();

        async fn local(&self, _ctx: LocalContext<()>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn remote(&self, _ctx: RemoteContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builtins_present() {
        let registry = Registry::new();
        assert_eq!(registry.plugin_names(), vec!["tandem".to_string()]);
        assert!(registry.definition("tandem:Export").is_ok());
        assert!(Registry::empty().plugin_names().is_empty());
    }

    #[test]
    fn test_register_binds_under_module_and_alias() {
        let registry = Registry::empty();
        registry.register_plugin("net.tools", Some("net")).unwrap();
        registry.register::<Ping>().unwrap();

        let by_module = registry.definition("net.tools:Ping").unwrap();
        let by_alias = registry.definition("net:Ping").unwrap();
        assert!(Arc::ptr_eq(&by_module, &by_alias));
        assert_eq!(registry.command_names(), vec!["net.tools:Ping", "net:Ping"]);
    }

    #[test]
    fn test_alias_added_after_commands() {
        let registry = Registry::empty();
        registry.register::<Ping>().unwrap();
        registry.register_plugin("net.tools", Some("net")).unwrap();
        assert!(registry.definition("net:Ping").is_ok());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = Registry::empty();
        registry.register::<Ping>().unwrap();
        assert!(matches!(
            registry.register::<Ping>(),
            Err(CommandError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_lookup_plugin_and_command() {
        let registry = Registry::empty();
        registry.register_plugin("net.tools", Some("net")).unwrap();
        registry.register::<Ping>().unwrap();

        match registry.lookup("net").unwrap() {
            Entry::Plugin(descriptor) => {
                assert_eq!(descriptor.module_name, "net.tools");
                assert_eq!(descriptor.commands, vec!["Ping".to_string()]);
            }
            Entry::Command(_) => panic!("expected a plugin"),
        }
        assert!(matches!(
            registry.lookup("net.tools:Ping").unwrap(),
            Entry::Command(definition) if definition.name() == "Ping"
        ));
        assert!(matches!(
            registry.lookup("nope"),
            Err(CommandError::NotFound(name)) if name == "nope"
        ));
        assert!(matches!(
            registry.lookup("net:Nope"),
            Err(CommandError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_operation() {
        let registry = Registry::new();
        assert!(matches!(
            registry.definition("demo:Missing"),
            Err(CommandError::UnknownOperation(name)) if name == "demo:Missing"
        ));
        assert!(registry.instantiate("demo:Missing", Value::Null).is_err());
    }

    #[test]
    fn test_deploy_then_activate() {
        let registry = Registry::new();
        registry.deploy::<Ping>().unwrap();
        assert!(registry.definition("net.tools:Ping").is_err());

        let descriptor = PluginDescriptor {
            module_name: "net.tools".into(),
            name: Some("net".into()),
            commands: vec!["Ping".into(), "Trace".into()],
        };
        let caps = registry.activate(&descriptor).unwrap();
        assert_eq!(caps.plugins, vec!["net.tools".to_string(), "tandem".to_string()]);
        assert!(caps.commands.contains(&"net:Ping".to_string()));
        assert_eq!(caps.missing, vec!["net.tools:Trace".to_string()]);

        registry.deploy::<Trace>().unwrap();
        let caps = registry.activate(&descriptor).unwrap();
        assert!(caps.missing.is_empty());
        assert!(registry.definition("net:Trace").is_ok());
    }

    #[test]
    fn test_definitions_listed_once() {
        let registry = Registry::new();
        registry.register_plugin("net.tools", Some("net")).unwrap();
        registry.register::<Ping>().unwrap();
        registry.register::<Trace>().unwrap();

        let names: Vec<String> = registry
            .definitions()
            .iter()
            .map(|d| d.qualified_name().to_string())
            .collect();
        assert_eq!(names, vec!["net.tools:Ping", "net.tools:Trace", "tandem:Export"]);
    }

    #[test]
    fn test_clear() {
        let registry = Registry::new();
        registry.clear();
        assert!(registry.plugin_names().is_empty());
        assert!(registry.command_names().is_empty());
    }
}
