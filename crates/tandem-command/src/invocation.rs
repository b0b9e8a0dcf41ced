use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;

use crate::command::{CommandDefinition, ErasedCommand};
use crate::error::{CommandError, Result};
use crate::protocol::Fqin;

/// One run of an operation, owned by the task driving it.
pub struct Invocation {
    fqin: Fqin,
    definition: Arc<CommandDefinition>,
    command: Arc<dyn ErasedCommand>,
    params: Value,
    table: InvocationTable,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("fqin", &self.fqin)
            .field("params", &self.params)
            .finish()
    }
}

impl Invocation {
    pub fn fqin(&self) -> &Fqin {
        &self.fqin
    }

    pub fn definition(&self) -> &Arc<CommandDefinition> {
        &self.definition
    }

    pub fn command(&self) -> &Arc<dyn ErasedCommand> {
        &self.command
    }

    /// Effective parameters, defaults included.
    pub fn params(&self) -> &Value {
        &self.params
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        let mut entries = self.table.lock();
        let ours = entries
            .get(&self.fqin)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), self));
        if ours {
            entries.remove(&self.fqin);
        }
    }
}

/// Live invocations by FQIN.
///
/// The table holds no ownership: an entry disappears when the task that owns
/// the invocation lets go of it.
#[derive(Clone, Default)]
pub struct InvocationTable {
    entries: Arc<Mutex<HashMap<Fqin, Weak<Invocation>>>>,
}

impl InvocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fqin, Weak<Invocation>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new invocation. Fails if `fqin` is already live.
    pub fn track(
        &self,
        fqin: Fqin,
        definition: Arc<CommandDefinition>,
        command: Arc<dyn ErasedCommand>,
    ) -> Result<Arc<Invocation>> {
        let params = command.params()?;
        let mut entries = self.lock();
        if entries
            .get(&fqin)
            .is_some_and(|weak| weak.strong_count() > 0)
        {
            return Err(CommandError::AlreadyRegistered(fqin.to_string()));
        }
        let invocation = Arc::new(Invocation {
            fqin: fqin.clone(),
            definition,
            command,
            params,
            table: self.clone(),
        });
        entries.insert(fqin, Arc::downgrade(&invocation));
        Ok(invocation)
    }

    pub fn get(&self, fqin: &Fqin) -> Option<Arc<Invocation>> {
        self.lock().get(fqin).and_then(Weak::upgrade)
    }

    /// FQINs of the invocations still running.
    pub fn live(&self) -> Vec<Fqin> {
        self.lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(fqin, _)| fqin.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
