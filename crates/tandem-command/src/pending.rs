use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::command::{Outcome, OutcomeReceiver};
use crate::error::{CommandError, Result};
use crate::protocol::{Fqin, RemoteResult};

#[derive(Default)]
struct Table {
    entries: HashMap<Fqin, oneshot::Sender<Outcome>>,
    closed: bool,
}

/// Local halves waiting for their remote result.
#[derive(Default)]
pub struct PendingInvocations {
    table: Mutex<Table>,
}

impl PendingInvocations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for `fqin`. Must happen before the request is sent.
    pub(crate) fn register(&self, fqin: &Fqin) -> Result<OutcomeReceiver> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.closed {
            return Err(CommandError::AbandonedInvocation(fqin.clone()));
        }
        let (tx, rx) = oneshot::channel();
        table.entries.insert(fqin.clone(), tx);
        Ok(rx.shared())
    }

    /// Hand a remote result to whoever is waiting for it.
    pub fn resolve(&self, result: RemoteResult) -> bool {
        let entry = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .remove(&result.fqin);
        let Some(tx) = entry else {
            debug!(fqin = %result.fqin, "result for unknown invocation");
            return false;
        };

        let outcome = if result.failed {
            let trace = result.traceback.unwrap_or_default();
            error!(fqin = %result.fqin, %trace, "remote failure");
            Err(trace)
        } else {
            Ok(result.result.unwrap_or_default())
        };
        if tx.send(outcome).is_err() {
            debug!(fqin = %result.fqin, "result arrived after the caller went away");
        }
        true
    }

    /// Stop waiting for `fqin`.
    pub fn remove(&self, fqin: &Fqin) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .remove(fqin);
    }

    /// Abandon every pending invocation and refuse new ones.
    pub fn cancel_all(&self) {
        let abandoned = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.closed = true;
            std::mem::take(&mut table.entries)
        };
        for fqin in abandoned.keys() {
            warn!(%fqin, "teardown abandoned pending invocation");
        }
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tandem_frame::Uid;

    use super::*;
    use crate::command::RemoteFuture;

    fn fqin() -> Fqin {
        Fqin::new("demo:Echo", Uid::new())
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let pending = PendingInvocations::new();
        let fqin = fqin();
        let future: RemoteFuture<serde_json::Value> =
            RemoteFuture::new(fqin.clone(), pending.register(&fqin).unwrap());

        assert!(pending.resolve(RemoteResult::success(fqin, json!({"ok": true}))));
        assert_eq!(future.result().await.unwrap(), json!({"ok": true}));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_failure_carries_trace() {
        let pending = PendingInvocations::new();
        let fqin = fqin();
        let future: RemoteFuture<()> =
            RemoteFuture::new(fqin.clone(), pending.register(&fqin).unwrap());

        pending.resolve(RemoteResult::failure(fqin, "division by zero".into()));
        let err = future.result().await.unwrap_err();
        assert!(
            matches!(err, CommandError::RemoteFailure { trace, .. } if trace == "division by zero")
        );
    }

    #[test]
    fn test_unknown_result_ignored() {
        let pending = PendingInvocations::new();
        assert!(!pending.resolve(RemoteResult::success(fqin(), json!(null))));
    }

    #[tokio::test]
    async fn test_cancel_all_abandons() {
        let pending = PendingInvocations::new();
        let fqin = fqin();
        let future: RemoteFuture<()> =
            RemoteFuture::new(fqin.clone(), pending.register(&fqin).unwrap());

        pending.cancel_all();
        assert!(matches!(
            future.result().await,
            Err(CommandError::AbandonedInvocation(_))
        ));
        assert!(matches!(
            pending.register(&fqin),
            Err(CommandError::AbandonedInvocation(_))
        ));
    }

    #[test]
    fn test_remove_releases_entry() {
        let pending = PendingInvocations::new();
        let fqin = fqin();
        let _rx = pending.register(&fqin).unwrap();
        pending.remove(&fqin);
        assert!(pending.is_empty());
    }
}
