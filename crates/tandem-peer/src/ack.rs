use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tandem_frame::Uid;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{PeerError, Result};

/// Confirmation that the peer received a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub uid: Uid,
    /// Time from message creation to the acknowledgement arriving.
    pub round_trip: Duration,
}

#[derive(Default)]
struct AckTable {
    pending: HashMap<Uid, oneshot::Sender<Ack>>,
    closed: bool,
}

/// Correlates message identities with their pending acknowledgements.
///
/// A waiter that gives up simply drops its receiver; the entry is then
/// discarded when the acknowledgement arrives or the connection closes.
#[derive(Default)]
pub struct AckRegistry {
    table: Mutex<AckTable>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a completion signal for `uid`.
    ///
    /// Fails with `Disconnected` once the connection has closed.
    pub fn register(&self, uid: Uid) -> Result<oneshot::Receiver<Ack>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.closed {
            return Err(PeerError::Disconnected);
        }
        let (tx, rx) = oneshot::channel();
        if table.pending.insert(uid, tx).is_some() {
            warn!(%uid, "replaced an existing acknowledgement entry");
        }
        Ok(rx)
    }

    /// Resolve the signal for `uid` with the round trip measured from its
    /// embedded timestamp. Returns `false` if nothing was registered.
    pub fn resolve(&self, uid: Uid) -> bool {
        let entry = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .remove(&uid);
        let Some(tx) = entry else {
            debug!(%uid, "acknowledgement for unknown message");
            return false;
        };
        let ack = Ack {
            uid,
            round_trip: uid.elapsed(),
        };
        debug!(%uid, round_trip = ?ack.round_trip, "acknowledged");
        if tx.send(ack).is_err() {
            debug!(%uid, "acknowledgement arrived after the waiter went away");
        }
        true
    }

    /// Drop the entry for `uid` without resolving it.
    pub fn forget(&self, uid: Uid) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .remove(&uid);
    }

    /// Fail every outstanding entry and refuse new ones.
    pub fn abandon_all(&self) {
        let abandoned = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.closed = true;
            std::mem::take(&mut table.pending)
        };
        for uid in abandoned.keys() {
            warn!(%uid, "acknowledgement abandoned");
        }
    }

    /// Number of acknowledgements still outstanding.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wait for an acknowledgement registered under `uid`.
pub(crate) async fn wait_for(rx: oneshot::Receiver<Ack>, uid: Uid) -> Result<Ack> {
    rx.await.map_err(|_| PeerError::AckAbandoned(uid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_then_resolve() {
        let registry = AckRegistry::new();
        let uid = Uid::new();
        let rx = registry.register(uid).unwrap();
        assert_eq!(registry.len(), 1);

        assert!(registry.resolve(uid));
        let ack = wait_for(rx, uid).await.unwrap();
        assert_eq!(ack.uid, uid);
        assert!(ack.round_trip < Duration::from_secs(5));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_unknown_is_noop() {
        let registry = AckRegistry::new();
        assert!(!registry.resolve(Uid::new()));
    }

    #[test]
    fn test_second_resolve_finds_nothing() {
        let registry = AckRegistry::new();
        let uid = Uid::new();
        let _rx = registry.register(uid).unwrap();
        assert!(registry.resolve(uid));
        assert!(!registry.resolve(uid));
    }

    #[test]
    fn test_resolve_after_waiter_dropped() {
        let registry = AckRegistry::new();
        let uid = Uid::new();
        drop(registry.register(uid).unwrap());
        assert!(registry.resolve(uid));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_abandon_fails_waiters() {
        let registry = AckRegistry::new();
        let uid = Uid::new();
        let rx = registry.register(uid).unwrap();

        registry.abandon_all();
        let err = wait_for(rx, uid).await.unwrap_err();
        assert!(matches!(err, PeerError::AckAbandoned(u) if u == uid));
        assert!(matches!(
            registry.register(Uid::new()),
            Err(PeerError::Disconnected)
        ));
    }

    #[test]
    fn test_forget_removes_entry() {
        let registry = AckRegistry::new();
        let uid = Uid::new();
        let _rx = registry.register(uid).unwrap();
        registry.forget(uid);
        assert!(!registry.resolve(uid));
    }
}
