use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tandem_frame::Chunk;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::ack::AckRegistry;
use crate::config::PeerConfig;
use crate::error::{PeerError, Result};

/// Something the pump hands to a channel's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A reassembled, decoded message.
    Message(Value),
    /// The sender finished an iteration.
    EndOfIteration,
}

/// Receiving end of one channel's inbound queue.
pub type InboundReceiver = Arc<tokio::sync::Mutex<UnboundedReceiver<Delivery>>>;

struct Inbound {
    tx: Option<UnboundedSender<Delivery>>,
    rx: InboundReceiver,
}

impl Inbound {
    fn new(open: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: open.then_some(tx),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

/// Removed channel names remembered so late messages for them are dropped.
const RETIRED_CAPACITY: usize = 4096;

#[derive(Default)]
struct InboundTable {
    queues: HashMap<String, Inbound>,
    retired: HashSet<String>,
    retired_order: VecDeque<String>,
}

impl InboundTable {
    fn retire(&mut self, name: &str) {
        if !self.retired.insert(name.to_string()) {
            return;
        }
        self.retired_order.push_back(name.to_string());
        if self.retired_order.len() > RETIRED_CAPACITY {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }

    fn revive(&mut self, name: &str) {
        if self.retired.remove(name) {
            self.retired_order.retain(|retired| retired != name);
        }
    }
}

struct Outbound {
    tx: Option<UnboundedSender<Chunk>>,
    rx: Option<UnboundedReceiver<Chunk>>,
}

struct Inner {
    config: PeerConfig,
    outbound: Mutex<Outbound>,
    inbound: Mutex<InboundTable>,
    closed: AtomicBool,
    acks: AckRegistry,
}

/// The queues one side of a connection shares between its channels and its pump.
///
/// One outbound FIFO carries chunks from every channel, which fixes the write
/// order on the wire. Each channel name gets its own inbound FIFO, created on
/// first use.
#[derive(Clone)]
pub struct IoQueues {
    inner: Arc<Inner>,
}

impl Default for IoQueues {
    fn default() -> Self {
        Self::new(PeerConfig::default())
    }
}

impl IoQueues {
    pub fn new(config: PeerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                outbound: Mutex::new(Outbound {
                    tx: Some(tx),
                    rx: Some(rx),
                }),
                inbound: Mutex::new(InboundTable::default()),
                closed: AtomicBool::new(false),
                acks: AckRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    pub fn acks(&self) -> &AckRegistry {
        &self.inner.acks
    }

    /// Queue one chunk for the writer.
    pub fn enqueue(&self, chunk: Chunk) -> Result<()> {
        self.enqueue_all(std::iter::once(chunk))
    }

    /// Queue several chunks back to back, with no other channel's chunks in between.
    pub fn enqueue_all(&self, chunks: impl IntoIterator<Item = Chunk>) -> Result<()> {
        let outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = outbound.tx.as_ref().ok_or(PeerError::Disconnected)?;
        for chunk in chunks {
            tx.send(chunk).map_err(|_| PeerError::Disconnected)?;
        }
        Ok(())
    }

    /// Hand the outbound receiver to the pump. Only one pump may drain it.
    pub fn take_outbound(&self) -> Result<UnboundedReceiver<Chunk>> {
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rx
            .take()
            .ok_or(PeerError::PumpAlreadyStarted)
    }

    /// The inbound queue for `name`, created if absent.
    ///
    /// A queue created after [`close`](Self::close) is already closed. Asking
    /// for a removed name opens it again.
    pub fn inbound(&self, name: &str) -> InboundReceiver {
        let mut inbound = self.inner.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = inbound.queues.get(name) {
            return Arc::clone(&entry.rx);
        }
        inbound.revive(name);
        let entry = Inbound::new(!self.is_closed());
        let rx = Arc::clone(&entry.rx);
        inbound.queues.insert(name.to_string(), entry);
        rx
    }

    /// Push a delivery onto `name`'s queue, creating it for a consumer that
    /// has not asked yet.
    ///
    /// Returns `false` if the queue is closed or `name` was removed.
    pub fn deliver(&self, name: &str, delivery: Delivery) -> bool {
        let mut inbound = self.inner.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        if inbound.retired.contains(name) {
            debug!(channel = %name, "delivery to removed channel dropped");
            return false;
        }
        let closed = self.is_closed();
        let entry = inbound
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Inbound::new(!closed));
        match &entry.tx {
            Some(tx) => tx.send(delivery).is_ok(),
            None => false,
        }
    }

    /// Forget `name`'s queue. Undelivered messages are dropped, and so is
    /// anything that arrives for `name` afterwards. Idempotent.
    pub fn remove(&self, name: &str) {
        let mut inbound = self.inner.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        inbound.retire(name);
        if inbound.queues.remove(name).is_some() {
            debug!(channel = %name, "removed inbound queue");
        }
    }

    /// Whether a queue currently exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queues
            .contains_key(name)
    }

    /// Names with a live inbound queue.
    pub fn channel_names(&self) -> Vec<String> {
        self.inner
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queues
            .keys()
            .cloned()
            .collect()
    }

    /// Tear down after the connection ends.
    ///
    /// Further sends fail, every inbound consumer sees its queue end once it is
    /// drained, and outstanding acknowledgements are abandoned.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tx = None;
        for entry in self
            .inner
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queues
            .values_mut()
        {
            entry.tx = None;
        }
        self.inner.acks.abandon_all();
        debug!("io queues closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}
