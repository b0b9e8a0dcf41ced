//! Named-channel multiplexing over one byte stream.
//!
//! Every channel on one side shares a single outbound queue; the pump writes
//! it to the stream in order and routes reassembled messages from the stream
//! into per-channel inbound queues. Messages may request an acknowledgement,
//! which resolves with the measured round trip.

pub mod ack;
pub mod channel;
pub mod config;
pub mod error;
pub mod pump;
pub mod queues;

pub use ack::{Ack, AckRegistry};
pub use channel::Channel;
pub use config::{PeerConfig, SendOptions, DEFAULT_COMPRESSION, DEFAULT_MAX_MESSAGE};
pub use error::{PeerError, Result};
pub use pump::{communicate, Pump};
pub use queues::{Delivery, InboundReceiver, IoQueues};
