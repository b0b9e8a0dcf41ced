use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tandem_frame::{compress, Chunk, ChunkFlags, FrameError, Uid, MAX_CHANNEL_NAME_LEN};
use tracing::debug;

use crate::ack::{self, Ack};
use crate::config::SendOptions;
use crate::error::{PeerError, Result};
use crate::queues::{Delivery, IoQueues};

/// A named, ordered stream of messages to and from the peer.
///
/// Channels hold nothing but their name and a handle to the queues, so they are
/// cheap to create and clone.
#[derive(Clone)]
pub struct Channel {
    name: Arc<str>,
    queues: IoQueues,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("name", &self.name).finish()
    }
}

impl Channel {
    pub fn new(name: impl Into<Arc<str>>, queues: IoQueues) -> Self {
        Self {
            name: name.into(),
            queues,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queues(&self) -> &IoQueues {
        &self.queues
    }

    /// Whether the name fits the wire: non-empty and within the 2-byte length field.
    ///
    /// Checked before anything is queued, so a bad name fails the call and
    /// leaves the connection alone.
    fn check_name(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(FrameError::InvalidChannelName.into());
        }
        if self.name.len() > MAX_CHANNEL_NAME_LEN {
            return Err(FrameError::ChannelNameTooLong {
                len: self.name.len(),
                max: MAX_CHANNEL_NAME_LEN,
            }
            .into());
        }
        Ok(())
    }

    /// Send `data` without waiting for delivery.
    pub async fn send<T: Serialize + ?Sized>(&self, data: &T) -> Result<Uid> {
        let (uid, _) = self.enqueue_message(data, SendOptions::default())?;
        Ok(uid)
    }

    /// Send `data` and wait until the peer acknowledges it.
    pub async fn send_ack<T: Serialize + ?Sized>(&self, data: &T) -> Result<Ack> {
        let (uid, pending) = self.enqueue_message(data, SendOptions::acked())?;
        match pending {
            Some(rx) => ack::wait_for(rx, uid).await,
            None => Err(PeerError::AckAbandoned(uid)),
        }
    }

    /// Send `data` with explicit options. Returns the acknowledgement if one was requested.
    pub async fn send_with<T: Serialize + ?Sized>(
        &self,
        data: &T,
        options: SendOptions,
    ) -> Result<Option<Ack>> {
        let (uid, pending) = self.enqueue_message(data, options)?;
        match pending {
            Some(rx) => ack::wait_for(rx, uid).await.map(Some),
            None => Ok(None),
        }
    }

    /// Send every item as its own message, then an end-of-iteration marker.
    pub async fn send_iter<I, T>(&self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let mut sent = 0;
        for item in items {
            self.send(&item).await?;
            sent += 1;
        }
        self.end_iteration()?;
        debug!(channel = %self.name, items = sent, "iteration sent");
        Ok(sent)
    }

    /// Queue an end-of-iteration marker after whatever was sent so far.
    pub fn end_iteration(&self) -> Result<()> {
        self.check_name()?;
        let marker = Chunk::new(
            Uid::new(),
            ChunkFlags::stop_iteration(),
            &self.name,
            Bytes::new(),
        );
        self.queues.enqueue(marker)
    }

    /// Serialize, split, compress and queue one message.
    ///
    /// The acknowledgement, if requested, is registered before the final chunk
    /// is queued.
    fn enqueue_message<T: Serialize + ?Sized>(
        &self,
        data: &T,
        options: SendOptions,
    ) -> Result<(Uid, Option<tokio::sync::oneshot::Receiver<Ack>>)> {
        self.check_name()?;
        let config = self.queues.config();
        let level = options.compression.unwrap_or(config.compression);
        let payload = serde_json::to_vec(data)?;
        let uid = Uid::new();

        let mut chunks = Vec::with_capacity(payload.len() / config.chunk_size.max(1) + 2);
        for piece in payload.chunks(config.chunk_size.max(1)) {
            let body = if level > 0 {
                Bytes::from(compress(piece, level)?)
            } else {
                Bytes::copy_from_slice(piece)
            };
            chunks.push(Chunk::new(uid, ChunkFlags::data(level), &self.name, body));
        }
        chunks.push(Chunk::new(
            uid,
            ChunkFlags::end_of_message(options.ack),
            &self.name,
            Bytes::new(),
        ));

        let pending = if options.ack {
            Some(self.queues.acks().register(uid)?)
        } else {
            None
        };
        let count = chunks.len();
        if let Err(err) = self.queues.enqueue_all(chunks) {
            self.queues.acks().forget(uid);
            return Err(err);
        }
        debug!(channel = %self.name, %uid, bytes = payload.len(), chunks = count, "message queued");
        Ok((uid, pending))
    }

    async fn next_delivery(&self) -> Result<Delivery> {
        self.check_name()?;
        let rx = self.queues.inbound(&self.name);
        let mut rx = rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| PeerError::ChannelClosed(self.name.to_string()))
    }

    /// Wait for the next message and decode it as `T`.
    ///
    /// An end-of-iteration marker is reported as `PeerError::EndOfIteration`.
    pub async fn receive<T: DeserializeOwned>(&self) -> Result<T> {
        match self.next_delivery().await? {
            Delivery::Message(value) => Ok(serde_json::from_value(value)?),
            Delivery::EndOfIteration => Err(PeerError::EndOfIteration(self.name.to_string())),
        }
    }

    /// Wait for the next message as untyped JSON.
    pub async fn receive_value(&self) -> Result<Value> {
        self.receive().await
    }

    /// Next item of an iteration, or `None` at its end marker.
    pub async fn next_item<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.next_delivery().await? {
            Delivery::Message(value) => Ok(Some(serde_json::from_value(value)?)),
            Delivery::EndOfIteration => Ok(None),
        }
    }

    /// Gather every item up to the next end-of-iteration marker.
    pub async fn collect_iteration<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Items as a stream that ends at the next end-of-iteration marker.
    ///
    /// An error is yielded once and ends the stream.
    pub fn stream<T>(&self) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        futures_util::stream::unfold(Some(self.clone()), |state| async move {
            let channel = state?;
            match channel.next_item::<T>().await {
                Ok(Some(item)) => Some((Ok(item), Some(channel))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Drop this channel's inbound queue and anything still in it.
    pub fn close(&self) {
        self.queues.remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tandem_frame::decompress;

    use super::*;
    use crate::config::PeerConfig;

    fn queues(chunk_size: usize, compression: u8) -> IoQueues {
        IoQueues::new(PeerConfig {
            chunk_size,
            compression,
            ..PeerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_send_splits_into_chunks() {
        let queues = queues(4, 0);
        let mut rx = queues.take_outbound().unwrap();
        let channel = Channel::new("split", queues);

        // "abcdefghij" serializes to 12 bytes: three data chunks plus the end marker.
        let uid = channel.send("abcdefghij").await.unwrap();
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }

        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.uid == uid));
        assert!(chunks.iter().all(|c| c.channel_name.as_deref() == Some("split")));
        assert!(chunks[..3].iter().all(|c| !c.flags.eom && c.payload.len() == 4));
        let last = &chunks[3];
        assert!(last.flags.eom && !last.flags.send_ack && last.payload.is_empty());

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.payload.to_vec()).collect();
        assert_eq!(joined, b"\"abcdefghij\"");
    }

    #[tokio::test]
    async fn test_chunks_compressed_independently() {
        let queues = queues(64, 3);
        let mut rx = queues.take_outbound().unwrap();
        let channel = Channel::new("zip", queues);

        let text = "z".repeat(200);
        channel.send(&text).await.unwrap();

        let mut joined = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            if chunk.flags.eom {
                break;
            }
            assert_eq!(chunk.flags.compression, 3);
            joined.extend(decompress(&chunk.payload, 64).unwrap());
        }
        assert_eq!(joined, serde_json::to_vec(&text).unwrap());
    }

    #[tokio::test]
    async fn test_per_send_compression_override() {
        let queues = queues(1024, 6);
        let mut rx = queues.take_outbound().unwrap();
        let channel = Channel::new("plain", queues);

        let options = SendOptions::default().with_compression(0);
        assert!(channel.send_with(&json!({"k": 1}), options).await.unwrap().is_none());
        let first = rx.try_recv().unwrap();
        assert_eq!(first.flags.compression, 0);
        assert_eq!(&first.payload[..], br#"{"k":1}"#);
    }

    #[tokio::test]
    async fn test_send_iter_ends_with_marker() {
        let queues = queues(1024, 0);
        let mut rx = queues.take_outbound().unwrap();
        let channel = Channel::new("iter", queues);

        assert_eq!(channel.send_iter([1, 2]).await.unwrap(), 2);
        let mut last = None;
        while let Ok(chunk) = rx.try_recv() {
            last = Some(chunk);
        }
        let marker = last.unwrap();
        assert!(marker.flags.stop_iter && marker.flags.eom);
        assert_eq!(marker.channel_name.as_deref(), Some("iter"));
        assert!(marker.payload.is_empty());
    }

    #[tokio::test]
    async fn test_receive_reports_end_of_iteration() {
        let queues = IoQueues::default();
        let channel = Channel::new("recv", queues.clone());
        queues.deliver("recv", Delivery::Message(json!({"n": 5})));
        queues.deliver("recv", Delivery::EndOfIteration);

        let value: Value = channel.receive().await.unwrap();
        assert_eq!(value, json!({"n": 5}));
        let err = channel.receive::<Value>().await.unwrap_err();
        assert!(matches!(err, PeerError::EndOfIteration(name) if name == "recv"));
    }

    #[tokio::test]
    async fn test_unsendable_names_rejected_before_queueing() {
        let queues = IoQueues::default();
        let mut rx = queues.take_outbound().unwrap();

        let long = Channel::new("n".repeat(MAX_CHANNEL_NAME_LEN + 1), queues.clone());
        let err = long.send_ack(&"x").await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::Frame(FrameError::ChannelNameTooLong { len: 65536, .. })
        ));
        assert!(long.end_iteration().is_err());

        let empty = Channel::new("", queues.clone());
        for result in [
            empty.send(&"x").await.map(|_| ()),
            empty.end_iteration(),
            empty.receive_value().await.map(|_| ()),
        ] {
            assert!(matches!(
                result,
                Err(PeerError::Frame(FrameError::InvalidChannelName))
            ));
        }

        assert!(rx.try_recv().is_err());
        assert!(queues.acks().is_empty());
        let longest = Channel::new("n".repeat(MAX_CHANNEL_NAME_LEN), queues);
        longest.send(&"x").await.unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let queues = IoQueues::default();
        let channel = Channel::new("late", queues.clone());
        queues.close();

        assert!(matches!(channel.send(&1).await, Err(PeerError::Disconnected)));
        assert!(matches!(
            channel.send_ack(&1).await,
            Err(PeerError::Disconnected)
        ));
        assert!(matches!(
            channel.receive_value().await,
            Err(PeerError::ChannelClosed(_))
        ));
    }
}
