use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tandem_frame::{decompress, Chunk, ChunkReader, ChunkWriter, FrameError, Uid};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PeerError, Result};
use crate::queues::{Delivery, IoQueues};

/// Moves chunks between a connected reader/writer pair and the queues.
///
/// The reader loop ending for any reason cancels the writer and closes the
/// queues. Dropping the pump cancels both loops.
pub struct Pump {
    token: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Pump {
    /// Start both loops on the current runtime.
    pub fn spawn<R, W>(queues: IoQueues, reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let outbound = queues.take_outbound()?;
        let frame_config = queues.config().frame_config();
        let reader = ChunkReader::with_config(reader, frame_config.clone());
        let writer = ChunkWriter::with_config(writer, frame_config);
        let token = CancellationToken::new();

        info!("pump started");
        let handle = tokio::spawn(communicate(queues, reader, writer, outbound, token.clone()));
        Ok(Self {
            token,
            handle: Some(handle),
        })
    }

    /// Token cancelled when the pump stops, for whatever reason.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Ask both loops to stop. Queued and partially received data is dropped.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the pump to stop.
    ///
    /// Returns the fatal error that stopped it, if any. A peer disconnecting is
    /// not an error. Later calls return `Ok(())`.
    pub async fn wait(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.await.map_err(|err| PeerError::Task(err.to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Run the reader loop in place and the writer loop as a task until either stops.
pub async fn communicate<R, W>(
    queues: IoQueues,
    reader: ChunkReader<R>,
    writer: ChunkWriter<W>,
    outbound: UnboundedReceiver<Chunk>,
    token: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let writer_task = tokio::spawn(write_loop(writer, outbound, token.clone()));
    let result = read_loop(&queues, reader, &token).await;

    queues.close();
    token.cancel();
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "writer loop failed"),
        Err(err) => warn!(error = %err, "writer task ended abnormally"),
    }
    info!(ok = result.is_ok(), "pump stopped");
    result
}

async fn write_loop<W>(
    mut writer: ChunkWriter<W>,
    mut outbound: UnboundedReceiver<Chunk>,
    token: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => {
                if !outbound.is_empty() {
                    warn!(pending = outbound.len(), "writer cancelled with chunks still queued");
                }
                break;
            }
            next = outbound.recv() => match next {
                Some(chunk) => chunk,
                None => break,
            },
        };

        debug!(
            uid = %chunk.uid,
            channel = chunk.channel_name.as_deref().unwrap_or("-"),
            bytes = chunk.payload.len(),
            eom = chunk.flags.eom,
            "writing chunk"
        );
        if let Err(err) = writer.write_chunk(chunk).await {
            token.cancel();
            return Err(err.into());
        }
    }

    if let Err(err) = writer.close().await {
        debug!(error = %err, "closing writer failed");
    }
    Ok(())
}

async fn read_loop<R>(
    queues: &IoQueues,
    mut reader: ChunkReader<R>,
    token: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin,
{
    let mut buffers: HashMap<Uid, BytesMut> = HashMap::new();

    let result = loop {
        let next = tokio::select! {
            _ = token.cancelled() => break Ok(()),
            next = reader.read_chunk() => next,
        };
        let chunk = match next {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                info!("peer closed the stream");
                break Ok(());
            }
            Err(err) if err.is_disconnect() => {
                warn!(error = %err, "peer disconnected mid-frame");
                break Ok(());
            }
            Err(err) => {
                error!(error = %err, "fatal framing error");
                break Err(err.into());
            }
        };
        if let Err(err) = route(queues, &mut buffers, chunk) {
            error!(error = %err, "fatal error while routing chunk");
            break Err(err);
        }
    };

    if !buffers.is_empty() {
        warn!(partial = buffers.len(), "dropping partially received messages");
    }
    result
}

/// Reassemble one chunk and hand completed messages to their channel.
fn route(queues: &IoQueues, buffers: &mut HashMap<Uid, BytesMut>, chunk: Chunk) -> Result<()> {
    let Chunk {
        uid,
        flags,
        channel_name,
        payload,
    } = chunk;
    debug!(
        %uid,
        channel = channel_name.as_deref().unwrap_or("-"),
        bytes = payload.len(),
        eom = flags.eom,
        "read chunk"
    );

    if !payload.is_empty() {
        let limit = queues.config().max_message_size;
        let buffer = buffers.entry(uid).or_default();
        let held = buffer.len();
        let budget = limit.saturating_sub(held);
        let data = if flags.is_compressed() {
            match decompress(&payload, budget) {
                Ok(data) => Bytes::from(data),
                Err(FrameError::PayloadTooLarge { size, .. }) => {
                    return Err(message_too_large(held + size, limit));
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            payload
        };
        if data.len() > budget {
            return Err(message_too_large(held + data.len(), limit));
        }
        buffer.extend_from_slice(&data);
    }

    if flags.send_ack {
        if let Err(err) = queues.enqueue(Chunk::ack(uid)) {
            debug!(%uid, error = %err, "could not queue acknowledgement");
        }
    }

    if !flags.eom {
        return Ok(());
    }
    if flags.recv_ack {
        queues.acks().resolve(uid);
        return Ok(());
    }

    let data = buffers.remove(&uid);
    let Some(name) = channel_name else {
        return Ok(());
    };
    if flags.stop_iter {
        queues.deliver(&name, Delivery::EndOfIteration);
        return Ok(());
    }
    let Some(data) = data else {
        debug!(%uid, channel = %name, "end of message without data");
        return Ok(());
    };
    match serde_json::from_slice(&data) {
        Ok(value) => {
            if !queues.deliver(&name, Delivery::Message(value)) {
                debug!(%uid, channel = %name, "channel closed; message dropped");
            }
        }
        Err(err) => warn!(%uid, channel = %name, error = %err, "undecodable message dropped"),
    }
    Ok(())
}

fn message_too_large(size: usize, max: usize) -> PeerError {
    PeerError::Frame(FrameError::PayloadTooLarge { size, max })
}
