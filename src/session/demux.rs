//! Inbound message demultiplexer
//!
//! A single task owns the read half and the chunk decoder. It applies
//! protocol control messages itself and routes the rest:
//!
//! ```text
//!                      ┌──► commands (unbounded)
//! socket ─► decoder ───┤
//!                      └──► audio / video / data as FLV tags (bounded)
//! ```
//!
//! When the task stops, both queues drain and then report the error that
//! stopped it.

use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::media::flv::FlvTag;
use crate::protocol::chunk::{parse_set_chunk_size, ChunkDecoder, RawMessage};
use crate::protocol::command::Command;
use crate::protocol::constants::*;

/// Capacity of the inbound media queue (tags)
pub const MEDIA_QUEUE_CAPACITY: usize = 1024;

/// Receiving side of a connection
#[derive(Debug)]
pub struct Demux {
    commands: mpsc::UnboundedReceiver<Command>,
    media: mpsc::Receiver<FlvTag>,
    task: Option<JoinHandle<Error>>,
}

impl Demux {
    /// Spawn the read loop over `reader`
    pub fn spawn<R>(reader: R, read_buffer_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (media_tx, media) = mpsc::channel(MEDIA_QUEUE_CAPACITY);

        let task = tokio::spawn(async move {
            let mut loop_state = ReadLoop {
                decoder: ChunkDecoder::new(),
                buf: BytesMut::with_capacity(read_buffer_size),
                command_tx,
                media_tx,
            };
            match loop_state.run(reader).await {
                Ok(()) => Error::ConnectionClosed,
                Err(e) => e,
            }
        });

        Self {
            commands,
            media,
            task: Some(task),
        }
    }

    /// Next command from the peer
    pub async fn recv_command(&mut self) -> Result<Command> {
        match self.commands.recv().await {
            Some(cmd) => Ok(cmd),
            None => Err(self.finish().await),
        }
    }

    /// Wait for the reply to `transaction_id`, dropping anything else
    pub async fn wait_reply(&mut self, transaction_id: f64) -> Result<Command> {
        loop {
            let cmd = self.recv_command().await?;
            if cmd.is_reply_to(transaction_id) {
                return Ok(cmd);
            }
            tracing::debug!(name = %cmd.name, transaction_id = cmd.transaction_id, "Skipping command");
        }
    }

    /// Next audio, video or data message as an FLV tag
    pub async fn recv_media(&mut self) -> Result<FlvTag> {
        match self.media.recv().await {
            Some(tag) => Ok(tag),
            None => Err(self.finish().await),
        }
    }

    /// Stop the read loop; tags already queued can still be received
    pub fn abort(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
        self.commands.close();
        self.media.close();
    }

    /// Error that stopped the read loop, once
    ///
    /// Later calls report [`Error::ConnectionClosed`].
    pub async fn finish(&mut self) -> Error {
        let Some(task) = self.task.take() else {
            return Error::ConnectionClosed;
        };
        match task.await {
            Ok(err) => err,
            Err(join) if join.is_cancelled() => Error::ConnectionClosed,
            Err(join) => Error::Io(io::Error::new(io::ErrorKind::Other, join)),
        }
    }
}

impl Drop for Demux {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

struct ReadLoop {
    decoder: ChunkDecoder,
    buf: BytesMut,
    command_tx: mpsc::UnboundedSender<Command>,
    media_tx: mpsc::Sender<FlvTag>,
}

impl ReadLoop {
    /// Returns `Ok` only when nobody listens anymore
    async fn run<R: AsyncRead + Unpin>(&mut self, mut reader: R) -> Result<()> {
        loop {
            while let Some(msg) = self.decoder.decode(&mut self.buf)? {
                if !self.dispatch(msg).await? {
                    return Ok(());
                }
            }

            let n = reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    tracing::debug!("Peer closed connection");
                    return Err(Error::ConnectionClosed);
                }
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
        }
    }

    /// Route one message; `false` once both queues are gone
    async fn dispatch(&mut self, msg: RawMessage) -> Result<bool> {
        tracing::trace!(
            csid = msg.csid,
            msg_type = msg.message_type,
            size = msg.payload.len(),
            "Message read"
        );

        match msg.message_type {
            MSG_SET_CHUNK_SIZE => {
                let size = parse_set_chunk_size(&msg.payload)?;
                self.decoder.set_chunk_size(size)?;
                tracing::debug!(chunk_size = size, "Inbound chunk size set");
            }
            MSG_ABORT => {
                if let Some(id) = msg.payload.get(..4) {
                    let csid = u32::from_be_bytes([id[0], id[1], id[2], id[3]]);
                    self.decoder.abort(csid);
                }
            }
            MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {
                let mut payload = msg.payload;
                if msg.message_type == MSG_COMMAND_AMF3 && !payload.is_empty() {
                    payload.advance(1);
                }
                match Command::decode(&payload) {
                    Ok(cmd) => {
                        tracing::debug!(
                            name = %cmd.name,
                            transaction_id = cmd.transaction_id,
                            "Command received"
                        );
                        // Media-only consumers may drop the command side
                        let _ = self.command_tx.send(cmd);
                    }
                    Err(e) => tracing::debug!(error = %e, "Skipping malformed command"),
                }
            }
            MSG_AUDIO | MSG_VIDEO | MSG_DATA_AMF0 | MSG_DATA_AMF3 => {
                let mut payload = msg.payload;
                let tag = match msg.message_type {
                    MSG_AUDIO => FlvTag::audio(msg.timestamp, payload),
                    MSG_VIDEO => FlvTag::video(msg.timestamp, payload),
                    _ => {
                        if msg.message_type == MSG_DATA_AMF3 && !payload.is_empty() {
                            payload.advance(1);
                        }
                        FlvTag::script(msg.timestamp, payload)
                    }
                };
                if self.media_tx.send(tag).await.is_err() && self.command_tx.is_closed() {
                    return Ok(false);
                }
            }
            other => {
                tracing::trace!(msg_type = other, "Ignoring control message");
            }
        }

        Ok(true)
    }
}
