//! Serialized message writer
//!
//! Every outbound message is chunked into a scratch buffer and written with a
//! single `write_all` while the lock is held, so concurrent senders never
//! interleave chunks of different messages on the wire.

use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::protocol::chunk::{ChunkEncoder, RawMessage};
use crate::protocol::command::Command;
use crate::protocol::constants::{CSID_COMMAND, MSG_COMMAND_AMF0};

#[derive(Debug)]
struct WriterState<W> {
    io: W,
    encoder: ChunkEncoder,
    scratch: BytesMut,
}

/// Shared, cloneable handle to the write half of a connection
#[derive(Debug)]
pub struct MessageWriter<W> {
    state: Arc<Mutex<WriterState<W>>>,
}

impl<W> Clone for MessageWriter<W> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> MessageWriter<W> {
    pub fn new(io: W) -> Self {
        Self {
            state: Arc::new(Mutex::new(WriterState {
                io,
                encoder: ChunkEncoder::new(),
                scratch: BytesMut::with_capacity(8192),
            })),
        }
    }

    /// Chunk and write one message
    pub async fn send(&self, msg: &RawMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        let WriterState {
            io,
            encoder,
            scratch,
        } = &mut *state;

        scratch.clear();
        encoder.encode(msg, scratch)?;
        io.write_all(scratch).await?;
        io.flush().await?;

        tracing::trace!(
            csid = msg.csid,
            msg_type = msg.message_type,
            size = msg.payload.len(),
            "Message written"
        );
        Ok(())
    }

    /// Announce and switch the outbound chunk size
    ///
    /// The announcement itself still uses the old size; both happen under
    /// one lock so no message can slip in between.
    pub async fn set_chunk_size(&self, size: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let WriterState {
            io,
            encoder,
            scratch,
        } = &mut *state;

        scratch.clear();
        encoder.encode(&RawMessage::set_chunk_size(size), scratch)?;
        io.write_all(scratch).await?;
        io.flush().await?;
        encoder.set_chunk_size(size);

        tracing::debug!(chunk_size = encoder.chunk_size(), "Outbound chunk size set");
        Ok(())
    }

    /// Send an AMF0 command on the command chunk stream
    pub async fn send_command(&self, cmd: &Command, stream_id: u32) -> Result<()> {
        tracing::debug!(
            name = %cmd.name,
            transaction_id = cmd.transaction_id,
            stream_id = stream_id,
            "Sending command"
        );
        let msg = RawMessage::new(CSID_COMMAND, MSG_COMMAND_AMF0, stream_id, 0, cmd.encode()?);
        self.send(&msg).await
    }

    pub async fn chunk_size(&self) -> u32 {
        self.state.lock().await.encoder.chunk_size()
    }

    /// Flush and shut down the write direction
    pub async fn shutdown(&self) -> Result<()> {
        self.state.lock().await.io.shutdown().await?;
        Ok(())
    }
}
