//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks for multiplexing. Each chunk has a header
//! that identifies the chunk stream and message being sent.
//!
//! ```text
//! Chunk Format:
//! +--------------+------------------+---------------+
//! | Basic Header | Message Header   | Chunk Data    |
//! | (1-3 bytes)  | (0,3,7,11 bytes) | (<= chunk sz) |
//! +--------------+------------------+---------------+
//!
//! Basic Header formats:
//! - 1 byte:  fmt(2) + csid(6)        for csid 2-63
//! - 2 bytes: fmt(2) + 0 + csid(8)    for csid 64-319
//! - 3 bytes: fmt(2) + 1 + csid(16)   for csid 64-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4, LE)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! A timestamp field of 0xFFFFFF means a 4-byte extended timestamp follows the
//! message header, and also follows every type 3 header of the same message.
//! ```
//!
//! Both codecs are sans-IO: the decoder works on a growing `BytesMut` and only
//! consumes bytes once a whole chunk is available, so a short buffer never
//! leaves a chunk stream half-updated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete RTMP message (reassembled from chunks)
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Chunk stream ID the message travelled on
    pub csid: u32,
    /// Message timestamp (milliseconds)
    pub timestamp: u32,
    /// Message type ID
    pub message_type: u8,
    /// Message stream ID
    pub stream_id: u32,
    /// Message payload
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(csid: u32, message_type: u8, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
        Self {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload,
        }
    }

    /// Set Chunk Size control message
    pub fn set_chunk_size(size: u32) -> Self {
        Self::new(
            CSID_PROTOCOL_CONTROL,
            MSG_SET_CHUNK_SIZE,
            0,
            0,
            Bytes::copy_from_slice(&(size & 0x7FFF_FFFF).to_be_bytes()),
        )
    }
}

/// Parse the body of a Set Chunk Size message
///
/// The top bit is reserved and ignored; a size of zero is rejected.
pub fn parse_set_chunk_size(payload: &[u8]) -> Result<u32> {
    if payload.len() < 4 {
        return Err(ProtocolError::InvalidChunkSize(0).into());
    }
    let size = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
    if size == 0 {
        return Err(ProtocolError::InvalidChunkSize(size).into());
    }
    Ok(size)
}

/// Per-chunk-stream state for reassembly
#[derive(Debug, Clone, Default)]
struct ChunkStreamState {
    /// Absolute timestamp of the current/last message
    timestamp: u32,
    /// Last raw timestamp field (absolute for type 0, delta otherwise)
    timestamp_field: u32,
    /// Last message length
    message_length: u32,
    /// Last message type
    message_type: u8,
    /// Last message stream ID
    stream_id: u32,
    /// Whether the last message header carried an extended timestamp
    extended: bool,
    /// Buffer for partial message reassembly
    partial: BytesMut,
    /// A message is being reassembled on this stream
    in_progress: bool,
}

/// Outcome of decoding one chunk
enum ChunkOutcome {
    NeedMore,
    Partial,
    Complete(RawMessage),
}

/// Chunk stream decoder
///
/// Handles chunk demultiplexing and message reassembly.
#[derive(Debug)]
pub struct ChunkDecoder {
    /// Maximum incoming chunk size
    chunk_size: u32,
    /// Per-chunk-stream state, created on first sight and kept for the connection
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkDecoder {
    /// Create a new decoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Set the chunk size (called when receiving SetChunkSize message)
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        if size == 0 {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Try to decode a complete message from the buffer
    ///
    /// Consumes as many whole chunks as are available. Returns `Ok(Some(msg))`
    /// when a message completes, `Ok(None)` if more data is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        loop {
            match self.decode_chunk(buf)? {
                ChunkOutcome::NeedMore => return Ok(None),
                ChunkOutcome::Partial => continue,
                ChunkOutcome::Complete(msg) => return Ok(Some(msg)),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<ChunkOutcome> {
        let (fmt, csid, basic_len) = match parse_basic_header(buf) {
            Some(v) => v,
            None => return Ok(ChunkOutcome::NeedMore),
        };

        let prev = match (self.streams.get(&csid), fmt) {
            (Some(state), _) => Some(state),
            // Type 1 carries everything but the stream id, which defaults to 0
            (None, 0) | (None, 1) => None,
            (None, _) => return Err(ProtocolError::UnknownChunkStream(csid).into()),
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + header_len {
            return Ok(ChunkOutcome::NeedMore);
        }

        let h = &buf[basic_len..basic_len + header_len];
        let (mut ts_field, length, message_type, stream_id) = match fmt {
            0 => (
                read_u24(&h[0..3]),
                read_u24(&h[3..6]),
                h[6],
                u32::from_le_bytes([h[7], h[8], h[9], h[10]]),
            ),
            1 => {
                let sid = prev.map_or(0, |p| p.stream_id);
                (read_u24(&h[0..3]), read_u24(&h[3..6]), h[6], sid)
            }
            _ => {
                let p = prev.ok_or(ProtocolError::UnknownChunkStream(csid))?;
                let ts = if fmt == 2 {
                    read_u24(&h[0..3])
                } else if p.extended {
                    EXTENDED_TIMESTAMP_THRESHOLD
                } else {
                    p.timestamp_field
                };
                (ts, p.message_length, p.message_type, p.stream_id)
            }
        };

        let extended = ts_field >= EXTENDED_TIMESTAMP_THRESHOLD;
        let ext_len = if extended { 4 } else { 0 };
        let total_header = basic_len + header_len + ext_len;
        if buf.len() < total_header {
            return Ok(ChunkOutcome::NeedMore);
        }
        if extended {
            let e = &buf[basic_len + header_len..total_header];
            ts_field = u32::from_be_bytes([e[0], e[1], e[2], e[3]]);
        }

        let continuation = fmt == 3 && prev.map_or(false, |p| p.in_progress);

        let (timestamp, length) = if continuation {
            // Continuation chunks repeat the header, they do not advance time
            let p = prev.ok_or(ProtocolError::UnknownChunkStream(csid))?;
            (p.timestamp, p.message_length)
        } else {
            let timestamp = match (fmt, prev) {
                (0, _) | (_, None) => ts_field,
                (_, Some(p)) => p.timestamp.wrapping_add(ts_field),
            };
            (timestamp, length)
        };

        let received = prev.map_or(0, |p| if continuation { p.partial.len() } else { 0 });
        let remaining = length as usize - received;
        let data_len = remaining.min(self.chunk_size as usize);
        if buf.len() < total_header + data_len {
            return Ok(ChunkOutcome::NeedMore);
        }

        // Whole chunk is buffered: commit
        buf.advance(total_header);
        let state = self.streams.entry(csid).or_default();

        if !continuation {
            if state.in_progress {
                tracing::trace!(csid, dropped = state.partial.len(), "New header interrupts partial message");
            }
            // grows with the bytes that actually arrive, not the declared length
            state.partial.clear();
            state.timestamp = timestamp;
            state.timestamp_field = ts_field;
            state.message_length = length;
            state.message_type = message_type;
            state.stream_id = stream_id;
            state.extended = extended;
            state.in_progress = true;
        }

        state.partial.put_slice(&buf[..data_len]);
        buf.advance(data_len);

        if state.partial.len() < state.message_length as usize {
            return Ok(ChunkOutcome::Partial);
        }

        state.in_progress = false;
        Ok(ChunkOutcome::Complete(RawMessage {
            csid,
            timestamp: state.timestamp,
            message_type: state.message_type,
            stream_id: state.stream_id,
            payload: state.partial.split().freeze(),
        }))
    }

    /// Abort a message on a chunk stream (when receiving Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.partial.clear();
            state.in_progress = false;
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunk stream encoder
///
/// Every message goes out as one type 0 chunk followed by type 3 continuations.
#[derive(Debug)]
pub struct ChunkEncoder {
    /// Outgoing chunk size
    chunk_size: u32,
}

impl ChunkEncoder {
    /// Create a new encoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the chunk size (call before encoding to use larger chunks)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Encode a message into chunks appended to `buf`
    pub fn encode(&self, msg: &RawMessage, buf: &mut BytesMut) -> Result<()> {
        let payload_len = msg.payload.len();
        if payload_len > MAX_MESSAGE_SIZE as usize {
            return Err(ProtocolError::MessageTooLarge {
                size: payload_len as u32,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        let extended = msg.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD;
        let chunk_size = self.chunk_size as usize;
        buf.reserve(payload_len + 18 + (payload_len / chunk_size) * 8);

        write_basic_header(msg.csid, 0, buf);
        write_u24(msg.timestamp.min(EXTENDED_TIMESTAMP_THRESHOLD), buf);
        write_u24(payload_len as u32, buf);
        buf.put_u8(msg.message_type);
        buf.put_u32_le(msg.stream_id);
        if extended {
            buf.put_u32(msg.timestamp);
        }

        let mut chunks = msg.payload.chunks(chunk_size);
        if let Some(first) = chunks.next() {
            buf.put_slice(first);
        }
        for chunk in chunks {
            write_basic_header(msg.csid, 3, buf);
            if extended {
                buf.put_u32(msg.timestamp);
            }
            buf.put_slice(chunk);
        }

        Ok(())
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse basic header and return (fmt, csid, header_length)
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let first = *buf.first()?;
    let fmt = (first >> 6) & 0x03;

    match first & 0x3F {
        0 => {
            // 2-byte header: csid = 64 + second byte
            let b1 = *buf.get(1)?;
            Some((fmt, 64 + b1 as u32, 2))
        }
        1 => {
            // 3-byte header: csid = 64 + second + third*256
            let b1 = *buf.get(1)?;
            let b2 = *buf.get(2)?;
            Some((fmt, 64 + b1 as u32 + (b2 as u32) * 256, 3))
        }
        low => Some((fmt, low as u32, 1)),
    }
}

/// Write basic header
fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 64 + 256 {
        let offset = csid - 64;
        buf.put_u8((fmt << 6) | 1);
        buf.put_u8((offset & 0xFF) as u8);
        buf.put_u8(((offset >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | (csid as u8));
    }
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}

/// Write 24-bit big-endian value
fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}
