//! RTMP handshake implementation
//!
//! The RTMP handshake consists of three phases:
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! The client answers C2 as soon as S0S1 is in, then reads S2. Only the simple
//! handshake is implemented: no digest, echoes are not verified, and the
//! version byte must be exactly 3.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Handshake role (client or server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

/// Handshake state machine
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    state: HandshakeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Need to send C0C1 (client) or wait for it (server)
    Initial,
    /// Waiting for peer's C0C1/S0S1
    WaitingForPeerPacket,
    /// Waiting for peer's C2/S2
    WaitingForPeerResponse,
    Done,
}

impl Handshake {
    /// Create a new handshake state machine
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            state: HandshakeState::Initial,
        }
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Bytes that must be buffered before the next `process` call can advance
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::WaitingForPeerPacket => 1 + HANDSHAKE_SIZE,
            HandshakeState::WaitingForPeerResponse => HANDSHAKE_SIZE,
            HandshakeState::Initial | HandshakeState::Done => 0,
        }
    }

    /// Generate initial packet
    ///
    /// For client: returns C0+C1 (1 + 1536 bytes)
    /// For server: returns None (server waits for C0C1 first)
    pub fn generate_initial(&mut self) -> Option<Bytes> {
        if self.state != HandshakeState::Initial {
            return None;
        }
        self.state = HandshakeState::WaitingForPeerPacket;

        match self.role {
            HandshakeRole::Client => {
                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(RTMP_VERSION);
                buf.put_slice(&generate_packet());
                Some(buf.freeze())
            }
            HandshakeRole::Server => None,
        }
    }

    /// Process received data and return the bytes to send back, if any
    ///
    /// - server receiving C0C1: returns S0+S1+S2
    /// - client receiving S0S1: returns C2
    /// - either side receiving the final echo: returns None, handshake done
    ///
    /// Returns `Ok(None)` without consuming anything when `data` is short.
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        if data.remaining() < self.bytes_needed() {
            return Ok(None);
        }

        match self.state {
            HandshakeState::WaitingForPeerPacket => {
                let version = data.get_u8();
                if version != RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }

                let mut peer = [0u8; HANDSHAKE_SIZE];
                data.copy_to_slice(&mut peer);
                self.state = HandshakeState::WaitingForPeerResponse;

                let response = match self.role {
                    HandshakeRole::Server => {
                        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
                        buf.put_u8(RTMP_VERSION);
                        buf.put_slice(&generate_packet());
                        buf.put_slice(&generate_echo(&peer));
                        buf.freeze()
                    }
                    HandshakeRole::Client => Bytes::copy_from_slice(&generate_echo(&peer)),
                };
                Ok(Some(response))
            }
            HandshakeState::WaitingForPeerResponse => {
                // Echo contents are not verified
                data.advance(HANDSHAKE_SIZE);
                self.state = HandshakeState::Done;
                Ok(None)
            }
            HandshakeState::Initial | HandshakeState::Done => Ok(None),
        }
    }

    /// Drive the handshake to completion over an async stream
    ///
    /// Reads exactly the bytes each phase needs, so nothing past the
    /// handshake is consumed from `io`.
    pub async fn run<S>(&mut self, io: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(c0c1) = self.generate_initial() {
            io.write_all(&c0c1).await?;
            io.flush().await?;
        }

        while !self.is_done() {
            let mut buf = vec![0u8; self.bytes_needed()];
            io.read_exact(&mut buf).await?;

            let mut data = Bytes::from(buf);
            if let Some(response) = self.process(&mut data)? {
                io.write_all(&response).await?;
                io.flush().await?;
            }
        }

        tracing::debug!(role = ?self.role, "Handshake complete");
        Ok(())
    }
}

/// Generate a handshake packet (C1 or S1)
///
/// Format (1536 bytes):
/// - Bytes 0-3: Timestamp (32-bit, big-endian)
/// - Bytes 4-7: Zero
/// - Bytes 8-1535: Random data
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let timestamp = now_millis();
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // Not cryptographically secure, the simple handshake doesn't need it
    let mut seed = timestamp as u64 | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = seed.to_le_bytes();
        let len = chunk.len();
        chunk.copy_from_slice(&bytes[..len]);
    }

    packet
}

/// Generate echo packet (C2 or S2)
///
/// Copy of the peer's packet with our receive time in bytes 4-7.
fn generate_echo(peer_packet: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer_packet;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}
