//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Handshake (C0C1C2/S0S1S2 exchange)
//! - Chunk stream multiplexing and demultiplexing
//! - Command message model

pub mod chunk;
pub mod command;
pub mod constants;
pub mod handshake;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use command::Command;
pub use handshake::{Handshake, HandshakeRole};
