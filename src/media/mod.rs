//! Media handling for the relay
//!
//! This module provides:
//! - FLV tag parsing and generation, FLV file reading
//! - H.264/AVC and AAC helpers
//! - Codec descriptors and packet tracks
//! - The FLV muxer and the producer/consumer adapters

pub mod aac;
pub mod codec;
pub mod consumer;
pub mod flv;
pub mod h264;
pub mod muxer;
pub mod producer;

pub use aac::{AacPacketType, AudioSpecificConfig};
pub use codec::{Codec, CodecName, CodecParams, Direction, Media, MediaKind, Packet, Track};
pub use consumer::Consumer;
pub use flv::{FlvReader, FlvSink, FlvStream, FlvTag, FlvTagType, TagSource};
pub use h264::{AvcConfig, AvcPacketType, NaluType};
pub use muxer::{Muxer, Payloader};
pub use producer::{Producer, StopHandle};
