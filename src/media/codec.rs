//! Codec descriptors, media sections and packet tracks
//!
//! These are the types exchanged with the media pipeline:
//!
//! ```text
//!   Media { kind, direction, codecs: [Arc<Codec>] }
//!                                  │
//!                                  ▼
//!   Track { codec, broadcast::Sender<Packet> } ──subscribe()──► receivers
//! ```
//!
//! A codec's out-of-band parameters can be filled in after the fact (for
//! example once SPS/PPS show up in-band). They sit behind their own lock so
//! every holder of the `Arc<Codec>` sees the update.

use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Default per-track broadcast capacity (packets)
pub const TRACK_CAPACITY: usize = 1024;

/// Media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Direction of a media section, from the side that declares it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Declared by a producer: packets flow out of it
    RecvOnly,
    /// Declared by a consumer: it accepts packets
    SendOnly,
}

/// Codec name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecName {
    H264,
    H265,
    Aac,
}

impl CodecName {
    pub fn kind(self) -> MediaKind {
        match self {
            CodecName::H264 | CodecName::H265 => MediaKind::Video,
            CodecName::Aac => MediaKind::Audio,
        }
    }
}

impl fmt::Display for CodecName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecName::H264 => write!(f, "H264"),
            CodecName::H265 => write!(f, "H265"),
            CodecName::Aac => write!(f, "AAC"),
        }
    }
}

/// Codec-specific out-of-band parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CodecParams {
    /// Not known yet
    #[default]
    None,
    /// H.264 parameter sets (raw NAL units)
    Avc { sps: Bytes, pps: Bytes },
    /// AAC AudioSpecificConfig
    Aac { config: Bytes },
    /// H.265 HEVCDecoderConfigurationRecord
    Hevc { config: Bytes },
}

impl CodecParams {
    pub fn is_none(&self) -> bool {
        matches!(self, CodecParams::None)
    }
}

/// Codec descriptor
#[derive(Debug)]
pub struct Codec {
    pub name: CodecName,
    /// RTP clock rate (90000 for video, sample rate for audio)
    pub clock_rate: u32,
    /// Audio channels, 0 for video
    pub channels: u16,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub framerate: Option<f64>,
    params: RwLock<CodecParams>,
}

impl Codec {
    pub fn new(name: CodecName, clock_rate: u32) -> Self {
        Self {
            name,
            clock_rate,
            channels: 0,
            width: None,
            height: None,
            framerate: None,
            params: RwLock::new(CodecParams::None),
        }
    }

    /// H.264 at the standard 90 kHz clock
    pub fn h264() -> Self {
        Self::new(CodecName::H264, 90000)
    }

    /// H.265 at the standard 90 kHz clock
    pub fn h265() -> Self {
        Self::new(CodecName::H265, 90000)
    }

    /// AAC clocked at its sample rate
    pub fn aac(sample_rate: u32, channels: u16) -> Self {
        Self::new(CodecName::Aac, sample_rate).with_channels(channels)
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_framerate(mut self, framerate: Option<f64>) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn with_params(self, params: CodecParams) -> Self {
        self.set_params(params);
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.name.kind()
    }

    /// Snapshot of the current parameters
    pub fn params(&self) -> CodecParams {
        match self.params.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Publish new parameters to every holder of this codec
    pub fn set_params(&self, params: CodecParams) {
        match self.params.write() {
            Ok(mut guard) => *guard = params,
            Err(poisoned) => *poisoned.into_inner() = params,
        }
    }

    pub fn has_params(&self) -> bool {
        !self.params().is_none()
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.clock_rate)?;
        if self.channels > 0 {
            write!(f, "/{}", self.channels)?;
        }
        Ok(())
    }
}

/// A media section: one kind, one direction, candidate codecs
#[derive(Debug, Clone)]
pub struct Media {
    pub kind: MediaKind,
    pub direction: Direction,
    pub codecs: Vec<Arc<Codec>>,
}

impl Media {
    pub fn new(kind: MediaKind, direction: Direction, codecs: Vec<Arc<Codec>>) -> Self {
        Self {
            kind,
            direction,
            codecs,
        }
    }

    /// Codec of this media with the given name
    pub fn codec(&self, name: CodecName) -> Option<&Arc<Codec>> {
        self.codecs.iter().find(|c| c.name == name)
    }
}

/// One media packet: an access unit (AVCC for video) or a raw audio frame
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// RTP timestamp in codec clock ticks
    pub timestamp: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(timestamp: u32, payload: Bytes) -> Self {
        Self { timestamp, payload }
    }
}

/// Packet fan-out for one codec
#[derive(Debug, Clone)]
pub struct Track {
    codec: Arc<Codec>,
    tx: broadcast::Sender<Packet>,
}

impl Track {
    pub fn new(codec: Arc<Codec>) -> Self {
        Self::with_capacity(codec, TRACK_CAPACITY)
    }

    pub fn with_capacity(codec: Arc<Codec>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { codec, tx }
    }

    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Packet> {
        self.tx.subscribe()
    }

    /// Send to current subscribers, returns how many received it
    pub fn send(&self, packet: Packet) -> usize {
        self.tx.send(packet).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
