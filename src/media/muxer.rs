//! FLV muxer
//!
//! Turns codec descriptors and media packets into FLV bytes:
//!
//! ```text
//! init_segment():  FLV header | onMetaData | [AVC seq header] | [AAC seq header]
//! payload(pkt):    [AVC seq header, once, when SPS/PPS first show up] | frame tag
//! ```
//!
//! Every returned buffer is a run of complete tags, each followed by its
//! trailing tag size, so it can be appended to a file or fed to a session.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

use crate::amf::{amf0, AmfObject, AmfValue};
use crate::error::{MediaError, Result};
use crate::media::aac::sound_header_byte;
use crate::media::codec::{Codec, CodecName, CodecParams, Packet};
use crate::media::flv::{
    encode_header, FlvTag, VideoFrameType, AUDIO_FORMAT_AAC, PACKET_TYPE_DATA,
    PACKET_TYPE_SEQUENCE_HEADER, VIDEO_CODEC_AVC,
};
use crate::media::h264::{self, AvcConfig};
use crate::protocol::constants::{CMD_ON_METADATA, CMD_SET_DATA_FRAME};

/// Collects the codecs of a stream and builds its init segment
#[derive(Debug, Default)]
pub struct Muxer {
    codecs: Vec<Arc<Codec>>,
}

impl Muxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec and return its stateful payloader
    pub fn payloader(&mut self, codec: Arc<Codec>) -> Result<Payloader> {
        let payloader = Payloader::new(Arc::clone(&codec))?;
        self.codecs.push(codec);
        Ok(payloader)
    }

    pub fn codecs(&self) -> &[Arc<Codec>] {
        &self.codecs
    }

    /// FLV header, metadata tag and the sequence headers already known
    pub fn init_segment(&self) -> Result<Bytes> {
        self.build_init().map(|(init, _)| init)
    }

    /// Init segment, and for each registered codec whether it carries its
    /// sequence header
    pub(crate) fn build_init(&self) -> Result<(Bytes, Vec<bool>)> {
        let has_video = self.codecs.iter().any(|c| c.name == CodecName::H264);
        let has_audio = self.codecs.iter().any(|c| c.name == CodecName::Aac);

        let mut buf = BytesMut::new();
        buf.put_slice(&encode_header(has_video, has_audio));

        let data = amf0::encode_all(&[
            AmfValue::from(CMD_SET_DATA_FRAME),
            AmfValue::from(CMD_ON_METADATA),
            AmfValue::Object(self.metadata()),
        ])?;
        FlvTag::script(0, data).encode(&mut buf)?;

        let mut headers = Vec::with_capacity(self.codecs.len());
        for codec in &self.codecs {
            let written = match (codec.name, codec.params()) {
                (CodecName::H264, CodecParams::Avc { sps, pps }) => {
                    avc_sequence_header(&sps, &pps, 0)?.encode(&mut buf)?;
                    true
                }
                (CodecName::Aac, CodecParams::Aac { config }) => {
                    let b0 = sound_header_byte(codec.clock_rate, codec.channels);
                    aac_tag(b0, PACKET_TYPE_SEQUENCE_HEADER, &config, 0).encode(&mut buf)?;
                    true
                }
                _ => false,
            };
            headers.push(written);
        }

        Ok((buf.freeze(), headers))
    }

    fn metadata(&self) -> AmfObject {
        let mut obj = AmfObject::new();
        for codec in &self.codecs {
            match codec.name {
                CodecName::H264 => {
                    obj.insert("videocodecid", VIDEO_CODEC_AVC as f64);
                    if let Some(width) = codec.width.filter(|w| *w > 0) {
                        obj.insert("width", width);
                    }
                    if let Some(height) = codec.height.filter(|h| *h > 0) {
                        obj.insert("height", height);
                    }
                    if let Some(fps) = codec.framerate.filter(|f| *f > 0.0) {
                        obj.insert("framerate", fps);
                    }
                }
                CodecName::Aac => {
                    obj.insert("audiocodecid", AUDIO_FORMAT_AAC as f64);
                    obj.insert("audiosamplerate", codec.clock_rate);
                    obj.insert("audiosamplesize", 16.0);
                    obj.insert("stereo", codec.channels == 2);
                }
                CodecName::H265 => {}
            }
        }
        obj
    }
}

#[derive(Debug)]
enum PayloaderKind {
    /// `awaiting_params` until a sequence header has been written
    H264 { awaiting_params: bool },
    Aac { header: u8 },
}

/// Per-track packet to FLV tag converter
#[derive(Debug)]
pub struct Payloader {
    codec: Arc<Codec>,
    kind: PayloaderKind,
    ts0: Option<u32>,
    ticks_per_ms: u32,
}

impl Payloader {
    pub fn new(codec: Arc<Codec>) -> Result<Self> {
        let kind = match codec.name {
            CodecName::H264 => PayloaderKind::H264 {
                awaiting_params: !codec.has_params(),
            },
            CodecName::Aac => PayloaderKind::Aac {
                header: sound_header_byte(codec.clock_rate, codec.channels),
            },
            other => return Err(MediaError::UnsupportedCodec(other.to_string()).into()),
        };

        Ok(Self {
            ticks_per_ms: (codec.clock_rate / 1000).max(1),
            codec,
            kind,
            ts0: None,
        })
    }

    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    /// Whether the output already holds this codec's sequence header
    ///
    /// An H.264 payloader writes one before the first frame unless told so.
    pub fn set_header_sent(&mut self, sent: bool) {
        if let PayloaderKind::H264 { awaiting_params } = &mut self.kind {
            *awaiting_params = !sent;
        }
    }

    /// Convert one packet into FLV tag bytes
    ///
    /// Returns `None` for H.264 frames that arrive before any parameter set
    /// is known, since no decoder could use them.
    pub fn payload(&mut self, packet: &Packet) -> Option<Bytes> {
        match self.kind {
            PayloaderKind::H264 { awaiting_params } => self.payload_h264(packet, awaiting_params),
            PayloaderKind::Aac { header } => {
                let ms = self.time_ms(packet.timestamp);
                aac_tag(header, PACKET_TYPE_DATA, &packet.payload, ms).to_bytes().ok()
            }
        }
    }

    fn payload_h264(&mut self, packet: &Packet, awaiting_params: bool) -> Option<Bytes> {
        let mut buf = BytesMut::new();

        if awaiting_params {
            let (sps, pps) = match h264::find_parameter_sets(&packet.payload) {
                Some((sps, pps)) => {
                    // Late subscribers of this codec get the real parameters
                    self.codec.set_params(CodecParams::Avc {
                        sps: sps.clone(),
                        pps: pps.clone(),
                    });
                    (sps, pps)
                }
                None => match self.codec.params() {
                    CodecParams::Avc { sps, pps } => (sps, pps),
                    _ => return None,
                },
            };

            let ms = self.time_ms(packet.timestamp);
            let header = match avc_sequence_header(&sps, &pps, ms) {
                Ok(tag) => tag,
                Err(e) => {
                    tracing::warn!(error = %e, "Unusable H.264 parameter sets");
                    return None;
                }
            };
            header.encode(&mut buf).ok()?;
            self.kind = PayloaderKind::H264 {
                awaiting_params: false,
            };
            tracing::debug!(sps_len = sps.len(), pps_len = pps.len(), "H.264 sequence header synthesized");
        }

        let frame_type = if h264::is_keyframe(&packet.payload) {
            VideoFrameType::Keyframe
        } else {
            VideoFrameType::InterFrame
        };

        let mut data = BytesMut::with_capacity(5 + packet.payload.len());
        data.put_slice(&[frame_type.avc_header_byte(), PACKET_TYPE_DATA, 0, 0, 0]);
        data.put_slice(&packet.payload);

        let ms = self.time_ms(packet.timestamp);
        FlvTag::video(ms, data.freeze()).encode(&mut buf).ok()?;
        Some(buf.freeze())
    }

    /// Milliseconds since the first emitted packet
    fn time_ms(&mut self, timestamp: u32) -> u32 {
        let ts0 = *self.ts0.get_or_insert(timestamp);
        timestamp.wrapping_sub(ts0) / self.ticks_per_ms
    }
}

fn avc_sequence_header(sps: &[u8], pps: &[u8], ms: u32) -> Result<FlvTag> {
    let record = AvcConfig::encode(sps, pps)?;
    let mut data = BytesMut::with_capacity(5 + record.len());
    data.put_slice(&[
        VideoFrameType::Keyframe.avc_header_byte(),
        PACKET_TYPE_SEQUENCE_HEADER,
        0,
        0,
        0,
    ]);
    data.put_slice(&record);
    Ok(FlvTag::video(ms, data.freeze()))
}

fn aac_tag(header: u8, packet_type: u8, payload: &[u8], ms: u32) -> FlvTag {
    let mut data = BytesMut::with_capacity(2 + payload.len());
    data.put_u8(header);
    data.put_u8(packet_type);
    data.put_slice(payload);
    FlvTag::audio(ms, data.freeze())
}
