//! FLV producer
//!
//! Reads FLV tags from any [`TagSource`] (an FLV byte stream or an RTMP
//! session), discovers the codecs and relays frames to tracks as packets.
//!
//! Discovery follows what encoders and cameras actually send:
//! - `onMetaData` first, announcing which tag types to expect
//! - video/audio sequence headers next, in either order
//!
//! Some cameras never send the announced headers, so discovery stops at a
//! deadline with whatever was found.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

use crate::amf::amf0;
use crate::error::Result;
use crate::media::aac::AudioSpecificConfig;
use crate::media::codec::{Codec, CodecParams, Direction, Media, MediaKind, Packet, Track};
use crate::media::flv::{
    time_to_rtp, FlvReader, FlvTag, FlvTagType, TagSource, AUDIO_FORMAT_AAC, PACKET_TYPE_DATA,
    PACKET_TYPE_SEQUENCE_HEADER, VIDEO_CODEC_AVC,
};
use crate::media::h264::AvcConfig;
use crate::protocol::constants::{CMD_ON_METADATA, DEFAULT_PROBE_TIMEOUT};

/// Enhanced RTMP video packet types (low nibble of the first byte)
const EX_SEQUENCE_START: u8 = 0;
const EX_CODED_FRAMES: u8 = 1;
const EX_CODED_FRAMES_X: u8 = 3;

const FOURCC_HEVC: &[u8; 4] = b"hvc1";

/// Handle that ends a running [`Producer::describe`] or [`Producer::start`]
///
/// The running call closes the source before it returns.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Media producer over a tag source
#[derive(Debug)]
pub struct Producer<S> {
    source: S,
    probe_timeout: Duration,
    medias: Vec<Media>,
    video: Option<Track>,
    audio: Option<Track>,
    /// Tags consumed by discovery, replayed by `start`
    probed: VecDeque<FlvTag>,
    stop: StopHandle,
}

impl<R> Producer<FlvReader<R>>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    /// Open an FLV byte stream (file, HTTP body) and discover its codecs
    pub async fn open(reader: R) -> Result<Self> {
        let mut producer = Self::new(FlvReader::open(reader).await?);
        producer.describe().await?;
        Ok(producer)
    }
}

impl<S: TagSource + Send> Producer<S> {
    pub fn new(source: S) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            source,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            medias: Vec::new(),
            video: None,
            audio: None,
            probed: VecDeque::new(),
            stop: StopHandle(Arc::new(tx)),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Discover codecs from the first tags
    ///
    /// Each read is bounded by the probe deadline, so a silent source ends
    /// discovery with whatever was found. A [`StopHandle`] closes the source
    /// and ends discovery early.
    pub async fn describe(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.probe_timeout;
        let mut waiting = vec![FlvTagType::Script];
        let mut metadata = StreamMetadata::default();

        let mut stop_rx = self.stop.0.subscribe();
        if *stop_rx.borrow() {
            return self.source.close().await;
        }

        while !waiting.is_empty() && Instant::now() < deadline {
            let tag = tokio::select! {
                _ = stop_rx.changed() => {
                    tracing::debug!("Discovery stopped");
                    return self.source.close().await;
                }
                res = timeout_at(deadline, self.source.read_tag()) => match res {
                    Ok(tag) => tag?,
                    Err(_) => break,
                },
            };
            self.probed.push_back(tag.clone());

            let Some(idx) = waiting.iter().position(|t| *t == tag.tag_type) else {
                continue;
            };
            waiting.remove(idx);

            match tag.tag_type {
                FlvTagType::Script => {
                    let data = tag.data.as_ref();
                    if !contains(data, CMD_ON_METADATA.as_bytes()) {
                        waiting.push(FlvTagType::Script);
                        continue;
                    }
                    // Some cameras leave out videocodecid
                    if contains(data, b"videocodecid")
                        || contains(data, b"width")
                        || contains(data, b"framerate")
                    {
                        waiting.push(FlvTagType::Video);
                    }
                    if contains(data, b"audiocodecid") {
                        waiting.push(FlvTagType::Audio);
                    }
                    metadata = StreamMetadata::parse(&tag.data);
                }
                FlvTagType::Audio => {
                    if let Some(codec) = audio_codec(&tag.data) {
                        self.add_media(MediaKind::Audio, codec);
                    }
                }
                FlvTagType::Video => {
                    if let Some(codec) = video_codec(&tag.data, &metadata) {
                        self.add_media(MediaKind::Video, codec);
                    }
                }
            }
        }

        if !waiting.is_empty() {
            tracing::debug!(waiting = ?waiting, "Probe deadline reached");
        }
        Ok(())
    }

    fn add_media(&mut self, kind: MediaKind, codec: Codec) {
        tracing::info!(kind = ?kind, codec = %codec, "Discovered codec");
        self.medias
            .push(Media::new(kind, Direction::RecvOnly, vec![Arc::new(codec)]));
    }

    pub fn medias(&self) -> &[Media] {
        &self.medias
    }

    /// Track for one of the discovered codecs
    pub fn track(&mut self, media: &Media, codec: &Arc<Codec>) -> Track {
        let slot = match media.kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        };
        match slot {
            Some(track) if Arc::ptr_eq(track.codec(), codec) => track.clone(),
            _ => {
                let track = Track::new(Arc::clone(codec));
                *slot = Some(track.clone());
                track
            }
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Close the source and end any later `describe` or `start`
    ///
    /// A `describe` or `start` running in another task is stopped through
    /// [`stop_handle`](Self::stop_handle) instead; it closes the source itself.
    pub async fn stop(&mut self) -> Result<()> {
        self.stop.stop();
        self.source.close().await
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Relay tags to the tracks until the source ends or a stop is requested
    ///
    /// A clean end of stream is not an error. On stop the source is closed.
    pub async fn start(&mut self) -> Result<()> {
        let mut stop_rx = self.stop.0.subscribe();
        if *stop_rx.borrow() {
            return self.source.close().await;
        }

        loop {
            let tag = match self.probed.pop_front() {
                Some(tag) => tag,
                None => tokio::select! {
                    _ = stop_rx.changed() => {
                        tracing::debug!("Producer stopped");
                        return self.source.close().await;
                    }
                    res = self.source.read_tag() => match res {
                        Ok(tag) => tag,
                        Err(e) if e.is_end_of_stream() => {
                            tracing::debug!("Source ended");
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    },
                },
            };

            self.relay(tag);
        }
    }

    fn relay(&self, tag: FlvTag) {
        match tag.tag_type {
            FlvTagType::Audio => {
                let Some(track) = &self.audio else { return };
                if tag.data.len() < 2 || tag.data[1] == PACKET_TYPE_SEQUENCE_HEADER {
                    return;
                }
                let ts = time_to_rtp(tag.timestamp, track.codec().clock_rate);
                track.send(Packet::new(ts, tag.data.slice(2..)));
            }
            FlvTagType::Video => {
                let Some(track) = &self.video else { return };
                let Some(payload) = video_payload(&tag) else { return };
                let ts = time_to_rtp(tag.timestamp, track.codec().clock_rate);
                track.send(Packet::new(ts, payload));
            }
            FlvTagType::Script => {}
        }
    }
}

/// Frame bytes of a video tag, `None` for headers and unknown packets
fn video_payload(tag: &FlvTag) -> Option<Bytes> {
    let data = &tag.data;
    if tag.is_ex_header() {
        let offset = match data[0] & 0x0F {
            // fourcc + composition time
            EX_CODED_FRAMES => 8,
            // fourcc only
            EX_CODED_FRAMES_X => 5,
            _ => return None,
        };
        (data.len() >= offset).then(|| data.slice(offset..))
    } else if data.len() >= 5 && data[1] == PACKET_TYPE_DATA {
        Some(data.slice(5..))
    } else {
        None
    }
}

fn audio_codec(data: &Bytes) -> Option<Codec> {
    if data.len() < 2 || data[0] >> 4 != AUDIO_FORMAT_AAC || data[1] != PACKET_TYPE_SEQUENCE_HEADER {
        return None;
    }

    match AudioSpecificConfig::parse(data.slice(2..)) {
        Ok(config) => Some(
            Codec::aac(config.sampling_frequency, config.channels() as u16)
                .with_params(CodecParams::Aac { config: config.raw }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Bad AAC sequence header");
            None
        }
    }
}

fn video_codec(data: &Bytes, metadata: &StreamMetadata) -> Option<Codec> {
    if data.len() < 5 {
        return None;
    }

    if data[0] & 0x80 != 0 {
        if &data[1..5] != FOURCC_HEVC || data[0] & 0x0F != EX_SEQUENCE_START {
            return None;
        }
        let codec = Codec::h265().with_params(CodecParams::Hevc {
            config: data.slice(5..),
        });
        return Some(metadata.apply(codec));
    }

    if data[0] & 0x0F != VIDEO_CODEC_AVC || data[1] != PACKET_TYPE_SEQUENCE_HEADER {
        return None;
    }

    let mut codec = Codec::h264();
    match AvcConfig::parse(data.slice(5..)) {
        Ok(config) => {
            if let (Some(sps), Some(pps)) = (config.sps.first(), config.pps.first()) {
                codec = codec.with_params(CodecParams::Avc {
                    sps: sps.clone(),
                    pps: pps.clone(),
                });
            }
        }
        // Parameter sets may still show up in-band
        Err(e) => tracing::warn!(error = %e, "Bad AVC sequence header"),
    }
    Some(metadata.apply(codec))
}

/// Video properties announced by `onMetaData`
#[derive(Debug, Default)]
struct StreamMetadata {
    width: Option<u32>,
    height: Option<u32>,
    framerate: Option<f64>,
}

impl StreamMetadata {
    fn parse(data: &[u8]) -> Self {
        let Ok(values) = amf0::decode_all(data) else {
            return Self::default();
        };
        let Some(obj) = values.iter().find_map(|v| v.as_object()) else {
            return Self::default();
        };

        let number = |key: &str| obj.get(key).and_then(|v| v.as_number()).filter(|n| *n > 0.0);
        Self {
            width: number("width").map(|n| n as u32),
            height: number("height").map(|n| n as u32),
            framerate: number("framerate"),
        }
    }

    fn apply(&self, codec: Codec) -> Codec {
        codec
            .with_dimensions(self.width, self.height)
            .with_framerate(self.framerate)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::{AmfObject, AmfValue};
    use crate::error::Error;
    use crate::media::codec::CodecName;
    use crate::media::flv::encode_header;
    use crate::protocol::handshake::HandshakeRole;
    use crate::session::Session;
    use bytes::{BufMut, BytesMut};
    use tokio::io::DuplexStream;

    /// Scripted source; ends with a clean EOF
    struct Tags(VecDeque<FlvTag>);

    impl TagSource for Tags {
        async fn read_tag(&mut self) -> Result<FlvTag> {
            self.0.pop_front().ok_or(Error::ConnectionClosed)
        }
    }

    fn metadata(obj: AmfObject) -> FlvTag {
        FlvTag::script(
            0,
            amf0::encode_all(&[AmfValue::from("onMetaData"), AmfValue::EcmaArray(obj)]).unwrap(),
        )
    }

    fn avc_header() -> FlvTag {
        let mut data = vec![0x17, 0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(&[
            0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00,
            0x03, 0x68, 0xEF, 0x38,
        ]);
        FlvTag::video(0, Bytes::from(data))
    }

    fn aac_header() -> FlvTag {
        FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]))
    }

    fn full_metadata() -> FlvTag {
        metadata(
            AmfObject::new()
                .with("width", 1920.0)
                .with("height", 1080.0)
                .with("framerate", 25.0)
                .with("videocodecid", 7.0)
                .with("audiocodecid", 10.0),
        )
    }

    #[tokio::test]
    async fn test_describe_audio_and_video() {
        let source = Tags(VecDeque::from(vec![full_metadata(), avc_header(), aac_header()]));
        let mut producer = Producer::new(source);
        producer.describe().await.unwrap();

        let medias = producer.medias();
        assert_eq!(medias.len(), 2);

        let video = medias[0].codec(CodecName::H264).unwrap();
        assert_eq!(video.width, Some(1920));
        assert_eq!(video.height, Some(1080));
        assert_eq!(video.framerate, Some(25.0));
        match video.params() {
            CodecParams::Avc { sps, pps } => {
                assert_eq!(sps.as_ref(), &[0x67, 0x64, 0x00, 0x1F]);
                assert_eq!(pps.as_ref(), &[0x68, 0xEF, 0x38]);
            }
            other => panic!("unexpected params {:?}", other),
        }

        let audio = medias[1].codec(CodecName::Aac).unwrap();
        assert_eq!(audio.clock_rate, 44100);
        assert_eq!(audio.channels, 2);
        assert_eq!(medias[1].direction, Direction::RecvOnly);
    }

    #[tokio::test]
    async fn test_describe_video_announced_by_width_only() {
        // Audio header arrives after a keyframe
        let keyframe = FlvTag::video(40, Bytes::from_static(&[0x17, 0x01, 0, 0, 0, 0, 0, 0, 1, 0x65]));
        let source = Tags(VecDeque::from(vec![
            metadata(AmfObject::new().with("width", 640.0).with("audiocodecid", 10.0)),
            avc_header(),
            keyframe,
            aac_header(),
        ]));

        let mut producer = Producer::new(source);
        producer.describe().await.unwrap();
        assert_eq!(producer.medias().len(), 2);
        assert_eq!(producer.medias()[0].kind, MediaKind::Video);
        assert_eq!(producer.medias()[1].kind, MediaKind::Audio);
    }

    #[tokio::test]
    async fn test_describe_hevc_ex_header() {
        let mut data = vec![0x90];
        data.extend_from_slice(b"hvc1");
        data.extend_from_slice(&[0x01, 0x02, 0x03]);
        let source = Tags(VecDeque::from(vec![
            metadata(AmfObject::new().with("videocodecid", 12.0)),
            FlvTag::video(0, Bytes::from(data)),
        ]));

        let mut producer = Producer::new(source);
        producer.describe().await.unwrap();
        let codec = &producer.medias()[0].codecs[0];
        assert_eq!(codec.name, CodecName::H265);
        assert_eq!(
            codec.params(),
            CodecParams::Hevc {
                config: Bytes::from_static(&[0x01, 0x02, 0x03])
            }
        );
    }

    #[tokio::test]
    async fn test_describe_stops_at_deadline() {
        let tags: VecDeque<FlvTag> = (0..3)
            .map(|_| FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x01, 0x00])))
            .collect();
        let mut producer = Producer::new(Tags(tags)).with_probe_timeout(Duration::ZERO);
        producer.describe().await.unwrap();
        assert!(producer.medias().is_empty());
    }

    #[tokio::test]
    async fn test_describe_source_error() {
        let mut producer = Producer::new(Tags(VecDeque::new()));
        let err = producer.describe().await.unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[tokio::test]
    async fn test_start_relays_probed_and_live_tags() {
        let frame = FlvTag::video(40, Bytes::from_static(&[0x27, 0x01, 0, 0, 0, 0, 0, 0, 2, 0x41, 0x9A]));
        let audio = FlvTag::audio(64, Bytes::from_static(&[0xAF, 0x01, 0x21, 0x10]));
        let ex = FlvTag::video(80, Bytes::from_static(&[0x93, b'h', b'v', b'c', b'1', 0xAA]));
        let source = Tags(VecDeque::from(vec![
            full_metadata(),
            avc_header(),
            aac_header(),
            frame,
            audio,
            ex,
        ]));

        let mut producer = Producer::new(source);
        producer.describe().await.unwrap();

        let medias = producer.medias().to_vec();
        let video = producer.track(&medias[0], &medias[0].codecs[0]);
        let audio = producer.track(&medias[1], &medias[1].codecs[0]);
        let mut video_rx = video.subscribe();
        let mut audio_rx = audio.subscribe();

        producer.start().await.unwrap();

        let packet = video_rx.recv().await.unwrap();
        assert_eq!(packet.timestamp, 40 * 90);
        assert_eq!(packet.payload.as_ref(), &[0, 0, 0, 2, 0x41, 0x9A]);

        // enhanced coded frames without composition time
        let packet = video_rx.recv().await.unwrap();
        assert_eq!(packet.timestamp, 80 * 90);
        assert_eq!(packet.payload.as_ref(), &[0xAA]);
        assert!(video_rx.try_recv().is_err());

        // sequence header skipped, raw frame relayed
        let packet = audio_rx.recv().await.unwrap();
        assert_eq!(packet.timestamp, time_to_rtp(64, 44100));
        assert_eq!(packet.payload.as_ref(), &[0x21, 0x10]);
        assert!(audio_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let mut producer = Producer::new(Tags(VecDeque::from(vec![avc_header()])));
        producer.stop_handle().stop();
        producer.start().await.unwrap();
        // nothing was consumed
        assert_eq!(producer.into_source().0.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_running_producer() {
        use tokio::io::AsyncWriteExt;

        // header only: start blocks waiting for the first tag
        let (mut tx, body) = tokio::io::duplex(1024);
        tx.write_all(&encode_header(true, false)).await.unwrap();
        let reader = FlvReader::open(body).await.unwrap();

        let mut producer = Producer::new(reader);
        let handle = producer.stop_handle();

        let task = tokio::spawn(async move { producer.start().await });
        tokio::task::yield_now().await;
        handle.stop();
        task.await.unwrap().unwrap();
        drop(tx);
    }

    async fn session_pair() -> (Session<DuplexStream>, Session<DuplexStream>) {
        let (a, b) = tokio::io::duplex(1 << 16);
        let client = Session::establish(a, HandshakeRole::Client, 4096, 4096);
        let server = Session::establish(b, HandshakeRole::Server, 4096, 4096);
        let (client, server) = tokio::join!(client, server);
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn test_describe_silent_source_hits_deadline() {
        use tokio::io::AsyncWriteExt;

        let (mut tx, body) = tokio::io::duplex(1024);
        tx.write_all(&encode_header(true, true)).await.unwrap();
        let reader = FlvReader::open(body).await.unwrap();

        let mut producer = Producer::new(reader).with_probe_timeout(Duration::from_millis(50));
        let started = Instant::now();
        producer.describe().await.unwrap();
        assert!(producer.medias().is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(tx);
    }

    #[tokio::test]
    async fn test_stop_closes_session() {
        let (mut peer, session) = session_pair().await;
        let mut producer = Producer::new(session);

        producer.stop().await.unwrap();
        assert!(peer.read_tag().await.unwrap_err().is_end_of_stream());

        // later calls return without reading
        producer.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_handle_unblocks_describe() {
        let (mut peer, session) = session_pair().await;
        let mut producer = Producer::new(session).with_probe_timeout(Duration::from_secs(60));
        let handle = producer.stop_handle();

        let task = tokio::spawn(async move {
            producer.describe().await.map(|()| producer.medias().len())
        });
        tokio::task::yield_now().await;
        handle.stop();

        assert_eq!(task.await.unwrap().unwrap(), 0);
        assert!(peer.read_tag().await.unwrap_err().is_end_of_stream());
    }

    #[tokio::test]
    async fn test_open_flv_stream() {
        let mut file = BytesMut::new();
        file.put_slice(&encode_header(true, true));
        for tag in [full_metadata(), avc_header(), aac_header()] {
            tag.encode(&mut file).unwrap();
        }
        // FlvReader reads prev size before each tag; drop the final one
        let body = file.split_to(file.len() - 4).freeze();

        let producer = Producer::open(&body[..]).await.unwrap();
        assert_eq!(producer.medias().len(), 2);
    }
}
