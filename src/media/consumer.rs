//! FLV consumer
//!
//! Accepts H.264 and AAC tracks and turns their packets into one FLV
//! stream. Tracks are subscribed when added but only pumped once `write_to`
//! has built the init segment, so a sequence header is never written twice.
//! Each pump runs a payloader into a shared queue that `write_to` drains into
//! any [`FlvSink`].

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::{Error, MediaError, Result};
use crate::media::codec::{
    Codec, CodecName, Direction, Media, MediaKind, Packet, Track, TRACK_CAPACITY,
};
use crate::media::flv::FlvSink;
use crate::media::muxer::{Muxer, Payloader};

/// FLV output for a set of tracks
#[derive(Debug)]
pub struct Consumer {
    medias: Vec<Media>,
    muxer: Muxer,
    /// Subscribed tracks waiting for `write_to`, in muxer order
    pending: Vec<(Payloader, broadcast::Receiver<Packet>)>,
    /// Taken by `write_to`
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for Consumer {
    fn default() -> Self {
        Self::new()
    }
}

impl Consumer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(TRACK_CAPACITY);
        Self {
            medias: vec![
                Media::new(
                    MediaKind::Video,
                    Direction::SendOnly,
                    vec![Arc::new(Codec::h264())],
                ),
                Media::new(
                    MediaKind::Audio,
                    Direction::SendOnly,
                    vec![Arc::new(Codec::new(CodecName::Aac, 0))],
                ),
            ],
            muxer: Muxer::new(),
            pending: Vec::new(),
            tx: Some(tx),
            rx,
            tasks: Vec::new(),
        }
    }

    /// Codecs this consumer accepts
    pub fn medias(&self) -> &[Media] {
        &self.medias
    }

    /// Wire a source track into the stream
    ///
    /// The muxer works on the track's own codec, so parameter sets found
    /// in-band are shared with every other holder of it.
    pub fn add_track(&mut self, media: &Media, codec: &Codec, track: &Track) -> Result<()> {
        if !matches!(codec.name, CodecName::H264 | CodecName::Aac) || codec.kind() != media.kind {
            return Err(MediaError::UnsupportedCodec(codec.name.to_string()).into());
        }
        if self.tx.is_none() {
            return Err(Error::Config("consumer is already writing".into()));
        }

        let payloader = self.muxer.payloader(Arc::clone(track.codec()))?;
        // packets sent from now on are buffered until the pump starts
        self.pending.push((payloader, track.subscribe()));
        tracing::debug!(codec = %track.codec(), "Consumer track added");
        Ok(())
    }

    /// Write the init segment, then every tag until all tracks end
    ///
    /// Returns the number of bytes written.
    pub async fn write_to<K: FlvSink>(&mut self, sink: &mut K) -> Result<u64> {
        let Some(tx) = self.tx.take() else {
            return Err(Error::Config("consumer is already writing".into()));
        };

        let (init, headers) = self.muxer.build_init()?;
        for ((mut payloader, rx), sent) in self.pending.drain(..).zip(headers) {
            payloader.set_header_sent(sent);
            self.tasks.push(tokio::spawn(pump(payloader, rx, tx.clone())));
        }
        // only the pumps keep the queue open from here on
        drop(tx);

        let mut written = init.len() as u64;
        sink.write_flv(init).await?;

        while let Some(bytes) = self.rx.recv().await {
            written += bytes.len() as u64;
            sink.write_flv(bytes).await?;
        }
        Ok(written)
    }
}

async fn pump(mut payloader: Payloader, mut rx: broadcast::Receiver<Packet>, tx: mpsc::Sender<Bytes>) {
    loop {
        match rx.recv().await {
            Ok(packet) => {
                let Some(bytes) = payloader.payload(&packet) else {
                    continue;
                };
                if tx.send(bytes).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped = skipped, codec = %payloader.codec(), "Consumer lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::codec::{CodecParams, Packet};
    use crate::media::flv::{FlvStream, FlvTag, FlvTagType};
    use bytes::{BufMut, BytesMut};

    fn avcc(nalus: &[&[u8]]) -> Bytes {
        let mut buf = BytesMut::new();
        for nalu in nalus {
            buf.put_u32(nalu.len() as u32);
            buf.put_slice(nalu);
        }
        buf.freeze()
    }

    #[test]
    fn test_declared_medias() {
        let consumer = Consumer::new();
        let medias = consumer.medias();
        assert_eq!(medias.len(), 2);
        assert!(medias[0].codec(CodecName::H264).is_some());
        assert!(medias[1].codec(CodecName::Aac).is_some());
        assert!(medias.iter().all(|m| m.direction == Direction::SendOnly));
    }

    #[tokio::test]
    async fn test_add_track_rejects_unsupported() {
        let mut consumer = Consumer::new();
        let media = Media::new(MediaKind::Video, Direction::RecvOnly, vec![]);
        let codec = Codec::h265();
        let track = Track::new(Arc::new(Codec::h265()));

        let err = consumer.add_track(&media, &codec, &track).unwrap_err();
        assert!(matches!(err, Error::Media(MediaError::UnsupportedCodec(_))));
    }

    #[tokio::test]
    async fn test_write_to_streams_tags() {
        let video = Track::new(Arc::new(Codec::h264()));
        let audio = Track::new(Arc::new(Codec::aac(44100, 2).with_params(CodecParams::Aac {
            config: Bytes::from_static(&[0x12, 0x10]),
        })));

        let mut consumer = Consumer::new();
        let medias = consumer.medias().to_vec();
        consumer.add_track(&medias[0], &medias[0].codecs[0], &video).unwrap();
        consumer.add_track(&medias[1], &medias[1].codecs[0], &audio).unwrap();

        let sps: &[u8] = &[0x67, 0x42, 0x00, 0x1F, 0xE9];
        let pps: &[u8] = &[0x68, 0xCE, 0x38, 0x80];
        video.send(Packet::new(0, avcc(&[sps, pps, &[0x65, 0x88]])));
        video.send(Packet::new(3600, avcc(&[&[0x41, 0x9A]])));
        audio.send(Packet::new(0, Bytes::from_static(&[0x21, 0x00])));
        audio.send(Packet::new(1024, Bytes::from_static(&[0x21, 0x01])));
        let video_codec = Arc::clone(video.codec());
        drop((video, audio));

        let mut sink = FlvStream(Vec::new());
        let written = consumer.write_to(&mut sink).await.unwrap();
        let out = sink.into_inner();
        assert_eq!(written, out.len() as u64);
        assert_eq!(&out[..5], &[b'F', b'L', b'V', 1, 0x05]);

        let mut rest = Bytes::from(out).slice(13..);
        let mut tags = Vec::new();
        while let Some(tag) = FlvTag::decode(&mut rest).unwrap() {
            tags.push(tag);
        }

        // metadata and AAC sequence header come first
        assert_eq!(tags[0].tag_type, FlvTagType::Script);
        assert!(tags[1].is_aac_sequence_header());

        let video_tags: Vec<_> = tags[2..].iter().filter(|t| t.is_video()).collect();
        assert_eq!(video_tags.len(), 3);
        assert!(video_tags[0].is_avc_sequence_header());
        assert!(video_tags[1].is_keyframe());
        assert_eq!(video_tags[2].timestamp, 40);

        let audio_tags: Vec<_> = tags[2..].iter().filter(|t| t.is_audio()).collect();
        assert_eq!(audio_tags.len(), 2);
        assert_eq!(audio_tags[1].timestamp, 23);

        assert!(video_codec.has_params());
    }

    #[tokio::test]
    async fn test_sequence_header_written_once() {
        let sps: &[u8] = &[0x67, 0x42, 0x00, 0x1F, 0xE9];
        let pps: &[u8] = &[0x68, 0xCE, 0x38, 0x80];
        let video = Track::new(Arc::new(Codec::h264()));

        let mut consumer = Consumer::new();
        let medias = consumer.medias().to_vec();
        consumer.add_track(&medias[0], &medias[0].codecs[0], &video).unwrap();

        // parameters become known between add_track and write_to
        video.send(Packet::new(0, avcc(&[sps, pps, &[0x65, 0x88]])));
        tokio::task::yield_now().await;
        video.codec().set_params(CodecParams::Avc {
            sps: Bytes::copy_from_slice(sps),
            pps: Bytes::copy_from_slice(pps),
        });
        video.send(Packet::new(3600, avcc(&[&[0x41, 0x9A]])));
        drop(video);

        let mut sink = FlvStream(Vec::new());
        consumer.write_to(&mut sink).await.unwrap();

        let mut rest = Bytes::from(sink.into_inner()).slice(13..);
        let mut tags = Vec::new();
        while let Some(tag) = FlvTag::decode(&mut rest).unwrap() {
            tags.push(tag);
        }
        let headers = tags.iter().filter(|t| t.is_avc_sequence_header()).count();
        assert_eq!(headers, 1);
        assert!(tags[1].is_avc_sequence_header());
        assert_eq!(tags.iter().filter(|t| t.is_video()).count(), 3);
    }

    #[tokio::test]
    async fn test_add_track_after_write() {
        let mut consumer = Consumer::new();
        let mut sink = FlvStream(Vec::new());
        // header, then metadata with an empty object
        assert_eq!(consumer.write_to(&mut sink).await.unwrap(), 13 + 11 + 33 + 4);

        let medias = consumer.medias().to_vec();
        let track = Track::new(Arc::new(Codec::h264()));
        assert!(consumer.add_track(&medias[0], &medias[0].codecs[0], &track).is_err());
    }
}
