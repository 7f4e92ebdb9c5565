//! RTMP connection
//!
//! A [`Session`] is one handshaken RTMP connection in either role. The
//! transport is split once the handshake is done:
//!
//! - the read half belongs to a [`Demux`] task for the whole lifetime
//! - the write half sits behind a [`MessageWriter`] shared by all senders
//!
//! Client command sequences live in `client::connector`, the server side in
//! `server::acceptor`. Both end in the same media surface: [`TagSource`] for
//! inbound audio/video/data and [`FlvSink`] for outbound FLV bytes.

pub mod demux;
pub mod writer;

pub use demux::Demux;
pub use writer::MessageWriter;

use bytes::{Buf, Bytes};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};

use crate::error::{MediaError, Result};
use crate::media::flv::{FlvSink, FlvTag, FlvTagType, TagSource, FLV_HEADER_SIZE};
use crate::protocol::chunk::RawMessage;
use crate::protocol::command::Command;
use crate::protocol::constants::*;
use crate::protocol::handshake::{Handshake, HandshakeRole};

/// What the client asked for with `publish` or `play`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Publish,
    Play,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Publish => write!(f, "{}", CMD_PUBLISH),
            Intent::Play => write!(f, "{}", CMD_PLAY),
        }
    }
}

/// One RTMP connection after the handshake
pub struct Session<S> {
    pub(crate) role: HandshakeRole,
    pub(crate) app: String,
    pub(crate) stream: String,
    pub(crate) tc_url: String,
    pub(crate) intent: Option<Intent>,
    /// Message stream id used for media and stream commands
    pub(crate) stream_id: u32,
    pub(crate) writer: MessageWriter<WriteHalf<S>>,
    pub(crate) demux: Demux,
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("app", &self.app)
            .field("stream", &self.stream)
            .field("intent", &self.intent)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Handshake, split the transport and announce our chunk size
    pub(crate) async fn establish(
        mut io: S,
        role: HandshakeRole,
        chunk_size: u32,
        read_buffer_size: usize,
    ) -> Result<Self> {
        Handshake::new(role).run(&mut io).await?;

        let (reader, writer) = tokio::io::split(io);
        let writer = MessageWriter::new(writer);
        let demux = Demux::spawn(reader, read_buffer_size);
        writer.set_chunk_size(chunk_size).await?;

        Ok(Self {
            role,
            app: String::new(),
            stream: String::new(),
            tc_url: String::new(),
            intent: None,
            stream_id: 0,
            writer,
            demux,
        })
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    /// Application name (first path segment of the URL)
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Stream name, including any query string
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn tc_url(&self) -> &str {
        &self.tc_url
    }

    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Handle for sending from other tasks
    pub fn writer(&self) -> MessageWriter<WriteHalf<S>> {
        self.writer.clone()
    }

    pub async fn send_command(&self, cmd: &Command) -> Result<()> {
        self.writer.send_command(cmd, 0).await
    }

    /// Send one FLV tag as an RTMP message on the session's stream
    pub async fn send_tag(&self, tag: &FlvTag) -> Result<()> {
        let (csid, message_type) = match tag.tag_type {
            FlvTagType::Audio => (CSID_AUDIO, MSG_AUDIO),
            FlvTagType::Video => (CSID_VIDEO, MSG_VIDEO),
            FlvTagType::Script => (CSID_DATA, MSG_DATA_AMF0),
        };
        let msg = RawMessage::new(
            csid,
            message_type,
            self.stream_id,
            tag.timestamp,
            tag.data.clone(),
        );
        self.writer.send(&msg).await
    }

    /// Stop reading and shut down the write direction; the peer sees end of stream
    pub async fn close(mut self) -> Result<()> {
        TagSource::close(&mut self).await
    }
}

impl<S> TagSource for Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn read_tag(&mut self) -> Result<FlvTag> {
        self.demux.recv_media().await
    }

    async fn close(&mut self) -> Result<()> {
        self.demux.abort();
        self.writer.shutdown().await
    }
}

impl<S> FlvSink for Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Accepts an optional file header followed by complete tags
    async fn write_flv(&mut self, mut data: Bytes) -> Result<()> {
        if crate::media::flv::has_header(&data) {
            if data.len() < FLV_HEADER_SIZE {
                return Err(MediaError::InvalidFlvHeader.into());
            }
            let offset = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) as usize;
            // header plus PrevTagSize0
            let skip = offset + 4;
            if offset < FLV_HEADER_SIZE || data.len() < skip {
                return Err(MediaError::InvalidFlvHeader.into());
            }
            data.advance(skip);
        }

        while !data.is_empty() {
            match FlvTag::decode(&mut data)? {
                Some(tag) => self.send_tag(&tag).await?,
                None => return Err(MediaError::InvalidFlvTag.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::media::flv::encode_header;
    use bytes::BytesMut;
    use tokio::io::DuplexStream;

    async fn pair() -> (Session<DuplexStream>, Session<DuplexStream>) {
        let (a, b) = tokio::io::duplex(1 << 16);
        let client = Session::establish(a, HandshakeRole::Client, 4096, 4096);
        let server = Session::establish(b, HandshakeRole::Server, 4096, 4096);
        let (client, server) = tokio::join!(client, server);
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn test_flv_bytes_become_media_messages() {
        let (mut client, mut server) = pair().await;
        client.stream_id = 1;

        let tags = [
            FlvTag::script(0, Bytes::from_static(&[0x02, 0x00, 0x01, b'x'])),
            FlvTag::video(0, Bytes::from(vec![0x17; 5000])),
            FlvTag::audio(23, Bytes::from_static(&[0xAF, 0x01, 0x21])),
        ];
        let mut flv = BytesMut::new();
        flv.extend_from_slice(&encode_header(true, true));
        for tag in &tags {
            tag.encode(&mut flv).unwrap();
        }

        client.write_flv(flv.freeze()).await.unwrap();
        for tag in &tags {
            assert_eq!(&server.read_tag().await.unwrap(), tag);
        }

        // tags without a header are accepted too
        client.write_flv(tags[2].to_bytes().unwrap()).await.unwrap();
        assert_eq!(&server.read_tag().await.unwrap(), &tags[2]);
    }

    #[tokio::test]
    async fn test_partial_tag_rejected() {
        let (mut client, _server) = pair().await;
        let bytes = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x01])).to_bytes().unwrap();
        let err = client.write_flv(bytes.slice(..bytes.len() - 1)).await.unwrap_err();
        assert!(matches!(err, Error::Media(MediaError::InvalidFlvTag)));
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (client, mut server) = pair().await;
        client.close().await.unwrap();
        assert!(server.read_tag().await.unwrap_err().is_end_of_stream());
    }
}
