//! Server side of the command exchange
//!
//! The acceptor answers `connect`, `releaseStream` and `createStream` right
//! away and stops as soon as the client says `publish` or `play`. The start
//! status is left to the caller, who sends it with [`Session::write_start`]
//! once it is ready to move media.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::command::Command;
use crate::protocol::constants::*;
use crate::protocol::handshake::HandshakeRole;
use crate::server::config::ServerConfig;
use crate::session::{Intent, Session};

/// Message stream id handed out by `createStream`
const STREAM_ID: u32 = 1;

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Handshake as the server and announce our chunk size
    pub async fn accept(io: S, config: &ServerConfig) -> Result<Self> {
        timeout(
            config.handshake_timeout,
            Session::establish(
                io,
                HandshakeRole::Server,
                config.chunk_size,
                config.read_buffer_size,
            ),
        )
        .await
        .map_err(|_| Error::Timeout)?
    }

    /// Answer commands until the client publishes or plays
    pub async fn read_commands(&mut self) -> Result<Intent> {
        loop {
            let cmd = self.demux.recv_command().await?;
            self.accept_command(cmd).await?;
            if let Some(intent) = self.intent {
                tracing::info!(
                    app = %self.app,
                    stream = %self.stream,
                    intent = %intent,
                    "Session ready"
                );
                return Ok(intent);
            }
        }
    }

    async fn accept_command(&mut self, cmd: Command) -> Result<()> {
        match cmd.name.as_str() {
            CMD_CONNECT => {
                if let Some(app) = cmd.command_object.get_string("app") {
                    self.app = app.to_string();
                }
                if let Some(tc_url) = cmd.command_object.get_string("tcUrl") {
                    self.tc_url = tc_url.to_string();
                }
                self.send_command(&Command::connect_result(cmd.transaction_id))
                    .await?;
            }
            CMD_RELEASE_STREAM => {
                // Some encoders put the app in releaseStream instead of connect
                if self.app.is_empty() {
                    if let Some(app) = cmd.string_arg(0) {
                        self.app = app.to_string();
                    }
                }
                self.send_command(&Command::result(cmd.transaction_id))
                    .await?;
            }
            CMD_FC_PUBLISH => {}
            CMD_CREATE_STREAM => {
                let reply = Command::result(cmd.transaction_id).with_arg(STREAM_ID as f64);
                self.send_command(&reply).await?;
            }
            CMD_PUBLISH | CMD_PLAY => {
                self.stream = cmd.string_arg(0).unwrap_or_default().to_string();
                self.stream_id = STREAM_ID;
                self.intent = Some(if cmd.name == CMD_PUBLISH {
                    Intent::Publish
                } else {
                    Intent::Play
                });
            }
            other => {
                tracing::warn!(name = other, "Unknown command");
            }
        }
        Ok(())
    }

    /// Send the start status for the recorded intent
    pub async fn write_start(&self) -> Result<()> {
        let code = match self.intent {
            Some(Intent::Publish) => NS_PUBLISH_START,
            Some(Intent::Play) => NS_PLAY_START,
            None => return Err(Error::Config("no publish or play request yet".into())),
        };
        self.writer
            .send_command(&Command::on_status(code), self.stream_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::config::{ClientConfig, RtmpUrl};
    use crate::media::codec::{Codec, CodecName, CodecParams};
    use crate::media::flv::{FlvSink, FlvTag, TagSource};
    use crate::media::muxer::Muxer;
    use crate::media::producer::Producer;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1F, 0xE9, 0x02];
    const PPS: &[u8] = &[0x68, 0xCE, 0x38, 0x80];

    fn client_task(
        io: DuplexStream,
        url: &str,
        intent: Intent,
    ) -> tokio::task::JoinHandle<Result<Session<DuplexStream>>> {
        let url = RtmpUrl::parse(url).unwrap();
        tokio::spawn(async move {
            let mut session = Session::client(io, &url, &ClientConfig::default()).await?;
            match intent {
                Intent::Publish => session.publish().await?,
                Intent::Play => session.play().await?,
            }
            Ok(session)
        })
    }

    #[tokio::test]
    async fn test_publish_end_to_end() {
        let (a, b) = tokio::io::duplex(1 << 16);
        let client = client_task(a, "rtmp://localhost/live/cam?token=abc", Intent::Publish);

        let mut server = Session::accept(b, &ServerConfig::default()).await.unwrap();
        assert_eq!(server.read_commands().await.unwrap(), Intent::Publish);
        assert_eq!(server.app(), "live");
        assert_eq!(server.stream(), "cam?token=abc");
        assert_eq!(server.tc_url(), "rtmp://localhost/live/cam?token=abc");
        assert_eq!(server.stream_id(), 1);

        // the start status is not sent until asked for
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.is_finished());

        server.write_start().await.unwrap();
        let mut client = client.await.unwrap().unwrap();
        assert_eq!(client.stream_id(), 1);
        assert_eq!(client.intent(), Some(Intent::Publish));

        let tag = FlvTag::video(40, Bytes::from_static(&[0x27, 0x01, 0, 0, 0, 0, 0, 0, 1, 0x41]));
        client.write_flv(tag.to_bytes().unwrap()).await.unwrap();
        assert_eq!(server.read_tag().await.unwrap(), tag);

        client.close().await.unwrap();
        assert!(server.read_tag().await.unwrap_err().is_end_of_stream());
    }

    #[tokio::test]
    async fn test_play_end_to_end_with_discovery() {
        let (a, b) = tokio::io::duplex(1 << 16);
        let client = client_task(a, "rtmp://localhost/live/cam", Intent::Play);

        let mut server = Session::accept(b, &ServerConfig::default()).await.unwrap();
        assert_eq!(server.read_commands().await.unwrap(), Intent::Play);
        server.write_start().await.unwrap();
        let client = client.await.unwrap().unwrap();

        let video = Arc::new(Codec::h264().with_params(CodecParams::Avc {
            sps: Bytes::from_static(SPS),
            pps: Bytes::from_static(PPS),
        }));
        let audio = Arc::new(Codec::aac(44100, 2).with_params(CodecParams::Aac {
            config: Bytes::from_static(&[0x12, 0x10]),
        }));
        let mut muxer = Muxer::new();
        muxer.payloader(video).unwrap();
        muxer.payloader(audio).unwrap();
        server.write_flv(muxer.init_segment().unwrap()).await.unwrap();

        let mut producer = Producer::new(client).with_probe_timeout(Duration::from_secs(5));
        producer.describe().await.unwrap();

        let medias = producer.medias();
        assert_eq!(medias.len(), 2);
        let names: Vec<_> = medias.iter().map(|m| m.codecs[0].name).collect();
        assert!(names.contains(&CodecName::H264));
        assert!(names.contains(&CodecName::Aac));
    }

    #[tokio::test]
    async fn test_url_without_path() {
        let (a, b) = tokio::io::duplex(1 << 16);
        let client = client_task(a, "rtmp://localhost", Intent::Publish);

        let mut server = Session::accept(b, &ServerConfig::default()).await.unwrap();
        assert_eq!(server.read_commands().await.unwrap(), Intent::Publish);
        assert_eq!(server.app(), "");
        assert_eq!(server.stream(), "");
        server.write_start().await.unwrap();
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_and_fc_publish_are_silent() {
        let (a, b) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            let mut server = Session::accept(b, &ServerConfig::default()).await?;
            let intent = server.read_commands().await?;
            Ok::<_, Error>((server, intent))
        });

        let mut client = Session::establish(a, HandshakeRole::Client, 4096, 4096)
            .await
            .unwrap();
        client
            .send_command(&Command::new("getStreamLength", 7.0).with_arg("x"))
            .await
            .unwrap();
        client
            .send_command(&Command::fc_publish(3.0, "x"))
            .await
            .unwrap();
        client
            .send_command(&Command::release_stream(2.0, "fallback"))
            .await
            .unwrap();
        let reply = client.demux.recv_command().await.unwrap();
        assert_eq!(reply, Command::result(2.0));

        client
            .writer
            .send_command(&Command::play(5.0, "x"), 1)
            .await
            .unwrap();
        let (server, intent) = server.await.unwrap().unwrap();
        assert_eq!(intent, Intent::Play);
        assert_eq!(server.app(), "fallback");
        assert_eq!(server.stream(), "x");
    }

    #[tokio::test]
    async fn test_write_start_requires_intent() {
        let (a, b) = tokio::io::duplex(1 << 16);
        let client = tokio::spawn(Session::establish(a, HandshakeRole::Client, 4096, 4096));
        let server = Session::accept(b, &ServerConfig::default()).await.unwrap();
        let _client = client.await.unwrap().unwrap();
        assert!(matches!(server.write_start().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (_a, b) = tokio::io::duplex(1 << 16);
        let config = ServerConfig::default().handshake_timeout(Duration::from_millis(50));
        assert!(matches!(
            Session::accept(b, &config).await,
            Err(Error::Timeout)
        ));
    }
}
