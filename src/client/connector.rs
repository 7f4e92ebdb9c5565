//! Client command sequence and dialing
//!
//! ```text
//! handshake ─► setChunkSize ─► connect(1) ─┬─► createStream(4) ─► play(5)
//!                                          └─► releaseStream(2), FCPublish(3)
//!                                              ─► createStream(4) ─► publish(5)
//! ```

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::client::config::{ClientConfig, RtmpUrl, Scheme};
use crate::client::transport::{self, Transport};
use crate::error::{Error, Result};
use crate::media::producer::Producer;
use crate::protocol::command::Command;
use crate::protocol::constants::*;
use crate::protocol::handshake::HandshakeRole;
use crate::session::{Intent, Session};

const TID_CONNECT: f64 = 1.0;
const TID_RELEASE_STREAM: f64 = 2.0;
const TID_FC_PUBLISH: f64 = 3.0;
const TID_CREATE_STREAM: f64 = 4.0;
const TID_STREAM: f64 = 5.0;

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Handshake and `connect` over an already open transport
    ///
    /// Any transport works here, including a TLS stream for `rtmps://`.
    pub async fn client(io: S, url: &RtmpUrl, config: &ClientConfig) -> Result<Self> {
        let mut session = Session::establish(
            io,
            HandshakeRole::Client,
            config.chunk_size,
            config.read_buffer_size,
        )
        .await?;
        session.app = url.app.clone();
        session.stream = url.stream.clone();
        session.tc_url = url.tc_url.clone();

        let connect = Command::connect(TID_CONNECT, &url.app, &config.flash_ver, &url.tc_url);
        let reply = session.call(&connect, 0).await?;
        if reply.status_code() != Some(NC_CONNECT_SUCCESS) {
            return Err(reply.into_unexpected());
        }

        tracing::debug!(app = %session.app, tc_url = %session.tc_url, "Connected");
        Ok(session)
    }

    /// createStream + play
    pub async fn play(&mut self) -> Result<()> {
        self.create_stream().await?;

        let play = Command::play(TID_STREAM, &self.stream);
        let reply = self.call(&play, self.stream_id).await?;
        match reply.status_code() {
            Some(code) if code.starts_with(NS_PLAY_PREFIX) => {}
            _ => return Err(reply.into_unexpected()),
        }

        self.intent = Some(Intent::Play);
        tracing::info!(stream = %self.stream, stream_id = self.stream_id, "Playing");
        Ok(())
    }

    /// releaseStream + FCPublish + createStream + publish
    pub async fn publish(&mut self) -> Result<()> {
        self.send_command(&Command::release_stream(TID_RELEASE_STREAM, &self.stream))
            .await?;
        self.send_command(&Command::fc_publish(TID_FC_PUBLISH, &self.stream))
            .await?;
        self.create_stream().await?;

        let publish = Command::publish(TID_STREAM, &self.stream);
        let reply = self.call(&publish, self.stream_id).await?;
        if reply.status_code() != Some(NS_PUBLISH_START) {
            return Err(reply.into_unexpected());
        }

        self.intent = Some(Intent::Publish);
        tracing::info!(stream = %self.stream, stream_id = self.stream_id, "Publishing");
        Ok(())
    }

    async fn create_stream(&mut self) -> Result<()> {
        let reply = self
            .call(&Command::create_stream(TID_CREATE_STREAM), 0)
            .await?;
        match reply.number_arg(0) {
            Some(id) if id >= 0.0 && id <= u32::MAX as f64 => {
                self.stream_id = id as u32;
                Ok(())
            }
            _ => Err(reply.into_unexpected()),
        }
    }

    /// Send a request and wait for its reply; `_error` fails the step
    async fn call(&mut self, cmd: &Command, stream_id: u32) -> Result<Command> {
        self.writer.send_command(cmd, stream_id).await?;
        let reply = self.demux.wait_reply(cmd.transaction_id).await?;
        tracing::debug!(
            name = %reply.name,
            transaction_id = reply.transaction_id,
            code = reply.status_code().unwrap_or_default(),
            "Reply received"
        );
        if reply.is_error() {
            return Err(reply.into_unexpected());
        }
        Ok(reply)
    }
}

/// Open the transport for the URL and run handshake + connect
///
/// `rtmps`/`rtmpx` are wrapped in TLS and a `#proxy=socks5://...` fragment
/// routes the connection through a SOCKS5 proxy. One timeout covers
/// connecting, and another covers handshake plus `connect`.
pub async fn dial(config: &ClientConfig) -> Result<Session<Transport>> {
    let mut url = config.parse_url()?;

    let transport = timeout(config.connect_timeout, transport::connect(&url))
        .await
        .map_err(|_| Error::Timeout)??;
    if config.tcp_nodelay {
        transport.set_nodelay(true)?;
    }

    // servers only know rtmps
    if url.scheme == Scheme::Rtmpx {
        url.tc_url = format!("rtmps{}", &url.tc_url["rtmpx".len()..]);
    }

    timeout(config.connect_timeout, Session::client(transport, &url, config))
        .await
        .map_err(|_| Error::Timeout)?
}

/// Dial, play, and discover the stream's codecs
pub async fn dial_play(url: &str) -> Result<Producer<Session<Transport>>> {
    dial_play_with(&ClientConfig::new(url)).await
}

pub async fn dial_play_with(config: &ClientConfig) -> Result<Producer<Session<Transport>>> {
    let mut session = dial(config).await?;
    session.play().await?;

    let mut producer = Producer::new(session).with_probe_timeout(config.probe_timeout);
    producer.describe().await?;
    Ok(producer)
}

/// Dial and publish; write FLV into the returned session
pub async fn dial_publish(url: &str) -> Result<Session<Transport>> {
    dial_publish_with(&ClientConfig::new(url)).await
}

pub async fn dial_publish_with(config: &ClientConfig) -> Result<Session<Transport>> {
    let mut session = dial(config).await?;
    session.publish().await?;
    Ok(session)
}
