//! rtmp-flv: RTMP client/server relay speaking FLV
//!
//! This library moves media between RTMP connections and FLV byte streams:
//! - Client mode: `play` a remote stream or camera, `publish` FLV to a server
//! - Server mode: accept `publish`/`play` from OBS, ffmpeg, etc.
//! - AMF0 and FLV tag codecs, chunk stream engine, simple handshake
//! - H.264 video and AAC audio, with SPS/PPS backfill when muxing
//!
//! # Example: Relay Server
//!
//! ```no_run
//! use rtmp_flv::{RtmpServer, ServerConfig, Session, TagSource};
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RtmpServer::new(ServerConfig::default(), |mut session: Session<TcpStream>| async move {
//!         session.write_start().await?;
//!         while let Ok(tag) = session.read_tag().await {
//!             println!("{:?} {} bytes @ {}ms", tag.tag_type, tag.size(), tag.timestamp);
//!         }
//!         Ok::<_, rtmp_flv::Error>(())
//!     });
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Pull a Camera
//!
//! ```no_run
//! use rtmp_flv::client::dial_play;
//!
//! # async fn run() -> rtmp_flv::Result<()> {
//! let mut producer = dial_play("rtmp://192.168.1.10/bcs/channel0.bcs?channel=0&stream=0").await?;
//! for media in producer.medias() {
//!     println!("{:?}: {}", media.kind, media.codecs[0]);
//! }
//! producer.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod amf;
pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export main types for convenience
pub use client::{ClientConfig, RtmpUrl};
pub use error::{Error, Result};
pub use media::{Consumer, FlvReader, FlvSink, FlvStream, FlvTag, Muxer, Producer, TagSource};
pub use server::{RtmpServer, ServerConfig, SessionHandler};
pub use session::{Intent, Session};
