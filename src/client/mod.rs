//! RTMP client implementation
//!
//! Provides client-side RTMP for:
//! - Pulling streams from remote servers and cameras (`play`)
//! - Pushing FLV to remote servers (`publish`)
//! - Dialing over TCP, TLS (`rtmps`, `rtmpx`) and SOCKS5 proxies

pub mod config;
pub mod connector;
pub mod transport;

pub use config::{ClientConfig, RtmpUrl, Scheme};
pub use connector::{dial, dial_play, dial_play_with, dial_publish, dial_publish_with};
pub use transport::{Socks5Proxy, Transport};
