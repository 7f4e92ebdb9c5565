//! RTMP server implementation
//!
//! - [`ServerConfig`]: bind address, limits and timeouts
//! - `acceptor`: server handshake and command answers on a [`Session`](crate::session::Session)
//! - [`RtmpServer`]: TCP accept loop handing sessions to a [`SessionHandler`]

pub mod acceptor;
pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::{RtmpServer, SessionHandler};
