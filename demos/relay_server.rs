//! Relay Server - fans published streams out to players
//!
//! Run with: cargo run --example relay_server
//!
//! ```text
//!   ffmpeg ── publish live/cam ──►┌──────────────┐──► play live/cam ── ffplay
//!                                 │ RelayServer  │
//!                                 │  cam -> tx   │──► play live/cam ── vlc
//!                                 └──────────────┘
//! ```
//!
//! Players joining mid-stream get the last metadata and sequence headers
//! first so they can start decoding at the next keyframe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rtmp_flv::media::FlvTagType;
use rtmp_flv::{FlvTag, Intent, RtmpServer, ServerConfig, Session, TagSource};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

#[derive(Clone)]
struct Channel {
    tx: broadcast::Sender<FlvTag>,
    /// onMetaData and sequence headers, replayed to late joiners
    init: Arc<Mutex<Vec<FlvTag>>>,
}

#[derive(Clone, Default)]
struct Relay {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl Relay {
    fn channel(&self, name: &str) -> Channel {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(name.to_string())
            .or_insert_with(|| Channel {
                tx: broadcast::channel(1024).0,
                init: Arc::new(Mutex::new(Vec::new())),
            })
            .clone()
    }

    async fn serve(self, mut session: Session<TcpStream>) -> rtmp_flv::Result<()> {
        let name = format!("{}/{}", session.app(), session.stream());
        let channel = self.channel(&name);
        session.write_start().await?;

        match session.intent() {
            Some(Intent::Publish) => {
                tracing::info!(stream = %name, "Publisher started");
                channel.init.lock().unwrap().clear();
                loop {
                    let tag = match session.read_tag().await {
                        Ok(tag) => tag,
                        Err(e) if e.is_end_of_stream() => break,
                        Err(e) => return Err(e),
                    };
                    if is_init_tag(&tag) {
                        channel.init.lock().unwrap().push(tag.clone());
                    }
                    // no players is fine
                    let _ = channel.tx.send(tag);
                }
                tracing::info!(stream = %name, "Publisher stopped");
            }
            Some(Intent::Play) => {
                tracing::info!(stream = %name, "Player joined");
                let mut rx = channel.tx.subscribe();
                let init = channel.init.lock().unwrap().clone();
                for tag in &init {
                    session.send_tag(tag).await?;
                }
                loop {
                    match rx.recv().await {
                        Ok(tag) => session.send_tag(&tag).await?,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(stream = %name, skipped = n, "Player lagging");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            None => {}
        }
        Ok(())
    }
}

fn is_init_tag(tag: &FlvTag) -> bool {
    match tag.tag_type {
        FlvTagType::Script => true,
        _ => tag.is_avc_sequence_header() || tag.is_aac_sequence_header(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_flv=info".parse()?)
                .add_directive("relay_server=info".parse()?),
        )
        .init();

    let config = ServerConfig::default();

    println!("RTMP Relay Server");
    println!("=================");
    println!("Listening on: {}", config.bind_addr);
    println!();
    println!("Publish:  ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/cam");
    println!("Play:     ffplay rtmp://localhost/live/cam");
    println!();

    let relay = Relay::default();
    let server = RtmpServer::new(config, move |session: Session<TcpStream>| {
        relay.clone().serve(session)
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("\nShutting down...");
    Ok(())
}
