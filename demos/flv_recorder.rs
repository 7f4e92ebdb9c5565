//! FLV Recorder - pulls an RTMP stream and writes it to an FLV file
//!
//! Run with: cargo run --example flv_recorder -- <rtmp-url> [output.flv]
//!
//! ```text
//!   camera ──play──► Producer ──Track──► Consumer ──FLV──► output.flv
//! ```
//!
//! The stream is depacketized into codec packets and muxed again, so the
//! output always starts with metadata and sequence headers even when the
//! source only sends parameter sets in-band.

use std::path::PathBuf;

use rtmp_flv::client::dial_play;
use rtmp_flv::{Consumer, FlvStream};
use tokio::fs::File;
use tokio::io::BufWriter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_flv=info".parse()?)
                .add_directive("flv_recorder=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("usage: flv_recorder <rtmp-url> [output.flv]");
        std::process::exit(2);
    };
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output.flv"));

    let mut producer = dial_play(&url).await?;
    let mut consumer = Consumer::new();

    let medias = producer.medias().to_vec();
    for media in &medias {
        let codec = &media.codecs[0];
        let accepted = consumer
            .medias()
            .iter()
            .find(|m| m.kind == media.kind)
            .cloned();
        let Some(accepted) = accepted else { continue };

        let track = producer.track(media, codec);
        match consumer.add_track(&accepted, codec, &track) {
            Ok(()) => println!("Recording {:?}: {}", media.kind, codec),
            Err(e) => println!("Skipping {:?}: {}", media.kind, e),
        }
    }

    let stop = producer.stop_handle();
    let pump = tokio::spawn(async move {
        // dropping the producer closes the tracks, which ends the consumer
        let result = producer.start().await;
        drop(producer);
        result
    });

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        println!("\nStopping...");
        stop.stop();
    });

    let file = File::create(&output).await?;
    let mut sink = FlvStream(BufWriter::new(file));
    let written = consumer.write_to(&mut sink).await?;

    let mut writer = sink.into_inner();
    tokio::io::AsyncWriteExt::flush(&mut writer).await?;

    pump.await??;
    println!("Wrote {} bytes to {}", written, output.display());
    Ok(())
}
