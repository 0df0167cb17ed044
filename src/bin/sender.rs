//! Multicast Stream Sender
//!
//! Reads a file and streams it over the multicast group as paced frames.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_video_streamer::{
    bandwidth::{format_bandwidth, format_bytes},
    config::StreamConfig,
    events::LogEventSink,
    net::StreamSource,
    protocol::packet::now_millis,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: sender <file> [fps]")?;
    let mut config = StreamConfig::load_or_default();
    if let Some(fps) = std::env::args().nth(2) {
        config.target_fps = fps.parse().context("invalid fps")?;
    }

    tracing::info!(
        group = %config.multicast_addr,
        port = config.port,
        fps = config.target_fps,
        "starting multicast sender"
    );

    let data = std::fs::read(&path).with_context(|| format!("reading {}", path))?;
    tracing::info!(file = %path, bytes = data.len(), "loaded stream source");

    let source = StreamSource::new(config.clone(), Arc::new(LogEventSink))?;
    source.start()?;

    // Carve the file into frames; the send worker handles per-packet
    // chunking and pacing.
    let frame_size = config.max_packet_size;
    let data = Bytes::from(data);
    let mut offset = 0;
    let mut last_stats = Instant::now();

    while offset < data.len() {
        let end = (offset + frame_size).min(data.len());
        let frame = data.slice(offset..end);

        if source.offer_frame(frame, now_millis()) {
            offset = end;
        } else {
            // Queue full: let the paced worker drain
            std::thread::sleep(config.frame_delay());
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            let stats = source.stats();
            tracing::info!(
                sent = stats.packets_sent,
                bandwidth = format_bandwidth(stats.bandwidth_bps),
                total = format_bytes(stats.bytes_sent),
                "send progress"
            );
            last_stats = Instant::now();
        }
    }

    // Wait for the queue to drain, plus a little slack for the frame in
    // flight, before announcing the end of stream
    while source.stats().queue_len > 0 {
        std::thread::sleep(config.frame_delay());
    }
    std::thread::sleep(config.frame_delay() * 2);
    source.stop()?;

    let stats = source.stats();
    tracing::info!(
        sent = stats.packets_sent,
        frames = stats.frames_sent,
        total = format_bytes(stats.bytes_sent),
        "stream complete"
    );

    Ok(())
}
