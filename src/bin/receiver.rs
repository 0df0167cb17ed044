//! Multicast Stream Receiver
//!
//! Joins the multicast group, reassembles the stream, and writes it to a
//! file when the sender announces STOP.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_video_streamer::{
    bandwidth::{format_bandwidth, format_bytes},
    config::StreamConfig,
    events::{event_channel, LogEventSink, StreamEvent},
    net::StreamSink,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let output: PathBuf = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "stream-output.bin".to_string())
        .into();
    let config = StreamConfig::load_or_default();

    tracing::info!(
        group = %config.multicast_addr,
        port = config.port,
        output = %output.display(),
        "starting multicast receiver"
    );

    let (event_tx, events) = event_channel(1024);
    let sink = StreamSink::new(config, event_tx, Arc::new(LogEventSink))?;
    sink.clone().connect()?;

    let mut last_stats = Instant::now();
    loop {
        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(StreamEvent::Stopped) => {
                match sink.save_to(&output) {
                    Ok(summary) => {
                        tracing::info!(
                            packets = summary.packets_written,
                            bytes = summary.bytes_written,
                            missing = summary.missing_sequences.len(),
                            output = %output.display(),
                            "stream saved"
                        );
                    }
                    Err(e) => tracing::error!("save failed: {}", e),
                }
                sink.clear();
                break;
            }
            Ok(StreamEvent::Error(message)) => {
                tracing::error!("stream error: {}", message);
            }
            Ok(_) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            let stats = sink.stats();
            if stats.packets_received > 0 {
                tracing::info!(
                    received = stats.packets_received,
                    dropped = stats.packets_dropped,
                    recovered = stats.fec.recovered_packets,
                    bandwidth = format_bandwidth(stats.bandwidth_bps),
                    total = format_bytes(stats.total_bytes),
                    "receive progress"
                );
            }
            last_stats = Instant::now();
        }
    }

    sink.disconnect();
    Ok(())
}
