//! # LAN Video Streamer
//!
//! One-to-many video streaming over IP multicast with a small custom
//! datagram protocol: fixed 17-byte packet framing, sequence-gap
//! detection, XOR-parity forward error correction, sliding-window
//! bandwidth estimation, adaptive receive buffering, and paced send /
//! receive loops with session semantics (start / pause / resume / stop).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         SENDER                               │
//! │  producer ──offer_frame──▶ ┌──────────────┐                  │
//! │  (capture / file reader)   │ frame queue  │ bounded, drops   │
//! │                            └──────┬───────┘ when full        │
//! │                                   ▼                          │
//! │            ┌──────────────────────────────────┐              │
//! │            │ StreamSource (net::source)       │              │
//! │            │  chunk ▸ sequence ▸ FEC parity   │              │
//! │            │  pace to target FPS ▸ retry      │              │
//! │            └──────────────┬───────────────────┘              │
//! └───────────────────────────┼──────────────────────────────────┘
//!                             │ UDP multicast (TTL=1)
//! ┌───────────────────────────┼──────────────────────────────────┐
//! │                         RECEIVER                             │
//! │            ┌──────────────▼───────────────────┐              │
//! │            │ StreamSink (net::sink)           │              │
//! │            │  decode ▸ gap detect ▸ FEC       │              │
//! │            │  ingest ▸ store by sequence      │              │
//! │            └──────────────┬───────────────────┘              │
//! │                           ▼                                  │
//! │              ordered persistence on STOP                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod bandwidth;
pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod net;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default multicast group address (administratively scoped)
    pub const MULTICAST_ADDR: &str = "230.0.0.1";

    /// Default UDP port for the multicast group
    pub const MULTICAST_PORT: u16 = 4446;

    /// Wire header size: command(1) + sequence(4) + timestamp(8) + length(4)
    pub const HEADER_SIZE: usize = 17;

    /// Default ceiling on payload bytes per packet
    pub const MAX_PACKET_SIZE: usize = 60_000;

    /// Default pacing target in frames per second
    pub const DEFAULT_FPS: u32 = 15;

    /// Multicast TTL: 1 confines delivery to the local segment
    pub const MULTICAST_TTL: u32 = 1;

    /// Socket send/receive buffer hint (best-effort)
    pub const SOCKET_BUFFER_SIZE: usize = 8 * 1024 * 1024;

    /// Bounded producer frame queue capacity
    pub const FRAME_QUEUE_CAPACITY: usize = 100;
}
