//! Streaming configuration
//!
//! All tunables for the protocol engine live in one struct passed at
//! construction. Defaults mirror the well-known LAN deployment values.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, FecError, Result};

/// Top-level streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Multicast group address
    pub multicast_addr: Ipv4Addr,

    /// Multicast UDP port
    pub port: u16,

    /// Multicast TTL (1 = LAN only)
    pub ttl: u32,

    /// Preferred local interface address for the multicast join.
    /// `None` falls back to the OS default interface.
    pub interface: Option<Ipv4Addr>,

    /// Payload bytes per packet ceiling
    pub max_packet_size: usize,

    /// Pacing target in frames per second
    pub target_fps: u32,

    /// Socket send/receive buffer hint in bytes (best-effort)
    pub socket_buffer_size: usize,

    /// How many times control commands (START/STOP) are repeated
    pub control_redundancy: u32,

    /// Delay between redundant control sends, in milliseconds
    pub control_resend_interval_ms: u64,

    /// Retries for a single failed datagram send
    pub send_retries: u32,

    /// Delay between send retries, in milliseconds
    pub send_retry_delay_ms: u64,

    /// Producer frame queue capacity
    pub frame_queue_capacity: usize,

    pub fec: FecConfig,
    pub buffer: BufferConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            multicast_addr: MULTICAST_ADDR.parse().expect("valid default address"),
            port: MULTICAST_PORT,
            ttl: MULTICAST_TTL,
            interface: None,
            max_packet_size: MAX_PACKET_SIZE,
            target_fps: DEFAULT_FPS,
            socket_buffer_size: SOCKET_BUFFER_SIZE,
            control_redundancy: 3,
            control_resend_interval_ms: 100,
            send_retries: 2,
            send_retry_delay_ms: 5,
            frame_queue_capacity: FRAME_QUEUE_CAPACITY,
            fec: FecConfig::default(),
            buffer: BufferConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Inter-packet pacing delay derived from the target FPS
    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(1000 / self.target_fps.max(1) as u64)
    }

    /// Default config file location (`<config dir>/lan-video-streamer/streaming.toml`)
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "lan-video-streamer")
            .map(|dirs| dirs.config_dir().join("streaming.toml"))
    }

    /// Load from a TOML file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.fec.validate()?;
        Ok(config)
    }

    /// Save to a TOML file, creating parent directories as needed
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Load the default config file if present, otherwise defaults
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config, using defaults: {}", e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }
}

/// Forward error correction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FecConfig {
    /// Whether parity packets are generated/consumed
    pub enabled: bool,

    /// Data packets per FEC group
    pub group_size: usize,

    /// Parity packets per group
    pub parity_count: usize,

    /// Groups older than this are evicted regardless of completeness
    pub group_ttl_secs: u64,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group_size: 10,
            parity_count: 2,
            group_ttl_secs: 30,
        }
    }
}

impl FecConfig {
    pub fn group_ttl(&self) -> Duration {
        Duration::from_secs(self.group_ttl_secs)
    }

    /// Reject group shapes the decoder cannot track: a group needs at
    /// least one data slot, and all data + parity slots must fit the
    /// 64-bit received mask.
    pub fn validate(&self) -> Result<()> {
        if self.group_size == 0 {
            return Err(FecError::InvalidConfig("group_size must be at least 1".into()).into());
        }
        if self.group_size + self.parity_count > 64 {
            return Err(FecError::InvalidConfig(format!(
                "group_size ({}) + parity_count ({}) exceeds the 64-slot group limit",
                self.group_size, self.parity_count
            ))
            .into());
        }
        Ok(())
    }
}

/// Adaptive receive buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Initial primary ring capacity in packets
    pub initial_capacity: usize,

    /// Capacity ceiling when growing
    pub max_capacity: usize,

    /// Capacity floor when shrinking
    pub min_capacity: usize,

    /// Drop rate above which capacity doubles (fraction, e.g. 0.01 = 1%)
    pub grow_drop_rate: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1000,
            max_capacity: 10_000,
            min_capacity: 100,
            grow_drop_rate: 0.01,
        }
    }
}

/// Receiver reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Whether the sink reconnects after socket errors
    pub auto_reconnect: bool,

    /// Maximum consecutive reconnect attempts
    pub max_attempts: u32,

    /// Fixed backoff between attempts, in milliseconds
    pub backoff_ms: u64,

    /// Stream considered dead after this long without packets, in milliseconds
    pub stream_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: 5,
            backoff_ms: 3000,
            stream_timeout_ms: 5000,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.multicast_addr, Ipv4Addr::new(230, 0, 0, 1));
        assert_eq!(config.port, 4446);
        assert_eq!(config.ttl, 1);
        assert_eq!(config.fec.group_size, 10);
        assert_eq!(config.fec.parity_count, 2);
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn test_frame_delay() {
        let mut config = StreamConfig::default();
        config.target_fps = 25;
        assert_eq!(config.frame_delay(), Duration::from_millis(40));

        // Degenerate FPS must not divide by zero
        config.target_fps = 0;
        assert_eq!(config.frame_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_fec_config_validation() {
        assert!(FecConfig::default().validate().is_ok());

        let zero_group = FecConfig {
            group_size: 0,
            ..FecConfig::default()
        };
        assert!(zero_group.validate().is_err());

        // 60 data + 8 parity slots cannot fit the 64-bit group mask
        let oversized = FecConfig {
            group_size: 60,
            parity_count: 8,
            ..FecConfig::default()
        };
        assert!(oversized.validate().is_err());

        let at_limit = FecConfig {
            group_size: 60,
            parity_count: 4,
            ..FecConfig::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_invalid_fec_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streaming.toml");
        std::fs::write(&path, "[fec]\ngroup_size = 60\nparity_count = 8\n").unwrap();
        assert!(StreamConfig::load(&path).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = StreamConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: StreamConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.port, config.port);
        assert_eq!(parsed.fec.group_size, config.fec.group_size);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: StreamConfig = toml::from_str("target_fps = 30").unwrap();
        assert_eq!(parsed.target_fps, 30);
        assert_eq!(parsed.port, MULTICAST_PORT);
    }
}
