//! Error types for the streaming engine

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("FEC error: {0}")]
    Fec(#[from] FecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire codec errors
#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Unknown command byte: {0:#04x}")]
    UnknownCommand(u8),
}

/// Forward error correction errors
#[derive(Error, Debug)]
pub enum FecError {
    #[error("Invalid FEC configuration: {0}")]
    InvalidConfig(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket initialization failed: {0}")]
    Init(String),

    #[error("Failed to join multicast group: {0}")]
    JoinFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection lost after {0} reconnect attempts")]
    ReconnectExhausted(u32),

    #[error("Stream timeout - no packets received")]
    StreamTimeout,
}

/// Persistence errors (no automatic retry)
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("No packets to save")]
    Empty,

    #[error("Failed to write output {path}: {source}")]
    WriteFailed {
        path: String,
        source: std::io::Error,
    },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
