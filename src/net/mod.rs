//! Multicast transport: socket construction, paced sender, receiver

pub mod sink;
pub mod socket;
pub mod source;

pub use sink::{SaveSummary, SinkStats, StreamSink};
pub use source::{SourceStats, StreamSource};

/// Session state of one endpoint, driven by control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Paused,
}
