//! Stream lifecycle events and the event-log collaborator
//!
//! The protocol core never talks to a UI directly. Observers receive a
//! tagged [`StreamEvent`] over a bounded channel; lifecycle records go to
//! an [`EventSink`] implementation chosen by the embedding application.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;

/// Events emitted by the send/receive endpoints
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Receiver joined the multicast group
    Connected,
    /// START observed (or first DATA auto-started the session)
    StreamStarted,
    /// A DATA packet was stored
    PacketReceived {
        sequence: i32,
        received: u64,
        dropped: u64,
    },
    Paused,
    Resumed,
    /// STOP observed; stored packets are ready for persistence
    Stopped,
    /// Receiver left the group
    Disconnected,
    Error(String),
}

/// Create the event channel shared between an endpoint and its observer
pub fn event_channel(capacity: usize) -> (Sender<StreamEvent>, Receiver<StreamEvent>) {
    bounded(capacity)
}

/// Append-only sink for lifecycle records (CONNECT, STREAM_START, SAVE, ...)
///
/// Implementations may write to a database, a file, or nothing at all. The
/// core only ever calls [`EventSink::log_event`].
pub trait EventSink: Send + Sync {
    fn log_event(&self, event_type: &str, source_id: &str, message: &str);
}

/// Shared handle to an event sink
pub type SharedEventSink = Arc<dyn EventSink>;

/// Sink that forwards records to `tracing` at info level
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn log_event(&self, event_type: &str, source_id: &str, message: &str) {
        tracing::info!(event = event_type, source = source_id, "{}", message);
    }
}

/// Sink that discards everything
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn log_event(&self, _event_type: &str, _source_id: &str, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingSink {
        records: Mutex<Vec<(String, String)>>,
    }

    impl EventSink for RecordingSink {
        fn log_event(&self, event_type: &str, _source_id: &str, message: &str) {
            self.records
                .lock()
                .push((event_type.to_string(), message.to_string()));
        }
    }

    #[test]
    fn test_sink_records() {
        let sink = RecordingSink {
            records: Mutex::new(Vec::new()),
        };
        sink.log_event("CONNECT", "receiver", "joined group");
        sink.log_event("SAVE", "receiver", "wrote 3 packets");

        let records = sink.records.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, "CONNECT");
    }

    #[test]
    fn test_event_channel_bounded() {
        let (tx, rx) = event_channel(2);
        tx.try_send(StreamEvent::Connected).unwrap();
        tx.try_send(StreamEvent::StreamStarted).unwrap();
        assert!(tx.try_send(StreamEvent::Stopped).is_err());
        assert!(matches!(rx.recv().unwrap(), StreamEvent::Connected));
    }
}
