//! Multicast stream receiver
//!
//! A dedicated receive thread performs short-timeout blocking reads so it
//! can observe the stop flag promptly; a periodic monitor thread watches
//! for stream timeouts and snapshots statistics. Packets are stored in a
//! concurrent map keyed by sequence number; ordering for persistence is
//! reconstructed entirely from sequence numbers, never from arrival
//! order.

use crossbeam_channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io::{BufWriter, Write};
use std::net::UdpSocket;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bandwidth::BandwidthMonitor;
use crate::config::StreamConfig;
use crate::error::{NetworkError, PersistenceError, Result};
use crate::events::{SharedEventSink, StreamEvent};
use crate::net::socket::{create_receiver_socket, leave_group};
use crate::net::SessionState;
use crate::protocol::fec::{FecDecoder, FecStats};
use crate::protocol::packet::{now_millis, Command, Packet};

use crate::constants::HEADER_SIZE;

/// Monitor thread period
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Sentinel for "no sequence seen yet"
const NO_SEQUENCE: i64 = -1;

/// Bounded reconnect schedule with fixed backoff
#[derive(Debug)]
pub struct ReconnectPolicy {
    attempts: u32,
    max_attempts: u32,
    backoff: Duration,
    enabled: bool,
}

impl ReconnectPolicy {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            attempts: 0,
            max_attempts: config.reconnect.max_attempts,
            backoff: config.reconnect.backoff(),
            enabled: config.reconnect.auto_reconnect,
        }
    }

    /// Claim the next attempt. Returns the backoff to wait, or `None`
    /// once reconnection is disabled or exhausted.
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if !self.enabled || self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.backoff)
    }

    /// A successful reconnect resets the attempt counter
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.enabled && self.attempts >= self.max_attempts
    }
}

/// Receiver statistics snapshot
#[derive(Debug, Clone)]
pub struct SinkStats {
    pub state: SessionState,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub last_sequence: i64,
    pub stored_packets: usize,
    pub bandwidth_bps: f64,
    pub total_bytes: u64,
    pub fec: FecStats,
}

/// Result of persisting the received stream
#[derive(Debug, Clone)]
pub struct SaveSummary {
    pub packets_written: usize,
    pub bytes_written: u64,
    pub missing_sequences: Vec<i32>,
}

/// Multicast stream receiver
pub struct StreamSink {
    config: StreamConfig,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    running: AtomicBool,
    state: Mutex<SessionState>,
    packets: DashMap<i32, Packet>,
    last_sequence: AtomicI64,
    received: AtomicU64,
    dropped: AtomicU64,
    last_packet_ms: AtomicI64,
    bandwidth: Mutex<BandwidthMonitor>,
    fec: Mutex<FecDecoder>,
    reconnect: Mutex<ReconnectPolicy>,
    terminal_error_sent: AtomicBool,
    generation: AtomicU32,
    event_tx: Sender<StreamEvent>,
    event_sink: SharedEventSink,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamSink {
    pub fn new(
        config: StreamConfig,
        event_tx: Sender<StreamEvent>,
        event_sink: SharedEventSink,
    ) -> Result<Arc<Self>> {
        config.fec.validate()?;
        let fec = FecDecoder::new(config.fec.clone());
        let reconnect = ReconnectPolicy::new(&config);
        Ok(Arc::new(Self {
            config,
            socket: Mutex::new(None),
            running: AtomicBool::new(false),
            state: Mutex::new(SessionState::Idle),
            packets: DashMap::new(),
            last_sequence: AtomicI64::new(NO_SEQUENCE),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            last_packet_ms: AtomicI64::new(0),
            bandwidth: Mutex::new(BandwidthMonitor::new()),
            fec: Mutex::new(fec),
            reconnect: Mutex::new(reconnect),
            terminal_error_sent: AtomicBool::new(false),
            generation: AtomicU32::new(0),
            event_tx,
            event_sink,
            threads: Mutex::new(Vec::new()),
        }))
    }

    /// Join the multicast group and start the receive + monitor threads.
    /// Bind/join failures are fatal for this endpoint.
    pub fn connect(self: Arc<Self>) -> Result<()> {
        let socket = Arc::new(create_receiver_socket(&self.config)?);
        *self.socket.lock() = Some(socket.clone());

        self.running.store(true, Ordering::SeqCst);
        self.reconnect.lock().reset();
        self.terminal_error_sent.store(false, Ordering::SeqCst);

        self.emit(StreamEvent::Connected);
        self.event_sink
            .log_event("CONNECT", "receiver", "joined multicast group");

        let mut threads = self.threads.lock();
        threads.push(self.clone().spawn_receive_loop(socket));
        threads.push(self.clone().spawn_monitor());

        Ok(())
    }

    /// Leave the group and stop all threads. Stored packets survive until
    /// [`StreamSink::clear`].
    pub fn disconnect(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(socket) = self.socket.lock().take() {
            leave_group(&socket, &self.config);
        }
        // Join outside the lock; a reconnect thread may still need it
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }

        self.emit(StreamEvent::Disconnected);
        self.event_sink
            .log_event("DISCONNECT", "receiver", "left multicast group");
        tracing::info!("receiver disconnected");
    }

    /// Process one decoded packet. Exposed separately from the socket
    /// loop so the protocol logic is drivable without a network.
    pub fn handle_packet(&self, packet: Packet) {
        self.last_packet_ms.store(now_millis(), Ordering::Relaxed);

        match packet.command {
            Command::Start => self.handle_start(),
            Command::Data => self.handle_data(packet),
            Command::Parity => self.handle_parity(packet),
            Command::Pause => {
                let mut state = self.state.lock();
                if *state == SessionState::Streaming {
                    *state = SessionState::Paused;
                }
                drop(state);
                tracing::info!("stream paused");
                self.event_sink
                    .log_event("STREAM_PAUSE", "receiver", "stream paused");
                self.emit(StreamEvent::Paused);
            }
            Command::Resume => {
                *self.state.lock() = SessionState::Streaming;
                tracing::info!("stream resumed");
                self.event_sink
                    .log_event("STREAM_RESUME", "receiver", "stream resumed");
                self.emit(StreamEvent::Resumed);
            }
            Command::Stop => self.handle_stop(),
        }
    }

    fn handle_start(&self) {
        self.packets.clear();
        self.received.store(0, Ordering::SeqCst);
        self.dropped.store(0, Ordering::SeqCst);
        self.last_sequence.store(NO_SEQUENCE, Ordering::SeqCst);
        self.bandwidth.lock().reset();
        self.fec.lock().reset();
        *self.state.lock() = SessionState::Streaming;

        tracing::info!("stream started");
        self.event_sink
            .log_event("STREAM_START", "receiver", "stream started");
        self.emit(StreamEvent::StreamStarted);
    }

    fn handle_data(&self, packet: Packet) {
        // Auto-start if the START announcement was lost
        {
            let mut state = self.state.lock();
            if *state == SessionState::Idle {
                *state = SessionState::Streaming;
            }
        }

        let seq = packet.sequence;
        let last = self.last_sequence.load(Ordering::SeqCst);

        // Forward gaps only; a late packet is stored but never counted
        if last != NO_SEQUENCE && (seq as i64) > last + 1 {
            let gap = (seq as i64 - last - 1) as u64;
            self.dropped.fetch_add(gap, Ordering::SeqCst);
            tracing::warn!(
                expected = last + 1,
                got = seq,
                gap,
                "detected dropped packets"
            );
        }
        self.last_sequence.fetch_max(seq as i64, Ordering::SeqCst);

        let received = self.received.fetch_add(1, Ordering::SeqCst) + 1;
        self.bandwidth.lock().record(packet.payload.len());

        let recovered = self.fec.lock().ingest(&packet);
        self.packets.insert(seq, packet);
        self.merge_recovered(recovered);

        let dropped = self.dropped.load(Ordering::SeqCst);
        if received % 50 == 0 {
            tracing::info!(
                received,
                dropped,
                bandwidth = %self.bandwidth.lock().formatted_bandwidth(),
                "receive progress"
            );
        }

        self.emit(StreamEvent::PacketReceived {
            sequence: seq,
            received,
            dropped,
        });
    }

    fn handle_parity(&self, packet: Packet) {
        self.bandwidth.lock().record(packet.payload.len());
        let recovered = self.fec.lock().ingest(&packet);
        self.merge_recovered(recovered);
    }

    /// Reconstructed packets fill holes in the store but do not count as
    /// received from the wire.
    fn merge_recovered(&self, recovered: Vec<Packet>) {
        for packet in recovered {
            self.packets.entry(packet.sequence).or_insert(packet);
        }
    }

    fn handle_stop(&self) {
        *self.state.lock() = SessionState::Idle;

        let received = self.received.load(Ordering::SeqCst);
        let dropped = self.dropped.load(Ordering::SeqCst);
        let success_rate = if received > 0 {
            received as f64 * 100.0 / (received + dropped) as f64
        } else {
            0.0
        };

        tracing::info!(
            received,
            dropped,
            success_rate = format!("{:.2}%", success_rate),
            bandwidth = %self.bandwidth.lock().formatted_bandwidth(),
            "stream stopped"
        );
        self.event_sink.log_event(
            "STREAM_STOP",
            "receiver",
            &format!(
                "stream stopped, received: {}, dropped: {}, success rate: {:.2}%",
                received, dropped, success_rate
            ),
        );
        self.emit(StreamEvent::Stopped);
    }

    /// Persist stored payloads in sequence order. Missing sequences are
    /// skipped silently; the output is a straight concatenation of what
    /// arrived, not a validated gap-free reconstruction.
    pub fn save_to(&self, path: &Path) -> Result<SaveSummary> {
        if self.packets.is_empty() {
            return Err(PersistenceError::Empty.into());
        }

        let mut min_seq = i32::MAX;
        let mut max_seq = i32::MIN;
        for entry in self.packets.iter() {
            min_seq = min_seq.min(*entry.key());
            max_seq = max_seq.max(*entry.key());
        }

        let file = std::fs::File::create(path).map_err(|e| PersistenceError::WriteFailed {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut writer = BufWriter::with_capacity(1024 * 1024, file);

        let mut summary = SaveSummary {
            packets_written: 0,
            bytes_written: 0,
            missing_sequences: Vec::new(),
        };

        for seq in min_seq..=max_seq {
            match self.packets.get(&seq) {
                Some(packet)
                    if packet.command == Command::Data && !packet.payload.is_empty() =>
                {
                    writer
                        .write_all(&packet.payload)
                        .map_err(|e| PersistenceError::WriteFailed {
                            path: path.display().to_string(),
                            source: e,
                        })?;
                    summary.packets_written += 1;
                    summary.bytes_written += packet.payload.len() as u64;
                }
                Some(_) => {}
                None => summary.missing_sequences.push(seq),
            }
        }

        writer.flush().map_err(|e| PersistenceError::WriteFailed {
            path: path.display().to_string(),
            source: e,
        })?;

        if !summary.missing_sequences.is_empty() {
            tracing::warn!(
                missing = summary.missing_sequences.len(),
                "saved stream has gaps"
            );
        }
        tracing::info!(
            packets = summary.packets_written,
            bytes = summary.bytes_written,
            path = %path.display(),
            "stream saved"
        );
        self.event_sink.log_event(
            "SAVE",
            "receiver",
            &format!(
                "saved {} packets ({} bytes) to {}",
                summary.packets_written,
                summary.bytes_written,
                path.display()
            ),
        );

        Ok(summary)
    }

    /// Drop all stored packets (after the caller is done persisting)
    pub fn clear(&self) {
        self.packets.clear();
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn stats(&self) -> SinkStats {
        let bandwidth = self.bandwidth.lock();
        SinkStats {
            state: self.state(),
            packets_received: self.received.load(Ordering::Relaxed),
            packets_dropped: self.dropped.load(Ordering::Relaxed),
            last_sequence: self.last_sequence.load(Ordering::Relaxed),
            stored_packets: self.packets.len(),
            bandwidth_bps: bandwidth.current_bandwidth_bps(),
            total_bytes: bandwidth.total_bytes(),
            fec: self.fec.lock().stats(),
        }
    }

    fn emit(&self, event: StreamEvent) {
        // Observers tolerate loss; never block the receive path
        let _ = self.event_tx.try_send(event);
    }

    fn spawn_receive_loop(self: Arc<Self>, socket: Arc<UdpSocket>) -> JoinHandle<()> {
        let sink = self;
        let generation = sink.generation.load(Ordering::SeqCst);
        thread::Builder::new()
            .name("sink-receive".into())
            .spawn(move || {
                let mut buf = vec![0u8; sink.config.max_packet_size + HEADER_SIZE + 4096];
                tracing::debug!("receive loop started");

                while sink.running.load(Ordering::SeqCst)
                    && sink.generation.load(Ordering::SeqCst) == generation
                {
                    match socket.recv_from(&mut buf) {
                        Ok((len, _)) => match Packet::decode(&buf[..len]) {
                            Ok(packet) => sink.handle_packet(packet),
                            Err(e) => {
                                // Malformed datagrams are discarded silently
                                tracing::debug!("discarding malformed packet: {}", e);
                            }
                        },
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            if sink.running.load(Ordering::SeqCst) {
                                tracing::error!("socket error: {}", e);
                                sink.clone().schedule_reconnect();
                            }
                            break;
                        }
                    }
                }

                tracing::debug!("receive loop stopped");
            })
            .expect("spawn receive loop")
    }

    /// Bounded reconnect with fixed backoff. A successful rejoin resets
    /// the attempt counter; exhaustion surfaces one terminal error.
    fn schedule_reconnect(self: Arc<Self>) {
        let backoff = match self.reconnect.lock().next_attempt() {
            Some(backoff) => backoff,
            None => {
                self.surface_terminal_error();
                return;
            }
        };

        let attempts = self.reconnect.lock().attempts();
        let max = self.config.reconnect.max_attempts;
        tracing::warn!(attempt = attempts, max, "scheduling reconnect");

        let sink = self.clone();
        let handle = thread::Builder::new()
            .name("sink-reconnect".into())
            .spawn(move || {
                thread::sleep(backoff);
                if !sink.running.load(Ordering::SeqCst) {
                    return;
                }

                match create_receiver_socket(&sink.config) {
                    Ok(socket) => {
                        let socket = Arc::new(socket);
                        *sink.socket.lock() = Some(socket.clone());
                        sink.reconnect.lock().reset();
                        tracing::info!("reconnected to multicast group");
                        sink.emit(StreamEvent::Connected);
                        sink.event_sink
                            .log_event("CONNECT", "receiver", "rejoined multicast group");
                        let loop_handle = sink.clone().spawn_receive_loop(socket);
                        sink.threads.lock().push(loop_handle);
                    }
                    Err(e) => {
                        tracing::warn!("reconnect failed: {}", e);
                        sink.schedule_reconnect();
                    }
                }
            })
            .expect("spawn reconnect");
        self.threads.lock().push(handle);
    }

    fn surface_terminal_error(&self) {
        if self.terminal_error_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let err = NetworkError::ReconnectExhausted(self.config.reconnect.max_attempts);
        tracing::error!("{}", err);
        self.emit(StreamEvent::Error(err.to_string()));
        self.event_sink
            .log_event("ERROR", "receiver", &err.to_string());
    }

    fn spawn_monitor(self: Arc<Self>) -> JoinHandle<()> {
        let sink = self;
        let generation = sink.generation.load(Ordering::SeqCst);
        thread::Builder::new()
            .name("sink-monitor".into())
            .spawn(move || {
                let timeout = sink.config.reconnect.stream_timeout();
                while sink.running.load(Ordering::SeqCst)
                    && sink.generation.load(Ordering::SeqCst) == generation
                {
                    thread::sleep(MONITOR_INTERVAL);

                    let last = sink.last_packet_ms.load(Ordering::Relaxed);
                    let streaming = *sink.state.lock() == SessionState::Streaming;
                    if streaming && last > 0 {
                        let silent = now_millis() - last;
                        if silent > timeout.as_millis() as i64 {
                            tracing::warn!(silent_ms = silent, "stream timeout detected");
                            *sink.state.lock() = SessionState::Idle;
                            sink.emit(StreamEvent::Error(
                                NetworkError::StreamTimeout.to_string(),
                            ));
                        }
                    }
                }
            })
            .expect("spawn monitor")
    }
}

impl Drop for StreamSink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_channel, NullEventSink};
    use bytes::Bytes;
    use crossbeam_channel::Receiver;

    fn make_sink() -> (Arc<StreamSink>, Receiver<StreamEvent>) {
        let (tx, rx) = event_channel(1024);
        let sink =
            StreamSink::new(StreamConfig::default(), tx, Arc::new(NullEventSink)).unwrap();
        (sink, rx)
    }

    fn data(seq: i32, payload: &'static [u8]) -> Packet {
        Packet::data(seq, Bytes::from_static(payload))
    }

    #[test]
    fn test_gap_detection() {
        let (sink, _rx) = make_sink();

        for seq in [0, 1, 2, 5, 6] {
            sink.handle_packet(data(seq, b"x"));
        }

        let stats = sink.stats();
        assert_eq!(stats.packets_received, 5);
        assert_eq!(stats.packets_dropped, 2);
        assert_eq!(stats.last_sequence, 6);
    }

    #[test]
    fn test_late_packet_not_counted_as_drop() {
        let (sink, _rx) = make_sink();

        sink.handle_packet(data(0, b"a"));
        sink.handle_packet(data(3, b"d")); // gap of 2
        sink.handle_packet(data(1, b"b")); // late, stored, no drop change
        sink.handle_packet(data(2, b"c"));

        let stats = sink.stats();
        assert_eq!(stats.packets_dropped, 2);
        assert_eq!(stats.stored_packets, 4);
        assert_eq!(stats.last_sequence, 3);
    }

    #[test]
    fn test_start_clears_session_state() {
        let (sink, _rx) = make_sink();

        sink.handle_packet(data(0, b"old"));
        sink.handle_packet(data(1, b"old"));
        assert_eq!(sink.stats().packets_received, 2);

        sink.handle_packet(Packet::control(Command::Start, 0));
        let stats = sink.stats();
        assert_eq!(stats.packets_received, 0);
        assert_eq!(stats.packets_dropped, 0);
        assert_eq!(stats.stored_packets, 0);
        assert_eq!(stats.last_sequence, NO_SEQUENCE);
        assert_eq!(sink.state(), SessionState::Streaming);
    }

    #[test]
    fn test_session_state_transitions() {
        let (sink, _rx) = make_sink();
        assert_eq!(sink.state(), SessionState::Idle);

        // Auto-start on DATA when START was lost
        sink.handle_packet(data(0, b"x"));
        assert_eq!(sink.state(), SessionState::Streaming);

        sink.handle_packet(Packet::control(Command::Pause, 1));
        assert_eq!(sink.state(), SessionState::Paused);

        sink.handle_packet(Packet::control(Command::Resume, 1));
        assert_eq!(sink.state(), SessionState::Streaming);

        sink.handle_packet(Packet::control(Command::Stop, 1));
        assert_eq!(sink.state(), SessionState::Idle);
        // Stop retains stored packets for persistence
        assert_eq!(sink.stats().stored_packets, 1);
    }

    #[test]
    fn test_out_of_order_persistence() {
        let (sink, _rx) = make_sink();

        sink.handle_packet(data(3, b"C"));
        sink.handle_packet(data(1, b"A"));
        sink.handle_packet(data(2, b"B"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let summary = sink.save_to(&path).unwrap();

        assert_eq!(summary.packets_written, 3);
        assert_eq!(std::fs::read(&path).unwrap(), b"ABC");
    }

    #[test]
    fn test_end_to_end_save() {
        let (sink, rx) = make_sink();

        sink.handle_packet(Packet::control(Command::Start, 0));
        sink.handle_packet(data(0, b"AAA"));
        sink.handle_packet(data(1, b"BBB"));
        sink.handle_packet(data(2, b"CCC"));
        sink.handle_packet(Packet::control(Command::Stop, 3));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");
        let summary = sink.save_to(&path).unwrap();

        assert_eq!(summary.bytes_written, 9);
        assert!(summary.missing_sequences.is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), b"AAABBBCCC");

        // Events observed in order
        let mut saw_started = false;
        let mut saw_stopped = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                StreamEvent::StreamStarted => saw_started = true,
                StreamEvent::Stopped => saw_stopped = true,
                _ => {}
            }
        }
        assert!(saw_started && saw_stopped);
    }

    #[test]
    fn test_persistence_skips_gaps() {
        let (sink, _rx) = make_sink();

        sink.handle_packet(data(0, b"AA"));
        sink.handle_packet(data(2, b"CC"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gap.bin");
        let summary = sink.save_to(&path).unwrap();

        assert_eq!(summary.missing_sequences, vec![1]);
        assert_eq!(std::fs::read(&path).unwrap(), b"AACC");
    }

    #[test]
    fn test_save_empty_store_fails() {
        let (sink, _rx) = make_sink();
        let dir = tempfile::tempdir().unwrap();
        let result = sink.save_to(&dir.path().join("empty.bin"));
        assert!(result.is_err());
    }

    #[test]
    fn test_fec_recovery_fills_store() {
        use crate::protocol::fec::FecEncoder;

        let (sink, _rx) = make_sink();
        let config = StreamConfig::default();
        let mut encoder = FecEncoder::new(config.fec.clone());

        let group: Vec<Packet> = (0..config.fec.group_size as i32)
            .map(|seq| Packet::data(seq, Bytes::from(vec![seq as u8; 32])))
            .collect();
        let parity = encoder.encode_group(&group);

        // Lose packet 7 on the wire
        for (i, packet) in group.iter().enumerate() {
            if i != 7 {
                sink.handle_packet(packet.clone());
            }
        }
        sink.handle_packet(parity[0].clone());

        let stats = sink.stats();
        assert_eq!(stats.packets_received, 9, "recovered packet is not 'received'");
        assert_eq!(stats.stored_packets, 10, "store is gap-free after recovery");
        assert_eq!(stats.fec.recovered_packets, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fec.bin");
        let summary = sink.save_to(&path).unwrap();
        assert!(summary.missing_sequences.is_empty());
        assert_eq!(summary.packets_written, 10);
    }

    #[test]
    fn test_new_rejects_untrackable_fec_shape() {
        let mut config = StreamConfig::default();
        config.fec.group_size = 60;
        config.fec.parity_count = 8;
        let (tx, _rx) = event_channel(16);
        assert!(StreamSink::new(config, tx, Arc::new(NullEventSink)).is_err());
    }

    #[test]
    fn test_reconnect_policy_bounds() {
        let config = StreamConfig::default();
        let mut policy = ReconnectPolicy::new(&config);

        for _ in 0..config.reconnect.max_attempts {
            assert!(policy.next_attempt().is_some());
        }
        assert!(policy.exhausted());
        assert!(policy.next_attempt().is_none());
        assert!(policy.next_attempt().is_none(), "no further attempts scheduled");
    }

    #[test]
    fn test_reconnect_policy_reset_on_success() {
        let config = StreamConfig::default();
        let mut policy = ReconnectPolicy::new(&config);

        policy.next_attempt();
        policy.next_attempt();
        assert_eq!(policy.attempts(), 2);

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert!(!policy.exhausted());
    }

    #[test]
    fn test_reconnect_policy_disabled() {
        let mut config = StreamConfig::default();
        config.reconnect.auto_reconnect = false;
        let mut policy = ReconnectPolicy::new(&config);
        assert!(policy.next_attempt().is_none());
    }

    #[test]
    fn test_terminal_error_surfaced_once() {
        let (sink, rx) = make_sink();

        sink.surface_terminal_error();
        sink.surface_terminal_error();
        sink.surface_terminal_error();

        let errors = rx
            .try_iter()
            .filter(|e| matches!(e, StreamEvent::Error(_)))
            .count();
        assert_eq!(errors, 1);
    }
}
