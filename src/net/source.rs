//! Paced multicast sender
//!
//! A producer (capture loop, file reader) offers raw frame buffers into a
//! bounded queue; a dedicated worker thread chunks each frame into DATA
//! packets, emits XOR parity per group, and paces transmission to the
//! target frame rate. Control commands are sent redundantly because a
//! dropped START or STOP desynchronizes every receiver with no
//! retransmission path.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::bandwidth::BandwidthMonitor;
use crate::config::StreamConfig;
use crate::error::{NetworkError, Result};
use crate::events::SharedEventSink;
use crate::net::socket::{create_sender_socket, group_address};
use crate::net::SessionState;
use crate::protocol::fec::FecEncoder;
use crate::protocol::packet::{Command, Packet};

/// Extra catch-up delay applied when the pacing loop falls behind
const CATCHUP_EXTRA: Duration = Duration::from_millis(10);

/// Behind-schedule slack before the catch-up rule kicks in
const CATCHUP_SLACK: Duration = Duration::from_millis(100);

/// Poll interval while paused
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// A producer frame awaiting transmission
#[derive(Debug, Clone)]
struct Frame {
    data: Bytes,
    timestamp_ms: i64,
}

/// Sender statistics snapshot
#[derive(Debug, Clone)]
pub struct SourceStats {
    pub state: SessionState,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub queue_len: usize,
    pub bandwidth_bps: f64,
}

/// Multicast stream sender
pub struct StreamSource {
    config: StreamConfig,
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    state: Arc<Mutex<SessionState>>,
    sequence: Arc<AtomicI32>,
    frame_tx: Sender<Frame>,
    frame_rx: Receiver<Frame>,
    packets_sent: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    frames_sent: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
    bandwidth: Arc<Mutex<BandwidthMonitor>>,
    event_sink: SharedEventSink,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSource {
    /// Bind the sender socket. Socket failures and invalid FEC shapes
    /// are fatal for the endpoint.
    pub fn new(config: StreamConfig, event_sink: SharedEventSink) -> Result<Self> {
        config.fec.validate()?;
        let socket = create_sender_socket(&config)?;
        let dest = group_address(&config);
        let (frame_tx, frame_rx) = bounded(config.frame_queue_capacity);

        event_sink.log_event("INIT", "sender", "sender socket initialized");

        Ok(Self {
            config,
            socket: Arc::new(socket),
            dest,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            sequence: Arc::new(AtomicI32::new(0)),
            frame_tx,
            frame_rx,
            packets_sent: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            bandwidth: Arc::new(Mutex::new(BandwidthMonitor::new())),
            event_sink,
            worker: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Begin a session: reset the sequence counter, announce START
    /// redundantly, then start the paced send worker.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Idle {
                tracing::warn!("start ignored, already streaming");
                return Ok(());
            }
            *state = SessionState::Streaming;
        }

        self.sequence.store(0, Ordering::SeqCst);
        self.packets_sent.store(0, Ordering::SeqCst);
        self.bytes_sent.store(0, Ordering::SeqCst);
        self.frames_sent.store(0, Ordering::SeqCst);
        self.frames_dropped.store(0, Ordering::SeqCst);
        self.bandwidth.lock().reset();

        // A failed START announcement leaves no session to run; roll the
        // state back so a later start() is not swallowed by the guard.
        if let Err(e) = self.send_control_redundant(Command::Start) {
            *self.state.lock() = SessionState::Idle;
            return Err(e);
        }
        self.event_sink
            .log_event("STREAM_START", "sender", "stream started");

        // Give receivers a moment to observe the session start
        thread::sleep(Duration::from_millis(500));

        let handle = self.spawn_worker();
        *self.worker.lock() = Some(handle);

        tracing::info!("streaming started");
        Ok(())
    }

    /// Offer a frame from the producer. Non-blocking: a full queue drops
    /// the frame and bumps the drop counter.
    pub fn offer_frame(&self, data: Bytes, timestamp_ms: i64) -> bool {
        if *self.state.lock() == SessionState::Idle {
            return false;
        }

        match self.frame_tx.try_send(Frame { data, timestamp_ms }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                let dropped = self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 10 == 0 {
                    tracing::warn!(dropped, "frame queue full, dropping frames");
                }
                false
            }
        }
    }

    /// Convenience for the file-streaming path: enqueue one large buffer.
    /// The worker chunks it into packets at `max_packet_size`.
    pub fn stream_buffer(&self, data: &[u8]) -> bool {
        self.offer_frame(Bytes::copy_from_slice(data), crate::protocol::packet::now_millis())
    }

    /// Pause the send loop without consuming further frames
    pub fn pause(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != SessionState::Streaming {
            return Ok(());
        }
        *state = SessionState::Paused;
        drop(state);

        self.send_control(Command::Pause)?;
        self.event_sink.log_event(
            "STREAM_PAUSE",
            "sender",
            &format!("paused at packet #{}", self.sequence.load(Ordering::SeqCst)),
        );
        tracing::info!("stream paused");
        Ok(())
    }

    /// Resume a paused session
    pub fn resume(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != SessionState::Paused {
            return Ok(());
        }
        *state = SessionState::Streaming;
        drop(state);

        self.send_control(Command::Resume)?;
        self.event_sink.log_event(
            "STREAM_RESUME",
            "sender",
            &format!("resumed at packet #{}", self.sequence.load(Ordering::SeqCst)),
        );
        tracing::info!("stream resumed");
        Ok(())
    }

    /// End the session: announce STOP redundantly, drain the producer
    /// queue and return to idle.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Idle {
                return Ok(());
            }
            *state = SessionState::Idle;
        }

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        while self.frame_rx.try_recv().is_ok() {}

        self.send_control_redundant(Command::Stop)?;
        self.event_sink.log_event(
            "STREAM_STOP",
            "sender",
            &format!(
                "stream stopped, {} packets sent",
                self.packets_sent.load(Ordering::Relaxed)
            ),
        );

        tracing::info!(
            packets = self.packets_sent.load(Ordering::Relaxed),
            bytes = self.bytes_sent.load(Ordering::Relaxed),
            dropped_frames = self.frames_dropped.load(Ordering::Relaxed),
            bandwidth = %self.bandwidth.lock().formatted_bandwidth(),
            "streaming stopped"
        );
        Ok(())
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            state: self.state(),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            queue_len: self.frame_tx.len(),
            bandwidth_bps: self.bandwidth.lock().current_bandwidth_bps(),
        }
    }

    fn spawn_worker(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let socket = self.socket.clone();
        let dest = self.dest;
        let state = self.state.clone();
        let sequence = self.sequence.clone();
        let frame_rx = self.frame_rx.clone();
        let packets_sent = self.packets_sent.clone();
        let bytes_sent = self.bytes_sent.clone();
        let frames_sent = self.frames_sent.clone();
        let bandwidth = self.bandwidth.clone();

        thread::Builder::new()
            .name("source-send".into())
            .spawn(move || {
                let mut fec = config.fec.enabled.then(|| FecEncoder::new(config.fec.clone()));
                let mut group: Vec<Packet> = Vec::with_capacity(config.fec.group_size);
                let frame_delay = config.frame_delay();
                let mut last_send = Instant::now();

                tracing::debug!("send worker started");

                'outer: loop {
                    match *state.lock() {
                        SessionState::Idle => break,
                        SessionState::Paused => {
                            thread::sleep(PAUSE_POLL);
                            continue;
                        }
                        SessionState::Streaming => {}
                    }

                    let frame = match frame_rx.recv_timeout(PAUSE_POLL) {
                        Ok(frame) => frame,
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    };

                    for chunk in frame.data.chunks(config.max_packet_size) {
                        loop {
                            match *state.lock() {
                                SessionState::Idle => break 'outer,
                                SessionState::Paused => thread::sleep(PAUSE_POLL),
                                SessionState::Streaming => break,
                            }
                        }

                        let seq = sequence.fetch_add(1, Ordering::SeqCst);
                        // Chunks inherit the producer timestamp of their frame
                        let packet = Packet::data_at(
                            seq,
                            frame.timestamp_ms,
                            frame.data.slice_ref(chunk),
                        );

                        if send_with_retry(&socket, dest, &packet, &config) {
                            let wire_len = packet.encoded_len();
                            packets_sent.fetch_add(1, Ordering::Relaxed);
                            bytes_sent.fetch_add(wire_len as u64, Ordering::Relaxed);
                            bandwidth.lock().record(wire_len);
                        }

                        if let Some(encoder) = fec.as_mut() {
                            group.push(packet);
                            if group.len() == config.fec.group_size {
                                for parity in encoder.encode_group(&group) {
                                    if send_with_retry(&socket, dest, &parity, &config) {
                                        let wire_len = parity.encoded_len();
                                        bytes_sent
                                            .fetch_add(wire_len as u64, Ordering::Relaxed);
                                        bandwidth.lock().record(wire_len);
                                    }
                                }
                                group.clear();
                            }
                        }

                        // Pace to the target frame rate; when more than
                        // the slack behind, take a short corrective extra
                        // delay instead of bursting to catch up.
                        let elapsed = last_send.elapsed();
                        if elapsed < frame_delay {
                            thread::sleep(frame_delay - elapsed);
                        } else if elapsed > frame_delay + CATCHUP_SLACK {
                            thread::sleep(frame_delay + CATCHUP_EXTRA);
                        }
                        last_send = Instant::now();
                    }

                    let sent = frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
                    if sent % 100 == 0 {
                        tracing::info!(
                            frames = sent,
                            packets = packets_sent.load(Ordering::Relaxed),
                            bandwidth = %bandwidth.lock().formatted_bandwidth(),
                            "send progress"
                        );
                    }
                }

                tracing::debug!("send worker stopped");
            })
            .expect("spawn send worker")
    }

    /// Send one control command stamped with the current sequence value.
    /// Control packets do not consume sequence numbers so DATA numbering
    /// stays dense from zero (FEC group placement depends on it).
    fn send_control(&self, command: Command) -> Result<()> {
        let packet = Packet::control(command, self.sequence.load(Ordering::SeqCst));
        if send_with_retry(&self.socket, self.dest, &packet, &self.config) {
            tracing::debug!(?command, "control command sent");
            Ok(())
        } else {
            Err(NetworkError::SendFailed(format!("control {:?}", command)).into())
        }
    }

    fn send_control_redundant(&self, command: Command) -> Result<()> {
        let interval = Duration::from_millis(self.config.control_resend_interval_ms);
        for i in 0..self.config.control_redundancy {
            self.send_control(command)?;
            if i + 1 < self.config.control_redundancy {
                thread::sleep(interval);
            }
        }
        Ok(())
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Send one datagram with bounded retries. Exhausting the retries drops
/// the packet; multicast is best-effort and a lost packet never ends the
/// session.
fn send_with_retry(
    socket: &UdpSocket,
    dest: SocketAddr,
    packet: &Packet,
    config: &StreamConfig,
) -> bool {
    let wire = packet.encode();
    let retry_delay = Duration::from_millis(config.send_retry_delay_ms);

    for attempt in 0..=config.send_retries {
        match socket.send_to(&wire, dest) {
            Ok(_) => {
                if attempt > 0 {
                    tracing::debug!(attempt, sequence = packet.sequence, "sent on retry");
                }
                return true;
            }
            Err(e) if attempt == config.send_retries => {
                tracing::warn!(
                    sequence = packet.sequence,
                    retries = config.send_retries,
                    "send failed after retries: {}",
                    e
                );
            }
            Err(_) => thread::sleep(retry_delay),
        }
    }
    false
}
