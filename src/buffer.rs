//! Bounded, auto-resizing receive buffering
//!
//! [`PacketRingBuffer`] is a fixed-capacity FIFO that refuses new packets
//! when full instead of blocking or growing. [`AdaptiveBufferManager`]
//! layers a half-sized overflow ring on top and resizes both in response
//! to the observed drop rate.

use std::collections::VecDeque;

use crate::config::BufferConfig;
use crate::protocol::packet::{now_millis, Packet};

/// Fixed-size circular packet buffer
#[derive(Debug)]
pub struct PacketRingBuffer {
    items: VecDeque<Packet>,
    capacity: usize,
}

impl PacketRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Non-blocking insert; `false` when the buffer is full
    pub fn offer(&mut self, packet: Packet) -> bool {
        if self.items.len() >= self.capacity {
            return false;
        }
        self.items.push_back(packet);
        true
    }

    /// Non-blocking removal in FIFO order
    pub fn poll(&mut self) -> Option<Packet> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fill_percentage(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.items.len() as f64 * 100.0 / self.capacity as f64
    }
}

/// Buffer statistics snapshot
#[derive(Debug, Clone)]
pub struct BufferStats {
    pub capacity: usize,
    pub primary_fill: f64,
    pub packets_buffered: u64,
    pub packets_dropped: u64,
    pub drop_rate: f64,
    pub avg_latency_ms: f64,
}

/// Primary + overflow ring buffers with drop-rate driven resizing
#[derive(Debug)]
pub struct AdaptiveBufferManager {
    primary: PacketRingBuffer,
    overflow: PacketRingBuffer,
    capacity: usize,
    config: BufferConfig,
    packets_buffered: u64,
    packets_dropped: u64,
    avg_latency_ms: f64,
}

impl AdaptiveBufferManager {
    pub fn new(config: BufferConfig) -> Self {
        let capacity = config.initial_capacity.max(config.min_capacity);
        Self {
            primary: PacketRingBuffer::new(capacity),
            overflow: PacketRingBuffer::new(capacity / 2),
            capacity,
            config,
            packets_buffered: 0,
            packets_dropped: 0,
            avg_latency_ms: 0.0,
        }
    }

    /// Buffer a packet; drops (returning `false`) when both rings are
    /// full, doubling capacity once the drop rate passes the threshold.
    pub fn add_packet(&mut self, packet: Packet) -> bool {
        self.packets_buffered += 1;

        let latency = (now_millis() - packet.timestamp_ms).max(0) as f64;

        if self.primary.offer(packet.clone()) {
            // EMA over per-packet transit latency
            self.avg_latency_ms = self.avg_latency_ms * 0.9 + latency * 0.1;
            return true;
        }

        if self.overflow.offer(packet) {
            tracing::warn!("primary ring full, using overflow buffer");
            return true;
        }

        self.packets_dropped += 1;
        tracing::warn!(
            dropped = self.packets_dropped,
            "both buffers full, packet dropped"
        );

        if self.packets_dropped as f64 > self.packets_buffered as f64 * self.config.grow_drop_rate
        {
            self.expand();
        }

        false
    }

    /// Pull the next packet, primary first. Shrinks the capacity target
    /// when the primary ring runs consistently light.
    pub fn get_packet(&mut self) -> Option<Packet> {
        let packet = self.primary.poll().or_else(|| self.overflow.poll());

        if self.primary.fill_percentage() < 25.0 && self.capacity > self.config.min_capacity {
            self.shrink();
        }

        packet
    }

    /// Double capacity (up to the ceiling), draining live packets into the
    /// new rings in their original relative order.
    fn expand(&mut self) {
        let new_capacity = (self.capacity * 2).min(self.config.max_capacity);
        if new_capacity <= self.capacity {
            return;
        }

        tracing::info!(from = self.capacity, to = new_capacity, "expanding buffer");

        let mut primary = PacketRingBuffer::new(new_capacity);
        let mut overflow = PacketRingBuffer::new(new_capacity / 2);
        while let Some(packet) = self.primary.poll() {
            primary.offer(packet);
        }
        while let Some(packet) = self.overflow.poll() {
            overflow.offer(packet);
        }

        self.primary = primary;
        self.overflow = overflow;
        self.capacity = new_capacity;
    }

    /// Halve the capacity target for future allocations. The live rings
    /// are left untouched so no buffered packet is lost.
    fn shrink(&mut self) {
        let new_capacity = (self.capacity / 2).max(self.config.min_capacity);
        if new_capacity < self.capacity {
            tracing::debug!(from = self.capacity, to = new_capacity, "shrinking buffer target");
            self.capacity = new_capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.overflow.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        let drop_rate = if self.packets_buffered > 0 {
            self.packets_dropped as f64 * 100.0 / self.packets_buffered as f64
        } else {
            0.0
        };
        BufferStats {
            capacity: self.capacity,
            primary_fill: self.primary.fill_percentage(),
            packets_buffered: self.packets_buffered,
            packets_dropped: self.packets_dropped,
            drop_rate,
            avg_latency_ms: self.avg_latency_ms,
        }
    }
}
