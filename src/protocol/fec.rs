//! XOR-parity forward error correction
//!
//! Data packets are grouped by sequence number (`group = seq / group_size`,
//! `slot = seq % group_size`). For every group the sender emits
//! `parity_count` parity packets: parity 0 is the plain byte-wise XOR of
//! all payloads (zero-padded to the longest payload in the group), parity
//! `p > 0` rotates each payload byte left by `slot % 8` bits before
//! combining. Parity packets ride the normal wire format with the command
//! high bit set and a negative sequence that encodes their identity:
//!
//! ```text
//! sequence = -(group_id * parity_count + parity_index) - 1
//! ```
//!
//! Recovery reconstructs a missing payload by XOR-ing the first available
//! parity payload against every known data payload in the group. This is
//! provably correct only for a single missing packet per group. When
//! erasures exceed the available parity the group simply stays incomplete;
//! downstream persistence sees a gap, never an error.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Instant;

use crate::config::FecConfig;
use crate::protocol::packet::{now_millis, Command, Packet};

/// Encodes parity packets on the send path
#[derive(Debug)]
pub struct FecEncoder {
    config: FecConfig,
    groups_encoded: u64,
}

impl FecEncoder {
    pub fn new(config: FecConfig) -> Self {
        Self {
            config,
            groups_encoded: 0,
        }
    }

    /// Generate parity packets for one group of data packets.
    ///
    /// The group id is derived from the first packet's sequence number, so
    /// the receiver can place packets without any extra header fields. The
    /// slice may be shorter than `group_size` for the final group of a
    /// session.
    pub fn encode_group(&mut self, data: &[Packet]) -> Vec<Packet> {
        if data.is_empty() || self.config.parity_count == 0 {
            return Vec::new();
        }

        let group_id = data[0].sequence / self.config.group_size as i32;
        let max_len = data.iter().map(|p| p.payload.len()).max().unwrap_or(0);

        let mut parity_packets = Vec::with_capacity(self.config.parity_count);
        for p in 0..self.config.parity_count {
            let mut parity = vec![0u8; max_len];

            for packet in data {
                let slot = (packet.sequence % self.config.group_size as i32) as u32;
                for (j, &byte) in packet.payload.iter().enumerate() {
                    if p == 0 {
                        parity[j] ^= byte;
                    } else {
                        parity[j] ^= byte.rotate_left(slot % 8);
                    }
                }
            }

            parity_packets.push(Packet {
                command: Command::Parity,
                sequence: parity_sequence(group_id, p, self.config.parity_count),
                timestamp_ms: now_millis(),
                payload: Bytes::from(parity),
            });
        }

        self.groups_encoded += 1;
        tracing::debug!(
            group_id,
            parity = parity_packets.len(),
            "generated parity packets"
        );

        parity_packets
    }

    pub fn groups_encoded(&self) -> u64 {
        self.groups_encoded
    }
}

/// Wire sequence number for a parity packet
pub fn parity_sequence(group_id: i32, parity_index: usize, parity_count: usize) -> i32 {
    -(group_id * parity_count as i32 + parity_index as i32) - 1
}

/// Invert [`parity_sequence`] back into `(group_id, parity_index)`
pub fn parity_identity(sequence: i32, parity_count: usize) -> Option<(i32, usize)> {
    if sequence >= 0 || parity_count == 0 {
        return None;
    }
    let k = -(sequence + 1);
    Some((
        k / parity_count as i32,
        (k % parity_count as i32) as usize,
    ))
}

/// One FEC group on the receive side.
///
/// Fixed-capacity slots indexed by position in the group; a bitmask tracks
/// which of the `group_size + parity_count` slots have arrived.
#[derive(Debug)]
struct FecGroup {
    group_id: i32,
    data: Vec<Option<Packet>>,
    parity: Vec<Option<Packet>>,
    received_mask: u64,
    created_at: Instant,
}

impl FecGroup {
    fn new(group_id: i32, group_size: usize, parity_count: usize) -> Self {
        Self {
            group_id,
            data: vec![None; group_size],
            parity: vec![None; parity_count],
            received_mask: 0,
            created_at: Instant::now(),
        }
    }

    fn set_data(&mut self, slot: usize, packet: Packet) {
        self.data[slot] = Some(packet);
        self.received_mask |= 1 << slot;
    }

    fn set_parity(&mut self, index: usize, packet: Packet) {
        self.parity[index] = Some(packet);
        self.received_mask |= 1 << (self.data.len() + index);
    }

    fn received_count(&self) -> usize {
        self.received_mask.count_ones() as usize
    }

    /// Complete once at least `group_size` of the slots are filled
    fn is_complete(&self) -> bool {
        self.received_count() >= self.data.len()
    }

    fn missing_slots(&self) -> Vec<usize> {
        (0..self.data.len())
            .filter(|&i| self.received_mask & (1 << i) == 0)
            .collect()
    }

    fn available_parity(&self) -> usize {
        self.parity.iter().filter(|p| p.is_some()).count()
    }
}

/// Aggregated FEC statistics
#[derive(Debug, Clone, Default)]
pub struct FecStats {
    pub total_groups: usize,
    pub complete_groups: usize,
    pub total_packets: usize,
    pub missing_packets: usize,
    pub recovered_packets: usize,
}

impl FecStats {
    /// Percentage of missing packets that were reconstructed
    pub fn recovery_rate(&self) -> f64 {
        if self.missing_packets == 0 {
            0.0
        } else {
            self.recovered_packets as f64 * 100.0 / self.missing_packets as f64
        }
    }
}

/// Tracks groups and recovers erasures on the receive path
#[derive(Debug)]
pub struct FecDecoder {
    config: FecConfig,
    groups: HashMap<i32, FecGroup>,
    recovered_packets: usize,
    evicted_missing: usize,
}

impl FecDecoder {
    pub fn new(config: FecConfig) -> Self {
        Self {
            config,
            groups: HashMap::new(),
            recovered_packets: 0,
            evicted_missing: 0,
        }
    }

    /// Route a DATA or PARITY packet into its group and attempt recovery.
    /// Returns any packets reconstructed by this ingest so the caller can
    /// merge them into the sequence-indexed store.
    pub fn ingest(&mut self, packet: &Packet) -> Vec<Packet> {
        let group_size = self.config.group_size;
        let parity_count = self.config.parity_count;

        let group_id = match packet.command {
            Command::Data => {
                if packet.sequence < 0 {
                    return Vec::new();
                }
                packet.sequence / group_size as i32
            }
            Command::Parity => match parity_identity(packet.sequence, parity_count) {
                Some((group_id, _)) => group_id,
                None => return Vec::new(),
            },
            _ => return Vec::new(),
        };

        let group = self
            .groups
            .entry(group_id)
            .or_insert_with(|| FecGroup::new(group_id, group_size, parity_count));

        match packet.command {
            Command::Data => {
                let slot = (packet.sequence % group_size as i32) as usize;
                group.set_data(slot, packet.clone());
            }
            Command::Parity => {
                if let Some((_, index)) = parity_identity(packet.sequence, parity_count) {
                    group.set_parity(index, packet.clone());
                }
            }
            _ => unreachable!(),
        }

        let mut recovered = Vec::new();
        if group.is_complete() && !group.missing_slots().is_empty() {
            recovered = Self::recover(group, group_size);
            self.recovered_packets += recovered.len();
        }

        self.evict_expired();
        recovered
    }

    /// Reconstruct missing data slots when erasures do not exceed the
    /// available parity. Uses the first parity payload for every slot,
    /// which is only sound for a single erasure.
    fn recover(group: &mut FecGroup, group_size: usize) -> Vec<Packet> {
        let missing = group.missing_slots();
        if missing.is_empty() || missing.len() > group.available_parity() {
            if !missing.is_empty() {
                tracing::debug!(
                    group_id = group.group_id,
                    missing = missing.len(),
                    "too many erasures to recover"
                );
            }
            return Vec::new();
        }

        let parity_payload = match group.parity.iter().flatten().next() {
            Some(p) => p.payload.clone(),
            None => return Vec::new(),
        };

        let mut recovered = Vec::with_capacity(missing.len());
        for slot in missing {
            let mut bytes = parity_payload.to_vec();
            for (i, data) in group.data.iter().enumerate() {
                if i == slot {
                    continue;
                }
                if let Some(packet) = data {
                    let limit = bytes.len().min(packet.payload.len());
                    for j in 0..limit {
                        bytes[j] ^= packet.payload[j];
                    }
                }
            }

            let sequence = group.group_id * group_size as i32 + slot as i32;
            let packet = Packet::data(sequence, Bytes::from(bytes));
            tracing::debug!(group_id = group.group_id, slot, sequence, "recovered packet");
            group.set_data(slot, packet.clone());
            recovered.push(packet);
        }

        recovered
    }

    /// Drop groups older than the TTL regardless of completeness
    fn evict_expired(&mut self) {
        let ttl = self.config.group_ttl();
        let now = Instant::now();
        let evicted_missing = &mut self.evicted_missing;
        self.groups.retain(|_, group| {
            let keep = now.duration_since(group.created_at) <= ttl;
            if !keep {
                *evicted_missing += group.missing_slots().len();
            }
            keep
        });
    }

    /// Whether the group containing `sequence` has all data slots filled
    pub fn is_group_complete(&self, sequence: i32) -> bool {
        let group_id = sequence / self.config.group_size as i32;
        self.groups
            .get(&group_id)
            .map(|g| g.missing_slots().is_empty())
            .unwrap_or(false)
    }

    /// Clear all group state (session START)
    pub fn reset(&mut self) {
        self.groups.clear();
        self.recovered_packets = 0;
        self.evicted_missing = 0;
    }

    /// Snapshot aggregate statistics across live groups
    pub fn stats(&self) -> FecStats {
        let mut stats = FecStats {
            recovered_packets: self.recovered_packets,
            missing_packets: self.evicted_missing,
            ..Default::default()
        };

        for group in self.groups.values() {
            stats.total_groups += 1;
            if group.is_complete() {
                stats.complete_groups += 1;
            }
            stats.total_packets += group.received_count();
            stats.missing_packets += group.missing_slots().len();
        }

        // Recovered slots were missing when they arrived
        stats.missing_packets += self.recovered_packets;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FecConfig;

    fn make_group(config: &FecConfig, payload_len: usize) -> Vec<Packet> {
        (0..config.group_size)
            .map(|i| {
                let payload: Vec<u8> =
                    (0..payload_len).map(|j| (i * 31 + j) as u8).collect();
                Packet::data(i as i32, Bytes::from(payload))
            })
            .collect()
    }

    #[test]
    fn test_parity_sequence_invertible_and_negative() {
        let parity_count = 2;
        for group_id in 0..50 {
            for index in 0..parity_count {
                let seq = parity_sequence(group_id, index, parity_count);
                assert!(seq < 0, "parity sequence must be negative");
                assert_eq!(
                    parity_identity(seq, parity_count),
                    Some((group_id, index))
                );
            }
        }
    }

    #[test]
    fn test_encode_group_count_and_marking() {
        let config = FecConfig::default();
        let mut encoder = FecEncoder::new(config.clone());
        let data = make_group(&config, 64);

        let parity = encoder.encode_group(&data);
        assert_eq!(parity.len(), config.parity_count);
        for p in &parity {
            assert_eq!(p.command, Command::Parity);
            assert!(p.sequence < 0);
            assert_eq!(p.payload.len(), 64);
        }
        assert_eq!(encoder.groups_encoded(), 1);
    }

    #[test]
    fn test_single_erasure_recovery() {
        let config = FecConfig::default();
        let mut encoder = FecEncoder::new(config.clone());
        let mut decoder = FecDecoder::new(config.clone());

        let data = make_group(&config, 128);
        let parity = encoder.encode_group(&data);
        let lost = data[4].clone();

        for (i, packet) in data.iter().enumerate() {
            if i == 4 {
                continue;
            }
            assert!(decoder.ingest(packet).is_empty());
        }

        // 9 of 10 data packets present; the first parity completes the group
        let recovered = decoder.ingest(&parity[0]);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].sequence, lost.sequence);
        assert_eq!(recovered[0].payload, lost.payload);
        assert!(decoder.is_group_complete(lost.sequence));
    }

    #[test]
    fn test_recovery_with_uneven_payload_lengths() {
        let config = FecConfig::default();
        let mut encoder = FecEncoder::new(config.clone());
        let mut decoder = FecDecoder::new(config.clone());

        // Final packet of a session is usually shorter
        let mut data = make_group(&config, 100);
        let last = data.len() - 1;
        data[last] = Packet::data(last as i32, Bytes::from(vec![0xAB; 17]));
        let parity = encoder.encode_group(&data);

        for (i, packet) in data.iter().enumerate() {
            if i == 2 {
                continue;
            }
            decoder.ingest(packet);
        }
        let recovered = decoder.ingest(&parity[0]);
        assert_eq!(recovered.len(), 1);
        assert_eq!(&recovered[0].payload[..], &data[2].payload[..]);
    }

    #[test]
    fn test_over_erasure_stays_incomplete() {
        let config = FecConfig::default();
        let mut encoder = FecEncoder::new(config.clone());
        let mut decoder = FecDecoder::new(config.clone());

        let data = make_group(&config, 64);
        let parity = encoder.encode_group(&data);

        // Lose 3 of 10 data packets with only 2 parity: unrecoverable
        for (i, packet) in data.iter().enumerate() {
            if i < 3 {
                continue;
            }
            decoder.ingest(packet);
        }
        let mut recovered = decoder.ingest(&parity[0]);
        recovered.extend(decoder.ingest(&parity[1]));

        assert!(recovered.is_empty());
        assert!(!decoder.is_group_complete(0));

        let stats = decoder.stats();
        assert_eq!(stats.total_groups, 1);
        assert_eq!(stats.complete_groups, 0);
        assert_eq!(stats.missing_packets, 3);
        assert_eq!(stats.recovery_rate(), 0.0);
    }

    #[test]
    fn test_stats_after_recovery() {
        let config = FecConfig::default();
        let mut encoder = FecEncoder::new(config.clone());
        let mut decoder = FecDecoder::new(config.clone());

        let data = make_group(&config, 32);
        let parity = encoder.encode_group(&data);

        for (i, packet) in data.iter().enumerate() {
            if i == 0 {
                continue;
            }
            decoder.ingest(packet);
        }
        decoder.ingest(&parity[0]);

        let stats = decoder.stats();
        assert_eq!(stats.recovered_packets, 1);
        assert_eq!(stats.missing_packets, 1);
        assert!((stats.recovery_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_group_ttl_eviction() {
        let config = FecConfig::default();
        let mut decoder = FecDecoder::new(config.clone());

        decoder.ingest(&Packet::data(0, Bytes::from_static(b"a")));
        assert_eq!(decoder.stats().total_groups, 1);

        // Age the group past the 30s TTL; the next ingest evicts it
        decoder.groups.get_mut(&0).unwrap().created_at =
            Instant::now() - config.group_ttl() - std::time::Duration::from_secs(1);
        decoder.ingest(&Packet::data(20, Bytes::from_static(b"b")));

        let stats = decoder.stats();
        assert_eq!(stats.total_groups, 1, "expired group must be evicted");
        assert!(!decoder.groups.contains_key(&0));
        assert!(decoder.groups.contains_key(&2));
    }

    #[test]
    fn test_second_group_placement() {
        let config = FecConfig::default();
        let mut decoder = FecDecoder::new(config.clone());

        // Sequence 10..20 lands in group 1 with a 10-packet group size
        decoder.ingest(&Packet::data(13, Bytes::from_static(b"x")));
        let stats = decoder.stats();
        assert_eq!(stats.total_groups, 1);
        assert!(!decoder.is_group_complete(13));
    }
}
