//! Binary packet codec
//!
//! Wire layout (big-endian, 17-byte header):
//!
//! ```text
//! [command u8][sequence i32][timestamp_ms i64][payload_len i32][payload...]
//! ```
//!
//! The codec is a pure transform: encoding never fragments and decoding
//! never regenerates timestamps.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::HEADER_SIZE;
use crate::error::PacketError;

/// Bit set on the command byte to mark FEC parity packets
const PARITY_FLAG: u8 = 0x80;

/// Protocol commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Pause,
    Stop,
    Data,
    Resume,
    /// FEC parity payload (DATA with the high bit set)
    Parity,
}

impl Command {
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Start => 0x01,
            Command::Pause => 0x02,
            Command::Stop => 0x03,
            Command::Data => 0x04,
            Command::Resume => 0x05,
            Command::Parity => 0x04 | PARITY_FLAG,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, PacketError> {
        match byte {
            0x01 => Ok(Command::Start),
            0x02 => Ok(Command::Pause),
            0x03 => Ok(Command::Stop),
            0x04 => Ok(Command::Data),
            0x05 => Ok(Command::Resume),
            b if b == 0x04 | PARITY_FLAG => Ok(Command::Parity),
            other => Err(PacketError::UnknownCommand(other)),
        }
    }

    /// Control commands drive session state and carry no payload
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Command::Start | Command::Pause | Command::Stop | Command::Resume
        )
    }
}

/// One protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: Command,
    pub sequence: i32,
    pub timestamp_ms: i64,
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet stamped with the current wall-clock time
    pub fn new(command: Command, sequence: i32, payload: Bytes) -> Self {
        Self {
            command,
            sequence,
            timestamp_ms: now_millis(),
            payload,
        }
    }

    /// DATA packet carrying a chunk of the stream
    pub fn data(sequence: i32, payload: Bytes) -> Self {
        Self::new(Command::Data, sequence, payload)
    }

    /// DATA packet stamped with the producer's frame timestamp rather
    /// than the send time, so receive-side latency reflects the full
    /// capture-to-delivery path.
    pub fn data_at(sequence: i32, timestamp_ms: i64, payload: Bytes) -> Self {
        Self {
            command: Command::Data,
            sequence,
            timestamp_ms,
            payload,
        }
    }

    /// Control packet with an empty payload
    pub fn control(command: Command, sequence: i32) -> Self {
        Self::new(command, sequence, Bytes::new())
    }

    /// Serialize into header + payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u8(self.command.to_byte());
        buf.put_i32(self.sequence);
        buf.put_i64(self.timestamp_ms);
        buf.put_i32(self.payload.len() as i32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a received datagram. The declared payload length must fit
    /// within the buffer or the packet is rejected as malformed.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_SIZE {
            return Err(PacketError::Malformed(format!(
                "{} bytes is shorter than the {} byte header",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let mut cursor = buf;
        let command = Command::from_byte(cursor.get_u8())?;
        let sequence = cursor.get_i32();
        let timestamp_ms = cursor.get_i64();
        let declared_len = cursor.get_i32();

        if declared_len < 0 || declared_len as usize > buf.len() - HEADER_SIZE {
            return Err(PacketError::Malformed(format!(
                "declared payload length {} does not fit in {} remaining bytes",
                declared_len,
                buf.len() - HEADER_SIZE
            )));
        }

        let payload = Bytes::copy_from_slice(&cursor[..declared_len as usize]);

        Ok(Self {
            command,
            sequence,
            timestamp_ms,
            payload,
        })
    }

    /// Total encoded size
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_size_exact() {
        let packet = Packet::data(0, Bytes::from_static(b"hello"));
        assert_eq!(packet.encode().len(), 17 + 5);

        let empty = Packet::control(Command::Start, 0);
        assert_eq!(empty.encode().len(), 17);
    }

    #[test]
    fn test_round_trip() {
        let packet = Packet {
            command: Command::Data,
            sequence: 42,
            timestamp_ms: 1_700_000_000_123,
            payload: Bytes::from_static(b"payload bytes"),
        };

        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_data_at_keeps_producer_timestamp() {
        let packet = Packet::data_at(5, 987_654, Bytes::from_static(b"frame"));
        assert_eq!(packet.timestamp_ms, 987_654);
        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.timestamp_ms, 987_654);
    }

    #[test]
    fn test_timestamp_preserved() {
        let mut packet = Packet::data(7, Bytes::from_static(b"x"));
        packet.timestamp_ms = 12345;
        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.timestamp_ms, 12345);
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::Start.to_byte(), 0x01);
        assert_eq!(Command::Pause.to_byte(), 0x02);
        assert_eq!(Command::Stop.to_byte(), 0x03);
        assert_eq!(Command::Data.to_byte(), 0x04);
        assert_eq!(Command::Resume.to_byte(), 0x05);
        assert_eq!(Command::Parity.to_byte(), 0x84);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(matches!(
            Packet::decode(&[0x04, 0x00, 0x00]),
            Err(PacketError::Malformed(_))
        ));
    }

    #[test]
    fn test_inconsistent_length_rejected() {
        let packet = Packet::data(0, Bytes::from_static(b"abcdef"));
        let mut wire = packet.encode().to_vec();
        // Claim more payload than the datagram carries
        wire[13..17].copy_from_slice(&100i32.to_be_bytes());
        assert!(matches!(
            Packet::decode(&wire),
            Err(PacketError::Malformed(_))
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let packet = Packet::data(0, Bytes::new());
        let mut wire = packet.encode().to_vec();
        wire[13..17].copy_from_slice(&(-1i32).to_be_bytes());
        assert!(matches!(
            Packet::decode(&wire),
            Err(PacketError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let packet = Packet::data(0, Bytes::new());
        let mut wire = packet.encode().to_vec();
        wire[0] = 0x7f;
        assert!(matches!(
            Packet::decode(&wire),
            Err(PacketError::UnknownCommand(0x7f))
        ));
    }

    #[test]
    fn test_trailing_bytes_tolerated() {
        // Receive buffers can be larger than the datagram; the declared
        // length wins as long as it fits.
        let packet = Packet::data(3, Bytes::from_static(b"abc"));
        let mut wire = packet.encode().to_vec();
        wire.extend_from_slice(&[0u8; 16]);
        let decoded = Packet::decode(&wire).unwrap();
        assert_eq!(decoded.payload, Bytes::from_static(b"abc"));
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            command_byte in prop::sample::select(vec![0x01u8, 0x02, 0x03, 0x04, 0x05, 0x84]),
            sequence in any::<i32>(),
            timestamp_ms in any::<i64>(),
            payload in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let packet = Packet {
                command: Command::from_byte(command_byte).unwrap(),
                sequence,
                timestamp_ms,
                payload: Bytes::from(payload),
            };
            let decoded = Packet::decode(&packet.encode()).unwrap();
            prop_assert_eq!(decoded, packet);
        }
    }
}
