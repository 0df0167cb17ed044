//! Wire protocol: packet framing and forward error correction

pub mod fec;
pub mod packet;

pub use fec::{FecDecoder, FecEncoder, FecStats};
pub use packet::{Command, Packet};
