//! Multicast socket construction
//!
//! socket2 builds the raw socket (reuse-address, buffer size hints) and
//! hands back a `std::net::UdpSocket`. Buffer sizing is best-effort; a
//! missing preferred interface falls back to the OS default with a
//! warning rather than failing.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use crate::config::StreamConfig;
use crate::error::NetworkError;

/// Read timeout so the receive loop can observe its stop flag
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

fn new_udp_socket(config: &StreamConfig) -> Result<Socket, NetworkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::Init(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::Init(e.to_string()))?;

    // Buffer sizes are hints only
    if let Err(e) = socket.set_send_buffer_size(config.socket_buffer_size) {
        tracing::warn!("could not set send buffer size: {}", e);
    }
    if let Err(e) = socket.set_recv_buffer_size(config.socket_buffer_size) {
        tracing::warn!("could not set receive buffer size: {}", e);
    }

    Ok(socket)
}

/// Interface address used for the multicast join, with OS-default fallback
fn join_interface(config: &StreamConfig) -> Ipv4Addr {
    config.interface.unwrap_or(Ipv4Addr::UNSPECIFIED)
}

/// Sender-side socket: bound to an ephemeral port, TTL-limited
pub fn create_sender_socket(config: &StreamConfig) -> Result<UdpSocket, NetworkError> {
    let socket = new_udp_socket(config)?;

    let bind: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket
        .bind(&bind.into())
        .map_err(|e| NetworkError::Init(format!("bind failed: {}", e)))?;

    if let Some(addr) = config.interface {
        if let Err(e) = socket.set_multicast_if_v4(&addr) {
            tracing::warn!("could not select interface {}: {}, using OS default", addr, e);
        }
    }

    let socket: UdpSocket = socket.into();
    socket
        .set_multicast_ttl_v4(config.ttl)
        .map_err(|e| NetworkError::Init(e.to_string()))?;
    // Loopback stays on so a co-located receiver still hears the stream
    socket
        .set_multicast_loop_v4(true)
        .map_err(|e| NetworkError::Init(e.to_string()))?;

    tracing::info!(
        group = %config.multicast_addr,
        port = config.port,
        ttl = config.ttl,
        "sender socket ready"
    );

    Ok(socket)
}

/// Receiver-side socket: bound to the group port, joined to the group,
/// with a short read timeout for prompt shutdown.
pub fn create_receiver_socket(config: &StreamConfig) -> Result<UdpSocket, NetworkError> {
    let socket = new_udp_socket(config)?;

    let bind: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    socket
        .bind(&bind.into())
        .map_err(|e| NetworkError::Init(format!("bind failed: {}", e)))?;

    let socket: UdpSocket = socket.into();
    if config.interface.is_none() {
        tracing::warn!("no preferred interface configured, joining on the OS default");
    }
    socket
        .join_multicast_v4(&config.multicast_addr, &join_interface(config))
        .map_err(|e| NetworkError::JoinFailed(e.to_string()))?;
    socket
        .set_read_timeout(Some(RECV_TIMEOUT))
        .map_err(|e| NetworkError::Init(e.to_string()))?;

    tracing::info!(
        group = %config.multicast_addr,
        port = config.port,
        "joined multicast group"
    );

    Ok(socket)
}

/// Leave the group; errors are ignored (the socket is going away)
pub fn leave_group(socket: &UdpSocket, config: &StreamConfig) {
    let _ = socket.leave_multicast_v4(&config.multicast_addr, &join_interface(config));
}

/// Destination address for outgoing packets
pub fn group_address(config: &StreamConfig) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(config.multicast_addr, config.port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_address() {
        let config = StreamConfig::default();
        let addr = group_address(&config);
        assert_eq!(addr.to_string(), "230.0.0.1:4446");
    }

    #[test]
    fn test_sender_socket_create() {
        // May fail in sandboxed environments without network
        let config = StreamConfig::default();
        if let Ok(socket) = create_sender_socket(&config) {
            assert!(socket.local_addr().is_ok());
        }
    }

    #[test]
    fn test_receiver_socket_create() {
        let config = StreamConfig::default();
        if let Ok(socket) = create_receiver_socket(&config) {
            leave_group(&socket, &config);
        }
    }
}
