//! The datagram transport variant (spec §4.3.1): one call is exactly one
//! datagram; retransmission and backoff live in [`crate::channel::Channel`]
//! itself (driven by [`crate::channel::ChannelConfig::retransmit_interval`]),
//! this module only wraps the socket.

use std::net::UdpSocket;
use std::time::Duration;

use crate::channel::Transport;
use crate::errors::TransportError;

const MAX_DATAGRAM: usize = 65_507;

/// A connectionless UDP transport. One call is one datagram; duplicate
/// replies from network-level retransmits are expected and handled by the
/// channel's xid matching (stale/duplicate datagrams for a since-completed
/// transaction are simply dropped).
pub struct DatagramTransport {
    socket: UdpSocket,
}

impl DatagramTransport {
    /// Wrap an already-connected socket (`connect`ed so `send`/`recv` need
    /// not pass an address each time).
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl Transport for DatagramTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket.send(bytes)?;
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        self.socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv(&mut buf) {
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    #[test]
    fn loopback_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(server_addr).unwrap();
        server.connect(client.local_addr().unwrap()).unwrap();

        let client_t = DatagramTransport::new(client);
        let server_t = DatagramTransport::new(server);

        client_t.send(b"ping").unwrap();
        let got = server_t.recv(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(got, b"ping");
    }

    #[test]
    fn recv_times_out_with_nothing_sent() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.connect(peer.local_addr().unwrap()).unwrap();
        let transport = DatagramTransport::new(socket);
        assert_eq!(transport.recv(Duration::from_millis(20)).unwrap(), None);
    }
}
