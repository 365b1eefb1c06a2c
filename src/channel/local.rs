//! The local (in-process) transport variant (spec §4.3.1): send appends to
//! a queue the peer reads, with no framing or retransmit concerns.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use crate::channel::{decode_call_message, encode_reply_message, Transport};
use crate::errors::{RpcError, TransportError};
use crate::service::ServiceRegistry;

/// One end of an in-process connected pair. Construct both ends together
/// with [`LocalTransport::pair`].
pub struct LocalTransport {
    to_peer: Sender<Vec<u8>>,
    from_peer: Mutex<Receiver<Vec<u8>>>,
}

impl LocalTransport {
    /// Construct a connected `(client, server)` pair sharing no state but
    /// two queues.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        (
            Self {
                to_peer: tx_a,
                from_peer: Mutex::new(rx_b),
            },
            Self {
                to_peer: tx_b,
                from_peer: Mutex::new(rx_a),
            },
        )
    }

    fn reply_sender(&self) -> Sender<Vec<u8>> {
        self.to_peer.clone()
    }
}

impl Transport for LocalTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.to_peer.send(bytes.to_vec()).map_err(|_| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer dropped"))
        })
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let rx = self.from_peer.lock().unwrap();
        match rx.recv_timeout(timeout) {
            Ok(v) => Ok(Some(v)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer dropped",
            ))),
        }
    }
}

/// Read one inbound message on the server side of a [`LocalTransport`] and
/// dispatch it through `registry`, synchronously encoding and sending the
/// reply. Returns `Ok(false)` on a clean timeout (nothing arrived), and an
/// error once the peer disconnects.
pub fn serve_one(transport: &LocalTransport, registry: &ServiceRegistry, timeout: Duration) -> Result<bool, RpcError> {
    let Some(bytes) = transport.recv(timeout)? else {
        return Ok(false);
    };
    let Some((xid, call, body)) = decode_call_message(&bytes)? else {
        return Ok(true); // a stray reply; spec §4.5 step 1 drops non-CALL messages.
    };

    let mut header_prefix = crate::xdr::MemorySink::new();
    crate::rpc_message::encode_call_header_prefix(&mut header_prefix, xid, call.prog, call.vers, call.proc)?;
    let header_prefix = header_prefix.into_inner();

    let reply_to = transport.reply_sender();
    registry.process(&header_prefix, xid, &call, &body, move |xid, reply, result| {
        if let Ok(bytes) = encode_reply_message(xid, &reply, result.as_deref()) {
            let _ = reply_to.send(bytes);
        }
    });
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_peer_is_reported() {
        let (a, b) = LocalTransport::pair();
        drop(b);
        let err = a.send(b"x").unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn recv_times_out_with_nothing_sent() {
        let (a, _b) = LocalTransport::pair();
        assert_eq!(a.recv(Duration::from_millis(10)).unwrap(), None);
    }
}
