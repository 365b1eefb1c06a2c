//! The stream transport variant (spec §4.3.1): a connected, record-framed
//! socket. `retransmit_interval` is meaningless here (a reliable transport
//! never silently drops a write); recovery from a dead connection is the
//! job of [`crate::channel::reconnect::ReconnectChannel`].

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use crate::channel::Transport;
use crate::errors::TransportError;
use crate::record::{RecordReader, RecordWriter};

/// Recognised HTTP/1.1 request-line prefixes that hand a fresh connection
/// off to a REST handler instead of RPC framing (spec §4.3.6). The REST
/// parser itself is out of scope; this hook only identifies the byte
/// pattern that must stop RPC processing on the connection.
const REST_PREFIXES: [&[u8; 4]; 5] = [b"GET ", b"PUT ", b"POST", b"DELE", b"HEAD"];

/// Returns true if `first_bytes` (the start of a fresh fragment) matches a
/// recognised HTTP/1.1 method, per spec §4.3.6 / §6 "HTTP branch".
pub fn looks_like_rest_request(first_bytes: &[u8]) -> bool {
    first_bytes.len() >= 4 && REST_PREFIXES.iter().any(|p| &&first_bytes[..4] == p)
}

/// What a [`StreamTransport`] does when the first fragment of a new
/// connection looks like an HTTP request rather than an RPC record (spec
/// §4.3.6). The core only needs to stop framing the connection as RPC and
/// hand raw byte ownership elsewhere; the REST parser/handler registry
/// named by spec.md's Non-goals is not implemented here.
pub trait RestHandoff: Send {
    /// Take over a connection whose first bytes matched [`looks_like_rest_request`].
    /// `first_bytes` is what had already been read off the wire.
    fn handoff(&self, first_bytes: Vec<u8>, stream: TcpStream);
}

/// A record-framed TCP transport (spec §4.2, §4.3.1).
pub struct StreamTransport {
    writer: Mutex<(TcpStream, RecordWriter)>,
    reader: Mutex<(TcpStream, RecordReader)>,
    rest: Option<Box<dyn RestHandoff>>,
}

impl StreamTransport {
    /// Wrap `stream` (already connected), framing records up to
    /// `max_record` bytes (see [`crate::record::RecordReader::new`]).
    pub fn new(stream: TcpStream, max_record: usize) -> std::io::Result<Self> {
        let reader_half = stream.try_clone()?;
        Ok(Self {
            writer: Mutex::new((stream, RecordWriter::new())),
            reader: Mutex::new((reader_half, RecordReader::new(max_record))),
            rest: None,
        })
    }

    /// Attach a REST handoff target (spec §4.3.6); without one, bytes that
    /// look like an HTTP request are simply treated as a malformed record.
    pub fn with_rest_handoff(mut self, rest: Box<dyn RestHandoff>) -> Self {
        self.rest = Some(rest);
        self
    }
}

impl Transport for StreamTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().unwrap();
        let (stream, writer) = &mut *guard;
        writer.write(bytes);
        let framed = writer.push_record();
        stream.write_all(&framed)?;
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut guard = self.reader.lock().unwrap();
        let (stream, reader) = &mut *guard;
        stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        loop {
            if reader.record_ready() {
                let record = reader.record().to_vec();
                reader.end_record();
                if self.rest.is_some() && looks_like_rest_request(&record) {
                    let handed_stream = stream.try_clone()?;
                    self.rest.as_ref().unwrap().handoff(record, handed_stream);
                    continue;
                }
                return Ok(Some(record));
            }

            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed"))),
                Ok(n) => reader.feed(&chunk[..n])?,
                Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn record_framed_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_stream = TcpStream::connect(addr).unwrap();
        let (server_stream, _) = listener.accept().unwrap();

        let client = StreamTransport::new(client_stream, usize::MAX).unwrap();
        let server = StreamTransport::new(server_stream, usize::MAX).unwrap();

        client.send(b"hello record").unwrap();
        let got = server.recv(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(got, b"hello record");
    }

    #[test]
    fn rest_prefix_is_recognised() {
        assert!(looks_like_rest_request(b"GET /status HTTP/1.1"));
        assert!(looks_like_rest_request(b"POST /x HTTP/1.1"));
        assert!(!looks_like_rest_request(&[0, 0, 0, 12]));
    }
}
