//! The channel (C6): transaction table, call/reply matching, retransmit
//! and reconnect, and the transport-agnostic synchronous call algorithm
//! (spec §4.3). The three transport variants (`local`, `datagram`,
//! `stream`/`reconnect`) share this one call algorithm through the
//! [`Transport`] trait (spec §9 "the call algorithm is transport-agnostic
//! and lives outside the variants").

pub mod datagram;
pub mod local;
pub mod reconnect;
pub mod stream;

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::auth::{ClientAuth, EncodedCall, Protection};
use crate::errors::{RpcError, TransportError, XdrError};
use crate::rpc_message::{
    decode_message_header, encode_call_header_prefix, encode_reply, AcceptedStat, CallHeader,
    MessageHeader, OpaqueAuth, RejectedReply, ReplyHeader,
};
use crate::xdr::{MemorySink, MemorySource, XdrSink, XdrSource};

/// Default initial capacity hint for per-call send buffers (spec §9: buffer
/// pooling is an optimisation, not a contract; a fresh allocation per call
/// is acceptable).
const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Tunables for a [`Channel`] (spec §4.3, ambient "Configuration": plain
/// constructor parameters, no config-file layer).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Initial capacity hint for send buffers.
    pub buffer_size: usize,
    /// Initial retransmit delay for transports that need one. Zero disables
    /// retransmission (spec §4.3.4).
    pub retransmit_interval: Duration,
    /// Ceiling the retransmit backoff doubles up to (spec default 30s).
    pub max_backoff: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            retransmit_interval: Duration::ZERO,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// A transport a [`Channel`] can drive (spec §4.3.1). `send`/`recv` carry
/// fully-framed messages (record-marking, if any, is the implementor's
/// concern); the call algorithm above is identical regardless of which
/// transport is plugged in.
pub trait Transport: Send {
    /// Send one fully-encoded message.
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Block up to `timeout` for the next inbound message. `Ok(None)` means
    /// the wait elapsed with nothing received.
    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Auth,
    Sleeping,
    Reply,
    Resend,
}

struct Transaction {
    state: TxState,
    reply: Option<(ReplyHeader, Vec<u8>)>,
}

struct Shared {
    table: HashMap<u32, Transaction>,
    running: bool,
    next_xid: u32,
}

enum WaitOutcome {
    Reply(ReplyHeader, Vec<u8>),
    Resend,
    Timeout,
}

/// One multiplexed RPC connection: a transport plus the transaction table
/// and call algorithm driving it (spec component C6).
///
/// Concurrent calls on one `Channel` share a single reader: exactly one
/// thread at a time pulls messages off the wire (spec §4.3.2 `running`
/// flag), the rest sleep on a condition variable until their reply is
/// delivered or they must take over the reader role themselves.
pub struct Channel<T: Transport, A: ClientAuth> {
    transport: T,
    auth: Mutex<A>,
    shared: Mutex<Shared>,
    cv: Condvar,
    config: ChannelConfig,
}

impl<T: Transport, A: ClientAuth> Channel<T, A> {
    /// Construct a channel driving `transport` with `auth` as its
    /// credential pipeline.
    pub fn new(transport: T, auth: A, config: ChannelConfig) -> Self {
        Self {
            transport,
            auth: Mutex::new(auth),
            shared: Mutex::new(Shared {
                table: HashMap::new(),
                running: false,
                next_xid: 1,
            }),
            cv: Condvar::new(),
            config,
        }
    }

    fn next_xid(&self) -> u32 {
        let mut shared = self.shared.lock().unwrap();
        let xid = shared.next_xid;
        shared.next_xid = shared.next_xid.wrapping_add(1);
        if shared.next_xid == 0 {
            shared.next_xid = 1;
        }
        xid
    }

    fn register(&self, xid: u32) {
        self.shared.lock().unwrap().table.insert(
            xid,
            Transaction {
                state: TxState::Auth,
                reply: None,
            },
        );
    }

    fn forget(&self, xid: u32) {
        self.shared.lock().unwrap().table.remove(&xid);
    }

    fn mark_all_resend(&self) {
        let mut shared = self.shared.lock().unwrap();
        for tx in shared.table.values_mut() {
            tx.state = TxState::Resend;
        }
        drop(shared);
        self.cv.notify_all();
    }

    fn finish_reading(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.running = false;
        drop(shared);
        self.cv.notify_all();
    }

    /// Issue one synchronous RPC call and return the decoded result bytes
    /// (spec §4.3.2). `deadline` bounds the whole call, across any
    /// retransmits or auth-triggered restarts.
    pub fn call(
        &self,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &[u8],
        protection: Protection,
        deadline: Instant,
    ) -> Result<Vec<u8>, RpcError> {
        let mut revalidate = false;
        'outer: loop {
            let gen = {
                let mut auth = self.auth.lock().unwrap();
                let mut raw_call = |cred: &OpaqueAuth, verf: &OpaqueAuth, body: &[u8]| {
                    self.raw_handshake_call(prog, vers, cred, verf, body, deadline)
                };
                auth.validate_auth(revalidate, &mut raw_call)?
            };
            revalidate = false;

            let xid = self.next_xid();
            self.register(xid);

            'resend: loop {
                let mut header_prefix = MemorySink::new();
                encode_call_header_prefix(&mut header_prefix, xid, prog, vers, proc)?;
                let header_prefix = header_prefix.into_inner();

                let mut seq = 0u32;
                let encoded = {
                    let mut auth = self.auth.lock().unwrap();
                    auth.process_call(gen, &header_prefix, proc, args, protection, &mut seq)?
                };
                let Some(encoded) = encoded else {
                    self.forget(xid);
                    revalidate = true;
                    continue 'outer;
                };

                let bytes = assemble_call(&header_prefix, &encoded)?;

                if let Err(e) = self.transport.send(&bytes) {
                    match e {
                        TransportError::ResendMessage => {
                            self.mark_all_resend();
                            continue 'resend;
                        }
                        other => {
                            self.forget(xid);
                            return Err(other.into());
                        }
                    }
                }

                match self.wait_for_reply(xid, deadline, &bytes)? {
                    WaitOutcome::Reply(ReplyHeader::Accepted {
                        verf,
                        stat: AcceptedStat::Success,
                    }, body) => {
                        let mut auth = self.auth.lock().unwrap();
                        match auth.process_reply(seq, gen, &verf, &body, protection)? {
                            Some(result) => return Ok(result),
                            None => {
                                // Recoverable (GSS sequence skew): retry with
                                // a fresh xid and sequence (spec §4.4.3/§7).
                                continue 'outer;
                            }
                        }
                    }
                    WaitOutcome::Reply(ReplyHeader::Accepted { stat, .. }, _) => {
                        return Err(accepted_error(prog, proc, stat));
                    }
                    WaitOutcome::Reply(ReplyHeader::Denied(RejectedReply::RpcMismatch { low, high }), _) => {
                        return Err(RpcError::ProtocolMismatch { min: low, max: high });
                    }
                    WaitOutcome::Reply(ReplyHeader::Denied(RejectedReply::AuthError(stat)), _) => {
                        let mut auth = self.auth.lock().unwrap();
                        if auth.auth_error(gen, stat) {
                            revalidate = true;
                            continue 'outer;
                        }
                        return Err(RpcError::AuthError(stat));
                    }
                    WaitOutcome::Resend => continue 'resend,
                    WaitOutcome::Timeout => return Err(RpcError::TimeoutError),
                }
            }
        }
    }

    /// Drive a proc-0 handshake call outside the ordinary auth pipeline,
    /// used by GSS context establishment (spec §4.4.3: "nests RPC calls").
    fn raw_handshake_call(
        &self,
        prog: u32,
        vers: u32,
        cred: &OpaqueAuth,
        verf: &OpaqueAuth,
        body: &[u8],
    ) -> Result<(OpaqueAuth, Vec<u8>), RpcError> {
        // Handshake calls share the channel's transaction table but are not
        // bounded by a caller-supplied deadline; fall back to a generous
        // fixed one so a dead peer cannot wedge context establishment
        // forever.
        let deadline = Instant::now() + Duration::from_secs(30);
        let xid = self.next_xid();
        self.register(xid);

        let mut sink = MemorySink::new();
        encode_call_header_prefix(&mut sink, xid, prog, vers, 0)?;
        cred.encode(&mut sink)?;
        verf.encode(&mut sink)?;
        sink.put_bytes(body)?;
        let bytes = sink.into_inner();

        if let Err(e) = self.transport.send(&bytes) {
            self.forget(xid);
            return Err(e.into());
        }

        match self.wait_for_reply(xid, deadline, &bytes)? {
            WaitOutcome::Reply(
                ReplyHeader::Accepted {
                    verf,
                    stat: AcceptedStat::Success,
                },
                body,
            ) => Ok((verf, body)),
            WaitOutcome::Reply(ReplyHeader::Accepted { stat, .. }, _) => Err(accepted_error(prog, 0, stat)),
            WaitOutcome::Reply(ReplyHeader::Denied(RejectedReply::RpcMismatch { low, high }), _) => {
                Err(RpcError::ProtocolMismatch { min: low, max: high })
            }
            WaitOutcome::Reply(ReplyHeader::Denied(RejectedReply::AuthError(stat)), _) => {
                Err(RpcError::AuthError(stat))
            }
            WaitOutcome::Resend => Err(RpcError::Other("resend required during gss handshake".into())),
            WaitOutcome::Timeout => Err(RpcError::TimeoutError),
        }
    }

    fn wait_for_reply(&self, xid: u32, deadline: Instant, retransmit_bytes: &[u8]) -> Result<WaitOutcome, RpcError> {
        loop {
            let mut shared = self.shared.lock().unwrap();
            if !shared.running {
                shared.running = true;
                drop(shared);
                return self.read_and_dispatch(xid, deadline, retransmit_bytes);
            }

            if let Some(tx) = shared.table.get_mut(&xid) {
                tx.state = TxState::Sleeping;
            }

            let now = Instant::now();
            if now >= deadline {
                shared.table.remove(&xid);
                return Ok(WaitOutcome::Timeout);
            }

            let (guard, _timeout_result) = self.cv.wait_timeout(shared, deadline - now).unwrap();
            let mut shared = guard;
            match shared.table.get(&xid).map(|tx| tx.state) {
                Some(TxState::Reply) => {
                    let tx = shared.table.remove(&xid).unwrap();
                    let (reply, body) = tx.reply.unwrap();
                    return Ok(WaitOutcome::Reply(reply, body));
                }
                Some(TxState::Resend) => {
                    shared.table.remove(&xid);
                    return Ok(WaitOutcome::Resend);
                }
                Some(_) => {
                    if Instant::now() >= deadline {
                        shared.table.remove(&xid);
                        return Ok(WaitOutcome::Timeout);
                    }
                    // Spurious wake, or the reader finished without our
                    // reply - loop and re-evaluate `running`.
                }
                None => return Ok(WaitOutcome::Timeout),
            }
        }
    }

    /// Become the reader: pull messages off the wire until our own reply
    /// arrives, we time out, or the transport demands a resend. Other
    /// threads' replies are matched by xid and handed off; unmatched xids
    /// are dropped silently (spec §9 open question: do not cancel a
    /// pending transaction on an unrelated unknown-xid reply).
    fn read_and_dispatch(&self, xid: u32, deadline: Instant, retransmit_bytes: &[u8]) -> Result<WaitOutcome, RpcError> {
        let mut retransmit_interval = self.config.retransmit_interval;
        let mut next_retransmit = if retransmit_interval.is_zero() {
            None
        } else {
            Some(Instant::now() + retransmit_interval)
        };

        loop {
            let now = Instant::now();
            if now >= deadline {
                self.finish_reading();
                self.forget(xid);
                return Ok(WaitOutcome::Timeout);
            }

            let mut recv_timeout = deadline - now;
            if let Some(nr) = next_retransmit {
                if nr <= now {
                    trace!(xid, "retransmitting call");
                    if let Err(e) = self.transport.send(retransmit_bytes) {
                        self.finish_reading();
                        return Err(e.into());
                    }
                    retransmit_interval = (retransmit_interval * 2).min(self.config.max_backoff);
                    next_retransmit = Some(now + retransmit_interval);
                } else {
                    recv_timeout = recv_timeout.min(nr - now);
                }
            }

            let received = match self.transport.recv(recv_timeout) {
                Ok(v) => v,
                Err(TransportError::ResendMessage) => {
                    self.finish_reading();
                    self.mark_all_resend();
                    return Ok(WaitOutcome::Resend);
                }
                Err(e) => {
                    self.finish_reading();
                    return Err(e.into());
                }
            };

            let Some(bytes) = received else { continue };

            let mut src = MemorySource::new(&bytes);
            let header = match decode_message_header(&mut src) {
                Ok(h) => h,
                Err(_) => continue,
            };
            let MessageHeader::Reply { xid: got_xid, reply } = header else {
                continue;
            };
            let body = src.tail().to_vec();

            if got_xid == xid {
                self.finish_reading();
                self.forget(xid);
                return Ok(WaitOutcome::Reply(reply, body));
            }

            let mut shared = self.shared.lock().unwrap();
            if let Some(tx) = shared.table.get_mut(&got_xid) {
                tx.reply = Some((reply, body));
                tx.state = TxState::Reply;
                drop(shared);
                self.cv.notify_all();
            } else {
                warn!(xid = got_xid, "dropping reply for unknown transaction");
            }
        }
    }
}

fn assemble_call(header_prefix: &[u8], encoded: &EncodedCall) -> Result<Vec<u8>, XdrError> {
    let mut sink = MemorySink::new();
    sink.put_bytes(header_prefix)?;
    encoded.cred.encode(&mut sink)?;
    encoded.verf.encode(&mut sink)?;
    sink.put_bytes(&encoded.body)?;
    Ok(sink.into_inner())
}

fn accepted_error(prog: u32, proc: u32, stat: AcceptedStat) -> RpcError {
    match stat {
        AcceptedStat::Success => unreachable!("success is handled by the caller"),
        AcceptedStat::ProgramUnavailable => RpcError::ProgramUnavailable { prog },
        AcceptedStat::ProgramMismatch { low, high } => RpcError::VersionMismatch { min: low, max: high },
        AcceptedStat::ProcedureUnavailable => RpcError::ProcedureUnavailable { proc },
        AcceptedStat::GarbageArgs => RpcError::GarbageArgs,
        AcceptedStat::SystemError => RpcError::SystemError,
    }
}

/// Encode a complete reply message (header plus result body, if any),
/// ready to hand to a [`Transport`]. Shared by every server-side transport
/// glue (`local::serve_one`, the reactor's stream/datagram handlers).
pub fn encode_reply_message(xid: u32, reply: &ReplyHeader, body: Option<&[u8]>) -> Result<Vec<u8>, XdrError> {
    let mut sink = MemorySink::new();
    encode_reply(&mut sink, xid, reply)?;
    if let Some(b) = body {
        sink.put_bytes(b)?;
    }
    Ok(sink.into_inner())
}

/// Decode an inbound `CALL` message, returning its xid, header and the raw
/// (not yet auth-unwrapped) argument bytes. Returns `Ok(None)` for a
/// `REPLY` message (dropped per spec §4.5 step 1 - only a server-side
/// concern, callers of this function are servers).
pub fn decode_call_message(bytes: &[u8]) -> Result<Option<(u32, CallHeader, Vec<u8>)>, XdrError> {
    let mut src = MemorySource::new(bytes);
    match decode_message_header(&mut src)? {
        MessageHeader::Call { xid, call } => Ok(Some((xid, call, src.tail().to_vec()))),
        MessageHeader::Reply { .. } => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::none::NoneAuth;
    use crate::service::{CallContext, ServiceEntry, ServiceRegistry};
    use std::sync::Arc;
    use std::thread;

    fn echo_registry() -> Arc<ServiceRegistry> {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register_auth(Arc::new(crate::auth::none::NoneServerAuth));
        registry.register(
            1234,
            1,
            ServiceEntry::new(
                Arc::new(|ctx: CallContext| {
                    let args = ctx.args().to_vec();
                    ctx.send_reply(args);
                }),
                [1],
            ),
        );
        registry
    }

    fn spawn_server(transport: local::LocalTransport, registry: Arc<ServiceRegistry>) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            match local::serve_one(&transport, &registry, Duration::from_secs(5)) {
                Ok(true) => continue,
                _ => return,
            }
        })
    }

    #[test]
    fn echo_scenario_1_over_local_channel() {
        let (client_t, server_t) = local::LocalTransport::pair();
        let registry = echo_registry();
        let _server = spawn_server(server_t, registry);

        let channel = Channel::new(client_t, NoneAuth, ChannelConfig::default());
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = channel
            .call(1234, 1, 1, &0x7bu32.to_be_bytes(), Protection::None, deadline)
            .unwrap();
        assert_eq!(result, 0x7bu32.to_be_bytes().to_vec());
    }

    #[test]
    fn scenario_2_program_mismatch_over_local_channel() {
        let (client_t, server_t) = local::LocalTransport::pair();
        let registry = echo_registry();
        let _server = spawn_server(server_t, registry);

        let channel = Channel::new(client_t, NoneAuth, ChannelConfig::default());
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = channel
            .call(1234, 2, 0, &[], Protection::None, deadline)
            .unwrap_err();
        assert!(matches!(err, RpcError::VersionMismatch { min: 1, max: 1 }));
    }

    #[test]
    fn transaction_table_is_empty_after_completed_call() {
        let (client_t, server_t) = local::LocalTransport::pair();
        let registry = echo_registry();
        let _server = spawn_server(server_t, registry);

        let channel = Channel::new(client_t, NoneAuth, ChannelConfig::default());
        let deadline = Instant::now() + Duration::from_secs(5);
        channel.call(1234, 1, 1, &[0, 0, 0, 1], Protection::None, deadline).unwrap();
        assert!(channel.shared.lock().unwrap().table.is_empty());
    }
}
