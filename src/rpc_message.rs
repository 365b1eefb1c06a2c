//! The RPC message header types (RFC 5531 §9, spec §3 "RPC message").
//!
//! Unlike the teacher crate, which models a whole `RpcMessage` (header +
//! body) as a borrowed-slice value type, this crate streams the call
//! arguments / reply results directly through the caller's [`crate::xdr::XdrSink`]
//! or [`crate::xdr::XdrSource`] (the channel's call algorithm is
//! transport-agnostic, per spec §9) - so only the header portion of each
//! message is a concrete type here.

use crate::errors::{AuthStat, XdrError};
use crate::xdr::{decode_var_bytes, XdrSink, XdrSource};

/// The maximum size of an opaque-auth body (RFC 5531 `opaque_auth`, spec §3).
pub const MAX_AUTH_BYTES: u32 = 400;

/// The only RPC protocol version this crate speaks (spec §1 "no RPC version
/// other than 2").
pub const RPC_VERSION: u32 = 2;

const MSG_CALL: u32 = 0;
const MSG_REPLY: u32 = 1;

const MSG_ACCEPTED: u32 = 0;
const MSG_DENIED: u32 = 1;

const ACCEPT_SUCCESS: u32 = 0;
const ACCEPT_PROG_UNAVAIL: u32 = 1;
const ACCEPT_PROG_MISMATCH: u32 = 2;
const ACCEPT_PROC_UNAVAIL: u32 = 3;
const ACCEPT_GARBAGE_ARGS: u32 = 4;
const ACCEPT_SYSTEM_ERR: u32 = 5;

const REJECT_RPC_MISMATCH: u32 = 0;
const REJECT_AUTH_ERROR: u32 = 1;

/// `AUTH_NONE` flavor id.
pub const AUTH_NONE: u32 = 0;
/// `AUTH_SYS` (a.k.a. `AUTH_UNIX`) flavor id.
pub const AUTH_SYS: u32 = 1;
/// `AUTH_SHORT` flavor id.
pub const AUTH_SHORT: u32 = 2;
/// `RPCSEC_GSS` flavor id (RFC 2203).
pub const RPCSEC_GSS: u32 = 6;

/// `opaque_auth { flavor, body }` (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueAuth {
    /// The authentication flavor discriminator.
    pub flavor: u32,
    /// The flavor-specific opaque body, at most [`MAX_AUTH_BYTES`] long.
    pub body: Vec<u8>,
}

impl OpaqueAuth {
    /// The `{AUTH_NONE, empty}` credential/verifier used by unauthenticated
    /// calls and most verifiers.
    pub fn none() -> Self {
        Self {
            flavor: AUTH_NONE,
            body: Vec::new(),
        }
    }

    /// Encode this `opaque_auth` onto `sink`.
    pub fn encode(&self, sink: &mut (impl XdrSink + ?Sized)) -> Result<(), XdrError> {
        sink.put_word(self.flavor)?;
        crate::xdr::encode_var_bytes(sink, &self.body)
    }

    /// Decode an `opaque_auth` from `src`.
    pub fn decode(src: &mut (impl XdrSource + ?Sized)) -> Result<Self, XdrError> {
        let flavor = src.get_word()?;
        let body = decode_var_bytes(src, MAX_AUTH_BYTES)?;
        Ok(Self { flavor, body })
    }
}

/// The body of a `CALL` message (spec §3 "CALL body").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHeader {
    /// The RPC protocol version the caller sent. Always [`RPC_VERSION`] for
    /// calls this crate originates; preserved as-received on decode so the
    /// service registry can reply `MSG_DENIED/RPC_MISMATCH` itself (spec
    /// §4.5 step 2) instead of this module rejecting the message outright.
    pub rpc_vers: u32,
    /// The program number being invoked.
    pub prog: u32,
    /// The program version.
    pub vers: u32,
    /// The procedure number within the program.
    pub proc: u32,
    /// The authentication credential.
    pub cred: OpaqueAuth,
    /// The authentication verifier.
    pub verf: OpaqueAuth,
}

/// The accepted-reply status, carrying any mismatch info (spec §3 REPLY
/// body "accepted").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptedStat {
    /// `SUCCESS`; the call's result follows immediately in the stream.
    Success,
    /// `PROG_UNAVAIL`.
    ProgramUnavailable,
    /// `PROG_MISMATCH`.
    ProgramMismatch {
        /// Lowest version served.
        low: u32,
        /// Highest version served.
        high: u32,
    },
    /// `PROC_UNAVAIL`.
    ProcedureUnavailable,
    /// `GARBAGE_ARGS`.
    GarbageArgs,
    /// `SYSTEM_ERR`.
    SystemError,
}

impl AcceptedStat {
    fn wire_id(&self) -> u32 {
        match self {
            AcceptedStat::Success => ACCEPT_SUCCESS,
            AcceptedStat::ProgramUnavailable => ACCEPT_PROG_UNAVAIL,
            AcceptedStat::ProgramMismatch { .. } => ACCEPT_PROG_MISMATCH,
            AcceptedStat::ProcedureUnavailable => ACCEPT_PROC_UNAVAIL,
            AcceptedStat::GarbageArgs => ACCEPT_GARBAGE_ARGS,
            AcceptedStat::SystemError => ACCEPT_SYSTEM_ERR,
        }
    }
}

/// `MSG_DENIED` reply (spec §3 REPLY body "denied").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectedReply {
    /// `RPC_MISMATCH`.
    RpcMismatch {
        /// Lowest RPC version supported.
        low: u32,
        /// Highest RPC version supported.
        high: u32,
    },
    /// `AUTH_ERROR`.
    AuthError(AuthStat),
}

/// The body of a `REPLY` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyHeader {
    /// `MSG_ACCEPTED`.
    Accepted {
        /// The server's verifier.
        verf: OpaqueAuth,
        /// The acceptance status.
        stat: AcceptedStat,
    },
    /// `MSG_DENIED`.
    Denied(RejectedReply),
}

/// A parsed message header, without its trailing call-args / reply-results
/// payload (which the caller streams separately).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageHeader {
    /// A `CALL` message.
    Call {
        /// The transaction id.
        xid: u32,
        /// The call header.
        call: CallHeader,
    },
    /// A `REPLY` message.
    Reply {
        /// The transaction id, matching the original call's.
        xid: u32,
        /// The reply header.
        reply: ReplyHeader,
    },
}

/// Encode the `{xid, CALL, rpcvers, prog, vers, proc}` prefix of a `CALL`
/// message onto `sink`, without the cred/verf that follow. Exposed so the
/// auth pipeline can MIC this exact byte range (spec §4.4.3).
pub fn encode_call_header_prefix(
    sink: &mut (impl XdrSink + ?Sized),
    xid: u32,
    prog: u32,
    vers: u32,
    proc: u32,
) -> Result<(), XdrError> {
    sink.put_word(xid)?;
    sink.put_word(MSG_CALL)?;
    sink.put_word(RPC_VERSION)?;
    sink.put_word(prog)?;
    sink.put_word(vers)?;
    sink.put_word(proc)
}

/// Encode a `CALL` message header (xid through verf) onto `sink`. The
/// caller must follow this with the encoded call arguments.
pub fn encode_call(sink: &mut (impl XdrSink + ?Sized), xid: u32, call: &CallHeader) -> Result<(), XdrError> {
    encode_call_header_prefix(sink, xid, call.prog, call.vers, call.proc)?;
    call.cred.encode(sink)?;
    call.verf.encode(sink)
}

/// Encode a `REPLY` message header onto `sink`. For [`AcceptedStat::Success`]
/// the caller must follow this with the encoded result body.
pub fn encode_reply(sink: &mut (impl XdrSink + ?Sized), xid: u32, reply: &ReplyHeader) -> Result<(), XdrError> {
    sink.put_word(xid)?;
    sink.put_word(MSG_REPLY)?;
    match reply {
        ReplyHeader::Accepted { verf, stat } => {
            sink.put_word(MSG_ACCEPTED)?;
            verf.encode(sink)?;
            sink.put_word(stat.wire_id())?;
            if let AcceptedStat::ProgramMismatch { low, high } = stat {
                sink.put_word(*low)?;
                sink.put_word(*high)?;
            }
            Ok(())
        }
        ReplyHeader::Denied(rej) => {
            sink.put_word(MSG_DENIED)?;
            match rej {
                RejectedReply::RpcMismatch { low, high } => {
                    sink.put_word(REJECT_RPC_MISMATCH)?;
                    sink.put_word(*low)?;
                    sink.put_word(*high)
                }
                RejectedReply::AuthError(stat) => {
                    sink.put_word(REJECT_AUTH_ERROR)?;
                    sink.put_word((*stat).to_wire())
                }
            }
        }
    }
}

/// Decode a message header (xid, discriminant, and the call/reply header
/// fields) from `src`. The caller must continue reading call args / reply
/// results from the same source afterwards.
pub fn decode_message_header(src: &mut (impl XdrSource + ?Sized)) -> Result<MessageHeader, XdrError> {
    let xid = src.get_word()?;
    match src.get_word()? {
        MSG_CALL => {
            // A foreign `rpcvers` is surfaced to the service registry as a
            // MSG_DENIED/RPC_MISMATCH reply, not a decode failure (spec
            // §4.5 step 2) - the remaining fields are at fixed wire offsets
            // regardless of its value, so decoding can proceed.
            let rpc_vers = src.get_word()?;
            let prog = src.get_word()?;
            let vers = src.get_word()?;
            let proc = src.get_word()?;
            let cred = OpaqueAuth::decode(src)?;
            let verf = OpaqueAuth::decode(src)?;
            Ok(MessageHeader::Call {
                xid,
                call: CallHeader {
                    rpc_vers,
                    prog,
                    vers,
                    proc,
                    cred,
                    verf,
                },
            })
        }
        MSG_REPLY => {
            let reply = decode_reply_body(src)?;
            Ok(MessageHeader::Reply { xid, reply })
        }
        v => Err(XdrError::Malformed(format!("invalid message type {v}"))),
    }
}

fn decode_reply_body(src: &mut (impl XdrSource + ?Sized)) -> Result<ReplyHeader, XdrError> {
    match src.get_word()? {
        MSG_ACCEPTED => {
            let verf = OpaqueAuth::decode(src)?;
            let stat = match src.get_word()? {
                ACCEPT_SUCCESS => AcceptedStat::Success,
                ACCEPT_PROG_UNAVAIL => AcceptedStat::ProgramUnavailable,
                ACCEPT_PROG_MISMATCH => AcceptedStat::ProgramMismatch {
                    low: src.get_word()?,
                    high: src.get_word()?,
                },
                ACCEPT_PROC_UNAVAIL => AcceptedStat::ProcedureUnavailable,
                ACCEPT_GARBAGE_ARGS => AcceptedStat::GarbageArgs,
                ACCEPT_SYSTEM_ERR => AcceptedStat::SystemError,
                v => return Err(XdrError::Malformed(format!("invalid accept_stat {v}"))),
            };
            Ok(ReplyHeader::Accepted { verf, stat })
        }
        MSG_DENIED => {
            let rej = match src.get_word()? {
                REJECT_RPC_MISMATCH => RejectedReply::RpcMismatch {
                    low: src.get_word()?,
                    high: src.get_word()?,
                },
                REJECT_AUTH_ERROR => RejectedReply::AuthError(AuthStat::from_wire(src.get_word()?)),
                v => return Err(XdrError::Malformed(format!("invalid reject_stat {v}"))),
            };
            Ok(ReplyHeader::Denied(rej))
        }
        v => Err(XdrError::Malformed(format!("invalid reply type {v}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdr::{MemorySink, MemorySource};

    #[test]
    fn call_header_round_trips() {
        let call = CallHeader {
            rpc_vers: RPC_VERSION,
            prog: 1234,
            vers: 1,
            proc: 1,
            cred: OpaqueAuth::none(),
            verf: OpaqueAuth::none(),
        };

        let mut sink = MemorySink::new();
        encode_call(&mut sink, 42, &call).unwrap();
        let bytes = sink.into_inner();

        let mut src = MemorySource::new(&bytes);
        let hdr = decode_message_header(&mut src).unwrap();
        assert_eq!(
            hdr,
            MessageHeader::Call {
                xid: 42,
                call: call.clone()
            }
        );
    }

    #[test]
    fn accepted_success_reply_round_trips() {
        let reply = ReplyHeader::Accepted {
            verf: OpaqueAuth::none(),
            stat: AcceptedStat::Success,
        };

        let mut sink = MemorySink::new();
        encode_reply(&mut sink, 42, &reply).unwrap();
        let bytes = sink.into_inner();

        let mut src = MemorySource::new(&bytes);
        let hdr = decode_message_header(&mut src).unwrap();
        assert_eq!(hdr, MessageHeader::Reply { xid: 42, reply });
    }

    #[test]
    fn program_mismatch_carries_bounds() {
        let reply = ReplyHeader::Accepted {
            verf: OpaqueAuth::none(),
            stat: AcceptedStat::ProgramMismatch { low: 1, high: 3 },
        };
        let mut sink = MemorySink::new();
        encode_reply(&mut sink, 7, &reply).unwrap();
        let bytes = sink.into_inner();
        let mut src = MemorySource::new(&bytes);
        assert_eq!(
            decode_message_header(&mut src).unwrap(),
            MessageHeader::Reply { xid: 7, reply }
        );
    }

    #[test]
    fn denied_auth_error_round_trips() {
        let reply = ReplyHeader::Denied(RejectedReply::AuthError(AuthStat::GssCredProblem));
        let mut sink = MemorySink::new();
        encode_reply(&mut sink, 9, &reply).unwrap();
        let bytes = sink.into_inner();
        let mut src = MemorySource::new(&bytes);
        assert_eq!(
            decode_message_header(&mut src).unwrap(),
            MessageHeader::Reply { xid: 9, reply }
        );
    }

    #[test]
    fn decodes_a_portmap_null_call_wire_fixture() {
        // xid=1, CALL, rpcvers=2, prog=100000 (portmap), vers=2, proc=0
        // (NULL), cred=AUTH_NONE, verf=AUTH_NONE.
        let raw = hex_literal::hex!(
            "00000001 00000000 00000002 000186a0
             00000002 00000000 00000000 00000000
             00000000 00000000"
        );
        let mut src = MemorySource::new(&raw);
        let hdr = decode_message_header(&mut src).unwrap();
        assert_eq!(
            hdr,
            MessageHeader::Call {
                xid: 1,
                call: CallHeader {
                    rpc_vers: RPC_VERSION,
                    prog: 100000,
                    vers: 2,
                    proc: 0,
                    cred: OpaqueAuth::none(),
                    verf: OpaqueAuth::none(),
                },
            }
        );
    }

    #[test]
    fn rpc_mismatch_is_denied_with_bounds() {
        let reply = ReplyHeader::Denied(RejectedReply::RpcMismatch { low: 2, high: 2 });
        let mut sink = MemorySink::new();
        encode_reply(&mut sink, 1, &reply).unwrap();
        let bytes = sink.into_inner();
        let mut src = MemorySource::new(&bytes);
        assert_eq!(
            decode_message_header(&mut src).unwrap(),
            MessageHeader::Reply { xid: 1, reply }
        );
    }
}
