//! RPCSEC_GSS version 1 (RFC 2203), spec §4.4.3 and §4.6.
//!
//! `client` implements the client-side context establishment and per-call
//! cred/verf/body pipeline; `server` implements the per-context server
//! state with the sequence-window replay protection (spec §3 "GSS server
//! session", §4.6, component C9); `mech` is the mechanism boundary
//! ([`mech::GssMechanism`]) that stands in for a real Kerberos binding.

pub mod client;
pub mod mech;
pub mod server;
pub mod window;

pub use client::GssClientAuth;
pub use mech::GssMechanism;
pub use server::{GssServerAuth, GssServerSession};
pub use window::ReplayWindow;

use crate::errors::XdrError;
use crate::rpc_message::OpaqueAuth;
use crate::xdr::{decode_var_bytes, encode_var_bytes, MemorySink, MemorySource, XdrSink, XdrSource};

/// RPCSEC_GSS flavor id (RFC 2203 §5).
pub const RPCSEC_GSS: u32 = 6;

/// `rpc_gss_cred_vers_1` version discriminant - the only version this
/// crate (and the spec, §1 "no RPCSEC_GSS version ≠ 1") supports.
pub const GSS_CRED_VERS_1: u32 = 1;

/// The maximum size of a GSS context handle this crate will accept.
pub const MAX_HANDLE_LEN: u32 = 1024;

/// The maximum size of a GSS token (init/continue/mic/wrap) this crate will
/// accept in a single message.
pub const MAX_TOKEN_LEN: u32 = 1 << 20;

/// `rpc_gss_proc_t` (RFC 2203 §5.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GssProc {
    /// `RPCSEC_GSS_INIT` - begin context establishment.
    Init,
    /// `RPCSEC_GSS_CONTINUE_INIT` - continue a multi-leg establishment.
    ContinueInit,
    /// `RPCSEC_GSS_DATA` - an ordinary authenticated call.
    Data,
    /// `RPCSEC_GSS_DESTROY` - tear down the context.
    Destroy,
}

impl GssProc {
    fn to_wire(self) -> u32 {
        match self {
            GssProc::Init => 0,
            GssProc::ContinueInit => 1,
            GssProc::Data => 2,
            GssProc::Destroy => 3,
        }
    }

    fn from_wire(v: u32) -> Result<Self, XdrError> {
        match v {
            0 => Ok(GssProc::Init),
            1 => Ok(GssProc::ContinueInit),
            2 => Ok(GssProc::Data),
            3 => Ok(GssProc::Destroy),
            v => Err(XdrError::Malformed(format!("invalid rpc_gss_proc_t {v}"))),
        }
    }
}

/// `rpc_gss_service_t` (RFC 2203 §5.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GssService {
    /// `rpcsec_gss_svc_none` - no body protection.
    None,
    /// `rpcsec_gss_svc_integrity` - body accompanied by a MIC.
    Integrity,
    /// `rpcsec_gss_svc_privacy` - body encrypted.
    Privacy,
}

impl GssService {
    fn to_wire(self) -> u32 {
        match self {
            GssService::None => 1,
            GssService::Integrity => 2,
            GssService::Privacy => 3,
        }
    }

    fn from_wire(v: u32) -> Result<Self, XdrError> {
        match v {
            1 => Ok(GssService::None),
            2 => Ok(GssService::Integrity),
            3 => Ok(GssService::Privacy),
            v => Err(XdrError::Malformed(format!("invalid rpc_gss_service_t {v}"))),
        }
    }
}

impl From<GssService> for crate::auth::Protection {
    fn from(v: GssService) -> Self {
        match v {
            GssService::None => crate::auth::Protection::None,
            GssService::Integrity => crate::auth::Protection::Integrity,
            GssService::Privacy => crate::auth::Protection::Privacy,
        }
    }
}

/// The RPCSEC_GSS credential (spec §6: "Cred body:
/// `rpc_gss_cred_vers_1{gss_ver=1, proc, seq_num, service, handle:bytes}`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GssCred {
    /// Must be [`GSS_CRED_VERS_1`].
    pub version: u32,
    /// Which phase of the protocol this call is.
    pub proc: GssProc,
    /// The per-call sequence number (meaningless for `Init`/`ContinueInit`).
    pub seq_num: u32,
    /// The requested body protection.
    pub service: GssService,
    /// The server-issued context handle (empty during `Init`).
    pub handle: Vec<u8>,
}

impl GssCred {
    /// Encode as the body of an `opaque_auth{RPCSEC_GSS, ..}`.
    pub fn to_opaque_auth(&self) -> OpaqueAuth {
        let mut sink = MemorySink::new();
        sink.put_word(self.version).unwrap();
        sink.put_word(self.proc.to_wire()).unwrap();
        sink.put_word(self.seq_num).unwrap();
        sink.put_word(self.service.to_wire()).unwrap();
        encode_var_bytes(&mut sink, &self.handle).unwrap();
        OpaqueAuth {
            flavor: RPCSEC_GSS,
            body: sink.into_inner(),
        }
    }

    /// Decode the credential body of an `opaque_auth{RPCSEC_GSS, ..}`.
    pub fn from_bytes(body: &[u8]) -> Result<Self, XdrError> {
        let mut src = MemorySource::new(body);
        let version = src.get_word()?;
        if version != GSS_CRED_VERS_1 {
            return Err(XdrError::Malformed(format!(
                "unsupported rpc_gss_cred version {version}"
            )));
        }
        let proc = GssProc::from_wire(src.get_word()?)?;
        let seq_num = src.get_word()?;
        let service = GssService::from_wire(src.get_word()?)?;
        let handle = decode_var_bytes(&mut src, MAX_HANDLE_LEN)?;
        Ok(Self {
            version,
            proc,
            seq_num,
            service,
            handle,
        })
    }
}

/// The init/continue-init reply body (spec §6:
/// "Init reply body: `rpc_gss_init_res{handle, gss_major, gss_minor,
/// seq_window, gss_token}`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GssInitRes {
    /// The handle the client must present on subsequent `DATA` calls.
    pub handle: Vec<u8>,
    /// The GSS-API major status of the last `gss_accept_sec_context` call.
    pub gss_major: u32,
    /// The mechanism-specific minor status.
    pub gss_minor: u32,
    /// The size of the server's replay-detection window (spec §4.6).
    pub seq_window: u32,
    /// The mechanism's output token, if any, to feed back into the
    /// client's next `step`.
    pub gss_token: Vec<u8>,
}

/// `GSS_S_COMPLETE`: the standard GSS-API major status meaning the context
/// is fully established.
pub const GSS_S_COMPLETE: u32 = 0;
/// `GSS_S_CONTINUE_NEEDED`: another leg of the handshake is required.
pub const GSS_S_CONTINUE_NEEDED: u32 = 1;

impl GssInitRes {
    /// Encode as a plain (unwrapped, unsigned) result body - the init
    /// exchange itself carries no RPCSEC_GSS body protection.
    pub fn encode(&self, sink: &mut impl XdrSink) -> Result<(), XdrError> {
        encode_var_bytes(sink, &self.handle)?;
        sink.put_word(self.gss_major)?;
        sink.put_word(self.gss_minor)?;
        sink.put_word(self.seq_window)?;
        encode_var_bytes(sink, &self.gss_token)
    }

    /// Decode from the result body of an init/continue-init reply.
    pub fn decode(src: &mut impl XdrSource) -> Result<Self, XdrError> {
        let handle = decode_var_bytes(src, MAX_HANDLE_LEN)?;
        let gss_major = src.get_word()?;
        let gss_minor = src.get_word()?;
        let seq_window = src.get_word()?;
        let gss_token = decode_var_bytes(src, MAX_TOKEN_LEN)?;
        Ok(Self {
            handle,
            gss_major,
            gss_minor,
            seq_window,
            gss_token,
        })
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut sink = MemorySink::new();
        self.encode(&mut sink).unwrap();
        sink.into_inner()
    }

    pub(crate) fn from_bytes(b: &[u8]) -> Result<Self, XdrError> {
        let mut src = MemorySource::new(b);
        Self::decode(&mut src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cred_round_trips() {
        let cred = GssCred {
            version: GSS_CRED_VERS_1,
            proc: GssProc::Data,
            seq_num: 42,
            service: GssService::Integrity,
            handle: vec![1, 2, 3, 4],
        };
        let opaque = cred.to_opaque_auth();
        assert_eq!(opaque.flavor, RPCSEC_GSS);
        let back = GssCred::from_bytes(&opaque.body).unwrap();
        assert_eq!(back, cred);
    }

    #[test]
    fn init_res_round_trips() {
        let res = GssInitRes {
            handle: vec![9, 9, 9],
            gss_major: GSS_S_COMPLETE,
            gss_minor: 0,
            seq_window: 32,
            gss_token: vec![1, 2, 3],
        };
        let bytes = res.to_bytes();
        let back = GssInitRes::from_bytes(&bytes).unwrap();
        assert_eq!(back, res);
    }
}
