//! The authentication pipeline (C7): client-side credential generation,
//! body protection and verifier validation, and server-side credential
//! validation, for the `AUTH_NONE`, `AUTH_SYS` and `RPCSEC_GSS` flavors
//! (spec §4.4).
//!
//! Unlike the teacher crate (which only ever decodes an already-framed
//! auth flavor), this pipeline also owns the call/reply *body*: for
//! `RPCSEC_GSS` the body itself is signed or encrypted, so the interface
//! operates on already-serialised argument/result byte buffers rather than
//! streaming through an `XdrSink` - matching how the original's
//! `_gssdetail::encodeBody`/`decodeBody` helpers buffer the body into a
//! `std::vector<uint8_t>` before wrapping it (see `gss.h`).

pub mod gss;
pub mod none;
pub mod sys;

use crate::errors::{AuthStat, RpcError};
use crate::rpc_message::OpaqueAuth;

/// The protection level a credential affords the call/reply body, per spec
/// §4.4.4 ("none" for `AUTH_NONE`/`AUTH_SYS`; negotiable for `RPCSEC_GSS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// No specific requirement; the flavor's default applies.
    Default,
    /// The body travels in the clear.
    None,
    /// The body is accompanied by a MIC token the peer can verify.
    Integrity,
    /// The body is encrypted (`gss_wrap` with confidentiality).
    Privacy,
}

/// What a successfully validated credential tells the service about its
/// caller (spec §3 `CallContext`).
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// The wire flavor that was validated.
    pub flavor: u32,
    /// The caller's Unix user id, if the flavor carries one.
    pub uid: Option<u32>,
    /// The caller's primary Unix group id, if the flavor carries one.
    pub gid: Option<u32>,
    /// Supplementary Unix group ids, if the flavor carries them.
    pub gids: Vec<u32>,
    /// The negotiated protection level, for flavors that have one.
    pub protection: Option<Protection>,
}

/// The cred/verf/body triple ready to go out on the wire for one call,
/// produced by [`ClientAuth::process_call`].
#[derive(Debug, Clone)]
pub struct EncodedCall {
    /// The credential to place in the call header.
    pub cred: OpaqueAuth,
    /// The verifier to place in the call header.
    pub verf: OpaqueAuth,
    /// The (possibly wrapped) argument body to follow the header.
    pub body: Vec<u8>,
}

/// A raw, unauthenticated-pipeline call/reply round trip, supplied by the
/// channel so a flavor (GSS) can drive its own handshake calls without
/// recursing through the full auth pipeline (spec §4.4.3: context
/// establishment "nests RPC calls, which themselves suspend").
///
/// Implementations send `body` as the argument of a proc-0 call carrying
/// `cred`/`verf` verbatim (no further wrapping) and return the reply's
/// verifier and result body.
pub type RawCall<'a> =
    dyn FnMut(&OpaqueAuth, &OpaqueAuth, &[u8]) -> Result<(OpaqueAuth, Vec<u8>), RpcError> + 'a;

/// Client-side half of the auth pipeline (spec §4.4, operations 1-4).
///
/// One implementation is held per [`crate::channel`] connection.
pub trait ClientAuth: Send {
    /// Establish (or, if `revalidate`, re-establish) whatever session state
    /// the flavor needs, returning an opaque monotonically-changing
    /// generation id. `AUTH_NONE`/`AUTH_SYS` always return `1`.
    fn validate_auth(&mut self, revalidate: bool, raw_call: &mut RawCall<'_>) -> Result<u32, RpcError>;

    /// Produce the cred/verf/body for one call. `header_prefix` is the
    /// already-encoded `{xid, CALL, rpcvers, prog, vers, proc}` bytes,
    /// needed by flavors (GSS) whose verifier MICs the header. `seq` is
    /// set to the session sequence number assigned to this call (GSS
    /// only; other flavors leave it untouched).
    ///
    /// Returns `Ok(None)` if `gen` is stale - the auth state changed
    /// since it was obtained and the caller must re-run
    /// [`ClientAuth::validate_auth`] and restart the call.
    #[allow(clippy::too_many_arguments)]
    fn process_call(
        &mut self,
        gen: u32,
        header_prefix: &[u8],
        proc: u32,
        args: &[u8],
        protection: Protection,
        seq: &mut u32,
    ) -> Result<Option<EncodedCall>, RpcError>;

    /// Validate an accepted reply's verifier and unwrap its result body.
    ///
    /// Returns `Ok(None)` for a recoverable mismatch (GSS sequence skew
    /// after a retransmit) - the caller reissues the call with a fresh xid
    /// and sequence number, per spec §4.4.3 / §7.
    fn process_reply(
        &mut self,
        seq: u32,
        gen: u32,
        verf: &OpaqueAuth,
        results: &[u8],
        protection: Protection,
    ) -> Result<Option<Vec<u8>>, RpcError>;

    /// Called when a call came back `MSG_DENIED/AUTH_ERROR`. Returning
    /// `true` means credentials were refreshed and the call should be
    /// retried exactly once; `false` means the error should be surfaced to
    /// the caller.
    fn auth_error(&mut self, gen: u32, stat: AuthStat) -> bool {
        let _ = gen;
        stat.is_recoverable()
    }
}

/// Outcome of a successful server-side credential validation.
pub struct ServerValidated {
    /// The verifier to place in the reply header.
    pub verf: OpaqueAuth,
    /// The caller's identity/protection, handed to the service handler.
    pub ctx: AuthContext,
    /// The (unwrapped) argument body, ready for the handler's decoder.
    pub args: Vec<u8>,
}

/// Server-side half of the auth pipeline: validates an incoming
/// credential/verifier/body, returning the reply verifier, caller context
/// and unwrapped arguments on success.
pub trait ServerAuth: Send + Sync {
    /// The wire flavor this validator handles.
    fn flavor(&self) -> u32;

    /// Validate `cred`/`verf` and unwrap `body` per the flavor's
    /// protection rules. `header_prefix` is the already-decoded
    /// `{xid, CALL, rpcvers, prog, vers, proc}` bytes, re-encoded for
    /// flavors (GSS) that MIC the header.
    fn validate(
        &self,
        header_prefix: &[u8],
        cred: &OpaqueAuth,
        verf: &OpaqueAuth,
        body: &[u8],
    ) -> Result<ServerValidated, AuthStat>;

    /// Special-cased handling for a credential that is itself a
    /// handshake/control message rather than a data call (RPCSEC_GSS's
    /// `INIT`/`CONTINUE_INIT` procedures, which the service registry must
    /// route around the ordinary `(prog, vers, proc)` dispatch - spec
    /// §4.4.3). Returns `None` for flavors / credentials with no such
    /// concept, in which case the registry proceeds to ordinary dispatch.
    fn intercept_handshake(&self, _cred: &OpaqueAuth, _body: &[u8]) -> Option<Result<Vec<u8>, AuthStat>> {
        None
    }
}
