//! `AUTH_SYS` (a.k.a. `AUTH_UNIX`): the caller is identified by a Unix
//! `{uid, gid, gids}` triple with no cryptographic protection (RFC 1831
//! Appendix A, spec §4.4).

use crate::auth::{AuthContext, ClientAuth, EncodedCall, Protection, RawCall, ServerAuth, ServerValidated};
use crate::errors::{AuthStat, RpcError, XdrError};
use crate::rpc_message::{OpaqueAuth, AUTH_NONE, AUTH_SYS};
use crate::xdr::{
    decode_string, decode_var_array, encode_string, encode_var_array, MemorySink, MemorySource,
};

const MAX_MACHINE_NAME: u32 = 255;
const MAX_GIDS: u32 = 16;

/// The `AUTH_SYS` credential body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSysParams {
    /// An arbitrary id the client picks; conventionally the time the
    /// credential was created.
    pub stamp: u32,
    /// The caller's hostname.
    pub machine_name: String,
    /// The caller's Unix user id.
    pub uid: u32,
    /// The caller's primary Unix group id.
    pub gid: u32,
    /// Supplementary group ids, at most [`MAX_GIDS`].
    pub gids: Vec<u32>,
}

impl AuthSysParams {
    /// Encode this credential as an `opaque_auth` with flavor `AUTH_SYS`.
    pub fn to_opaque_auth(&self) -> OpaqueAuth {
        let mut sink = MemorySink::new();
        sink.put_word(self.stamp).unwrap();
        encode_string(&mut sink, &self.machine_name).unwrap();
        sink.put_word(self.uid).unwrap();
        sink.put_word(self.gid).unwrap();
        encode_var_array(&mut sink, &self.gids, |s, g| s.put_word(*g)).unwrap();
        OpaqueAuth {
            flavor: AUTH_SYS,
            body: sink.into_inner(),
        }
    }

    /// Decode the credential body of an `opaque_auth` with flavor
    /// `AUTH_SYS`.
    pub fn from_bytes(body: &[u8]) -> Result<Self, XdrError> {
        let mut src = MemorySource::new(body);
        let stamp = src.get_word()?;
        let machine_name = decode_string(&mut src, MAX_MACHINE_NAME)?;
        let uid = src.get_word()?;
        let gid = src.get_word()?;
        let gids = decode_var_array(&mut src, MAX_GIDS, |s| s.get_word())?;
        Ok(Self {
            stamp,
            machine_name,
            uid,
            gid,
            gids,
        })
    }
}

/// Client-side `AUTH_SYS`: presents a fixed credential on every call, with
/// no verifier. Carries no protection - `Integrity`/`Privacy` are rejected.
#[derive(Debug, Clone)]
pub struct SysAuth {
    params: AuthSysParams,
}

impl SysAuth {
    /// Construct a client-side `AUTH_SYS` credential source.
    pub fn new(params: AuthSysParams) -> Self {
        Self { params }
    }
}

impl ClientAuth for SysAuth {
    fn validate_auth(&mut self, _revalidate: bool, _raw_call: &mut RawCall<'_>) -> Result<u32, RpcError> {
        Ok(1)
    }

    fn process_call(
        &mut self,
        _gen: u32,
        _header_prefix: &[u8],
        _proc: u32,
        args: &[u8],
        protection: Protection,
        _seq: &mut u32,
    ) -> Result<Option<EncodedCall>, RpcError> {
        if matches!(protection, Protection::Integrity | Protection::Privacy) {
            return Err(RpcError::UnsupportedProtection);
        }
        Ok(Some(EncodedCall {
            cred: self.params.to_opaque_auth(),
            verf: OpaqueAuth::none(),
            body: args.to_vec(),
        }))
    }

    fn process_reply(
        &mut self,
        _seq: u32,
        _gen: u32,
        _verf: &OpaqueAuth,
        results: &[u8],
        _protection: Protection,
    ) -> Result<Option<Vec<u8>>, RpcError> {
        Ok(Some(results.to_vec()))
    }
}

/// Server-side `AUTH_SYS` validation: decodes the credential and reports
/// the caller's Unix identity, with no verifier semantics.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysServerAuth;

impl ServerAuth for SysServerAuth {
    fn flavor(&self) -> u32 {
        AUTH_SYS
    }

    fn validate(
        &self,
        _header_prefix: &[u8],
        cred: &OpaqueAuth,
        _verf: &OpaqueAuth,
        body: &[u8],
    ) -> Result<ServerValidated, AuthStat> {
        let params = AuthSysParams::from_bytes(&cred.body).map_err(|_| AuthStat::BadCredentials)?;
        Ok(ServerValidated {
            verf: OpaqueAuth {
                flavor: AUTH_NONE,
                body: Vec::new(),
            },
            ctx: AuthContext {
                flavor: AUTH_SYS,
                uid: Some(params.uid),
                gid: Some(params.gid),
                gids: params.gids,
                protection: None,
            },
            args: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuthSysParams {
        AuthSysParams {
            stamp: 7,
            machine_name: "client.example".into(),
            uid: 501,
            gid: 20,
            gids: vec![20, 61, 80],
        }
    }

    #[test]
    fn credential_round_trips() {
        let params = sample();
        let opaque = params.to_opaque_auth();
        assert_eq!(opaque.flavor, AUTH_SYS);
        let back = AuthSysParams::from_bytes(&opaque.body).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn server_extracts_caller_identity() {
        let opaque = sample().to_opaque_auth();
        let validated = SysServerAuth
            .validate(&[], &opaque, &OpaqueAuth::none(), b"args")
            .unwrap();
        assert_eq!(validated.verf.flavor, AUTH_NONE);
        assert_eq!(validated.ctx.uid, Some(501));
        assert_eq!(validated.ctx.gid, Some(20));
        assert_eq!(validated.ctx.gids, vec![20, 61, 80]);
        assert_eq!(validated.args, b"args");
    }
}
