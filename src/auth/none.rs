//! `AUTH_NONE`: no credentials, no verifier, no protection (spec §4.4,
//! the baseline flavor used by the echo scenarios in spec §8).

use crate::auth::{AuthContext, ClientAuth, Protection, RawCall, ServerAuth, ServerValidated};
use crate::errors::{AuthStat, RpcError};
use crate::rpc_message::{OpaqueAuth, AUTH_NONE};

/// Client-side `AUTH_NONE`: always hands back `{AUTH_NONE, empty}` for both
/// credential and verifier, and passes the argument body through
/// unmodified.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneAuth;

impl ClientAuth for NoneAuth {
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
    ) -> Result<Option<crate::auth::EncodedCall>, RpcError> {
        if matches!(protection, Protection::Integrity | Protection::Privacy) {
            return Err(RpcError::UnsupportedProtection);
        }
        Ok(Some(crate::auth::EncodedCall {
            cred: OpaqueAuth::none(),
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

/// Server-side `AUTH_NONE`: accepts any call, granting no identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneServerAuth;

impl ServerAuth for NoneServerAuth {
    fn flavor(&self) -> u32 {
        AUTH_NONE
    }

    fn validate(
        &self,
        _header_prefix: &[u8],
        _cred: &OpaqueAuth,
        _verf: &OpaqueAuth,
        body: &[u8],
    ) -> Result<ServerValidated, AuthStat> {
        Ok(ServerValidated {
            verf: OpaqueAuth::none(),
            ctx: AuthContext {
                flavor: AUTH_NONE,
                ..Default::default()
            },
            args: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_always_presents_empty_credential() {
        let mut auth = NoneAuth;
        let gen = auth.validate_auth(false, &mut |_, _, _| unreachable!()).unwrap();
        let encoded = auth
            .process_call(gen, &[], 1, b"args", Protection::None, &mut 0)
            .unwrap()
            .unwrap();
        assert_eq!(encoded.cred, OpaqueAuth::none());
        assert_eq!(encoded.verf, OpaqueAuth::none());
        assert_eq!(encoded.body, b"args");
    }

    #[test]
    fn server_grants_no_identity() {
        let validated = NoneServerAuth
            .validate(&[], &OpaqueAuth::none(), &OpaqueAuth::none(), b"args")
            .unwrap();
        assert_eq!(validated.ctx.uid, None);
        assert_eq!(validated.ctx.flavor, AUTH_NONE);
        assert_eq!(validated.args, b"args");
    }

    #[test]
    fn integrity_is_rejected() {
        let mut auth = NoneAuth;
        let err = auth
            .process_call(1, &[], 1, b"", Protection::Integrity, &mut 0)
            .unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedProtection));
    }
}
