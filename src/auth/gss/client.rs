//! Client-side RPCSEC_GSS (spec §4.4.3).

use tracing::{trace, warn};

use crate::auth::gss::mech::GssMechanism;
use crate::auth::gss::{GssCred, GssInitRes, GssProc, GssService, GSS_CRED_VERS_1, GSS_S_COMPLETE, RPCSEC_GSS};
use crate::auth::{AuthContext, ClientAuth, EncodedCall, Protection, RawCall};
use crate::errors::{AuthStat, GssError, RpcError};
use crate::rpc_message::OpaqueAuth;
use crate::xdr::{MemorySink, XdrSink};

/// Client-side GSS session state (spec §3 "GSS client session").
pub struct GssClientAuth<M: GssMechanism> {
    mech: M,
    service: GssService,
    proc_state: GssProc,
    seq_num: u32,
    seq_window: u32,
    handle: Vec<u8>,
    generation: u32,
}

impl<M: GssMechanism> GssClientAuth<M> {
    /// Construct a new (unestablished) GSS client session for `service`'s
    /// protection level, using `mech` to drive the mechanism handshake.
    pub fn new(mech: M, service: GssService) -> Self {
        Self {
            mech,
            service,
            proc_state: GssProc::Init,
            seq_num: 0,
            seq_window: 0,
            handle: Vec::new(),
            generation: 0,
        }
    }

    /// The negotiated body protection level.
    pub fn service(&self) -> GssService {
        self.service
    }

    fn body_from_mic(mic: Vec<u8>) -> OpaqueAuth {
        OpaqueAuth {
            flavor: RPCSEC_GSS,
            body: mic,
        }
    }

    fn encapsulate(seq: u32, args: &[u8]) -> Vec<u8> {
        let mut sink = MemorySink::new();
        sink.put_word(seq).unwrap();
        sink.put_bytes(args).unwrap();
        sink.into_inner()
    }
}

impl<M: GssMechanism> ClientAuth for GssClientAuth<M> {
    fn validate_auth(&mut self, revalidate: bool, raw_call: &mut RawCall<'_>) -> Result<u32, RpcError> {
        if revalidate {
            self.proc_state = GssProc::Init;
            self.handle.clear();
        } else if self.proc_state == GssProc::Data {
            return Ok(self.generation);
        }

        let mut input_token: Option<Vec<u8>> = None;
        loop {
            let step = self.mech.step(input_token.as_deref())?;
            let out_token = step.output_token.unwrap_or_default();

            let cred = GssCred {
                version: GSS_CRED_VERS_1,
                proc: self.proc_state,
                seq_num: 0,
                service: self.service,
                handle: self.handle.clone(),
            }
            .to_opaque_auth();

            let (reply_verf, reply_body) = raw_call(&cred, &OpaqueAuth::none(), &out_token)?;
            let init_res = GssInitRes::from_bytes(&reply_body)?;
            self.handle = init_res.handle.clone();

            if init_res.gss_major == GSS_S_COMPLETE {
                self.seq_window = init_res.seq_window;
                if reply_verf.flavor != RPCSEC_GSS {
                    return Err(RpcError::AuthError(AuthStat::BadVerifier));
                }
                self.mech
                    .verify_mic(&self.seq_window.to_be_bytes(), &reply_verf.body)?;
                self.proc_state = GssProc::Data;
                self.seq_num = 0;
                self.generation += 1;
                trace!(generation = self.generation, "gss context established");
                return Ok(self.generation);
            }

            self.proc_state = GssProc::ContinueInit;
            input_token = Some(init_res.gss_token);
        }
    }

    fn process_call(
        &mut self,
        gen: u32,
        header_prefix: &[u8],
        _proc: u32,
        args: &[u8],
        protection: Protection,
        seq: &mut u32,
    ) -> Result<Option<EncodedCall>, RpcError> {
        if gen != self.generation || self.proc_state != GssProc::Data {
            return Ok(None);
        }
        if let Protection::Integrity | Protection::Privacy = protection {
            let wanted: Protection = self.service.into();
            if wanted != protection {
                return Err(RpcError::UnsupportedProtection);
            }
        }

        self.seq_num += 1;
        *seq = self.seq_num;

        let cred = GssCred {
            version: GSS_CRED_VERS_1,
            proc: GssProc::Data,
            seq_num: self.seq_num,
            service: self.service,
            handle: self.handle.clone(),
        };
        let cred_opaque = cred.to_opaque_auth();

        let mut mic_input = header_prefix.to_vec();
        let mut cred_sink = MemorySink::new();
        cred_opaque.encode(&mut cred_sink)?;
        mic_input.extend_from_slice(&cred_sink.into_inner());
        let mic = self.mech.get_mic(&mic_input)?;
        let verf = Self::body_from_mic(mic);

        let body = match self.service {
            GssService::None => args.to_vec(),
            GssService::Integrity => {
                let encapsulated = Self::encapsulate(self.seq_num, args);
                let mic = self.mech.get_mic(&encapsulated)?;
                let mut sink = MemorySink::new();
                crate::xdr::encode_var_bytes(&mut sink, &encapsulated)?;
                crate::xdr::encode_var_bytes(&mut sink, &mic)?;
                sink.into_inner()
            }
            GssService::Privacy => {
                let encapsulated = Self::encapsulate(self.seq_num, args);
                let wrapped = self.mech.wrap(&encapsulated)?;
                let mut sink = MemorySink::new();
                crate::xdr::encode_var_bytes(&mut sink, &wrapped)?;
                sink.into_inner()
            }
        };

        Ok(Some(EncodedCall {
            cred: cred_opaque,
            verf,
            body,
        }))
    }

    fn process_reply(
        &mut self,
        seq: u32,
        gen: u32,
        verf: &OpaqueAuth,
        results: &[u8],
        _protection: Protection,
    ) -> Result<Option<Vec<u8>>, RpcError> {
        if gen != self.generation {
            return Ok(None);
        }
        if verf.flavor != RPCSEC_GSS {
            return Err(RpcError::AuthError(AuthStat::BadVerifier));
        }

        let plain = match self.service {
            GssService::None => results.to_vec(),
            GssService::Integrity => {
                let mut src = crate::xdr::MemorySource::new(results);
                let body = crate::xdr::decode_var_bytes(&mut src, crate::auth::gss::MAX_TOKEN_LEN)?;
                let mic = crate::xdr::decode_var_bytes(&mut src, crate::auth::gss::MAX_TOKEN_LEN)?;
                self.mech.verify_mic(&body, &mic)?;
                let mut body_src = crate::xdr::MemorySource::new(&body);
                let got_seq = body_src.get_word()?;
                if got_seq != seq {
                    warn!(expected = seq, got = got_seq, "gss sequence mismatch in reply, retrying");
                    return Ok(None);
                }
                body[4..].to_vec()
            }
            GssService::Privacy => {
                let mut src = crate::xdr::MemorySource::new(results);
                let wrapped = crate::xdr::decode_var_bytes(&mut src, crate::auth::gss::MAX_TOKEN_LEN)?;
                let body = self.mech.unwrap(&wrapped)?;
                let mut body_src = crate::xdr::MemorySource::new(&body);
                let got_seq = body_src.get_word()?;
                if got_seq != seq {
                    warn!(expected = seq, got = got_seq, "gss sequence mismatch in reply, retrying");
                    return Ok(None);
                }
                body[4..].to_vec()
            }
        };

        self.mech.verify_mic(&seq.to_be_bytes(), &verf.body)?;
        Ok(Some(plain))
    }

    fn auth_error(&mut self, gen: u32, stat: AuthStat) -> bool {
        if gen != self.generation {
            return true;
        }
        if self.mech.is_expired() {
            self.proc_state = GssProc::Init;
        }
        matches!(stat, AuthStat::GssCredProblem | AuthStat::GssCtxProblem)
    }
}

impl From<GssError> for RpcError {
    fn from(v: GssError) -> Self {
        RpcError::Gss(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::gss::mech::insecure_test_mechanism::InsecureTestMechanism;

    #[test]
    fn establishes_context_in_one_round_trip() {
        let mut auth = GssClientAuth::new(InsecureTestMechanism::new(7), GssService::Integrity);

        let window_mech = InsecureTestMechanism::new(7);
        let mut raw_call = |cred: &OpaqueAuth, _verf: &OpaqueAuth, _body: &[u8]| {
            let cred = GssCred::from_bytes(&cred.body).unwrap();
            assert_eq!(cred.proc, GssProc::Init);
            let seq_window = 32u32;
            let verf = OpaqueAuth {
                flavor: RPCSEC_GSS,
                body: window_mech.get_mic(&seq_window.to_be_bytes()).unwrap(),
            };
            let res = GssInitRes {
                handle: vec![1, 2, 3],
                gss_major: GSS_S_COMPLETE,
                gss_minor: 0,
                seq_window,
                gss_token: vec![],
            };
            Ok((verf, res.to_bytes()))
        };

        let gen = auth.validate_auth(false, &mut raw_call).unwrap();
        assert_eq!(gen, 1);
        assert_eq!(auth.proc_state, GssProc::Data);
    }

    #[test]
    fn call_and_reply_round_trip_with_integrity() {
        let mut auth = GssClientAuth::new(InsecureTestMechanism::new(3), GssService::Integrity);
        auth.proc_state = GssProc::Data;
        auth.generation = 1;
        auth.handle = vec![9];

        let mut seq = 0;
        let encoded = auth
            .process_call(1, b"header", 1, b"hello", Protection::Integrity, &mut seq)
            .unwrap()
            .unwrap();
        assert_eq!(seq, 1);

        // Build the server's reply the same way the client would verify it.
        let server_mech = InsecureTestMechanism::new(3);
        let encapsulated = GssClientAuth::<InsecureTestMechanism>::encapsulate(seq, b"hello");
        let mic = server_mech.get_mic(&encapsulated).unwrap();
        let mut sink = MemorySink::new();
        crate::xdr::encode_var_bytes(&mut sink, &encapsulated).unwrap();
        crate::xdr::encode_var_bytes(&mut sink, &mic).unwrap();
        let reply_body = sink.into_inner();
        let reply_verf = OpaqueAuth {
            flavor: RPCSEC_GSS,
            body: server_mech.get_mic(&seq.to_be_bytes()).unwrap(),
        };

        let got = auth
            .process_reply(seq, 1, &reply_verf, &reply_body, Protection::Integrity)
            .unwrap()
            .unwrap();
        assert_eq!(got, b"hello");
        let _ = encoded;
    }

    #[test]
    fn sequence_mismatch_is_recoverable() {
        let mut auth = GssClientAuth::new(InsecureTestMechanism::new(3), GssService::Integrity);
        auth.proc_state = GssProc::Data;
        auth.generation = 1;

        let server_mech = InsecureTestMechanism::new(3);
        let encapsulated = GssClientAuth::<InsecureTestMechanism>::encapsulate(999, b"hello");
        let mic = server_mech.get_mic(&encapsulated).unwrap();
        let mut sink = MemorySink::new();
        crate::xdr::encode_var_bytes(&mut sink, &encapsulated).unwrap();
        crate::xdr::encode_var_bytes(&mut sink, &mic).unwrap();
        let reply_body = sink.into_inner();
        let reply_verf = OpaqueAuth {
            flavor: RPCSEC_GSS,
            body: server_mech.get_mic(&1u32.to_be_bytes()).unwrap(),
        };

        let got = auth
            .process_reply(1, 1, &reply_verf, &reply_body, Protection::Integrity)
            .unwrap();
        assert!(got.is_none());
    }
}
