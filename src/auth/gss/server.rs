//! Server-side RPCSEC_GSS (spec §3 "GSS server session", §4.4.3 "Server-side
//! GSS mirrors this", component C9).
//!
//! One [`GssServerAuth`] is shared across all connections a service
//! registers against; it owns the table of live contexts keyed by the
//! opaque handle the server hands back from `INIT`/`CONTINUE_INIT`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::auth::gss::mech::GssMechanism;
use crate::auth::gss::window::ReplayWindow;
use crate::auth::gss::{
    GssCred, GssInitRes, GssProc, GssService, GSS_CRED_VERS_1, GSS_S_COMPLETE, GSS_S_CONTINUE_NEEDED,
    RPCSEC_GSS,
};
use crate::auth::{AuthContext, ServerAuth, ServerValidated};
use crate::errors::AuthStat;
use crate::rpc_message::OpaqueAuth;
use crate::xdr::{decode_var_bytes, encode_var_bytes, MemorySink, MemorySource, XdrSink, XdrSource};

/// Per-context server state (spec §3 "GSS server session"): the accepted
/// mechanism context, its replay window, the negotiated service, and an
/// expiry the registry sweeps on (`client_lifetime`-bounded, spec §4.6).
pub struct GssServerSession {
    mech: Box<dyn GssMechanism>,
    window: ReplayWindow,
    service: GssService,
    expiry: Instant,
}

impl GssServerSession {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry
    }
}

/// A factory for fresh server-side mechanism contexts, one per
/// `INIT`/`CONTINUE_INIT` handshake (standing in for `gss_accept_sec_context`
/// against a real Kerberos acceptor credential).
pub type MechFactory = dyn Fn() -> Box<dyn GssMechanism> + Send + Sync;

/// Server-side RPCSEC_GSS validator (component C9): holds the handle → session
/// table and implements [`ServerAuth`], intercepting `INIT`/`CONTINUE_INIT`
/// handshake credentials before ordinary `(prog, vers, proc)` dispatch.
pub struct GssServerAuth {
    sessions: Mutex<HashMap<Vec<u8>, GssServerSession>>,
    new_mech: Box<MechFactory>,
    next_handle: AtomicU64,
    ctx_lifetime: Duration,
}

impl GssServerAuth {
    /// Construct a validator that mints contexts via `new_mech` and expires
    /// them `ctx_lifetime` after establishment.
    pub fn new(new_mech: Box<MechFactory>, ctx_lifetime: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            new_mech,
            next_handle: AtomicU64::new(1),
            ctx_lifetime,
        }
    }

    fn fresh_handle(&self) -> Vec<u8> {
        self.next_handle.fetch_add(1, Ordering::Relaxed).to_be_bytes().to_vec()
    }

    /// Remove every session whose expiry has passed. Intended to be polled
    /// periodically (bounded by `client_lifetime`, spec §4.6) by whatever
    /// drives the server's reactor loop.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "swept expired gss server sessions");
        }
    }

    /// Number of live (not yet swept) sessions. Exposed for tests and
    /// diagnostics.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn handle_init(&self, cred: &GssCred, token: &[u8]) -> Result<Vec<u8>, AuthStat> {
        let mut mech = (self.new_mech)();
        let step = mech.step(Some(token)).map_err(|_| AuthStat::Failed)?;

        let handle = self.fresh_handle();
        let seq_window = 32u32;
        let complete = step.complete;

        let res = GssInitRes {
            handle: handle.clone(),
            gss_major: if complete { GSS_S_COMPLETE } else { GSS_S_CONTINUE_NEEDED },
            gss_minor: 0,
            seq_window,
            gss_token: step.output_token.unwrap_or_default(),
        };

        self.sessions.lock().unwrap().insert(
            handle,
            GssServerSession {
                mech,
                window: ReplayWindow::new(),
                service: cred.service,
                expiry: Instant::now() + self.ctx_lifetime,
            },
        );

        let mut sink = MemorySink::new();
        res.encode(&mut sink).map_err(|_| AuthStat::Failed)?;
        Ok(sink.into_inner())
    }

    fn handle_continue_init(&self, cred: &GssCred, token: &[u8]) -> Result<Vec<u8>, AuthStat> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&cred.handle).ok_or(AuthStat::GssCtxProblem)?;

        let step = session.mech.step(Some(token)).map_err(|_| AuthStat::Failed)?;
        let complete = step.complete;

        let res = GssInitRes {
            handle: cred.handle.clone(),
            gss_major: if complete { GSS_S_COMPLETE } else { GSS_S_CONTINUE_NEEDED },
            gss_minor: 0,
            seq_window: 32,
            gss_token: step.output_token.unwrap_or_default(),
        };

        let mut sink = MemorySink::new();
        res.encode(&mut sink).map_err(|_| AuthStat::Failed)?;
        Ok(sink.into_inner())
    }

    fn verf_mic(mech: &dyn GssMechanism, seq_num: u32) -> Result<OpaqueAuth, AuthStat> {
        let mic = mech.get_mic(&seq_num.to_be_bytes()).map_err(|_| AuthStat::Failed)?;
        Ok(OpaqueAuth {
            flavor: RPCSEC_GSS,
            body: mic,
        })
    }
}

impl ServerAuth for GssServerAuth {
    fn flavor(&self) -> u32 {
        RPCSEC_GSS
    }

    fn intercept_handshake(&self, cred: &OpaqueAuth, body: &[u8]) -> Option<Result<Vec<u8>, AuthStat>> {
        if cred.flavor != RPCSEC_GSS {
            return None;
        }
        let parsed = match GssCred::from_bytes(&cred.body) {
            Ok(c) => c,
            Err(_) => return Some(Err(AuthStat::BadCredentials)),
        };
        match parsed.proc {
            GssProc::Init => Some(self.handle_init(&parsed, body)),
            GssProc::ContinueInit => Some(self.handle_continue_init(&parsed, body)),
            GssProc::Data | GssProc::Destroy => None,
        }
    }

    fn validate(
        &self,
        header_prefix: &[u8],
        cred: &OpaqueAuth,
        verf: &OpaqueAuth,
        body: &[u8],
    ) -> Result<ServerValidated, AuthStat> {
        let parsed = GssCred::from_bytes(&cred.body).map_err(|_| AuthStat::BadCredentials)?;
        if parsed.version != GSS_CRED_VERS_1 {
            return Err(AuthStat::BadCredentials);
        }
        if parsed.proc != GssProc::Data {
            // INIT/CONTINUE_INIT are routed via `intercept_handshake`; seeing
            // one here means the registry dispatched it as an ordinary call.
            return Err(AuthStat::BadCredentials);
        }

        let mut sessions = self.sessions.lock().unwrap();
        if sessions
            .get(&parsed.handle)
            .map(|s| s.is_expired(Instant::now()))
            .unwrap_or(false)
        {
            sessions.remove(&parsed.handle);
            return Err(AuthStat::GssCtxProblem);
        }
        let session = sessions.get_mut(&parsed.handle).ok_or(AuthStat::GssCredProblem)?;

        session
            .window
            .check_and_set(parsed.seq_num)
            .map_err(|rej| {
                warn!(seq = parsed.seq_num, ?rej, "gss sequence window rejected call");
                AuthStat::BadCredentials
            })?;

        let mut mic_input = header_prefix.to_vec();
        let mut cred_sink = MemorySink::new();
        cred.encode(&mut cred_sink).map_err(|_| AuthStat::BadCredentials)?;
        mic_input.extend_from_slice(&cred_sink.into_inner());
        if verf.flavor != RPCSEC_GSS {
            return Err(AuthStat::BadVerifier);
        }
        session
            .mech
            .verify_mic(&mic_input, &verf.body)
            .map_err(|_| AuthStat::BadVerifier)?;

        let args = match session.service {
            GssService::None => body.to_vec(),
            GssService::Integrity => {
                let mut src = MemorySource::new(body);
                let encapsulated =
                    decode_var_bytes(&mut src, crate::auth::gss::MAX_TOKEN_LEN).map_err(|_| AuthStat::BadCredentials)?;
                let mic = decode_var_bytes(&mut src, crate::auth::gss::MAX_TOKEN_LEN).map_err(|_| AuthStat::BadCredentials)?;
                session
                    .mech
                    .verify_mic(&encapsulated, &mic)
                    .map_err(|_| AuthStat::BadVerifier)?;
                let mut body_src = MemorySource::new(&encapsulated);
                let got_seq = body_src.get_word().map_err(|_| AuthStat::BadCredentials)?;
                if got_seq != parsed.seq_num {
                    return Err(AuthStat::BadCredentials);
                }
                encapsulated[4..].to_vec()
            }
            GssService::Privacy => {
                let mut src = MemorySource::new(body);
                let wrapped =
                    decode_var_bytes(&mut src, crate::auth::gss::MAX_TOKEN_LEN).map_err(|_| AuthStat::BadCredentials)?;
                let plain = session.mech.unwrap(&wrapped).map_err(|_| AuthStat::BadCredentials)?;
                let mut body_src = MemorySource::new(&plain);
                let got_seq = body_src.get_word().map_err(|_| AuthStat::BadCredentials)?;
                if got_seq != parsed.seq_num {
                    return Err(AuthStat::BadCredentials);
                }
                plain[4..].to_vec()
            }
        };

        let verf = Self::verf_mic(session.mech.as_ref(), parsed.seq_num).map_err(|_| AuthStat::Failed)?;

        Ok(ServerValidated {
            verf,
            ctx: AuthContext {
                flavor: RPCSEC_GSS,
                protection: Some(session.service.into()),
                ..Default::default()
            },
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::gss::mech::insecure_test_mechanism::InsecureTestMechanism;

    fn new_auth() -> GssServerAuth {
        GssServerAuth::new(Box::new(|| Box::new(InsecureTestMechanism::new(5))), Duration::from_secs(3600))
    }

    #[test]
    fn init_establishes_a_session_in_one_round_trip() {
        let auth = new_auth();
        let cred = GssCred {
            version: GSS_CRED_VERS_1,
            proc: GssProc::Init,
            seq_num: 0,
            service: GssService::Integrity,
            handle: Vec::new(),
        }
        .to_opaque_auth();

        let reply = auth.intercept_handshake(&cred, b"token").unwrap().unwrap();
        let res = GssInitRes::from_bytes(&reply).unwrap();
        assert_eq!(res.gss_major, GSS_S_COMPLETE);
        assert_eq!(auth.session_count(), 1);
    }

    #[test]
    fn data_call_round_trips_with_integrity() {
        let auth = new_auth();
        let init_cred = GssCred {
            version: GSS_CRED_VERS_1,
            proc: GssProc::Init,
            seq_num: 0,
            service: GssService::Integrity,
            handle: Vec::new(),
        }
        .to_opaque_auth();
        let reply = auth.intercept_handshake(&init_cred, b"token").unwrap().unwrap();
        let res = GssInitRes::from_bytes(&reply).unwrap();
        let handle = res.handle;

        let client_mech = InsecureTestMechanism::new(5);
        let seq = 1u32;
        let cred = GssCred {
            version: GSS_CRED_VERS_1,
            proc: GssProc::Data,
            seq_num: seq,
            service: GssService::Integrity,
            handle: handle.clone(),
        };
        let cred_opaque = cred.to_opaque_auth();

        let header_prefix = b"header-bytes";
        let mut mic_input = header_prefix.to_vec();
        let mut cred_sink = MemorySink::new();
        cred_opaque.encode(&mut cred_sink).unwrap();
        mic_input.extend_from_slice(&cred_sink.into_inner());
        let verf = OpaqueAuth {
            flavor: RPCSEC_GSS,
            body: client_mech.get_mic(&mic_input).unwrap(),
        };

        let mut encapsulated_sink = MemorySink::new();
        encapsulated_sink.put_word(seq).unwrap();
        encapsulated_sink.put_bytes(b"hello").unwrap();
        let encapsulated = encapsulated_sink.into_inner();
        let mic = client_mech.get_mic(&encapsulated).unwrap();
        let mut body_sink = MemorySink::new();
        encode_var_bytes(&mut body_sink, &encapsulated).unwrap();
        encode_var_bytes(&mut body_sink, &mic).unwrap();

        let validated = auth
            .validate(header_prefix, &cred_opaque, &verf, &body_sink.into_inner())
            .unwrap();
        assert_eq!(validated.args, b"hello");
    }

    #[test]
    fn unknown_handle_is_cred_problem() {
        let auth = new_auth();
        let cred = GssCred {
            version: GSS_CRED_VERS_1,
            proc: GssProc::Data,
            seq_num: 1,
            service: GssService::None,
            handle: vec![0xff; 4],
        }
        .to_opaque_auth();
        let err = auth
            .validate(b"", &cred, &OpaqueAuth::none(), b"")
            .unwrap_err();
        assert_eq!(err, AuthStat::GssCredProblem);
    }
}
