//! The service registry (C8): a `(prog, vers) → handler` table, call
//! dispatch per spec §4.5, and protocol-error replies.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::auth::{AuthContext, ServerAuth};
use crate::errors::AuthStat;
use crate::rpc_message::{
    AcceptedStat, CallHeader, OpaqueAuth, RejectedReply, ReplyHeader, RPC_VERSION,
};

/// The call context a [`Handler`] is given (spec §3 "Call context"): the
/// decoded, auth-unwrapped arguments, the caller's validated identity, and
/// a one-shot reply channel. Exactly one of [`CallContext::send_reply`],
/// [`CallContext::garbage_args`], [`CallContext::procedure_unavailable`] or
/// [`CallContext::system_error`] may fire; dropping the context without
/// calling any of them is a silent no-op (spec §3, §9 open question on
/// deferred replies from a thread pool).
pub struct CallContext {
    prog: u32,
    vers: u32,
    proc: u32,
    args: Vec<u8>,
    auth: AuthContext,
    verf: OpaqueAuth,
    xid: u32,
    reply: Box<dyn FnOnce(u32, ReplyHeader, Option<Vec<u8>>) + Send>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("xid", &self.xid)
            .field("prog", &self.prog)
            .field("vers", &self.vers)
            .field("proc", &self.proc)
            .finish_non_exhaustive()
    }
}

impl CallContext {
    /// The transaction id of the call being answered.
    pub fn xid(&self) -> u32 {
        self.xid
    }

    /// The `(prog, vers, proc)` the call targeted.
    pub fn procedure(&self) -> (u32, u32, u32) {
        (self.prog, self.vers, self.proc)
    }

    /// The decoded (auth-unwrapped) argument bytes.
    pub fn args(&self) -> &[u8] {
        &self.args
    }

    /// The caller's validated identity and negotiated protection.
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Encode and send a `SUCCESS` reply carrying `result` as the body.
    pub fn send_reply(self, result: Vec<u8>) {
        let verf = self.verf.clone();
        (self.reply)(
            self.xid,
            ReplyHeader::Accepted {
                verf,
                stat: AcceptedStat::Success,
            },
            Some(result),
        );
    }

    /// Reply `GARBAGE_ARGS`: the handler could not decode its arguments
    /// (spec §4.5 step 5).
    pub fn garbage_args(self) {
        let verf = self.verf.clone();
        (self.reply)(
            self.xid,
            ReplyHeader::Accepted {
                verf,
                stat: AcceptedStat::GarbageArgs,
            },
            None,
        );
    }

    /// Reply `PROC_UNAVAIL`. Ordinarily the registry itself replies this
    /// way before the handler ever runs (spec §4.5 step 4); exposed for
    /// handlers that multiplex several sub-procedures of their own.
    pub fn procedure_unavailable(self) {
        let verf = self.verf.clone();
        (self.reply)(
            self.xid,
            ReplyHeader::Accepted {
                verf,
                stat: AcceptedStat::ProcedureUnavailable,
            },
            None,
        );
    }

    /// Reply `SYSTEM_ERR`: the handler hit an internal failure processing
    /// an otherwise well-formed call.
    pub fn system_error(self) {
        let verf = self.verf.clone();
        (self.reply)(
            self.xid,
            ReplyHeader::Accepted {
                verf,
                stat: AcceptedStat::SystemError,
            },
            None,
        );
    }
}

/// A registered RPC service handler.
pub trait Handler: Send + Sync {
    /// Handle one call. Responsible for eventually consuming `ctx` via one
    /// of its reply methods (possibly from another thread, for deferred
    /// dispatch).
    fn call(&self, ctx: CallContext);
}

impl<F> Handler for F
where
    F: Fn(CallContext) + Send + Sync,
{
    fn call(&self, ctx: CallContext) {
        (self)(ctx)
    }
}

/// One `(prog, vers)` registration (spec §3 "Service entry").
pub struct ServiceEntry {
    handler: Arc<dyn Handler>,
    procs: std::collections::HashSet<u32>,
}

impl ServiceEntry {
    /// Construct an entry serving `procs` via `handler`. Procedure `0`
    /// (`NULL`) is implicitly always available and need not be listed.
    pub fn new(handler: Arc<dyn Handler>, procs: impl IntoIterator<Item = u32>) -> Self {
        let mut procs: std::collections::HashSet<u32> = procs.into_iter().collect();
        procs.insert(0);
        Self { handler, procs }
    }
}

/// What the transport layer must do with a fully-formed reply: encode it
/// with [`crate::rpc_message::encode_reply`] (and the body, for accepted
/// successes) and send it back to whoever issued the call.
pub type ReplySink = dyn FnMut(u32, ReplyHeader, Option<Vec<u8>>) + Send;

/// The `(prog,vers) → handler` table plus the registered auth flavors
/// (spec component C8).
#[derive(Default)]
pub struct ServiceRegistry {
    services: Mutex<HashMap<u32, BTreeMap<u32, ServiceEntry>>>,
    auths: Mutex<HashMap<u32, Arc<dyn ServerAuth>>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry").finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry` to serve `(prog, vers)`, replacing any prior
    /// registration for the same pair.
    pub fn register(&self, prog: u32, vers: u32, entry: ServiceEntry) {
        self.services
            .lock()
            .unwrap()
            .entry(prog)
            .or_default()
            .insert(vers, entry);
    }

    /// Register an authentication flavor validator.
    pub fn register_auth(&self, auth: Arc<dyn ServerAuth>) {
        self.auths.lock().unwrap().insert(auth.flavor(), auth);
    }

    /// Handle one decoded `CALL` message (spec §4.5). `header_prefix` is the
    /// already-decoded `{xid, CALL, rpcvers, prog, vers, proc}` bytes
    /// re-encoded verbatim, needed by flavors (GSS) that MIC the header.
    /// `body` is the raw (not yet auth-unwrapped) argument bytes. `reply`
    /// is invoked exactly once with the fully-formed reply, unless the
    /// handler defers and drops its [`CallContext`] without replying.
    pub fn process(
        &self,
        header_prefix: &[u8],
        xid: u32,
        call: &CallHeader,
        body: &[u8],
        reply: impl FnOnce(u32, ReplyHeader, Option<Vec<u8>>) + Send + 'static,
    ) {
        if call.rpc_vers != RPC_VERSION {
            warn!(got = call.rpc_vers, want = RPC_VERSION, "rpc version mismatch");
            reply(
                xid,
                ReplyHeader::Denied(RejectedReply::RpcMismatch {
                    low: RPC_VERSION,
                    high: RPC_VERSION,
                }),
                None,
            );
            return;
        }

        // RPCSEC_GSS's INIT/CONTINUE_INIT credentials are a handshake, not
        // an ordinary call, and route around (prog, vers, proc) dispatch
        // entirely (spec §4.4.3).
        if let Some(auth) = self.auths.lock().unwrap().get(&call.cred.flavor).cloned() {
            if let Some(outcome) = auth.intercept_handshake(&call.cred, body) {
                match outcome {
                    Ok(result) => reply(
                        xid,
                        ReplyHeader::Accepted {
                            verf: OpaqueAuth::none(),
                            stat: AcceptedStat::Success,
                        },
                        Some(result),
                    ),
                    Err(stat) => reply(xid, ReplyHeader::Denied(RejectedReply::AuthError(stat)), None),
                }
                return;
            }
        }

        let (verf, auth_ctx, unwrapped_args) = match self.authenticate(header_prefix, call, body) {
            Ok(v) => v,
            Err(stat) => {
                reply(xid, ReplyHeader::Denied(RejectedReply::AuthError(stat)), None);
                return;
            }
        };

        let services = self.services.lock().unwrap();
        let Some(versions) = services.get(&call.prog) else {
            debug!(prog = call.prog, "program unavailable");
            reply(
                xid,
                ReplyHeader::Accepted {
                    verf,
                    stat: AcceptedStat::ProgramUnavailable,
                },
                None,
            );
            return;
        };

        let Some(entry) = versions.get(&call.vers) else {
            let low = *versions.keys().next().expect("non-empty by construction");
            let high = *versions.keys().next_back().expect("non-empty by construction");
            debug!(prog = call.prog, vers = call.vers, low, high, "version mismatch");
            reply(
                xid,
                ReplyHeader::Accepted {
                    verf,
                    stat: AcceptedStat::ProgramMismatch { low, high },
                },
                None,
            );
            return;
        };

        if !entry.procs.contains(&call.proc) {
            debug!(prog = call.prog, vers = call.vers, proc = call.proc, "procedure unavailable");
            reply(
                xid,
                ReplyHeader::Accepted {
                    verf,
                    stat: AcceptedStat::ProcedureUnavailable,
                },
                None,
            );
            return;
        }

        let handler = Arc::clone(&entry.handler);
        drop(services);

        let ctx = CallContext {
            prog: call.prog,
            vers: call.vers,
            proc: call.proc,
            args: unwrapped_args,
            auth: auth_ctx,
            verf,
            xid,
            reply: Box::new(reply),
        };
        handler.call(ctx);
    }

    fn authenticate(
        &self,
        header_prefix: &[u8],
        call: &CallHeader,
        body: &[u8],
    ) -> Result<(OpaqueAuth, AuthContext, Vec<u8>), AuthStat> {
        let auths = self.auths.lock().unwrap();
        let Some(auth) = auths.get(&call.cred.flavor) else {
            return Err(AuthStat::BadCredentials);
        };
        let validated = auth.validate(header_prefix, &call.cred, &call.verf, body)?;
        Ok((validated.verf, validated.ctx, validated.args))
    }
}
