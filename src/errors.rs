use thiserror::Error;

/// Errors raised by the XDR codec (C1).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum XdrError {
    /// A fixed-size write would not fit in the remaining buffer space and no
    /// further buffer is available.
    #[error("xdr buffer overflow")]
    Overflow,

    /// A variable-length array or opaque decoded a length prefix exceeding
    /// the caller-supplied bound.
    #[error("array length {got} exceeds bound {max}")]
    ArrayOverflow {
        /// The length prefix read from the wire.
        got: u32,
        /// The maximum permitted length.
        max: u32,
    },

    /// The read cursor was exhausted with no further region to `fill` from.
    #[error("end of xdr stream")]
    EndOfStream,

    /// The bytes read do not form a valid encoding of the expected type.
    #[error("malformed xdr data: {0}")]
    Malformed(String),
}

/// Errors raised by the record framer (C2).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RecordError {
    /// The stream ended before the last fragment of a record was seen.
    #[error("end of file mid-record")]
    EndOfFile,

    /// A record (possibly reassembled from several fragments) exceeded the
    /// channel's configured buffer size cap.
    #[error("record of {got} bytes exceeds the {max} byte limit")]
    RecordTooLarge {
        /// The configured limit.
        max: usize,
        /// The size that would have been required.
        got: usize,
    },
}

/// RFC 5531 `auth_stat` values, used both on the wire and as the payload of
/// [`RpcError::AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthStat {
    /// `AUTH_OK`
    Ok,
    /// `AUTH_BADCRED` - bad credentials (seal broken).
    BadCredentials,
    /// `AUTH_REJECTEDCRED` - client must begin new session.
    RejectedCredentials,
    /// `AUTH_BADVERF` - bad verifier (seal broken).
    BadVerifier,
    /// `AUTH_REJECTEDVERF` - verifier expired or replayed.
    RejectedVerifier,
    /// `AUTH_TOOWEAK` - rejected for security reasons.
    TooWeak,
    /// `AUTH_INVALIDRESP` - bogus response verifier.
    InvalidResponse,
    /// `AUTH_FAILED` - reason unknown.
    Failed,
    /// `RPCSEC_GSS_CREDPROBLEM` - no credentials for the user.
    GssCredProblem,
    /// `RPCSEC_GSS_CTXPROBLEM` - problem with the security context.
    GssCtxProblem,
    /// A status code not recognised by this crate.
    Unknown(u32),
}

impl AuthStat {
    /// Returns true for statuses the auth pipeline is permitted to retry
    /// once (after a credential/context refresh) per spec §7.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AuthStat::GssCredProblem | AuthStat::GssCtxProblem)
    }

    pub(crate) fn from_wire(v: u32) -> Self {
        match v {
            0 => AuthStat::Ok,
            1 => AuthStat::BadCredentials,
            2 => AuthStat::RejectedCredentials,
            3 => AuthStat::BadVerifier,
            4 => AuthStat::RejectedVerifier,
            5 => AuthStat::TooWeak,
            6 => AuthStat::InvalidResponse,
            7 => AuthStat::Failed,
            13 => AuthStat::GssCredProblem,
            14 => AuthStat::GssCtxProblem,
            v => AuthStat::Unknown(v),
        }
    }

    pub(crate) fn to_wire(self) -> u32 {
        match self {
            AuthStat::Ok => 0,
            AuthStat::BadCredentials => 1,
            AuthStat::RejectedCredentials => 2,
            AuthStat::BadVerifier => 3,
            AuthStat::RejectedVerifier => 4,
            AuthStat::TooWeak => 5,
            AuthStat::InvalidResponse => 6,
            AuthStat::Failed => 7,
            AuthStat::GssCredProblem => 13,
            AuthStat::GssCtxProblem => 14,
            AuthStat::Unknown(v) => v,
        }
    }
}

/// Errors raised by the GSS-API mechanism glue (§4.4.3, §4.6).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("gss failure: major=0x{major:08x} minor=0x{minor:08x} ({message})")]
pub struct GssError {
    /// The GSS-API major status code.
    pub major: u32,
    /// The mechanism-specific minor status code.
    pub minor: u32,
    /// A human readable status string, as produced by the mechanism's
    /// `gss_display_status`.
    pub message: String,
}

/// The top level error type surfaced to callers of [`crate::channel::Channel::call`]
/// and friends (§6 "Errors surfaced to callers").
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RpcError {
    /// Wire codec failure.
    #[error(transparent)]
    Xdr(#[from] XdrError),

    /// Record framing failure.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Underlying transport I/O failure.
    #[error("i/o error ({0:?}): {1}")]
    Io(std::io::ErrorKind, String),

    /// `MSG_ACCEPTED / PROG_UNAVAIL`.
    #[error("program {prog} is not served here")]
    ProgramUnavailable {
        /// The requested program number.
        prog: u32,
    },

    /// `MSG_ACCEPTED / PROG_MISMATCH`.
    #[error("program version mismatch: supported [{min}, {max}]")]
    VersionMismatch {
        /// Lowest version the server supports for this program.
        min: u32,
        /// Highest version the server supports for this program.
        max: u32,
    },

    /// `MSG_ACCEPTED / PROC_UNAVAIL`.
    #[error("procedure {proc} is not implemented")]
    ProcedureUnavailable {
        /// The requested procedure number.
        proc: u32,
    },

    /// `MSG_ACCEPTED / GARBAGE_ARGS`.
    #[error("arguments could not be decoded")]
    GarbageArgs,

    /// `MSG_ACCEPTED / SYSTEM_ERR`.
    #[error("server encountered a system error processing the call")]
    SystemError,

    /// `MSG_DENIED / RPC_MISMATCH`.
    #[error("rpc protocol mismatch: supported [{min}, {max}]")]
    ProtocolMismatch {
        /// Lowest RPC version supported.
        min: u32,
        /// Highest RPC version supported.
        max: u32,
    },

    /// `MSG_DENIED / AUTH_ERROR`, or a flavor-specific authentication
    /// failure that the pipeline decided not to retry.
    #[error("authentication failed: {0:?}")]
    AuthError(AuthStat),

    /// The call's deadline elapsed with no matching reply.
    #[error("call timed out")]
    TimeoutError,

    /// GSS-API mechanism failure.
    #[error(transparent)]
    Gss(#[from] GssError),

    /// The requested authentication flavor cannot honor the requested
    /// protection level (§4.4.4).
    #[error("unsupported protection level")]
    UnsupportedProtection,

    /// A catch-all for conditions not otherwise enumerated, carrying a
    /// descriptive message (`RpcError(text)` in spec §6).
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for RpcError {
    fn from(v: std::io::Error) -> Self {
        Self::Io(v.kind(), v.to_string())
    }
}

/// Internal transport-level signal distinguishing a fatal I/O failure from
/// one the channel should recover from by reconnecting and resending
/// (§4.3.5, §7 "Transport errors on a stream trigger reconnect + retransmit
/// one time").
#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Xdr(#[from] XdrError),

    #[error(transparent)]
    Record(#[from] RecordError),

    /// The transport was reconnected mid-operation; the caller must
    /// re-encode (sequence numbers may have been invalidated) and resend.
    #[error("message must be resent after reconnect")]
    ResendMessage,
}

impl From<TransportError> for RpcError {
    fn from(v: TransportError) -> Self {
        match v {
            TransportError::Io(e) => e.into(),
            TransportError::Xdr(e) => e.into(),
            TransportError::Record(e) => e.into(),
            TransportError::ResendMessage => {
                RpcError::Other("resend required but not retried".into())
            }
        }
    }
}
