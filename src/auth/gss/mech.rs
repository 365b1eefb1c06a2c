//! The GSS-API mechanism boundary.
//!
//! The source binds directly to a system `gssapi.h` (`gss_init_sec_context`,
//! `gss_accept_sec_context`, `gss_get_mic`, `gss_verify_mic`, `gss_wrap`,
//! `gss_unwrap` - see `rpc++/gss.h`). This crate does not vendor a Kerberos
//! binding: the sequence-window replay discipline and the RPCSEC_GSS wire
//! protocol (the parts spec §1 calls out as "core") are mechanism-agnostic,
//! so they are expressed against the [`GssMechanism`] trait instead. A
//! production deployment plugs in a real mechanism (e.g. a `libgssapi`
//! binding to MIT/Heimdal Kerberos) that implements this trait; see
//! `DESIGN.md` for the reasoning.

use crate::errors::GssError;

/// Result of one step of a (client init or server accept) security context
/// negotiation.
#[derive(Debug, Clone, Default)]
pub struct GssStep {
    /// The token to send to the peer, if the mechanism produced one.
    pub output_token: Option<Vec<u8>>,
    /// True once the context is fully established (GSS major status
    /// `GSS_S_COMPLETE`); false means another round trip is needed
    /// (`GSS_S_CONTINUE_NEEDED`).
    pub complete: bool,
}

/// A GSS-API security mechanism, abstracted to the operations the
/// RPCSEC_GSS pipeline needs (spec §4.4.3, §4.6).
///
/// The same trait serves both the client's `gss_init_sec_context` loop and
/// the server's `gss_accept_sec_context` loop: from the pipeline's
/// perspective both are "feed an input token (if any), get an output token
/// and a completion flag".
pub trait GssMechanism: Send {
    /// Advance the context negotiation by one round trip.
    fn step(&mut self, input_token: Option<&[u8]>) -> Result<GssStep, GssError>;

    /// True once [`GssMechanism::step`] has reported completion.
    fn is_established(&self) -> bool;

    /// Produce a MIC (Message Integrity Code) over `msg` using the
    /// established context.
    fn get_mic(&self, msg: &[u8]) -> Result<Vec<u8>, GssError>;

    /// Verify that `mic` is a valid MIC over `msg` under the established
    /// context.
    fn verify_mic(&self, msg: &[u8], mic: &[u8]) -> Result<(), GssError>;

    /// Encrypt and integrity-protect `msg` (`gss_wrap` with
    /// `conf_req_flag=true`).
    fn wrap(&self, msg: &[u8]) -> Result<Vec<u8>, GssError>;

    /// Reverse of [`GssMechanism::wrap`].
    fn unwrap(&self, token: &[u8]) -> Result<Vec<u8>, GssError>;

    /// True if the context has expired and must be destroyed and
    /// re-established (`GSS_S_CONTEXT_EXPIRED`, spec §4.4.3).
    fn is_expired(&self) -> bool {
        false
    }
}

/// A software-only mechanism used by this crate's own test suite and
/// available to integration tests that need to exercise the RPCSEC_GSS
/// wire protocol without a Kerberos KDC (the source's equivalent test
/// scaffolding, `gss_test.cpp`, forks a real `krb5kdc`; this crate cannot).
///
/// It performs no real cryptography - `get_mic` is a truncated FNV-1a hash
/// and `wrap` is a fixed XOR stream - and establishes its context after a
/// single round trip. **Never use this outside of tests.**
pub mod insecure_test_mechanism {
    use super::*;

    /// A deterministic, non-cryptographic stand-in for a real GSS
    /// mechanism, for tests only.
    #[derive(Debug, Clone)]
    pub struct InsecureTestMechanism {
        established: bool,
        key: u8,
    }

    impl InsecureTestMechanism {
        /// Construct a mechanism keyed by a shared byte (both peers must
        /// use the same key for `get_mic`/`verify_mic` and `wrap`/`unwrap`
        /// to agree - standing in for a real shared security context).
        pub fn new(key: u8) -> Self {
            Self {
                established: false,
                key,
            }
        }

        fn fnv1a(&self, msg: &[u8]) -> u32 {
            let mut hash: u32 = 0x811c_9dc5;
            for &b in msg {
                hash ^= (b ^ self.key) as u32;
                hash = hash.wrapping_mul(0x0100_0193);
            }
            hash
        }
    }

    impl GssMechanism for InsecureTestMechanism {
        fn step(&mut self, input_token: Option<&[u8]>) -> Result<GssStep, GssError> {
            self.established = true;
            Ok(GssStep {
                output_token: Some(input_token.map(|t| t.to_vec()).unwrap_or_else(|| b"token".to_vec())),
                complete: true,
            })
        }

        fn is_established(&self) -> bool {
            self.established
        }

        fn get_mic(&self, msg: &[u8]) -> Result<Vec<u8>, GssError> {
            Ok(self.fnv1a(msg).to_be_bytes().to_vec())
        }

        fn verify_mic(&self, msg: &[u8], mic: &[u8]) -> Result<(), GssError> {
            if mic == self.fnv1a(msg).to_be_bytes() {
                Ok(())
            } else {
                Err(GssError {
                    major: 0x0008_0000, // GSS_S_BAD_SIG
                    minor: 0,
                    message: "bad mic".into(),
                })
            }
        }

        fn wrap(&self, msg: &[u8]) -> Result<Vec<u8>, GssError> {
            Ok(msg.iter().map(|b| b ^ self.key).collect())
        }

        fn unwrap(&self, token: &[u8]) -> Result<Vec<u8>, GssError> {
            Ok(token.iter().map(|b| b ^ self.key).collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn mic_round_trips() {
            let m = InsecureTestMechanism::new(0x42);
            let mic = m.get_mic(b"hello").unwrap();
            assert!(m.verify_mic(b"hello", &mic).is_ok());
            assert!(m.verify_mic(b"world", &mic).is_err());
        }

        #[test]
        fn wrap_round_trips() {
            let m = InsecureTestMechanism::new(0x99);
            let wrapped = m.wrap(b"secret payload").unwrap();
            assert_ne!(wrapped, b"secret payload");
            assert_eq!(m.unwrap(&wrapped).unwrap(), b"secret payload");
        }
    }
}
