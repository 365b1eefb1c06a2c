//! The v2 portmapper (`PMAP_PROG`, RFC 1833 §3): program/version to port
//! lookup, predating `rpcbind` (see [`crate::rendezvous::rpcbind`]).

use std::time::Instant;

use crate::auth::{ClientAuth, Protection};
use crate::channel::{Channel, Transport};
use crate::errors::RpcError;
use crate::xdr::{decode_bool, decode_var_bytes, encode_var_bytes, MemorySink, MemorySource, XdrSink, XdrSource};

/// `PMAP_PROG`.
pub const PROGRAM: u32 = 100000;
/// Portmap v2.
pub const VERSION: u32 = 2;

/// IP protocol numbers as carried in a [`Mapping`]'s `prot` field.
pub const IPPROTO_TCP: u32 = 6;
/// IP protocol numbers as carried in a [`Mapping`]'s `prot` field.
pub const IPPROTO_UDP: u32 = 17;

mod proc_ {
    pub const NULL: u32 = 0;
    pub const SET: u32 = 1;
    pub const UNSET: u32 = 2;
    pub const GETPORT: u32 = 3;
    pub const DUMP: u32 = 4;
    pub const CALLIT: u32 = 5;
}

/// A `{prog, vers, prot, port}` registration (spec §6 proc list "Portmap
/// v2").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// The registered program number.
    pub prog: u32,
    /// The registered program version.
    pub vers: u32,
    /// `IPPROTO_TCP` or `IPPROTO_UDP`.
    pub prot: u32,
    /// The port the program is reachable on.
    pub port: u32,
}

impl Mapping {
    fn encode(&self, sink: &mut impl XdrSink) -> Result<(), crate::errors::XdrError> {
        sink.put_word(self.prog)?;
        sink.put_word(self.vers)?;
        sink.put_word(self.prot)?;
        sink.put_word(self.port)
    }

    fn decode(src: &mut impl XdrSource) -> Result<Self, crate::errors::XdrError> {
        Ok(Self {
            prog: src.get_word()?,
            vers: src.get_word()?,
            prot: src.get_word()?,
            port: src.get_word()?,
        })
    }
}

/// A client for `PMAP_PROG`/v2, issuing calls through an existing
/// authenticated [`Channel`].
pub struct PortmapClient<'a, T: Transport, A: ClientAuth> {
    channel: &'a Channel<T, A>,
}

impl<T: Transport, A: ClientAuth> std::fmt::Debug for PortmapClient<'_, T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortmapClient").finish_non_exhaustive()
    }
}

impl<'a, T: Transport, A: ClientAuth> PortmapClient<'a, T, A> {
    /// Wrap `channel` for portmap calls.
    pub fn new(channel: &'a Channel<T, A>) -> Self {
        Self { channel }
    }

    fn call(&self, proc: u32, body: Vec<u8>, deadline: Instant) -> Result<Vec<u8>, RpcError> {
        self.channel
            .call(PROGRAM, VERSION, proc, &body, Protection::Default, deadline)
    }

    /// `PMAPPROC_NULL`: a connectivity check.
    pub fn null(&self, deadline: Instant) -> Result<(), RpcError> {
        self.call(proc_::NULL, Vec::new(), deadline)?;
        Ok(())
    }

    /// `PMAPPROC_SET`: register a mapping. Returns whether the registration
    /// succeeded (a conflicting existing entry yields `false`, not an
    /// error).
    pub fn set(&self, mapping: Mapping, deadline: Instant) -> Result<bool, RpcError> {
        let mut sink = MemorySink::new();
        mapping.encode(&mut sink)?;
        let reply = self.call(proc_::SET, sink.into_inner(), deadline)?;
        Ok(decode_bool(&mut MemorySource::new(&reply))?)
    }

    /// `PMAPPROC_UNSET`: remove a mapping (`prot`/`port` are ignored by the
    /// server; only `prog`/`vers` are matched).
    pub fn unset(&self, prog: u32, vers: u32, deadline: Instant) -> Result<bool, RpcError> {
        let mut sink = MemorySink::new();
        Mapping {
            prog,
            vers,
            prot: 0,
            port: 0,
        }
        .encode(&mut sink)?;
        let reply = self.call(proc_::UNSET, sink.into_inner(), deadline)?;
        Ok(decode_bool(&mut MemorySource::new(&reply))?)
    }

    /// `PMAPPROC_GETPORT`: resolve a program/version/protocol to a port, or
    /// `0` if unregistered.
    pub fn getport(&self, prog: u32, vers: u32, prot: u32, deadline: Instant) -> Result<u32, RpcError> {
        let mut sink = MemorySink::new();
        Mapping {
            prog,
            vers,
            prot,
            port: 0,
        }
        .encode(&mut sink)?;
        let reply = self.call(proc_::GETPORT, sink.into_inner(), deadline)?;
        Ok(MemorySource::new(&reply).get_word()?)
    }

    /// `PMAPPROC_DUMP`: list every currently registered mapping.
    pub fn dump(&self, deadline: Instant) -> Result<Vec<Mapping>, RpcError> {
        let reply = self.call(proc_::DUMP, Vec::new(), deadline)?;
        let mut src = MemorySource::new(&reply);
        let mut out = Vec::new();
        while decode_bool(&mut src)? {
            out.push(Mapping::decode(&mut src)?);
        }
        Ok(out)
    }

    /// `PMAPPROC_CALLIT`: forward `args` as a UDP broadcast call to `prog`,
    /// returning the port the reply came from and the raw result bytes.
    pub fn callit(&self, prog: u32, vers: u32, proc: u32, args: &[u8], deadline: Instant) -> Result<(u32, Vec<u8>), RpcError> {
        let mut sink = MemorySink::new();
        sink.put_word(prog)?;
        sink.put_word(vers)?;
        sink.put_word(proc)?;
        encode_var_bytes(&mut sink, args)?;
        let reply = self.call(proc_::CALLIT, sink.into_inner(), deadline)?;
        let mut src = MemorySource::new(&reply);
        let port = src.get_word()?;
        let results = decode_var_bytes(&mut src, u32::MAX)?;
        Ok((port, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_round_trips_through_xdr() {
        let mapping = Mapping {
            prog: 100003,
            vers: 3,
            prot: IPPROTO_TCP,
            port: 2049,
        };
        let mut sink = MemorySink::new();
        mapping.encode(&mut sink).unwrap();
        let bytes = sink.into_inner();
        let decoded = Mapping::decode(&mut MemorySource::new(&bytes)).unwrap();
        assert_eq!(decoded, mapping);
    }
}
