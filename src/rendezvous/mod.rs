//! Typed clients for the rendezvous protocols (C10, spec §6): the v2
//! portmapper and the v3/v4 `rpcbind` service, both built on top of
//! [`crate::channel::Channel::call`] rather than re-implementing RPC
//! dispatch. Convenience wrappers beyond these raw proc calls (address
//! caching, multi-registry fan-out) are out of scope - see spec.md §1
//! Non-goals.

pub mod portmap;
pub mod rpcbind;

/// Well-known port the rendezvous services listen on (spec §6).
pub const RPCBIND_PORT: u16 = 111;
