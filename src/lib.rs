#![doc = include_str!("../README.md")]
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::todo,
    clippy::unimplemented,
    clippy::use_self,
    clippy::doc_markdown,
    clippy::print_stdout,
    missing_debug_implementations,
    unused_crate_dependencies,
    unreachable_pub,
    missing_docs
)]

mod errors;
pub use errors::{AuthStat, GssError, RecordError, RpcError as Error, XdrError};

pub mod xdr;

mod record;
pub use record::{RecordReader, RecordWriter};

mod message;
pub use message::{Buffer, Message, MessageCursor};

mod rpc_message;
pub use rpc_message::*;

mod timeout;
pub use timeout::{TimeoutId, TimeoutManager};

pub mod reactor;

mod address;
pub use address::{AddressInfo, Netid, Network};

pub mod auth;

pub mod service;

pub mod channel;

pub mod rendezvous;

// Re-export the `bytes` crate for users, to minimise version mismatches
// when handing zero-copy payloads across the API boundary.
pub use bytes;

// Unused crate lint workaround for dev dependencies used only in benches/
// doctest-adjacent setup, not referenced from any #[cfg(test)] module in src/.
#[cfg(test)]
use criterion as _;
#[cfg(test)]
use tracing_subscriber as _;
