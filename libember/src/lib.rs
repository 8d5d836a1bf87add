//! Ember runtime library. The generic part of the runtime system itself:
//! the RPC envelope and payload types spoken by every server, the error
//! taxonomy used at the message boundaries, and a handful of utilities
//! (sync primitives, bounded paths, id counters) that the servers share.

#![no_std]
#![deny(
    clippy::all,
    clippy::cargo,
    // clippy::nursery,
    // clippy::pedantic
)]
// now allow a few rules which are denied by the above statement
// --> they are ridiculous and not necessary
#![allow(
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::fallible_impl_from
)]
#![deny(missing_debug_implementations)]
#![allow(rustdoc::private_intra_doc_links)]

#[allow(unused)]
#[cfg_attr(test, macro_use)]
#[cfg(test)]
extern crate std;

#[allow(unused)]
#[macro_use]
extern crate alloc;

pub mod error;
pub mod flags;
pub mod path;
pub mod proto;
pub mod rpc;
pub mod rt;
pub mod service;
pub mod stat;
pub mod sync;
pub mod util;

// Serialization facade, so the servers don't depend on the concrete
// crates directly.
pub use postcard as ipc_postcard;
pub use serde as ipc_serde;

/// Process identifier as handed out by the kernel.
pub type Pid = u32;
