//! The Ember virtual file system server.
//!
//! Keeps the per-process handle tables and the mount table, routes every
//! file operation to the filesystem process owning the longest matching
//! mount prefix, and parks suspended requests in the continuation table
//! until the owning plug-in answers.

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

pub mod continuation;
pub mod dev;
pub mod handle;
pub mod mount;
pub mod ramdisk;
pub mod server;

pub use server::VfsServer;

/// Path of the authentication device consulted during fork.
pub const AUTHENTICATION_DEVICE: &str = "/dev/authentication";

/// The VFS server's own mount point; unmounting it is always rejected.
pub const SELF_MOUNT: &str = "/vfs";
