//! Filesystem plug-ins.
//!
//! The ext and FAT drivers plus the plumbing they share: the raw block
//! device seam, the per-filesystem block cache and the MBR partition
//! probing. `server` wraps the drivers into the RPC surface the VFS
//! expects from a filesystem process.

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

pub mod cache;
pub mod device;
pub mod ext;
pub mod fat;
pub mod mbr;
pub mod server;

#[cfg(test)]
pub(crate) mod testimg;
