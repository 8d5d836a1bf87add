//! Cinder kernel core.
//!
//! The memory management heart of the kernel: the physical frame
//! allocator, the LPAE long-descriptor paging code with its temporary
//! mapping window, the boot-time block mapping and the kernel heap that
//! every kernel-side allocation goes through.

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

pub mod mm;
