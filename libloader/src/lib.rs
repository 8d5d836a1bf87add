//! The Ember dynamic loader.
//!
//! Userland side of program startup: maps ELF images and their
//! dependencies, resolves symbols through the SysV or GNU hash tables and
//! applies the ARM relocations, then drives init and fini code. The
//! actual process environment (file access, mmap, jumping into
//! constructors) sits behind the [`env::LoaderEnv`] seam.

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

pub mod elf;
pub mod env;
pub mod error;
pub mod handle;
pub mod loader;

#[cfg(test)]
pub(crate) mod testelf;

pub use error::{
    DlError,
    DlErrorKind,
};
pub use handle::ImageId;
pub use loader::Loader;
