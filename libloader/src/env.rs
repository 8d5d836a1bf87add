//! The process environment seam of the loader.
//!
//! On target hardware these operations are the open/read/mmap syscalls of
//! the C runtime plus a jump into constructor code; the hosted build and
//! the tests provide a paged in-memory implementation.

use bitflags::bitflags;
use libember::error::ErrorKind;

bitflags! {
    /// Protection of a mapping, mirroring the ELF segment flag bits.
    pub struct Protection: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

impl Protection {
    /// Derives mapping protection from ELF `p_flags`.
    pub fn from_segment_flags(flags: u32) -> Self {
        let mut protection = Self::empty();
        if flags & crate::elf::PF_R != 0 {
            protection |= Self::READ;
        }
        if flags & crate::elf::PF_W != 0 {
            protection |= Self::WRITE;
        }
        if flags & crate::elf::PF_X != 0 {
            protection |= Self::EXEC;
        }
        protection
    }
}

/// File descriptor handed out by [`LoaderEnv::open`].
pub type FileId = u32;

/// Everything the loader needs from the process it runs in.
pub trait LoaderEnv {
    /// Opens a file read-only.
    fn open(&mut self, path: &str) -> Result<FileId, ErrorKind>;

    /// Reads at an absolute file offset; short reads are errors of the
    /// image, not of the environment.
    fn read_at(&mut self, file: FileId, offset: u32, buffer: &mut [u8]) -> Result<usize, ErrorKind>;

    fn close(&mut self, file: FileId);

    /// Maps `size` bytes of `file` from `offset`. With a `base` the
    /// mapping is fixed there; without one the environment picks a free
    /// spot (that is what relocation means).
    fn map_file(
        &mut self,
        base: Option<u32>,
        size: u32,
        protection: Protection,
        file: FileId,
        offset: u32,
    ) -> Result<u32, ErrorKind>;

    /// Maps zeroed anonymous memory.
    fn map_anonymous(
        &mut self,
        base: Option<u32>,
        size: u32,
        protection: Protection,
    ) -> Result<u32, ErrorKind>;

    fn unmap(&mut self, base: u32, size: u32);

    /// Reads image memory.
    fn read_mem(&self, addr: u32, buffer: &mut [u8]) -> Result<(), ErrorKind>;

    /// Writes image memory (relocation targets).
    fn write_mem(&mut self, addr: u32, data: &[u8]) -> Result<(), ErrorKind>;

    /// Transfers control to a constructor or destructor at `addr`.
    fn invoke(&mut self, addr: u32);

    /// Address of the lazy-resolve trampoline the PLT jumps through.
    fn lazy_resolver(&self) -> u32;
}

/// Convenience word accessors used all over the relocation code.
pub(crate) fn read_word<E: LoaderEnv>(env: &E, addr: u32) -> Result<u32, ErrorKind> {
    let mut raw = [0u8; 4];
    env.read_mem(addr, &mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

pub(crate) fn write_word<E: LoaderEnv>(env: &mut E, addr: u32, value: u32) -> Result<(), ErrorKind> {
    env.write_mem(addr, &value.to_le_bytes())
}
