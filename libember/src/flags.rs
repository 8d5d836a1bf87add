//! Open flags and seek modes as used on the wire.

use bitflags::bitflags;

bitflags! {
    /// Open flags understood by the VFS. Values match the wire encoding.
    pub struct OpenFlags: u32 {
        const O_RDONLY = 0o0;
        const O_WRONLY = 0o1;
        const O_RDWR = 0o2;
        const O_CREAT = 0o100;
        const O_EXCL = 0o200;
        const O_TRUNC = 0o1000;
        const O_APPEND = 0o2000;
        const O_DIRECTORY = 0o200000;
    }
}

impl OpenFlags {
    /// Whether the request asks for any kind of write access.
    pub fn wants_write(&self) -> bool {
        self.contains(Self::O_WRONLY) || self.contains(Self::O_RDWR)
    }
}

/// Seek anchor for `VFS_SEEK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SeekWhence {
    Set = 0,
    Current = 1,
    End = 2,
}

impl SeekWhence {
    pub fn from_val(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Set),
            1 => Some(Self::Current),
            2 => Some(Self::End),
            _ => None,
        }
    }

    pub const fn val(self) -> u32 {
        self as u32
    }
}
