//! Error taxonomy shared by all servers. Every boundary error maps to one
//! of these kinds; on the wire they travel as negative errno-style codes
//! inside the reply payloads.

use core::fmt;

/// Errno values used as wire status codes. The numeric values are part of
/// the public protocol and must not change.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const ESRCH: i32 = 3;
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENODEV: i32 = 19;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOSYS: i32 = 38;
    pub const EPROTO: i32 = 71;
}

/// The taxonomy of everything that can go wrong at a server boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad path, bad size, missing payload.
    InvalidArgument,
    /// No such file, no such mount, no such symbol.
    NotFound,
    /// Mount target already in use, file exists with `O_EXCL`.
    Exists,
    /// Reserved for permission aware filesystems.
    Permission,
    /// Open flags vs stat mismatch.
    IsDirectory,
    NotDirectory,
    /// Heap, page table or request buffer allocation failure.
    OutOfMemory,
    /// Read or write through the storage driver failed.
    IoError,
    /// ELF validation, superblock magic, BPB signature, hash geometry.
    Malformed,
    /// Plug-in stub explicitly marked as not implemented.
    NotImplemented,
    /// Transient, caller may retry.
    Interrupted,
    TryAgain,
    /// Handle id unknown within the calling process.
    BadHandle,
    /// No handler registered for the request.
    NoHandler,
    /// Device not present or gone.
    NoDevice,
    /// Resource is currently active and cannot be torn down.
    InUse,
}

impl ErrorKind {
    /// Positive errno value for this kind. Replies put `-errno()` into
    /// their status field.
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => errno::EINVAL,
            Self::NotFound => errno::ENOENT,
            Self::Exists => errno::EEXIST,
            Self::Permission => errno::EACCES,
            Self::IsDirectory => errno::EISDIR,
            Self::NotDirectory => errno::ENOTDIR,
            Self::OutOfMemory => errno::ENOMEM,
            Self::IoError => errno::EIO,
            Self::Malformed => errno::EPROTO,
            Self::NotImplemented => errno::ENOSYS,
            Self::Interrupted => errno::EINTR,
            Self::TryAgain => errno::EAGAIN,
            Self::BadHandle => errno::EBADF,
            Self::NoHandler => errno::ESRCH,
            Self::NoDevice => errno::ENODEV,
            Self::InUse => errno::EBUSY,
        }
    }

    /// Negative wire status for this kind.
    pub const fn status(self) -> i32 {
        -self.errno()
    }

    /// Inverse of [`Self::errno`] for decoding reply status fields.
    /// Unknown codes collapse to [`ErrorKind::IoError`].
    pub fn from_errno(value: i32) -> Self {
        match value.abs() {
            errno::EINVAL => Self::InvalidArgument,
            errno::ENOENT => Self::NotFound,
            errno::EEXIST => Self::Exists,
            errno::EACCES => Self::Permission,
            errno::EISDIR => Self::IsDirectory,
            errno::ENOTDIR => Self::NotDirectory,
            errno::ENOMEM => Self::OutOfMemory,
            errno::EPROTO => Self::Malformed,
            errno::ENOSYS => Self::NotImplemented,
            errno::EINTR => Self::Interrupted,
            errno::EAGAIN => Self::TryAgain,
            errno::EBADF => Self::BadHandle,
            errno::ESRCH => Self::NoHandler,
            errno::ENODEV => Self::NoDevice,
            errno::EBUSY => Self::InUse,
            _ => Self::IoError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "invalid argument",
            Self::NotFound => "not found",
            Self::Exists => "already exists",
            Self::Permission => "permission denied",
            Self::IsDirectory => "is a directory",
            Self::NotDirectory => "not a directory",
            Self::OutOfMemory => "out of memory",
            Self::IoError => "i/o error",
            Self::Malformed => "malformed data",
            Self::NotImplemented => "not implemented",
            Self::Interrupted => "interrupted",
            Self::TryAgain => "try again",
            Self::BadHandle => "bad handle",
            Self::NoHandler => "no handler",
            Self::NoDevice => "no such device",
            Self::InUse => "in use",
        };
        f.write_str(name)
    }
}
