//! File status structure carried in open, stat and mount replies.

use serde::{
    Deserialize,
    Serialize,
};

/// File type bits within [`Stat::st_mode`].
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFLNK: u32 = 0o120000;

/// Status information about a filesystem object. Plug-ins fill this from
/// their on-disk metadata; the VFS caches it per handle.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_mode: u32,
    pub st_nlink: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_size: i64,
    pub st_blksize: u32,
    pub st_blocks: u64,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_ctime: i64,
}

impl Stat {
    pub const fn is_dir(&self) -> bool {
        self.st_mode & S_IFMT == S_IFDIR
    }

    pub const fn is_reg(&self) -> bool {
        self.st_mode & S_IFMT == S_IFREG
    }

    pub const fn is_chr(&self) -> bool {
        self.st_mode & S_IFMT == S_IFCHR
    }

    pub const fn is_lnk(&self) -> bool {
        self.st_mode & S_IFMT == S_IFLNK
    }
}
