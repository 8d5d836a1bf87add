//! The boot ramdisk, a TAR archive served as a read-only pseudo
//! filesystem by the VFS itself.

use libember::error::ErrorKind;
use libember::proto::Dirent;
use libember::stat::{
    Stat,
    S_IFDIR,
    S_IFREG,
};
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use tar_no_std::TarArchive;

/// Archive backed pseudo filesystem.
pub struct Ramdisk {
    archive: TarArchive,
}

impl core::fmt::Debug for Ramdisk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ramdisk")
            .field("entries", &self.archive.entries().count())
            .finish()
    }
}

/// Normalizes a path inside the ramdisk: no leading slash, no `./`.
fn normalize(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.strip_prefix("./").unwrap_or(path)
}

impl Ramdisk {
    pub fn new(data: Vec<u8>) -> Self {
        let archive = TarArchive::from(data.into_boxed_slice());
        log::debug!(
            "ramdisk with {} entries attached",
            archive.entries().count()
        );
        Self { archive }
    }

    /// File lookup by archive-relative path.
    fn entry_data(&self, path: &str) -> Option<(Vec<u8>, usize)> {
        let wanted = normalize(path);
        for entry in self.archive.entries() {
            let name = entry.filename().as_str().unwrap_or_default().to_string();
            if normalize(&name) == wanted {
                return Some((entry.data().to_vec(), entry.size()));
            }
        }
        None
    }

    /// True when entries exist below `path`.
    fn is_directory(&self, path: &str) -> bool {
        let wanted = normalize(path);
        if wanted.is_empty() {
            return true;
        }
        let prefix = format!("{wanted}/");
        self.archive.entries().any(|entry| {
            let name = entry.filename().as_str().unwrap_or_default().to_string();
            normalize(&name).starts_with(prefix.as_str())
        })
    }

    /// Status of a file or directory in the archive.
    pub fn stat(&self, path: &str) -> Result<Stat, ErrorKind> {
        if let Some((_, size)) = self.entry_data(path) {
            return Ok(Stat {
                st_mode: S_IFREG | 0o444,
                st_size: size as i64,
                ..Stat::default()
            });
        }
        if self.is_directory(path) {
            return Ok(Stat {
                st_mode: S_IFDIR | 0o555,
                ..Stat::default()
            });
        }
        Err(ErrorKind::NotFound)
    }

    /// Reads `length` bytes from `offset` of a file.
    pub fn read(&self, path: &str, offset: i64, length: u32) -> Result<Vec<u8>, ErrorKind> {
        let (data, size) = self.entry_data(path).ok_or(ErrorKind::NotFound)?;
        if offset < 0 {
            return Err(ErrorKind::InvalidArgument);
        }
        let start = core::cmp::min(offset as usize, size);
        let end = core::cmp::min(start + length as usize, size);
        Ok(data[start..end].to_vec())
    }

    /// Lists the direct children of a directory.
    pub fn getdents(&self, path: &str) -> Result<Vec<Dirent>, ErrorKind> {
        if !self.is_directory(path) {
            return Err(ErrorKind::NotDirectory);
        }
        let wanted = normalize(path);
        let prefix = if wanted.is_empty() {
            String::new()
        } else {
            format!("{wanted}/")
        };
        let mut seen = BTreeSet::new();
        let mut entries = Vec::new();
        for entry in self.archive.entries() {
            let name = entry.filename().as_str().unwrap_or_default().to_string();
            let name = normalize(&name);
            let Some(rest) = name.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let (first, is_dir) = match rest.split_once('/') {
                Some((first, _)) => (first, true),
                None => (rest, false),
            };
            if seen.insert(String::from(first)) {
                entries.push(Dirent {
                    inode: 0,
                    kind: if is_dir { 4 } else { 8 },
                    name: String::from(first),
                });
            }
        }
        Ok(entries)
    }
}

/// Builds a minimal ustar archive for the tests.
#[cfg(test)]
pub(crate) fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut archive = Vec::new();
    for (name, data) in files {
        let mut header = [0u8; 512];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[100..107].copy_from_slice(b"0000644");
        header[108..115].copy_from_slice(b"0000000");
        header[116..123].copy_from_slice(b"0000000");
        let size = format!("{:011o}", data.len());
        header[124..135].copy_from_slice(size.as_bytes());
        header[136..147].copy_from_slice(b"00000000000");
        header[156] = b'0';
        header[257..262].copy_from_slice(b"ustar");
        header[263..265].copy_from_slice(b"00");
        // checksum over the header with the checksum field blanked
        header[148..156].copy_from_slice(b"        ");
        let sum: u32 = header.iter().map(|&byte| byte as u32).sum();
        let checksum = format!("{sum:06o}\0 ");
        header[148..156].copy_from_slice(checksum.as_bytes());
        archive.extend_from_slice(&header);
        archive.extend_from_slice(data);
        // pad content to whole blocks
        let pad = (512 - data.len() % 512) % 512;
        archive.extend(core::iter::repeat(0).take(pad));
    }
    // two terminating zero blocks
    archive.extend(core::iter::repeat(0).take(1024));
    archive
}
