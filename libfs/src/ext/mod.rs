//! The ext2/3/4 reader.

pub mod blockgroup;
pub mod directory;
pub mod inode;
pub mod superblock;

use crate::cache::BlockCache;
use crate::device::BlockDevice;
use libember::error::ErrorKind;
use libember::proto::Dirent;
use libember::stat::{
    Stat,
    S_IFDIR,
    S_IFREG,
};
use alloc::vec::Vec;
use self::superblock::Superblock;

/// A mounted ext filesystem instance over one partition.
#[derive(Debug)]
pub struct ExtFilesystem<D: BlockDevice> {
    device: D,
    superblock: Superblock,
    cache: BlockCache,
}

impl<D: BlockDevice> ExtFilesystem<D> {
    /// Probes and mounts the filesystem at `partition_offset` bytes.
    pub fn mount(mut device: D, partition_offset: u64) -> Result<Self, ErrorKind> {
        let superblock = Superblock::read(&mut device, partition_offset)?;
        let cache = BlockCache::new(superblock.block_size(), partition_offset);
        log::debug!(
            "ext mounted: block size {}, {} inodes",
            superblock.block_size(),
            superblock.s_inodes_count
        );
        Ok(Self {
            device,
            superblock,
            cache,
        })
    }

    pub const fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Test access to the block cache ordering.
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    fn stat_of(&self, inode: &inode::Inode) -> Stat {
        let kind = if inode.is_directory() {
            S_IFDIR
        } else if inode.is_regular() {
            S_IFREG
        } else {
            0
        };
        Stat {
            st_ino: inode.inode_number as u64,
            st_mode: kind | (inode.i_mode & 0o7777) as u32,
            st_nlink: inode.i_links_count as u32,
            st_uid: inode.i_uid as u32,
            st_gid: inode.i_gid as u32,
            st_size: inode.i_size as i64,
            st_blksize: self.superblock.block_size(),
            st_blocks: inode.i_blocks as u64,
            st_atime: inode.i_atime as i64,
            st_mtime: inode.i_mtime as i64,
            st_ctime: inode.i_ctime as i64,
            ..Stat::default()
        }
    }

    /// Status of the object at `path`.
    pub fn stat(&mut self, path: &str) -> Result<Stat, ErrorKind> {
        let inode = directory::resolve(
            &mut self.device,
            &mut self.cache,
            &self.superblock,
            path,
        )?;
        Ok(self.stat_of(&inode))
    }

    /// Reads up to `length` bytes starting at `offset`; reads beyond the
    /// end of the file are clamped.
    pub fn read(&mut self, path: &str, offset: i64, length: u32) -> Result<Vec<u8>, ErrorKind> {
        if offset < 0 {
            return Err(ErrorKind::InvalidArgument);
        }
        let inode = directory::resolve(
            &mut self.device,
            &mut self.cache,
            &self.superblock,
            path,
        )?;
        if inode.is_directory() {
            return Err(ErrorKind::IsDirectory);
        }
        let size = inode.i_size as i64;
        if offset >= size {
            return Ok(Vec::new());
        }
        let length = core::cmp::min(length as i64, size - offset) as u32;
        if length == 0 {
            return Ok(Vec::new());
        }
        inode::read_to_vec(
            &mut self.device,
            &mut self.cache,
            &self.superblock,
            &inode,
            offset as u32,
            length,
        )
    }

    /// Lists a directory.
    pub fn getdents(&mut self, path: &str) -> Result<Vec<Dirent>, ErrorKind> {
        let inode = directory::resolve(
            &mut self.device,
            &mut self.cache,
            &self.superblock,
            path,
        )?;
        directory::dirents(&mut self.device, &mut self.cache, &self.superblock, &inode)
    }

    /// Superblock, block group and inode writes are not implemented.
    pub fn write(&mut self, _path: &str, _offset: i64, _data: &[u8]) -> Result<u32, ErrorKind> {
        Err(ErrorKind::NotImplemented)
    }

    /// Flushes the cache; read-only, so nothing is ever dirty.
    pub fn sync(&mut self) -> Result<(), ErrorKind> {
        self.cache.sync(&mut self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDisk;
    use crate::testimg;

    fn fixture() -> ExtFilesystem<MemoryDisk> {
        let image = testimg::ext2_image();
        ExtFilesystem::mount(MemoryDisk::new(image), 0).unwrap()
    }

    #[test]
    fn test_mount_validates_magic() {
        let mut image = testimg::ext2_image();
        image[1024 + 56] = 0;
        assert!(matches!(
            ExtFilesystem::mount(MemoryDisk::new(image), 0),
            Err(ErrorKind::Malformed)
        ));
    }

    #[test]
    fn test_stat_resolves_nested_path() {
        let mut fs = fixture();
        let stat = fs.stat("/etc/hosts").unwrap();
        assert!(stat.is_reg());
        assert_eq!(stat.st_size, testimg::HOSTS_CONTENT.len() as i64);
        let stat = fs.stat("/etc").unwrap();
        assert!(stat.is_dir());
        // trailing slashes are skipped
        let stat = fs.stat("/etc/").unwrap();
        assert!(stat.is_dir());
        assert_eq!(fs.stat("/etc/shadow"), Err(ErrorKind::NotFound));
    }

    #[test]
    fn test_read_whole_and_partial() {
        let mut fs = fixture();
        let all = fs
            .read("/etc/hosts", 0, testimg::HOSTS_CONTENT.len() as u32)
            .unwrap();
        assert_eq!(all, testimg::HOSTS_CONTENT);
        let first = fs.read("/etc/hosts", 0, 16).unwrap();
        assert_eq!(first, &testimg::HOSTS_CONTENT[..16]);
        let middle = fs.read("/etc/hosts", 3, 7).unwrap();
        assert_eq!(middle, &testimg::HOSTS_CONTENT[3..10]);
        // reads beyond the size clamp
        let tail = fs.read("/etc/hosts", 5, 10_000).unwrap();
        assert_eq!(tail, &testimg::HOSTS_CONTENT[5..]);
        assert!(fs.read("/etc/hosts", 100_000, 4).unwrap().is_empty());
    }

    #[test]
    fn test_read_spans_multiple_blocks() {
        let mut fs = fixture();
        let expected = testimg::big_file_content();
        let stat = fs.stat("/big").unwrap();
        assert_eq!(stat.st_size, expected.len() as i64);
        let all = fs.read("/big", 0, expected.len() as u32).unwrap();
        assert_eq!(all, expected);
        // an unaligned window crossing several blocks, including the
        // single-indirect region
        let window = fs.read("/big", 1000, 13_000).unwrap();
        assert_eq!(window, &expected[1000..14_000]);
    }

    #[test]
    fn test_sparse_file_reads_zeros() {
        let mut fs = fixture();
        let data = fs.read("/sparse", 0, 3072).unwrap();
        // first block has content, second is a hole, third has content
        assert_eq!(&data[..5], b"start");
        assert!(data[1024..2048].iter().all(|&byte| byte == 0));
        assert_eq!(&data[2048..2051], b"end");
    }

    #[test]
    fn test_getdents() {
        let mut fs = fixture();
        let mut names: std::vec::Vec<_> = fs
            .getdents("/etc")
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        names.sort();
        assert_eq!(names, [".", "..", "hosts"]);
        assert_eq!(fs.getdents("/etc/hosts"), Err(ErrorKind::NotDirectory));
    }

    #[test]
    fn test_zero_length_read_rejected_at_inode_layer() {
        let mut fs = fixture();
        let inode = directory::resolve(
            &mut fs.device,
            &mut fs.cache,
            &fs.superblock,
            "/etc/hosts",
        )
        .unwrap();
        let mut buffer = [0u8; 4];
        assert_eq!(
            inode::read_data(
                &mut fs.device,
                &mut fs.cache,
                &fs.superblock,
                &inode,
                0,
                0,
                &mut buffer
            ),
            Err(ErrorKind::InvalidArgument)
        );
    }

    /// Property: the cache list stays ordered by block number.
    #[test]
    fn test_cache_stays_ordered() {
        let mut fs = fixture();
        let _ = fs.read("/big", 9000, 2000).unwrap();
        let _ = fs.stat("/etc/hosts").unwrap();
        let numbers = fs.cache().block_numbers();
        let mut sorted = numbers.clone();
        sorted.sort_unstable();
        assert_eq!(numbers, sorted);
    }

    #[test]
    fn test_write_not_implemented() {
        let mut fs = fixture();
        assert_eq!(
            fs.write("/etc/hosts", 0, b"nope"),
            Err(ErrorKind::NotImplemented)
        );
    }
}
