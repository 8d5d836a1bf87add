//! The ext superblock, located 1024 bytes into the partition.

use crate::device::BlockDevice;
use libember::error::ErrorKind;

/// Superblock magic.
pub const EXT_SUPER_MAGIC: u16 = 0xef53;

/// Superblock size on disk.
pub const SUPERBLOCK_SIZE: usize = 1024;

/// Byte offset of the superblock inside the partition.
pub const SUPERBLOCK_OFFSET: u64 = 1024;

/// Root directory inode number.
pub const EXT_ROOT_INO: u32 = 2;

/// The fields of the superblock this reader cares about.
#[derive(Debug, Clone, Copy, Default)]
pub struct Superblock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_blocks_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_magic: u16,
    pub s_rev_level: u32,
    pub s_inode_size: u16,
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

impl Superblock {
    pub fn parse(bytes: &[u8; SUPERBLOCK_SIZE]) -> Self {
        Self {
            s_inodes_count: read_u32(bytes, 0),
            s_blocks_count: read_u32(bytes, 4),
            s_first_data_block: read_u32(bytes, 20),
            s_log_block_size: read_u32(bytes, 24),
            s_blocks_per_group: read_u32(bytes, 32),
            s_inodes_per_group: read_u32(bytes, 40),
            s_magic: read_u16(bytes, 56),
            s_rev_level: read_u32(bytes, 76),
            s_inode_size: read_u16(bytes, 88),
        }
    }

    /// Reads and validates the superblock of a partition starting at
    /// `partition_offset` bytes.
    pub fn read(
        device: &mut dyn BlockDevice,
        partition_offset: u64,
    ) -> Result<Self, ErrorKind> {
        let mut raw = [0u8; SUPERBLOCK_SIZE];
        device
            .read_at(partition_offset + SUPERBLOCK_OFFSET, &mut raw)
            .map_err(|_| ErrorKind::IoError)?;
        let superblock = Self::parse(&raw);
        if superblock.s_magic != EXT_SUPER_MAGIC {
            log::warn!(
                "invalid ext signature {:#06x}, expected {:#06x}",
                superblock.s_magic,
                EXT_SUPER_MAGIC
            );
            return Err(ErrorKind::Malformed);
        }
        // the group count derived from blocks and from inodes must agree
        if superblock.total_groups_by_blocks() != superblock.total_groups_by_inodes() {
            log::warn!("ext group counts do not match");
            return Err(ErrorKind::Malformed);
        }
        Ok(superblock)
    }

    pub const fn block_size(&self) -> u32 {
        1024 << self.s_log_block_size
    }

    /// 128 bytes for revision 0, the superblock's value afterwards.
    pub const fn inode_size(&self) -> u32 {
        if self.s_rev_level == 0 {
            128
        } else {
            self.s_inode_size as u32
        }
    }

    pub const fn total_groups_by_blocks(&self) -> u32 {
        (self.s_blocks_count + self.s_blocks_per_group - 1) / self.s_blocks_per_group
    }

    pub const fn total_groups_by_inodes(&self) -> u32 {
        (self.s_inodes_count + self.s_inodes_per_group - 1) / self.s_inodes_per_group
    }
}
