//! Block group descriptors, 32 bytes each, in the table following the
//! superblock.

use super::superblock::Superblock;
use crate::cache::BlockCache;
use crate::device::BlockDevice;
use libember::error::ErrorKind;

/// Size of one descriptor on disk.
pub const BLOCKGROUP_SIZE: u32 = 32;

/// One block group descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blockgroup {
    pub bg_block_bitmap: u32,
    pub bg_inode_bitmap: u32,
    pub bg_inode_table: u32,
}

impl Blockgroup {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            bg_block_bitmap: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            bg_inode_bitmap: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            bg_inode_table: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        }
    }

    /// Loads descriptor `group` through the block cache.
    pub fn read(
        device: &mut dyn BlockDevice,
        cache: &mut BlockCache,
        superblock: &Superblock,
        group: u32,
    ) -> Result<Self, ErrorKind> {
        let block_size = superblock.block_size();
        // the descriptor table starts in the block after the superblock
        let byte_offset = (superblock.s_first_data_block + 1) * block_size + group * BLOCKGROUP_SIZE;
        let block = byte_offset / block_size;
        let within = (byte_offset % block_size) as usize;
        cache.allocate(device, block, true)?;
        let data = cache.data(block).ok_or(ErrorKind::IoError)?;
        let descriptor = Self::parse(&data[within..within + BLOCKGROUP_SIZE as usize]);
        cache.release(device, block, false)?;
        Ok(descriptor)
    }
}
