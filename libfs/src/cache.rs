//! The per-filesystem block cache.
//!
//! Holds in-memory copies of device blocks in plug-in block size units,
//! kept as an ordered list by ascending block number with at most one
//! entry per number. Release optionally writes dirty content back before
//! removal; sync flushes every dirty entry.

use crate::device::BlockDevice;
use libember::error::ErrorKind;
use alloc::vec::Vec;

/// One cached device block.
#[derive(Debug)]
pub struct CacheBlock {
    pub block_number: u32,
    pub data: Vec<u8>,
    dirty: bool,
}

/// Ordered list of cached blocks for one filesystem instance.
#[derive(Debug)]
pub struct BlockCache {
    block_size: u32,
    /// Byte offset of the filesystem on the device (partition start).
    base_offset: u64,
    blocks: Vec<CacheBlock>,
}

impl BlockCache {
    pub fn new(block_size: u32, base_offset: u64) -> Self {
        Self {
            block_size,
            base_offset,
            blocks: Vec::new(),
        }
    }

    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    fn device_offset(&self, block_number: u32) -> u64 {
        self.base_offset + block_number as u64 * self.block_size as u64
    }

    fn position(&self, block_number: u32) -> Result<usize, usize> {
        self.blocks
            .binary_search_by_key(&block_number, |block| block.block_number)
    }

    /// Ensures the block is present, reading it through the device when
    /// `read` is set. The ordered insert keeps the list sorted.
    pub fn allocate(
        &mut self,
        device: &mut dyn BlockDevice,
        block_number: u32,
        read: bool,
    ) -> Result<(), ErrorKind> {
        match self.position(block_number) {
            Ok(_) => Ok(()),
            Err(insert_at) => {
                let mut data = vec![0u8; self.block_size as usize];
                if read {
                    device.read_at(self.device_offset(block_number), &mut data)?;
                }
                self.blocks.insert(
                    insert_at,
                    CacheBlock {
                        block_number,
                        data,
                        dirty: false,
                    },
                );
                log::trace!("cached block {block_number}");
                Ok(())
            }
        }
    }

    /// Content of a cached block.
    pub fn data(&self, block_number: u32) -> Option<&[u8]> {
        self.position(block_number)
            .ok()
            .map(|index| self.blocks[index].data.as_slice())
    }

    /// Mutable content; the block becomes dirty.
    pub fn data_mut(&mut self, block_number: u32) -> Option<&mut Vec<u8>> {
        let index = self.position(block_number).ok()?;
        self.blocks[index].dirty = true;
        Some(&mut self.blocks[index].data)
    }

    /// Removes a block; dirty content (or an explicit `dirty` request)
    /// is flushed first.
    pub fn release(
        &mut self,
        device: &mut dyn BlockDevice,
        block_number: u32,
        dirty: bool,
    ) -> Result<(), ErrorKind> {
        let Ok(index) = self.position(block_number) else {
            return Ok(());
        };
        let block = &self.blocks[index];
        if dirty || block.dirty {
            device.write_at(self.device_offset(block_number), &block.data)?;
        }
        self.blocks.remove(index);
        Ok(())
    }

    /// Writes every dirty block back without removing anything.
    pub fn sync(&mut self, device: &mut dyn BlockDevice) -> Result<(), ErrorKind> {
        for block in &mut self.blocks {
            if block.dirty {
                device.write_at(
                    self.base_offset + block.block_number as u64 * self.block_size as u64,
                    &block.data,
                )?;
                block.dirty = false;
            }
        }
        Ok(())
    }

    /// Block numbers in list order, for the ordering invariant.
    pub fn block_numbers(&self) -> Vec<u32> {
        self.blocks.iter().map(|block| block.block_number).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDisk;

    fn disk() -> MemoryDisk {
        let mut data = vec![0u8; 16 * 512];
        for sector in 0..16 {
            data[sector * 512] = sector as u8;
        }
        MemoryDisk::new(data)
    }

    #[test]
    fn test_read_through() {
        let mut device = disk();
        let mut cache = BlockCache::new(512, 0);
        cache.allocate(&mut device, 3, true).unwrap();
        assert_eq!(cache.data(3).unwrap()[0], 3);
        assert!(cache.data(4).is_none());
    }

    /// Property: after any allocation sequence the list is sorted by
    /// ascending block number, one entry per number.
    #[test]
    fn test_insert_keeps_ascending_order() {
        let mut device = disk();
        let mut cache = BlockCache::new(512, 0);
        for number in [9, 2, 7, 2, 0, 11, 7, 5] {
            cache.allocate(&mut device, number, true).unwrap();
        }
        assert_eq!(cache.block_numbers(), [0, 2, 5, 7, 9, 11]);
    }

    #[test]
    fn test_release_writes_back_dirty() {
        let mut device = disk();
        let mut cache = BlockCache::new(512, 0);
        cache.allocate(&mut device, 1, true).unwrap();
        cache.data_mut(1).unwrap()[0] = 0xaa;
        cache.release(&mut device, 1, false).unwrap();
        assert!(cache.data(1).is_none());
        // the dirty content reached the device
        let mut buffer = [0u8; 1];
        device.read_at(512, &mut buffer).unwrap();
        assert_eq!(buffer[0], 0xaa);
    }

    #[test]
    fn test_sync_flushes_everything() {
        let mut device = disk();
        let mut cache = BlockCache::new(512, 0);
        for number in [1, 2, 3] {
            cache.allocate(&mut device, number, true).unwrap();
            cache.data_mut(number).unwrap()[1] = 0x55;
        }
        cache.sync(&mut device).unwrap();
        for number in [1u64, 2, 3] {
            let mut buffer = [0u8; 2];
            device.read_at(number * 512, &mut buffer).unwrap();
            assert_eq!(buffer[1], 0x55);
        }
    }

    #[test]
    fn test_partition_offset_applies() {
        let mut device = disk();
        let mut cache = BlockCache::new(512, 2 * 512);
        cache.allocate(&mut device, 0, true).unwrap();
        // block 0 of the partition is sector 2 of the device
        assert_eq!(cache.data(0).unwrap()[0], 2);
    }
}
