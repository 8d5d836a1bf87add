//! Inodes and the classical three level block indirection.

use super::blockgroup::Blockgroup;
use super::superblock::Superblock;
use crate::cache::BlockCache;
use crate::device::BlockDevice;
use libember::error::ErrorKind;
use alloc::vec::Vec;

/// Number of direct block pointers in an inode.
const DIRECT_BLOCKS: u32 = 12;

/// Mode bit helpers on the raw inode.
pub const EXT_S_IFDIR: u16 = 0o040000;
pub const EXT_S_IFREG: u16 = 0o100000;

/// The on-disk inode fields the reader needs, decoded to host order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inode {
    pub inode_number: u32,
    pub i_mode: u16,
    pub i_uid: u16,
    pub i_size: u32,
    pub i_atime: u32,
    pub i_ctime: u32,
    pub i_mtime: u32,
    pub i_gid: u16,
    pub i_links_count: u16,
    pub i_blocks: u32,
    pub i_flags: u32,
    pub i_block: [u32; 15],
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

impl Inode {
    fn parse(inode_number: u32, bytes: &[u8]) -> Self {
        let mut i_block = [0u32; 15];
        for (index, pointer) in i_block.iter_mut().enumerate() {
            *pointer = read_u32(bytes, 40 + index * 4);
        }
        Self {
            inode_number,
            i_mode: read_u16(bytes, 0),
            i_uid: read_u16(bytes, 2),
            i_size: read_u32(bytes, 4),
            i_atime: read_u32(bytes, 8),
            i_ctime: read_u32(bytes, 12),
            i_mtime: read_u32(bytes, 16),
            i_gid: read_u16(bytes, 24),
            i_links_count: read_u16(bytes, 26),
            i_blocks: read_u32(bytes, 28),
            i_flags: read_u32(bytes, 32),
            i_block,
        }
    }

    pub const fn is_directory(&self) -> bool {
        self.i_mode & 0o170000 == EXT_S_IFDIR
    }

    pub const fn is_regular(&self) -> bool {
        self.i_mode & 0o170000 == EXT_S_IFREG
    }
}

/// Indirection level plus the inode pointer slot and the remaining index
/// for a logical block number.
fn indirection_level(block_size: u32, block: u32) -> (u32, usize, u32) {
    let pointers = block_size / 4;
    if block < DIRECT_BLOCKS {
        (0, block as usize, 0)
    } else if block < DIRECT_BLOCKS + pointers {
        (1, 12, block - DIRECT_BLOCKS)
    } else if block < DIRECT_BLOCKS + pointers * (pointers + 1) {
        (2, 13, block - DIRECT_BLOCKS - pointers)
    } else {
        (3, 14, block - DIRECT_BLOCKS - pointers * (pointers + 1))
    }
}

/// Reads inode `inode_number` from its block group's inode table.
pub fn read_inode(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    superblock: &Superblock,
    inode_number: u32,
) -> Result<Inode, ErrorKind> {
    if inode_number == 0 {
        return Err(ErrorKind::InvalidArgument);
    }
    let block_size = superblock.block_size();
    let group = (inode_number - 1) / superblock.s_inodes_per_group;
    let offset = superblock.inode_size() * ((inode_number - 1) % superblock.s_inodes_per_group);
    let blockgroup = Blockgroup::read(device, cache, superblock, group)?;
    let block = blockgroup.bg_inode_table + offset / block_size;
    let within = (offset % block_size) as usize;
    cache.allocate(device, block, true)?;
    let data = cache.data(block).ok_or(ErrorKind::IoError)?;
    let inode = Inode::parse(inode_number, &data[within..within + 128]);
    cache.release(device, block, false)?;
    Ok(inode)
}

/// Resolves a logical block of an inode to its byte offset inside the
/// partition. Zero means a hole; the caller synthesises zeros.
pub fn block_offset(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    superblock: &Superblock,
    inode: &Inode,
    block: u32,
) -> Result<u64, ErrorKind> {
    let block_size = superblock.block_size();
    let pointers = block_size / 4;
    let (level, slot, mut indirect_index) = indirection_level(block_size, block);
    let mut block_number = inode.i_block[slot];
    for step in 0..level {
        if block_number == 0 {
            break;
        }
        cache.allocate(device, block_number, true)?;
        let table = cache.data(block_number).ok_or(ErrorKind::IoError)?;
        // divisor for the remaining indirection depth
        let mut stride = 1u32;
        for _ in 0..level - step - 1 {
            stride *= pointers;
        }
        let entry = (indirect_index / stride) as usize;
        indirect_index %= stride;
        let next = read_u32(table, entry * 4);
        cache.release(device, block_number, false)?;
        block_number = next;
    }
    Ok(block_number as u64 * block_size as u64)
}

/// Reads `count` consecutive logical blocks into `buffer`. Holes yield
/// zeros. Returns the number of blocks actually read.
pub fn read_blocks(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    superblock: &Superblock,
    inode: &Inode,
    block: u32,
    buffer: &mut [u8],
    count: u32,
) -> Result<u32, ErrorKind> {
    let block_size = superblock.block_size() as usize;
    for index in 0..count {
        let target = &mut buffer[index as usize * block_size..(index as usize + 1) * block_size];
        let offset = block_offset(device, cache, superblock, inode, block + index)?;
        // sparse block
        if offset == 0 {
            target.fill(0);
            continue;
        }
        let number = (offset / block_size as u64) as u32;
        cache.allocate(device, number, true)?;
        let data = cache.data(number).ok_or(ErrorKind::IoError)?;
        target.copy_from_slice(data);
        cache.release(device, number, false)?;
    }
    Ok(count)
}

/// Reads an arbitrary `(start, length)` byte range of an inode: an
/// optional leading partial block, whole blocks, an optional trailing
/// partial block.
pub fn read_data(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    superblock: &Superblock,
    inode: &Inode,
    start: u32,
    length: u32,
    buffer: &mut [u8],
) -> Result<(), ErrorKind> {
    if length == 0 {
        return Err(ErrorKind::InvalidArgument);
    }
    let block_size = superblock.block_size();
    let mut start_block = start / block_size;
    let end_block = (start + length - 1) / block_size;
    let mut block_count = end_block - start_block + 1;
    let mut local = vec![0u8; block_size as usize];
    let mut buffer = buffer;
    let mut length = length;

    // leading partial block
    if start % block_size != 0 {
        let start_offset = (start % block_size) as usize;
        read_blocks(device, cache, superblock, inode, start_block, &mut local, 1)?;
        let mut byte = block_size as usize - start_offset;
        if (length as usize) < byte {
            byte = length as usize;
        }
        buffer[..byte].copy_from_slice(&local[start_offset..start_offset + byte]);
        block_count -= 1;
        if block_count == 0 {
            return Ok(());
        }
        length -= byte as u32;
        buffer = &mut buffer[byte..];
        start_block += 1;
    }

    // trailing partial block
    if length % block_size != 0 {
        let byte = (length % block_size) as usize;
        read_blocks(device, cache, superblock, inode, end_block, &mut local, 1)?;
        let tail = length as usize - byte;
        buffer[tail..tail + byte].copy_from_slice(&local[..byte]);
        block_count -= 1;
        if block_count == 0 {
            return Ok(());
        }
        length -= byte as u32;
    }

    // the whole blocks in the middle
    let whole = length / block_size;
    debug_assert_eq!(whole, block_count);
    read_blocks(
        device,
        cache,
        superblock,
        inode,
        start_block,
        &mut buffer[..(whole * block_size) as usize],
        whole,
    )?;
    Ok(())
}

/// Convenience wrapper reading into a fresh buffer.
pub fn read_to_vec(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    superblock: &Superblock,
    inode: &Inode,
    start: u32,
    length: u32,
) -> Result<Vec<u8>, ErrorKind> {
    let mut buffer = vec![0u8; length as usize];
    read_data(device, cache, superblock, inode, start, length, &mut buffer)?;
    Ok(buffer)
}
