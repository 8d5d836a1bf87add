//! Cluster chain walking through the file allocation table.

use super::{
    FatData,
    FatType,
};
use crate::cache::BlockCache;
use crate::device::BlockDevice;
use libember::error::ErrorKind;
use alloc::vec::Vec;

/// FAT32 end-of-chain marker threshold.
pub const FAT32_END_OF_CHAIN: u32 = 0x0fff_fff8;

/// Follows the table once: the cluster after `current`.
pub fn next(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    fat_type: FatType,
    data: &FatData,
    sector_size: u32,
    current: u32,
) -> Result<u32, ErrorKind> {
    let (fat_sector, fat_offset) = match fat_type {
        FatType::Fat12 => {
            let offset = current * 12;
            (offset / (sector_size * 8), (offset % (sector_size * 8)) / 8)
        }
        FatType::Fat16 => (current * 2 / sector_size, current * 2 % sector_size),
        FatType::Fat32 => (current * 4 / sector_size, current * 4 % sector_size),
        FatType::ExFat => return Err(ErrorKind::NotImplemented),
    };
    let sector = data.first_fat_sector + fat_sector;
    cache.allocate(device, sector, true)?;
    let table = cache.data(sector).ok_or(ErrorKind::IoError)?;
    let offset = fat_offset as usize;
    let mut value = match fat_type {
        FatType::Fat12 | FatType::Fat16 => {
            u16::from_le_bytes(table[offset..offset + 2].try_into().unwrap()) as u32
        }
        FatType::Fat32 => u32::from_le_bytes(table[offset..offset + 4].try_into().unwrap()),
        FatType::ExFat => unreachable!(),
    };
    cache.release(device, sector, false)?;
    // the top four bits of a FAT32 entry are reserved
    if fat_type == FatType::Fat32 {
        value &= 0x0fff_ffff;
    }
    Ok(value)
}

/// Collects the whole chain starting at `first`, terminator excluded.
pub fn chain(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    fat_type: FatType,
    data: &FatData,
    sector_size: u32,
    first: u32,
) -> Result<Vec<u32>, ErrorKind> {
    let mut list = Vec::new();
    if first == 0 {
        return Ok(list);
    }
    list.push(first);
    let mut current = first;
    loop {
        let following = next(device, cache, fat_type, data, sector_size, current)?;
        if following >= FAT32_END_OF_CHAIN {
            break;
        }
        // a loop in the table would spin forever
        if following == 0 || list.len() > data.total_clusters as usize {
            return Err(ErrorKind::Malformed);
        }
        list.push(following);
        current = following;
    }
    Ok(list)
}

/// First sector of a cluster inside the partition.
pub const fn cluster_sector(data: &FatData, sectors_per_cluster: u32, cluster: u32) -> u32 {
    (cluster - 2) * sectors_per_cluster + data.first_data_sector
}
