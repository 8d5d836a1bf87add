//! Files on a FAT volume: the cluster list built at open time and the
//! reads served from it.

use super::cluster;
use super::directory::FatDirectoryEntry;
use super::{
    FatData,
    FatType,
};
use crate::cache::BlockCache;
use crate::device::BlockDevice;
use libember::error::ErrorKind;
use alloc::vec::Vec;

/// An opened file: its directory entry plus the resolved cluster list.
#[derive(Debug)]
pub struct FatFile {
    pub entry: FatDirectoryEntry,
    pub size: u32,
    pub block_list: Vec<u32>,
}

impl FatFile {
    /// Opens a file from its directory entry by walking the whole
    /// cluster chain once.
    pub fn open_by_directory(
        device: &mut dyn BlockDevice,
        cache: &mut BlockCache,
        fat_type: FatType,
        data: &FatData,
        sector_size: u32,
        sectors_per_cluster: u32,
        entry: &FatDirectoryEntry,
    ) -> Result<Self, ErrorKind> {
        let block_list = cluster::chain(
            device,
            cache,
            fat_type,
            data,
            sector_size,
            entry.first_cluster,
        )?;
        let cluster_size = sector_size * sectors_per_cluster;
        let mut size = entry.size;
        // directories carry no size; their chain defines it
        if size == 0 {
            size = block_list.len() as u32 * cluster_size;
        }
        Ok(Self {
            entry: entry.clone(),
            size,
            block_list,
        })
    }

    /// Reads `length` bytes from byte `offset` of the file.
    pub fn read(
        &self,
        device: &mut dyn BlockDevice,
        cache: &mut BlockCache,
        data: &FatData,
        sector_size: u32,
        sectors_per_cluster: u32,
        offset: u32,
        length: u32,
    ) -> Result<Vec<u8>, ErrorKind> {
        if offset >= self.size {
            return Ok(Vec::new());
        }
        let length = core::cmp::min(length, self.size - offset);
        let cluster_size = sector_size * sectors_per_cluster;
        let mut remaining = length;
        let mut position = offset;
        let mut content = Vec::with_capacity(length as usize);
        while remaining > 0 {
            let cluster_index = (position / cluster_size) as usize;
            let within_cluster = position % cluster_size;
            let cluster_number = *self
                .block_list
                .get(cluster_index)
                .ok_or(ErrorKind::IoError)?;
            let sector = cluster::cluster_sector(data, sectors_per_cluster, cluster_number)
                + within_cluster / sector_size;
            let within_sector = (within_cluster % sector_size) as usize;
            let take = core::cmp::min(remaining as usize, sector_size as usize - within_sector);
            cache.allocate(device, sector, true)?;
            let block = cache.data(sector).ok_or(ErrorKind::IoError)?;
            content.extend_from_slice(&block[within_sector..within_sector + take]);
            cache.release(device, sector, false)?;
            position += take as u32;
            remaining -= take as u32;
        }
        Ok(content)
    }
}
