//! The FAT driver. The variant is selected by the total cluster count;
//! everything but FAT32 is recognized and then explicitly rejected.

pub mod bpb;
pub mod cluster;
pub mod directory;
pub mod file;

use crate::cache::BlockCache;
use crate::device::BlockDevice;
use self::bpb::Bpb;
use self::directory::FatDirectoryEntry;
use self::file::FatFile;
use libember::error::ErrorKind;
use libember::path::components;
use libember::proto::Dirent;
use libember::stat::{
    Stat,
    S_IFDIR,
    S_IFREG,
};
use alloc::vec::Vec;

/// FAT flavour by cluster count thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
    ExFat,
}

/// Constants derived from the BPB once at mount time.
#[derive(Debug, Clone, Copy, Default)]
pub struct FatData {
    pub total_sectors: u32,
    pub fat_size: u32,
    pub root_dir_sectors: u32,
    pub first_data_sector: u32,
    pub first_fat_sector: u32,
    pub data_sectors: u32,
    pub total_clusters: u32,
}

/// A mounted FAT32 volume.
#[derive(Debug)]
pub struct FatFilesystem<D: BlockDevice> {
    device: D,
    bpb: Bpb,
    data: FatData,
    fat_type: FatType,
    cache: BlockCache,
}

impl<D: BlockDevice> FatFilesystem<D> {
    /// Probes and mounts the volume at `partition_offset` bytes.
    pub fn mount(mut device: D, partition_offset: u64) -> Result<Self, ErrorKind> {
        let bpb = Bpb::read(&mut device, partition_offset)?;
        // derive the constants every lookup needs
        let total_sectors = if bpb.total_sectors_16 == 0 {
            bpb.total_sectors_32
        } else {
            bpb.total_sectors_16 as u32
        };
        let fat_size = if bpb.table_size_16 == 0 {
            bpb.table_size_32
        } else {
            bpb.table_size_16 as u32
        };
        let sector_size = bpb.bytes_per_sector as u32;
        let root_dir_sectors = if sector_size == 0 {
            0
        } else {
            (bpb.root_entry_count as u32 * 32 + sector_size - 1) / sector_size
        };
        let first_data_sector =
            bpb.reserved_sector_count as u32 + bpb.table_count as u32 * fat_size + root_dir_sectors;
        let first_fat_sector = bpb.reserved_sector_count as u32;
        let data_sectors = total_sectors.saturating_sub(first_data_sector);
        let total_clusters = if bpb.sectors_per_cluster == 0 {
            0
        } else {
            data_sectors / bpb.sectors_per_cluster as u32
        };
        let data = FatData {
            total_sectors,
            fat_size,
            root_dir_sectors,
            first_data_sector,
            first_fat_sector,
            data_sectors,
            total_clusters,
        };

        let fat_type = if bpb.bytes_per_sector == 0 {
            FatType::ExFat
        } else if total_clusters < 4085 {
            FatType::Fat12
        } else if total_clusters < 65525 {
            FatType::Fat16
        } else {
            FatType::Fat32
        };
        log::debug!("detected {fat_type:?} with {total_clusters} clusters");
        // everything except FAT32 is detected but not served
        if fat_type != FatType::Fat32 {
            return Err(ErrorKind::NotImplemented);
        }

        let cache = BlockCache::new(sector_size, partition_offset);
        Ok(Self {
            device,
            bpb,
            data,
            fat_type,
            cache,
        })
    }

    pub const fn fat_type(&self) -> FatType {
        self.fat_type
    }

    /// Test access to the block cache ordering.
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    fn sector_size(&self) -> u32 {
        self.bpb.bytes_per_sector as u32
    }

    fn sectors_per_cluster(&self) -> u32 {
        self.bpb.sectors_per_cluster as u32
    }

    /// Decoded entries of the directory starting at `first_cluster`.
    fn directory_entries(&mut self, first_cluster: u32) -> Result<Vec<FatDirectoryEntry>, ErrorKind> {
        let sector_size = self.sector_size();
        let sectors_per_cluster = self.sectors_per_cluster();
        let raw = directory::read_directory(
            &mut self.device,
            &mut self.cache,
            self.fat_type,
            &self.data,
            sector_size,
            sectors_per_cluster,
            first_cluster,
        )?;
        Ok(directory::decode_entries(&raw))
    }

    /// Walks a path from the root directory down.
    fn resolve(&mut self, path: &str) -> Result<Option<FatDirectoryEntry>, ErrorKind> {
        let mut current: Option<FatDirectoryEntry> = None;
        let mut cluster = self.bpb.root_cluster;
        for part in components(path) {
            let entries = self.directory_entries(cluster)?;
            let entry = entries
                .into_iter()
                .find(|entry| entry.name == part)
                .ok_or(ErrorKind::NotFound)?;
            cluster = entry.first_cluster;
            current = Some(entry);
        }
        Ok(current)
    }

    fn stat_of(entry: &FatDirectoryEntry) -> Stat {
        Stat {
            st_mode: if entry.is_directory() {
                S_IFDIR | 0o755
            } else {
                S_IFREG | 0o644
            },
            st_size: entry.size as i64,
            st_nlink: 1,
            ..Stat::default()
        }
    }

    /// Status of the object at `path`; the root directory is synthetic.
    pub fn stat(&mut self, path: &str) -> Result<Stat, ErrorKind> {
        match self.resolve(path)? {
            Some(entry) => Ok(Self::stat_of(&entry)),
            None => Ok(Stat {
                st_mode: S_IFDIR | 0o755,
                ..Stat::default()
            }),
        }
    }

    /// Reads `length` bytes at `offset` of a file.
    pub fn read(&mut self, path: &str, offset: i64, length: u32) -> Result<Vec<u8>, ErrorKind> {
        if offset < 0 {
            return Err(ErrorKind::InvalidArgument);
        }
        let entry = self.resolve(path)?.ok_or(ErrorKind::IsDirectory)?;
        if entry.is_directory() {
            return Err(ErrorKind::IsDirectory);
        }
        let sector_size = self.sector_size();
        let sectors_per_cluster = self.sectors_per_cluster();
        let opened = FatFile::open_by_directory(
            &mut self.device,
            &mut self.cache,
            self.fat_type,
            &self.data,
            sector_size,
            sectors_per_cluster,
            &entry,
        )?;
        opened.read(
            &mut self.device,
            &mut self.cache,
            &self.data,
            sector_size,
            sectors_per_cluster,
            offset as u32,
            length,
        )
    }

    /// Lists a directory.
    pub fn getdents(&mut self, path: &str) -> Result<Vec<Dirent>, ErrorKind> {
        let cluster = match self.resolve(path)? {
            None => self.bpb.root_cluster,
            Some(entry) if entry.is_directory() => entry.first_cluster,
            Some(_) => return Err(ErrorKind::NotDirectory),
        };
        Ok(self
            .directory_entries(cluster)?
            .into_iter()
            .map(|entry| Dirent {
                inode: entry.first_cluster as u64,
                kind: if entry.is_directory() { 4 } else { 8 },
                name: entry.name,
            })
            .collect())
    }

    /// Directory creation and file writes are not implemented.
    pub fn write(&mut self, _path: &str, _offset: i64, _data: &[u8]) -> Result<u32, ErrorKind> {
        Err(ErrorKind::NotImplemented)
    }

    pub fn sync(&mut self) -> Result<(), ErrorKind> {
        self.cache.sync(&mut self.device)
    }
}
