//! The BIOS parameter block in the boot sector of a FAT volume.

use crate::device::{
    BlockDevice,
    SECTOR_SIZE,
};
use libember::error::ErrorKind;

/// Boot sector signature at offset 510.
pub const BPB_SIGNATURE: u16 = 0xaa55;

/// Decoded BPB fields, FAT32 extension included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bpb {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub table_count: u8,
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub table_size_16: u16,
    pub total_sectors_32: u32,
    /// FAT32: sectors per FAT.
    pub table_size_32: u32,
    /// FAT32: first cluster of the root directory.
    pub root_cluster: u32,
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

impl Bpb {
    pub fn parse(bytes: &[u8; SECTOR_SIZE]) -> Result<Self, ErrorKind> {
        let signature = read_u16(bytes, 510);
        if signature != BPB_SIGNATURE {
            log::warn!("invalid boot sector signature {signature:#06x}");
            return Err(ErrorKind::Malformed);
        }
        Ok(Self {
            bytes_per_sector: read_u16(bytes, 11),
            sectors_per_cluster: bytes[13],
            reserved_sector_count: read_u16(bytes, 14),
            table_count: bytes[16],
            root_entry_count: read_u16(bytes, 17),
            total_sectors_16: read_u16(bytes, 19),
            table_size_16: read_u16(bytes, 22),
            total_sectors_32: read_u32(bytes, 32),
            table_size_32: read_u32(bytes, 36),
            root_cluster: read_u32(bytes, 44),
        })
    }

    /// Reads the boot sector of the partition at `partition_offset`.
    pub fn read(device: &mut dyn BlockDevice, partition_offset: u64) -> Result<Self, ErrorKind> {
        let mut raw = [0u8; SECTOR_SIZE];
        device
            .read_at(partition_offset, &mut raw)
            .map_err(|_| ErrorKind::IoError)?;
        Self::parse(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_gate() {
        let mut raw = [0u8; SECTOR_SIZE];
        assert_eq!(Bpb::parse(&raw), Err(ErrorKind::Malformed));
        raw[510] = 0x55;
        raw[511] = 0xaa;
        raw[11] = 0;
        raw[12] = 2; // 512 bytes per sector
        let bpb = Bpb::parse(&raw).unwrap();
        assert_eq!(bpb.bytes_per_sector, 512);
    }
}
