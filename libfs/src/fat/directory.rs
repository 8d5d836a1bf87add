//! FAT directory decoding: 8.3 short names and long file name runs.

use super::cluster;
use super::{
    FatData,
    FatType,
};
use crate::cache::BlockCache;
use crate::device::BlockDevice;
use libember::error::ErrorKind;
use alloc::string::String;
use alloc::vec::Vec;

/// Attribute marking a long file name entry.
const ATTR_LONG_NAME: u8 = 0x0f;
/// Attribute bit for directories.
pub const ATTR_DIRECTORY: u8 = 0x10;

/// Size of one raw directory entry.
const ENTRY_SIZE: usize = 32;

/// One decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatDirectoryEntry {
    pub name: String,
    pub attributes: u8,
    pub first_cluster: u32,
    pub size: u32,
}

impl FatDirectoryEntry {
    pub const fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }
}

/// Folds an 8.3 name to the usual lower case `name.ext` form.
fn fold_short_name(raw: &[u8]) -> String {
    let mut name = String::new();
    for &byte in &raw[..8] {
        if byte == b' ' {
            continue;
        }
        name.push((byte as char).to_ascii_lowercase());
    }
    let mut extension = String::new();
    for &byte in &raw[8..11] {
        if byte == b' ' {
            continue;
        }
        extension.push((byte as char).to_ascii_lowercase());
    }
    if !extension.is_empty() {
        name.push('.');
        name.push_str(&extension);
    }
    name
}

/// Decodes one long file name entry: 5 + 6 + 2 UTF-16 units, of which
/// this reader keeps the low bytes.
fn long_name_part(entry: &[u8]) -> [u8; 13] {
    [
        entry[1],
        entry[3],
        entry[5],
        entry[7],
        entry[9],
        entry[14],
        entry[16],
        entry[18],
        entry[20],
        entry[22],
        entry[24],
        entry[28],
        entry[30],
    ]
}

/// Decodes the raw bytes of a directory into entries. Long name runs are
/// concatenated in reverse of their sequence order and 0xFF padding
/// becomes spaces, which are trimmed from the final name.
pub fn decode_entries(data: &[u8]) -> Vec<FatDirectoryEntry> {
    let mut entries = Vec::new();
    let mut index = 0usize;
    let max = data.len() / ENTRY_SIZE;
    while index < max {
        let raw = &data[index * ENTRY_SIZE..(index + 1) * ENTRY_SIZE];
        // end of directory
        if raw[0] == 0 {
            break;
        }
        // unused entry
        if raw[0] == 0xe5 {
            index += 1;
            continue;
        }
        if raw[11] == ATTR_LONG_NAME {
            // first entry of the run carries the count in its order byte
            let order = raw[0];
            let count = (order & 0x3f) as usize;
            let mut name_bytes = Vec::new();
            // parts are stored last-first; walk them backwards
            for part in (0..count).rev() {
                if index + part >= max {
                    break;
                }
                let part_raw = &data[(index + part) * ENTRY_SIZE..(index + part + 1) * ENTRY_SIZE];
                name_bytes.extend_from_slice(&long_name_part(part_raw));
            }
            // padding shows up as 0xff, terminators as zero
            let name: String = name_bytes
                .iter()
                .map(|&byte| if byte == 0xff { b' ' } else { byte })
                .take_while(|&byte| byte != 0)
                .map(|byte| byte as char)
                .collect();
            let name = String::from(name.trim_end());
            // the short entry follows the run
            index += count;
            if index >= max {
                break;
            }
            let short = &data[index * ENTRY_SIZE..(index + 1) * ENTRY_SIZE];
            if short[0] != 0 && short[0] != 0xe5 {
                entries.push(FatDirectoryEntry {
                    name,
                    attributes: short[11],
                    first_cluster: decode_first_cluster(short),
                    size: u32::from_le_bytes(short[28..32].try_into().unwrap()),
                });
            }
            index += 1;
            continue;
        }
        entries.push(FatDirectoryEntry {
            name: fold_short_name(raw),
            attributes: raw[11],
            first_cluster: decode_first_cluster(raw),
            size: u32::from_le_bytes(raw[28..32].try_into().unwrap()),
        });
        index += 1;
    }
    entries
}

fn decode_first_cluster(entry: &[u8]) -> u32 {
    let high = u16::from_le_bytes(entry[20..22].try_into().unwrap()) as u32;
    let low = u16::from_le_bytes(entry[26..28].try_into().unwrap()) as u32;
    (high << 16) | low
}

/// Loads the whole content of a directory given its first cluster.
pub fn read_directory(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    fat_type: FatType,
    data: &FatData,
    sector_size: u32,
    sectors_per_cluster: u32,
    first_cluster: u32,
) -> Result<Vec<u8>, ErrorKind> {
    let chain = cluster::chain(device, cache, fat_type, data, sector_size, first_cluster)?;
    let mut content = Vec::new();
    for cluster_number in chain {
        let first_sector = cluster::cluster_sector(data, sectors_per_cluster, cluster_number);
        for sector in first_sector..first_sector + sectors_per_cluster {
            cache.allocate(device, sector, true)?;
            let block = cache.data(sector).ok_or(ErrorKind::IoError)?;
            content.extend_from_slice(block);
            cache.release(device, sector, false)?;
        }
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_short_name() {
        assert_eq!(fold_short_name(b"README  TXT"), "readme.txt");
        assert_eq!(fold_short_name(b"NOEXT      "), "noext");
        assert_eq!(fold_short_name(b"A       B  "), "a.b");
    }

    #[test]
    fn test_decode_skips_unused_and_stops_at_end() {
        let mut data = vec![0u8; 96];
        // unused entry
        data[0] = 0xe5;
        // plain entry
        data[32..43].copy_from_slice(b"HELLO   TXT");
        data[32 + 11] = 0x20;
        data[32 + 26..32 + 28].copy_from_slice(&5u16.to_le_bytes());
        data[32 + 28..32 + 32].copy_from_slice(&123u32.to_le_bytes());
        // terminator implicitly at the third entry (zero first byte)
        let entries = decode_entries(&data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hello.txt");
        assert_eq!(entries[0].first_cluster, 5);
        assert_eq!(entries[0].size, 123);
    }
}
