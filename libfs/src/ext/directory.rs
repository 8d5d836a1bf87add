//! Directory entry iteration and path resolution.

use super::inode::{
    read_inode,
    read_to_vec,
    Inode,
};
use super::superblock::{
    Superblock,
    EXT_ROOT_INO,
};
use crate::cache::BlockCache;
use crate::device::BlockDevice;
use libember::error::ErrorKind;
use libember::path::components;
use libember::proto::Dirent;
use alloc::string::String;
use alloc::vec::Vec;

/// One decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub inode: u32,
    pub file_type: u8,
    pub name: String,
}

/// Iterates the entries of a directory inode, skipping the unused ones.
pub fn list_entries(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    superblock: &Superblock,
    inode: &Inode,
) -> Result<Vec<DirectoryEntry>, ErrorKind> {
    if !inode.is_directory() {
        return Err(ErrorKind::NotDirectory);
    }
    let data = read_to_vec(device, cache, superblock, inode, 0, inode.i_size)?;
    let mut entries = Vec::new();
    let mut position = 0usize;
    while position + 8 <= data.len() {
        let entry_inode = u32::from_le_bytes(data[position..position + 4].try_into().unwrap());
        let rec_len =
            u16::from_le_bytes(data[position + 4..position + 6].try_into().unwrap()) as usize;
        let name_len = data[position + 6] as usize;
        let file_type = data[position + 7];
        // a zero record length would loop forever
        if rec_len == 0 {
            break;
        }
        if entry_inode != 0 && position + 8 + name_len <= data.len() {
            let name = &data[position + 8..position + 8 + name_len];
            if let Ok(name) = core::str::from_utf8(name) {
                entries.push(DirectoryEntry {
                    inode: entry_inode,
                    file_type,
                    name: String::from(name),
                });
            }
        }
        position += rec_len;
    }
    Ok(entries)
}

/// Finds one entry of a directory inode by name.
pub fn find_entry(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    superblock: &Superblock,
    inode: &Inode,
    name: &str,
) -> Result<DirectoryEntry, ErrorKind> {
    list_entries(device, cache, superblock, inode)?
        .into_iter()
        .find(|entry| entry.name == name)
        .ok_or(ErrorKind::NotFound)
}

/// Walks `path` from the root inode; empty components and trailing
/// slashes are skipped.
pub fn resolve(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    superblock: &Superblock,
    path: &str,
) -> Result<Inode, ErrorKind> {
    let mut current = EXT_ROOT_INO;
    for part in components(path) {
        let inode = read_inode(device, cache, superblock, current)?;
        let entry = find_entry(device, cache, superblock, &inode, part)?;
        current = entry.inode;
    }
    read_inode(device, cache, superblock, current)
}

/// Dirents as the VFS expects them.
pub fn dirents(
    device: &mut dyn BlockDevice,
    cache: &mut BlockCache,
    superblock: &Superblock,
    inode: &Inode,
) -> Result<Vec<Dirent>, ErrorKind> {
    Ok(list_entries(device, cache, superblock, inode)?
        .into_iter()
        .map(|entry| Dirent {
            inode: entry.inode as u64,
            kind: entry.file_type,
            name: entry.name,
        })
        .collect())
}
