//! Synthetic disk images for the filesystem tests: a small ext2 volume,
//! a FAT32 volume with long file names, and MBR wrappers around both.

use crate::device::SECTOR_SIZE;
use crate::mbr::{
    PARTITION_TYPE_FAT32_LBA,
    PARTITION_TYPE_LINUX_NATIVE,
};
use alloc::vec::Vec;

pub const HOSTS_CONTENT: &[u8] = b"127.0.0.1 localhost\n10.0.0.1 ember\n192.168.0.1 gateway\n";
pub const README_CONTENT: &[u8] = b"this readme lives behind a long file name\n";
pub const BOOT_CFG_CONTENT: &[u8] = b"kernel=/boot/kernel7.img\narm_64bit=0\n";

/// Deterministic content of the 16 KiB ext test file (12 direct blocks
/// plus 4 through the single indirect table).
pub fn big_file_content() -> Vec<u8> {
    (0..16 * 1024u32)
        .map(|index| (index.wrapping_mul(31) % 251) as u8)
        .collect()
}

/// Deterministic content of the 1300 byte FAT test file (three chained
/// clusters).
pub fn fat_big_content() -> Vec<u8> {
    (0..1300u32)
        .map(|index| (index.wrapping_mul(17) % 253) as u8)
        .collect()
}

fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

// ----------------------------------------------------------------------
// ext2

const BLOCK: usize = 1024;
const INODE_TABLE_BLOCK: usize = 5;

struct InodeSpec {
    number: u32,
    mode: u16,
    size: u32,
    links: u16,
    blocks: [u32; 15],
}

fn write_inode(image: &mut [u8], spec: &InodeSpec) {
    let base = INODE_TABLE_BLOCK * BLOCK + (spec.number as usize - 1) * 128;
    put_u16(image, base, spec.mode);
    put_u32(image, base + 4, spec.size);
    put_u16(image, base + 26, spec.links);
    for (index, block) in spec.blocks.iter().enumerate() {
        put_u32(image, base + 40 + index * 4, *block);
    }
}

fn write_dirent(
    image: &mut [u8],
    offset: usize,
    inode: u32,
    rec_len: u16,
    file_type: u8,
    name: &str,
) -> usize {
    put_u32(image, offset, inode);
    put_u16(image, offset + 4, rec_len);
    image[offset + 6] = name.len() as u8;
    image[offset + 7] = file_type;
    image[offset + 8..offset + 8 + name.len()].copy_from_slice(name.as_bytes());
    offset + rec_len as usize
}

/// Builds a 64 KiB ext2 volume:
///
/// ```text
/// /etc/hosts   regular file, one block
/// /big         16 KiB, direct plus single indirect blocks
/// /sparse      3 KiB with a hole in the middle
/// ```
pub fn ext2_image() -> Vec<u8> {
    let mut image = vec![0u8; 64 * BLOCK];

    // superblock at byte 1024
    let sb = BLOCK;
    put_u32(&mut image, sb, 32); // inodes count
    put_u32(&mut image, sb + 4, 64); // blocks count
    put_u32(&mut image, sb + 20, 1); // first data block
    put_u32(&mut image, sb + 24, 0); // log block size -> 1024
    put_u32(&mut image, sb + 32, 8192); // blocks per group
    put_u32(&mut image, sb + 40, 32); // inodes per group
    put_u16(&mut image, sb + 56, 0xef53); // magic
    put_u32(&mut image, sb + 76, 0); // revision

    // one block group descriptor at block 2
    let bg = 2 * BLOCK;
    put_u32(&mut image, bg, 3); // block bitmap
    put_u32(&mut image, bg + 4, 4); // inode bitmap
    put_u32(&mut image, bg + 8, INODE_TABLE_BLOCK as u32); // inode table

    // root directory, block 9
    let root = 9 * BLOCK;
    let mut offset = write_dirent(&mut image, root, 2, 12, 2, ".");
    offset = write_dirent(&mut image, offset, 2, 12, 2, "..");
    offset = write_dirent(&mut image, offset, 11, 12, 2, "etc");
    offset = write_dirent(&mut image, offset, 13, 12, 1, "big");
    let remaining = (root + BLOCK - offset) as u16;
    write_dirent(&mut image, offset, 14, remaining, 1, "sparse");

    // /etc directory, block 10
    let etc = 10 * BLOCK;
    let mut offset = write_dirent(&mut image, etc, 11, 12, 2, ".");
    offset = write_dirent(&mut image, offset, 2, 12, 2, "..");
    let remaining = (etc + BLOCK - offset) as u16;
    write_dirent(&mut image, offset, 12, remaining, 1, "hosts");

    // /etc/hosts content, block 11
    image[11 * BLOCK..11 * BLOCK + HOSTS_CONTENT.len()].copy_from_slice(HOSTS_CONTENT);

    // /big content: direct blocks 12..=23, indirect table block 24
    // pointing at blocks 25..=28
    let big = big_file_content();
    for index in 0..12 {
        let block = 12 + index;
        image[block * BLOCK..(block + 1) * BLOCK]
            .copy_from_slice(&big[index * BLOCK..(index + 1) * BLOCK]);
    }
    for entry in 0..4u32 {
        put_u32(&mut image, 24 * BLOCK + entry as usize * 4, 25 + entry);
        let block = 25 + entry as usize;
        let source = (12 + entry as usize) * BLOCK;
        image[block * BLOCK..(block + 1) * BLOCK].copy_from_slice(&big[source..source + BLOCK]);
    }

    // /sparse: block 29, a hole, block 30
    image[29 * BLOCK..29 * BLOCK + 5].copy_from_slice(b"start");
    image[30 * BLOCK..30 * BLOCK + 3].copy_from_slice(b"end");

    // inodes
    write_inode(
        &mut image,
        &InodeSpec {
            number: 2,
            mode: 0o040755,
            size: BLOCK as u32,
            links: 3,
            blocks: [9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        },
    );
    write_inode(
        &mut image,
        &InodeSpec {
            number: 11,
            mode: 0o040755,
            size: BLOCK as u32,
            links: 2,
            blocks: [10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        },
    );
    write_inode(
        &mut image,
        &InodeSpec {
            number: 12,
            mode: 0o100644,
            size: HOSTS_CONTENT.len() as u32,
            links: 1,
            blocks: [11, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        },
    );
    write_inode(
        &mut image,
        &InodeSpec {
            number: 13,
            mode: 0o100644,
            size: big.len() as u32,
            links: 1,
            blocks: [12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 0, 0],
        },
    );
    write_inode(
        &mut image,
        &InodeSpec {
            number: 14,
            mode: 0o100644,
            size: 3 * BLOCK as u32,
            links: 1,
            blocks: [29, 0, 30, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        },
    );

    image
}

// ----------------------------------------------------------------------
// FAT32

const FAT_RESERVED: u32 = 32;
const FAT_SIZE_SECTORS: u32 = 547;
const FAT_TOTAL_SECTORS: u32 = 70_000;
const FIRST_DATA_SECTOR: u32 = FAT_RESERVED + FAT_SIZE_SECTORS;
const END_OF_CHAIN: u32 = 0x0fff_ffff;

fn fat_entry(image: &mut [u8], cluster: u32, value: u32) {
    let offset = (FAT_RESERVED as usize * SECTOR_SIZE) + cluster as usize * 4;
    put_u32(image, offset, value);
}

fn cluster_offset(cluster: u32) -> usize {
    (FIRST_DATA_SECTOR + (cluster - 2)) as usize * SECTOR_SIZE
}

fn short_entry(name83: &[u8; 11], attributes: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[..11].copy_from_slice(name83);
    entry[11] = attributes;
    put_u16(&mut entry, 20, (cluster >> 16) as u16);
    put_u16(&mut entry, 26, (cluster & 0xffff) as u16);
    put_u32(&mut entry, 28, size);
    entry
}

/// One long-file-name entry carrying 13 characters of `name` starting at
/// `chunk * 13`.
fn lfn_entry(name: &str, chunk: usize, last: bool) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[0] = (chunk + 1) as u8 | if last { 0x40 } else { 0 };
    entry[11] = 0x0f;
    let bytes = name.as_bytes();
    let positions = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
    for (index, &position) in positions.iter().enumerate() {
        let char_index = chunk * 13 + index;
        match char_index.cmp(&bytes.len()) {
            core::cmp::Ordering::Less => {
                entry[position] = bytes[char_index];
                entry[position + 1] = 0;
            }
            core::cmp::Ordering::Equal => {
                // terminator
                entry[position] = 0;
                entry[position + 1] = 0;
            }
            core::cmp::Ordering::Greater => {
                // padding
                entry[position] = 0xff;
                entry[position + 1] = 0xff;
            }
        }
    }
    entry
}

/// Writes a long name run plus its short entry at `offset`, returning
/// the offset behind it.
fn write_lfn_entry(
    image: &mut [u8],
    mut offset: usize,
    long_name: &str,
    name83: &[u8; 11],
    attributes: u8,
    cluster: u32,
    size: u32,
) -> usize {
    let chunks = (long_name.len() + 12) / 13;
    for chunk in (0..chunks).rev() {
        let entry = lfn_entry(long_name, chunk, chunk == chunks - 1);
        image[offset..offset + 32].copy_from_slice(&entry);
        offset += 32;
    }
    image[offset..offset + 32].copy_from_slice(&short_entry(name83, attributes, cluster, size));
    offset + 32
}

/// Builds a FAT32 volume (cluster size = one sector):
///
/// ```text
/// /foobarlongfolder/readme.txt   long file names on both levels
/// /boot.cfg                      plain 8.3 entry
/// /big.bin                       1300 bytes across three clusters
/// ```
pub fn fat32_image() -> Vec<u8> {
    // physical backing only up to the last used cluster
    let mut image = vec![0u8; cluster_offset(9)];

    // BPB
    put_u16(&mut image, 11, SECTOR_SIZE as u16);
    image[13] = 1; // sectors per cluster
    put_u16(&mut image, 14, FAT_RESERVED as u16);
    image[16] = 1; // one fat
    put_u16(&mut image, 17, 0); // no fat16 root entries
    put_u16(&mut image, 19, 0);
    put_u16(&mut image, 22, 0);
    put_u32(&mut image, 32, FAT_TOTAL_SECTORS);
    put_u32(&mut image, 36, FAT_SIZE_SECTORS);
    put_u32(&mut image, 44, 2); // root cluster
    image[510] = 0x55;
    image[511] = 0xaa;

    // allocation table
    fat_entry(&mut image, 0, 0x0fff_fff8);
    fat_entry(&mut image, 1, END_OF_CHAIN);
    fat_entry(&mut image, 2, END_OF_CHAIN); // root directory
    fat_entry(&mut image, 3, END_OF_CHAIN); // folder
    fat_entry(&mut image, 4, END_OF_CHAIN); // readme.txt
    fat_entry(&mut image, 5, END_OF_CHAIN); // boot.cfg
    fat_entry(&mut image, 6, 7); // big.bin ...
    fat_entry(&mut image, 7, 8);
    fat_entry(&mut image, 8, END_OF_CHAIN);

    // root directory, cluster 2
    let root = cluster_offset(2);
    let mut offset = write_lfn_entry(
        &mut image,
        root,
        "foobarlongfolder",
        b"FOOBAR~1   ",
        0x10,
        3,
        0,
    );
    image[offset..offset + 32]
        .copy_from_slice(&short_entry(b"BOOT    CFG", 0x20, 5, BOOT_CFG_CONTENT.len() as u32));
    offset += 32;
    image[offset..offset + 32].copy_from_slice(&short_entry(b"BIG     BIN", 0x20, 6, 1300));

    // the folder, cluster 3
    let folder = cluster_offset(3);
    image[folder..folder + 32].copy_from_slice(&short_entry(b".          ", 0x10, 3, 0));
    image[folder + 32..folder + 64].copy_from_slice(&short_entry(b"..         ", 0x10, 2, 0));
    write_lfn_entry(
        &mut image,
        folder + 64,
        "readme.txt",
        b"README  TXT",
        0x20,
        4,
        README_CONTENT.len() as u32,
    );

    // file contents
    let readme = cluster_offset(4);
    image[readme..readme + README_CONTENT.len()].copy_from_slice(README_CONTENT);
    let boot = cluster_offset(5);
    image[boot..boot + BOOT_CFG_CONTENT.len()].copy_from_slice(BOOT_CFG_CONTENT);
    let big = fat_big_content();
    let big_offset = cluster_offset(6);
    image[big_offset..big_offset + big.len()].copy_from_slice(&big);

    image
}

/// A volume whose cluster count lands in FAT12 territory.
pub fn fat_small_image() -> Vec<u8> {
    let mut image = vec![0u8; SECTOR_SIZE];
    put_u16(&mut image, 11, SECTOR_SIZE as u16);
    image[13] = 1;
    put_u16(&mut image, 14, 1);
    image[16] = 1;
    put_u16(&mut image, 19, 100); // total sectors (16 bit)
    put_u16(&mut image, 22, 1); // fat size (16 bit)
    image[510] = 0x55;
    image[511] = 0xaa;
    image
}

// ----------------------------------------------------------------------
// MBR wrappers

/// Start of the first partition in sectors.
pub const PARTITION_START_SECTOR: u32 = 2048;

fn mbr_wrap(partition_type: u8, filesystem: Vec<u8>) -> Vec<u8> {
    let offset = PARTITION_START_SECTOR as usize * SECTOR_SIZE;
    let mut image = vec![0u8; offset + filesystem.len()];
    image[446 + 4] = partition_type;
    put_u32(&mut image, 446 + 8, PARTITION_START_SECTOR);
    put_u32(
        &mut image,
        446 + 12,
        (filesystem.len() / SECTOR_SIZE) as u32,
    );
    image[510] = 0x55;
    image[511] = 0xaa;
    image[offset..].copy_from_slice(&filesystem);
    image
}

/// Full disk: MBR plus the ext2 volume as partition 1.
pub fn ext2_disk() -> Vec<u8> {
    mbr_wrap(PARTITION_TYPE_LINUX_NATIVE, ext2_image())
}

/// Full disk: MBR plus the FAT32 volume as partition 1.
pub fn fat32_disk() -> Vec<u8> {
    mbr_wrap(PARTITION_TYPE_FAT32_LBA, fat32_image())
}
