//! Boot-time block mapping.
//!
//! Before the heap exists the kernel needs an identity mapping plus the
//! high-half view of its own image. Both are installed with 2 MiB block
//! descriptors straight into a small pool of statically reserved tables;
//! the fine grained 4 KiB machinery of [`super::virt`] takes over once
//! the frame allocator is up.

use super::virt::{
    BlockDescriptor,
    MemoryType,
    TableDescriptor,
    TYPE_BLOCK,
    TYPE_TABLE,
};
use super::{
    PhysAddr,
    VirtAddr,
    TABLE_ENTRY_COUNT,
};

/// Virtual base of the high-half kernel mapping.
pub const KERNEL_OFFSET: VirtAddr = 0xC000_0000;

/// Size covered by one level 2 block descriptor.
pub const BLOCK_SIZE: u32 = 2 * 1024 * 1024;

/// Tables reserved for the bootstrap mapping; placed by the linker on
/// hardware, modelled as a fixed pool here.
const BOOT_TABLE_COUNT: usize = 8;

/// Nominal physical placement of the boot table pool.
const BOOT_TABLE_BASE: PhysAddr = 0x0010_0000;

/// The statically reserved boot translation tables: one global directory
/// plus a pool of middle directories filled with block descriptors.
pub struct BootTables {
    global: [u64; TABLE_ENTRY_COUNT],
    middle: [[u64; TABLE_ENTRY_COUNT]; BOOT_TABLE_COUNT],
    middle_used: usize,
}

impl core::fmt::Debug for BootTables {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootTables")
            .field("middle_used", &self.middle_used)
            .finish()
    }
}

impl Default for BootTables {
    fn default() -> Self {
        Self::new()
    }
}

impl BootTables {
    pub const fn new() -> Self {
        Self {
            global: [0; TABLE_ENTRY_COUNT],
            middle: [[0; TABLE_ENTRY_COUNT]; BOOT_TABLE_COUNT],
            middle_used: 0,
        }
    }

    /// Nominal physical address of middle table `index`.
    const fn middle_addr(index: usize) -> PhysAddr {
        BOOT_TABLE_BASE + (index as u64 + 1) * 4096
    }

    fn middle_index(addr: PhysAddr) -> usize {
        ((addr - BOOT_TABLE_BASE) / 4096 - 1) as usize
    }

    /// Installs one 2 MiB block mapping `virt -> phys`. Missing middle
    /// directories are taken from the static pool; running out of pool
    /// tables is a startup bug, not a runtime condition.
    pub fn map_block(&mut self, virt: VirtAddr, phys: PhysAddr) {
        assert_eq!(virt % BLOCK_SIZE, 0, "virt must be block aligned");
        assert_eq!(phys % BLOCK_SIZE as u64, 0, "phys must be block aligned");
        let pgd = (virt >> 30) as usize;
        let pmd = (virt >> 21) as usize & (TABLE_ENTRY_COUNT - 1);

        let middle = if self.global[pgd] == 0 {
            assert!(self.middle_used < BOOT_TABLE_COUNT, "boot table pool exhausted");
            let index = self.middle_used;
            self.middle_used += 1;
            let descriptor = TableDescriptor::new()
                .with_ty(TYPE_TABLE)
                .with_next_table(Self::middle_addr(index) >> 12);
            self.global[pgd] = descriptor.into();
            index
        } else {
            Self::middle_index(self.global[pgd] & 0x0000_00ff_ffff_f000)
        };

        let descriptor = BlockDescriptor::new()
            .with_ty(TYPE_BLOCK)
            .with_attr_index(MemoryType::Normal.attr_index())
            .with_shareability(MemoryType::Normal.shareability())
            .with_access_flag(true)
            .with_output_address((phys >> 21) as u32);
        self.middle[middle][pmd] = descriptor.into();
    }

    /// Installs the identity and the high-half mapping for a kernel image
    /// of `size` bytes starting at physical `phys_start`.
    pub fn setup(&mut self, phys_start: PhysAddr, size: u32) {
        let blocks = (size + BLOCK_SIZE - 1) / BLOCK_SIZE;
        for block in 0..blocks {
            let offset = block * BLOCK_SIZE;
            let phys = phys_start + offset as u64;
            // identity
            self.map_block(phys as VirtAddr, phys);
            // high half
            self.map_block(KERNEL_OFFSET + offset, phys);
        }
        log::debug!("boot mapping installed for {blocks} blocks from {phys_start:#x}");
    }

    /// Walks the boot tables; used to validate the startup mapping.
    pub fn resolve(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let pgd = (virt >> 30) as usize;
        let pmd = (virt >> 21) as usize & (TABLE_ENTRY_COUNT - 1);
        if self.global[pgd] == 0 {
            return None;
        }
        let middle = Self::middle_index(self.global[pgd] & 0x0000_00ff_ffff_f000);
        let raw = self.middle[middle][pmd];
        if raw == 0 {
            return None;
        }
        let base = raw & 0x0000_00ff_ffe0_0000;
        Some(base | (virt as u64 & (BLOCK_SIZE as u64 - 1)))
    }
}
