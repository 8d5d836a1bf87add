//! LPAE long-descriptor paging.
//!
//! Three translation levels (global directory, middle directory, page
//! table), each a 4 KiB table of 512 64-bit descriptors, mapping 4 KiB
//! pages with up to 40 bit physical output addresses. Table edits go
//! through the temporary window; the window must be drained again before
//! any public operation returns.

use super::phys::PhysMem;
use super::temp::TempWindow;
use super::{
    PhysAddr,
    VirtAddr,
    PAGE_SIZE,
    PHYS_ADDR_LIMIT,
    TABLE_ENTRY_COUNT,
};
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use bitflags::bitflags;
use libember::error::ErrorKind;

/// Physical address field of a descriptor, bits 39:12.
const ADDRESS_MASK: u64 = 0x0000_00ff_ffff_f000;

/// Descriptor type value for a next-level table reference.
pub(super) const TYPE_TABLE: u8 = 3;
/// Descriptor type value for a level 3 page entry.
const TYPE_PAGE: u8 = 3;
/// Descriptor type value for a level 2 block entry.
pub(super) const TYPE_BLOCK: u8 = 1;

/// Index into the global directory (level 1).
const fn pgd_index(vaddr: VirtAddr) -> usize {
    (vaddr >> 30) as usize & (TABLE_ENTRY_COUNT - 1)
}

/// Index into the middle directory (level 2).
const fn pmd_index(vaddr: VirtAddr) -> usize {
    (vaddr >> 21) as usize & (TABLE_ENTRY_COUNT - 1)
}

/// Index into the page table (level 3).
const fn pte_index(vaddr: VirtAddr) -> usize {
    (vaddr >> 12) as usize & (TABLE_ENTRY_COUNT - 1)
}

/// Reference to a next-level translation table.
#[bitfield(u64)]
pub struct TableDescriptor {
    #[bits(2)]
    pub(super) ty: u8,
    #[bits(10)]
    _ignored: u16,
    /// Next-level table address, bits 39:12.
    #[bits(28)]
    pub(super) next_table: u64,
    #[bits(12)]
    _res0: u16,
    #[bits(7)]
    _ignored2: u8,
    pxn_table: bool,
    xn_table: bool,
    #[bits(2)]
    ap_table: u8,
    ns_table: bool,
}

/// Level 3 page descriptor.
#[bitfield(u64)]
pub struct PageDescriptor {
    #[bits(2)]
    pub(super) ty: u8,
    /// MAIR attribute index for the memory type.
    #[bits(3)]
    attr_index: u8,
    non_secure: bool,
    /// AP[2:1]: kernel rw = 0, user rw = 1, kernel ro = 2, user ro = 3.
    #[bits(2)]
    access_permission: u8,
    #[bits(2)]
    shareability: u8,
    /// Access flag; a fault is taken when unset.
    access_flag: bool,
    not_global: bool,
    /// Output page address, bits 39:12.
    #[bits(28)]
    output_address: u64,
    #[bits(12)]
    _res0: u16,
    contiguous: bool,
    privileged_execute_never: bool,
    execute_never: bool,
    #[bits(9)]
    _ignored: u16,
}

/// Level 2 block descriptor covering 2 MiB. Only used by the bootstrap
/// mapping before the heap exists.
#[bitfield(u64)]
pub struct BlockDescriptor {
    #[bits(2)]
    pub(super) ty: u8,
    #[bits(3)]
    pub(super) attr_index: u8,
    non_secure: bool,
    #[bits(2)]
    access_permission: u8,
    #[bits(2)]
    pub(super) shareability: u8,
    pub(super) access_flag: bool,
    not_global: bool,
    #[bits(9)]
    _res0: u16,
    /// Output block address, bits 39:21.
    #[bits(19)]
    pub(super) output_address: u32,
    #[bits(12)]
    _res1: u16,
    contiguous: bool,
    privileged_execute_never: bool,
    execute_never: bool,
    #[bits(9)]
    _ignored: u16,
}

/// Memory type of a mapping; selects the MAIR attribute index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    StronglyOrdered,
    Device,
    NormalNonCacheable,
    Normal,
}

impl MemoryType {
    pub(super) const fn attr_index(self) -> u8 {
        match self {
            Self::StronglyOrdered => 0,
            Self::Device => 1,
            Self::NormalNonCacheable => 2,
            Self::Normal => 3,
        }
    }

    pub(super) const fn shareability(self) -> u8 {
        match self {
            // device-like memory is outer shareable
            Self::StronglyOrdered | Self::Device => 0b01,
            Self::NormalNonCacheable | Self::Normal => 0b11,
        }
    }
}

bitflags! {
    /// Permissions of a mapping.
    pub struct PagePermission: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// Whether a context translates kernel or user addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Kernel,
    User,
}

/// One address space: the physical address of its global directory plus
/// its type tag.
#[derive(Debug)]
pub struct Context {
    global_directory: PhysAddr,
    kind: ContextKind,
}

impl Context {
    pub const fn kind(&self) -> ContextKind {
        self.kind
    }

    pub const fn global_directory(&self) -> PhysAddr {
        self.global_directory
    }
}

/// Handle to a context slot inside [`VirtualMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextId(usize);

/// The virtual memory core: owns the frame allocator seam, the temporary
/// window and every live context.
#[derive(Debug)]
pub struct VirtualMemory<M: PhysMem> {
    phys: M,
    temp: TempWindow,
    contexts: Vec<Option<Context>>,
    current: Option<ContextId>,
    flushes: u64,
}

impl<M: PhysMem> VirtualMemory<M> {
    pub fn new(phys: M) -> Self {
        Self {
            phys,
            temp: TempWindow::new(),
            contexts: Vec::new(),
            current: None,
            flushes: 0,
        }
    }

    /// Access to the physical memory seam (content page inspection).
    pub fn phys(&self) -> &M {
        &self.phys
    }

    pub fn phys_mut(&mut self) -> &mut M {
        &mut self.phys
    }

    /// Number of flushes issued so far; on hardware each one is a TLB
    /// maintenance operation.
    pub const fn flush_count(&self) -> u64 {
        self.flushes
    }

    fn context(&self, id: ContextId) -> Result<&Context, ErrorKind> {
        self.contexts
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(ErrorKind::InvalidArgument)
    }

    /// Creates a new, empty context of the given kind.
    pub fn create_context(&mut self, kind: ContextKind) -> Result<ContextId, ErrorKind> {
        let global_directory = self.new_table()?;
        let context = Context {
            global_directory,
            kind,
        };
        let id = match self.contexts.iter().position(Option::is_none) {
            Some(slot) => {
                self.contexts[slot] = Some(context);
                ContextId(slot)
            }
            None => {
                self.contexts.push(Some(context));
                ContextId(self.contexts.len() - 1)
            }
        };
        log::debug!("created {kind:?} context {id:?} (gd = {global_directory:#x})");
        debug_assert_eq!(self.temp.in_use(), 0);
        Ok(id)
    }

    /// Switches the active context.
    pub fn set_context(&mut self, id: ContextId) -> Result<(), ErrorKind> {
        self.context(id)?;
        self.current = Some(id);
        self.flush_all();
        Ok(())
    }

    pub const fn current_context(&self) -> Option<ContextId> {
        self.current
    }

    /// TLB maintenance for one address. Counted only in the hosted build.
    pub fn flush_address(&mut self, _id: ContextId, vaddr: VirtAddr) {
        log::trace!("flush address {vaddr:#x}");
        self.flushes += 1;
    }

    /// Full TLB flush.
    pub fn flush_all(&mut self) {
        log::trace!("flush all");
        self.flushes += 1;
    }

    /// Allocates a new, zeroed translation table frame.
    fn new_table(&mut self) -> Result<PhysAddr, ErrorKind> {
        let addr = self.phys.alloc_frame().ok_or(ErrorKind::OutOfMemory)?;
        let mapping = match self.temp.map(addr, 1) {
            Some(mapping) => mapping,
            None => {
                self.phys.free_frame(addr);
                return Err(ErrorKind::OutOfMemory);
            }
        };
        self.phys.frame_mut(mapping.phys()).fill(0);
        self.temp.unmap(mapping);
        Ok(addr)
    }

    fn read_entry(&mut self, table: PhysAddr, index: usize) -> Result<u64, ErrorKind> {
        let mapping = self.temp.map(table, 1).ok_or(ErrorKind::OutOfMemory)?;
        let bytes = self.phys.frame(mapping.phys());
        let raw = u64::from_le_bytes(bytes[index * 8..index * 8 + 8].try_into().unwrap());
        self.temp.unmap(mapping);
        Ok(raw)
    }

    fn write_entry(&mut self, table: PhysAddr, index: usize, raw: u64) -> Result<(), ErrorKind> {
        let mapping = self.temp.map(table, 1).ok_or(ErrorKind::OutOfMemory)?;
        let bytes = self.phys.frame_mut(mapping.phys());
        bytes[index * 8..index * 8 + 8].copy_from_slice(&raw.to_le_bytes());
        self.temp.unmap(mapping);
        Ok(())
    }

    /// Returns the page table responsible for `vaddr`, synthesising the
    /// missing intermediate levels. A failure rolls the partially
    /// installed tables back, leaving the context unchanged.
    fn table_for(&mut self, id: ContextId, vaddr: VirtAddr) -> Result<PhysAddr, ErrorKind> {
        let context = self.context(id)?;
        let global_directory = context.global_directory;
        let user = context.kind == ContextKind::User;
        let pgd = pgd_index(vaddr);
        let pmd = pmd_index(vaddr);

        // level 1 entry
        let mut created_middle = None;
        let raw = self.read_entry(global_directory, pgd)?;
        let middle_table = if raw == 0 {
            let table = self.new_table()?;
            let descriptor = TableDescriptor::new()
                .with_ty(TYPE_TABLE)
                .with_next_table(table >> 12)
                .with_ns_table(user);
            self.write_entry(global_directory, pgd, descriptor.into())?;
            created_middle = Some(table);
            table
        } else {
            raw & ADDRESS_MASK
        };

        // level 2 entry
        let raw = self.read_entry(middle_table, pmd)?;
        let page_table = if raw == 0 {
            match self.new_table() {
                Ok(table) => {
                    let descriptor = TableDescriptor::new()
                        .with_ty(TYPE_TABLE)
                        .with_next_table(table >> 12);
                    self.write_entry(middle_table, pmd, descriptor.into())?;
                    table
                }
                Err(kind) => {
                    // revert made changes
                    if let Some(table) = created_middle {
                        self.write_entry(global_directory, pgd, 0)?;
                        self.phys.free_frame(table);
                    }
                    return Err(kind);
                }
            }
        } else {
            raw & ADDRESS_MASK
        };
        Ok(page_table)
    }

    /// Maps `vaddr` to `paddr` in the given context. Fails with
    /// [`ErrorKind::Exists`] when the entry is already populated.
    pub fn map(
        &mut self,
        id: ContextId,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        memory: MemoryType,
        permission: PagePermission,
    ) -> Result<(), ErrorKind> {
        if paddr % PAGE_SIZE as u64 != 0 || paddr >= PHYS_ADDR_LIMIT {
            return Err(ErrorKind::InvalidArgument);
        }
        let kernel = self.context(id)?.kind == ContextKind::Kernel;
        let table = self.table_for(id, vaddr)?;
        let index = pte_index(vaddr);
        let raw = self.read_entry(table, index)?;
        if raw != 0 {
            debug_assert_eq!(self.temp.in_use(), 0);
            return Err(ErrorKind::Exists);
        }

        let mut descriptor = PageDescriptor::new()
            .with_ty(TYPE_PAGE)
            .with_output_address(paddr >> 12)
            .with_access_flag(true)
            .with_attr_index(memory.attr_index())
            .with_shareability(memory.shareability())
            // default is not executable
            .with_execute_never(true);
        if permission.contains(PagePermission::EXECUTE) {
            descriptor.set_execute_never(false);
        }
        if permission.contains(PagePermission::READ) {
            descriptor.set_access_permission(if kernel { 2 } else { 3 });
        }
        // overwrite with read / write mapping
        if permission.contains(PagePermission::WRITE) {
            descriptor.set_access_permission(if kernel { 0 } else { 1 });
        }
        self.write_entry(table, index, descriptor.into())?;
        self.flush_address(id, vaddr);
        debug_assert_eq!(self.temp.in_use(), 0);
        Ok(())
    }

    /// Allocates a fresh physical page and maps it at `vaddr`.
    pub fn map_random(
        &mut self,
        id: ContextId,
        vaddr: VirtAddr,
        memory: MemoryType,
        permission: PagePermission,
    ) -> Result<PhysAddr, ErrorKind> {
        let paddr = self.phys.alloc_frame().ok_or(ErrorKind::OutOfMemory)?;
        match self.map(id, vaddr, paddr, memory, permission) {
            Ok(()) => Ok(paddr),
            Err(kind) => {
                self.phys.free_frame(paddr);
                Err(kind)
            }
        }
    }

    /// Removes a mapping; unmapping an absent entry is a no-op success.
    pub fn unmap(&mut self, id: ContextId, vaddr: VirtAddr, free_phys: bool) -> Result<(), ErrorKind> {
        let global_directory = self.context(id)?.global_directory;
        let raw = self.read_entry(global_directory, pgd_index(vaddr))?;
        if raw == 0 {
            return Ok(());
        }
        let middle = raw & ADDRESS_MASK;
        let raw = self.read_entry(middle, pmd_index(vaddr))?;
        if raw == 0 {
            return Ok(());
        }
        let table = raw & ADDRESS_MASK;
        let index = pte_index(vaddr);
        let raw = self.read_entry(table, index)?;
        if raw == 0 {
            return Ok(());
        }
        self.write_entry(table, index, 0)?;
        if free_phys {
            self.phys.free_frame(raw & ADDRESS_MASK);
        }
        self.flush_address(id, vaddr);
        debug_assert_eq!(self.temp.in_use(), 0);
        Ok(())
    }

    /// Physical address `vaddr` resolves to, if mapped.
    pub fn resolve(&mut self, id: ContextId, vaddr: VirtAddr) -> Option<PhysAddr> {
        let global_directory = self.context(id).ok()?.global_directory;
        let raw = self.read_entry(global_directory, pgd_index(vaddr)).ok()?;
        if raw == 0 {
            return None;
        }
        let raw = self.read_entry(raw & ADDRESS_MASK, pmd_index(vaddr)).ok()?;
        if raw == 0 {
            return None;
        }
        let raw = self.read_entry(raw & ADDRESS_MASK, pte_index(vaddr)).ok()?;
        if raw == 0 {
            return None;
        }
        Some((raw & ADDRESS_MASK) | (vaddr as u64 & (PAGE_SIZE as u64 - 1)))
    }

    pub fn is_mapped(&mut self, id: ContextId, vaddr: VirtAddr) -> bool {
        self.resolve(id, vaddr).is_some()
    }

    /// Deep-copies a context: every translation table and every mapped
    /// content page is duplicated byte for byte.
    pub fn fork_context(&mut self, id: ContextId) -> Result<ContextId, ErrorKind> {
        let kind = self.context(id)?.kind;
        let source_gd = self.context(id)?.global_directory;
        let forked = self.create_context(kind)?;
        match self.fork_global_directory(source_gd, forked) {
            Ok(()) => {
                debug_assert_eq!(self.temp.in_use(), 0);
                Ok(forked)
            }
            Err(kind) => {
                // roll the half-built copy back completely
                self.destroy_context(forked, false)?;
                Err(kind)
            }
        }
    }

    fn fork_global_directory(
        &mut self,
        source_gd: PhysAddr,
        forked: ContextId,
    ) -> Result<(), ErrorKind> {
        let forked_gd = self.context(forked)?.global_directory;
        for pgd in 0..TABLE_ENTRY_COUNT {
            let raw = self.read_entry(source_gd, pgd)?;
            if raw == 0 {
                continue;
            }
            let middle_forked = self.new_table()?;
            self.write_entry(forked_gd, pgd, (raw & !ADDRESS_MASK) | middle_forked)?;
            self.fork_middle_directory(raw & ADDRESS_MASK, middle_forked)?;
        }
        Ok(())
    }

    fn fork_middle_directory(
        &mut self,
        source: PhysAddr,
        forked: PhysAddr,
    ) -> Result<(), ErrorKind> {
        for pmd in 0..TABLE_ENTRY_COUNT {
            let raw = self.read_entry(source, pmd)?;
            if raw == 0 {
                continue;
            }
            let table_forked = self.new_table()?;
            self.write_entry(forked, pmd, (raw & !ADDRESS_MASK) | table_forked)?;
            self.fork_table(raw & ADDRESS_MASK, table_forked)?;
        }
        Ok(())
    }

    fn fork_table(&mut self, source: PhysAddr, forked: PhysAddr) -> Result<(), ErrorKind> {
        for pte in 0..TABLE_ENTRY_COUNT {
            let raw = self.read_entry(source, pte)?;
            if raw == 0 {
                continue;
            }
            let page_forked = self.phys.alloc_frame().ok_or(ErrorKind::OutOfMemory)?;
            // copy the page content through two window mappings
            let from = match self.temp.map(raw & ADDRESS_MASK, 1) {
                Some(mapping) => mapping,
                None => {
                    self.phys.free_frame(page_forked);
                    return Err(ErrorKind::OutOfMemory);
                }
            };
            let to = match self.temp.map(page_forked, 1) {
                Some(mapping) => mapping,
                None => {
                    self.temp.unmap(from);
                    self.phys.free_frame(page_forked);
                    return Err(ErrorKind::OutOfMemory);
                }
            };
            let content: [u8; PAGE_SIZE] = self.phys.frame(from.phys()).try_into().unwrap();
            self.phys.frame_mut(to.phys()).copy_from_slice(&content);
            self.temp.unmap(to);
            self.temp.unmap(from);
            // keep the attributes, replace the output address
            self.write_entry(forked, pte, (raw & !ADDRESS_MASK) | page_forked)?;
        }
        Ok(())
    }

    /// Tears a context down top-down. With `unmap_only` the mapped leaf
    /// pages stay allocated and the context itself survives (emptied);
    /// otherwise everything including the context is released. Destroying
    /// the running context without `unmap_only` fails with
    /// [`ErrorKind::InUse`].
    pub fn destroy_context(&mut self, id: ContextId, unmap_only: bool) -> Result<(), ErrorKind> {
        if self.current == Some(id) && !unmap_only {
            return Err(ErrorKind::InUse);
        }
        let global_directory = self.context(id)?.global_directory;
        for pgd in 0..TABLE_ENTRY_COUNT {
            let raw = self.read_entry(global_directory, pgd)?;
            if raw == 0 {
                continue;
            }
            let middle = raw & ADDRESS_MASK;
            for pmd in 0..TABLE_ENTRY_COUNT {
                let raw = self.read_entry(middle, pmd)?;
                if raw == 0 {
                    continue;
                }
                let table = raw & ADDRESS_MASK;
                if !unmap_only {
                    for pte in 0..TABLE_ENTRY_COUNT {
                        let raw = self.read_entry(table, pte)?;
                        if raw != 0 {
                            self.phys.free_frame(raw & ADDRESS_MASK);
                        }
                    }
                }
                self.phys.free_frame(table);
            }
            self.phys.free_frame(middle);
            self.write_entry(global_directory, pgd, 0)?;
        }
        if !unmap_only {
            self.phys.free_frame(global_directory);
            self.contexts[id.0] = None;
        }
        self.flush_all();
        debug_assert_eq!(self.temp.in_use(), 0);
        Ok(())
    }
}
