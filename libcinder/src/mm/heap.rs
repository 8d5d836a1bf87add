//! The kernel heap.
//!
//! A block allocator over a contiguous kernel virtual range, tracked by
//! three ordered indexes: free blocks by address, free blocks by size and
//! used blocks by address. The early variant serves from a fixed static
//! arena before paging is up; the normal variant is backed by the virtual
//! memory layer and grows and shrinks in whole extension units.

use super::VirtAddr;
use alloc::collections::{
    BTreeMap,
    BTreeSet,
};
use libember::error::ErrorKind;

/// Begin of the managed kernel heap range.
pub const HEAP_START: VirtAddr = 0xD000_0000;
/// Initial mapped size of the normal heap.
pub const HEAP_MIN_SIZE: u32 = 0x10_0000;
/// Upper bound of the managed range.
pub const HEAP_MAX_SIZE: u32 = 0x400_0000;
/// Growth / shrink granularity, a whole number of pages.
pub const HEAP_EXTENSION: u32 = 0x10_0000;

/// Accounting size of the header preceding every payload.
pub const BLOCK_HEADER_SIZE: u32 = 16;

/// Errors of the heap proper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    OutOfMemory,
    /// The address is not the payload of a live allocation.
    DoubleFree,
}

impl From<HeapError> for ErrorKind {
    fn from(value: HeapError) -> Self {
        match value {
            HeapError::OutOfMemory => Self::OutOfMemory,
            HeapError::DoubleFree => Self::InvalidArgument,
        }
    }
}

/// Seam towards the virtual memory layer: the normal heap maps and unmaps
/// its extension units through this.
pub trait HeapBacking {
    fn extend(&mut self, start: VirtAddr, size: u32) -> Result<(), ErrorKind>;
    fn shrink(&mut self, start: VirtAddr, size: u32);
}

/// The shared block algebra of both heap states.
///
/// A block occupies `[start, start + HEADER + size)` where `size` is the
/// payload size; `start + HEADER` is the address handed out to callers.
/// The free set is indexed twice, by address and by `(size, address)`;
/// the used set by address.
#[derive(Debug, Default)]
struct HeapArea {
    start: VirtAddr,
    end: VirtAddr,
    free_by_address: BTreeMap<u32, u32>,
    free_by_size: BTreeSet<(u32, u32)>,
    used: BTreeMap<u32, u32>,
}

impl HeapArea {
    fn new(start: VirtAddr, size: u32) -> Self {
        let mut area = Self {
            start,
            end: start + size,
            ..Self::default()
        };
        area.insert_free(start, size - BLOCK_HEADER_SIZE);
        area
    }

    fn insert_free(&mut self, start: u32, size: u32) {
        self.free_by_address.insert(start, size);
        self.free_by_size.insert((size, start));
    }

    fn remove_free(&mut self, start: u32, size: u32) {
        self.free_by_address.remove(&start);
        self.free_by_size.remove(&(size, start));
    }

    /// Picks the block to allocate from: an exact size match with fitting
    /// alignment, otherwise the largest free block.
    fn candidate(&self, size: u32, alignment: u32) -> Option<(u32, u32)> {
        if let Some(&(found_size, start)) = self.free_by_size.range((size, 0)..(size + 1, 0)).next()
        {
            if (start + BLOCK_HEADER_SIZE) % alignment == 0 {
                return Some((start, found_size));
            }
        }
        self.free_by_size.iter().next_back().map(|&(s, a)| (a, s))
    }

    /// Splits the free block `(start, size)` for an allocation of
    /// `wanted` bytes at `alignment` and registers the pieces. Returns
    /// the payload address, or `None` when the block cannot satisfy the
    /// request.
    fn carve(&mut self, start: u32, size: u32, wanted: u32, alignment: u32) -> Option<u32> {
        let real_size = wanted + BLOCK_HEADER_SIZE;
        let payload = start + BLOCK_HEADER_SIZE;

        if size == wanted {
            // exact match: alignment has been checked by the candidate
            // search, a mismatch still ends up in the offset path below
            if payload % alignment == 0 {
                self.remove_free(start, size);
                self.used.insert(start, size);
                return Some(payload);
            }
        } else if size <= real_size {
            return None;
        }

        if payload % alignment == 0 {
            // allocation at the block start, remnant after it; a pad keeps
            // the remnant header aligned and stays accounted to the
            // allocation so the extent remains fully covered
            let pad = match (start + real_size) % 4 {
                0 => 0,
                misalignment => 4 - misalignment,
            };
            let leftover = size - wanted - pad;
            self.remove_free(start, size);
            if leftover >= BLOCK_HEADER_SIZE + 1 {
                self.insert_free(start + real_size + pad, leftover - BLOCK_HEADER_SIZE);
                self.used.insert(start, wanted + pad);
            } else {
                // remainder too small for a block, the allocation absorbs it
                self.used.insert(start, size);
            }
            return Some(payload);
        }

        // misaligned block: a leading remnant moves the allocation up to
        // the next fitting boundary, an optional trailing remnant keeps
        // the rest
        let mut alignment_offset = alignment - payload % alignment;
        while alignment_offset < real_size {
            alignment_offset += alignment;
        }
        alignment_offset -= BLOCK_HEADER_SIZE;
        let fits = size >= alignment_offset
            && size - alignment_offset > real_size
            && size - alignment_offset >= real_size + BLOCK_HEADER_SIZE + 1;
        if !fits {
            return None;
        }

        self.remove_free(start, size);
        let new_start = payload + alignment_offset;
        let following_size = alignment_offset + real_size + BLOCK_HEADER_SIZE;
        if size > following_size {
            self.insert_free(new_start + real_size, size - following_size);
            self.used.insert(new_start, wanted);
        } else {
            // trailing space too small for a block, absorb it
            self.used.insert(new_start, size - alignment_offset - BLOCK_HEADER_SIZE);
        }
        // leading remnant keeps the original start
        self.insert_free(start, new_start - payload);
        Some(new_start + BLOCK_HEADER_SIZE)
    }

    /// Releases a payload address back into the free sets and merges with
    /// both neighbours until nothing merges any more.
    fn release(&mut self, payload: u32) -> Result<(), HeapError> {
        if payload < self.start + BLOCK_HEADER_SIZE {
            return Err(HeapError::DoubleFree);
        }
        let mut start = payload - BLOCK_HEADER_SIZE;
        let mut size = self.used.remove(&start).ok_or(HeapError::DoubleFree)?;
        self.insert_free(start, size);

        loop {
            let mut merged = false;
            // left neighbour: its end touches our header
            if let Some((&left_start, &left_size)) = self.free_by_address.range(..start).next_back()
            {
                if left_start + BLOCK_HEADER_SIZE + left_size == start {
                    self.remove_free(left_start, left_size);
                    self.remove_free(start, size);
                    start = left_start;
                    size = left_size + BLOCK_HEADER_SIZE + size;
                    self.insert_free(start, size);
                    merged = true;
                }
            }
            // right neighbour: our end touches its header
            let end = start + BLOCK_HEADER_SIZE + size;
            if let Some(&right_size) = self.free_by_address.get(&end) {
                self.remove_free(end, right_size);
                self.remove_free(start, size);
                size += BLOCK_HEADER_SIZE + right_size;
                self.insert_free(start, size);
                merged = true;
            }
            if !merged {
                break;
            }
        }
        Ok(())
    }

    /// Live extent coverage check: used and free blocks must tile the
    /// whole area without gaps or overlaps.
    #[cfg(test)]
    fn assert_coverage(&self) {
        let mut blocks: std::vec::Vec<(u32, u32)> = self
            .free_by_address
            .iter()
            .chain(self.used.iter())
            .map(|(&start, &size)| (start, size))
            .collect();
        blocks.sort_unstable();
        let mut cursor = self.start;
        for (start, size) in blocks {
            assert_eq!(start, cursor, "gap or overlap at {start:#x}");
            cursor = start + BLOCK_HEADER_SIZE + size;
        }
        assert_eq!(cursor, self.end, "area end mismatch");
        assert_eq!(self.free_by_address.len(), self.free_by_size.len());
    }
}

/// The kernel heap in one of its two lifecycle states.
#[derive(Debug)]
pub enum Heap<B> {
    /// Before paging: a fixed arena, no growth.
    Early(HeapArea),
    /// Growable range backed by the virtual memory layer.
    Normal { area: HeapArea, backing: B },
}

impl<B: HeapBacking> Heap<B> {
    /// Fixed-arena heap for the early boot phase.
    pub fn early(start: VirtAddr, size: u32) -> Self {
        log::debug!("early heap at {start:#x}, size {size:#x}");
        Heap::Early(HeapArea::new(start, size))
    }

    /// Transition to the growable heap. The early arena (if any) is
    /// abandoned; a fresh set of indexes serves
    /// `[HEAP_START, HEAP_START + HEAP_MIN_SIZE)`.
    pub fn normal(mut backing: B) -> Result<Self, ErrorKind> {
        backing.extend(HEAP_START, HEAP_MIN_SIZE)?;
        log::debug!("normal heap at {HEAP_START:#x}, size {HEAP_MIN_SIZE:#x}");
        Ok(Heap::Normal {
            area: HeapArea::new(HEAP_START, HEAP_MIN_SIZE),
            backing,
        })
    }

    fn area(&self) -> &HeapArea {
        match self {
            Heap::Early(area) | Heap::Normal { area, .. } => area,
        }
    }

    fn area_mut(&mut self) -> &mut HeapArea {
        match self {
            Heap::Early(area) | Heap::Normal { area, .. } => area,
        }
    }

    /// Currently mapped size of the heap range.
    pub fn mapped_size(&self) -> u32 {
        let area = self.area();
        area.end - area.start
    }

    /// Allocates `size` bytes whose address is a multiple of `alignment`.
    pub fn allocate(&mut self, alignment: u32, size: u32) -> Result<VirtAddr, HeapError> {
        assert!(alignment > 0, "alignment must not be zero");
        loop {
            let area = self.area_mut();
            if let Some((start, found)) = area.candidate(size, alignment) {
                if let Some(payload) = area.carve(start, found, size, alignment) {
                    log::trace!("allocated {size:#x} @ {payload:#x}");
                    return Ok(payload);
                }
            }
            // nothing fits: the early heap is done, the normal heap grows
            // by one extension and retries
            match self {
                Heap::Early(_) => return Err(HeapError::OutOfMemory),
                Heap::Normal { area, backing } => {
                    if area.end - HEAP_START + HEAP_EXTENSION > HEAP_MAX_SIZE {
                        return Err(HeapError::OutOfMemory);
                    }
                    backing
                        .extend(area.end, HEAP_EXTENSION)
                        .map_err(|_| HeapError::OutOfMemory)?;
                    let new_start = area.end;
                    area.end += HEAP_EXTENSION;
                    // register the extension as a block and release it so
                    // it merges with a free block ending at the old top;
                    // without the merge nothing larger than one extension
                    // could ever be satisfied
                    area.used.insert(new_start, HEAP_EXTENSION - BLOCK_HEADER_SIZE);
                    area.release(new_start + BLOCK_HEADER_SIZE)
                        .expect("fresh extension block");
                    log::debug!("extended heap to {:#x}", area.end);
                }
            }
        }
    }

    /// Frees a payload address, merges neighbours and gives whole unused
    /// extensions back to the virtual memory layer.
    pub fn free(&mut self, addr: VirtAddr) -> Result<(), HeapError> {
        self.area_mut().release(addr)?;
        log::trace!("freed {addr:#x}");
        self.shrink();
        Ok(())
    }

    /// Trims the topmost free block by whole extensions once it grows
    /// beyond one extension past the minimum size.
    fn shrink(&mut self) {
        let Heap::Normal { area, backing } = self else {
            return;
        };
        let Some((&start, &size)) = area.free_by_address.iter().next_back() else {
            return;
        };
        let end = start + BLOCK_HEADER_SIZE + size;
        if end != area.end {
            return;
        }
        if end <= HEAP_START + HEAP_MIN_SIZE || size <= HEAP_EXTENSION {
            return;
        }
        let above_minimum = end - (HEAP_START + HEAP_MIN_SIZE);
        let mut trim =
            core::cmp::min(above_minimum / HEAP_EXTENSION, size / HEAP_EXTENSION) * HEAP_EXTENSION;
        // the shrunken block keeps its header and at least one byte
        if trim >= size {
            trim -= HEAP_EXTENSION;
        }
        if trim == 0 {
            return;
        }
        area.remove_free(start, size);
        area.insert_free(start, size - trim);
        area.end -= trim;
        backing.shrink(area.end, trim);
        log::debug!("shrunk heap to {:#x}", area.end);
    }

    /// Number of live allocations.
    pub fn used_count(&self) -> usize {
        self.area().used.len()
    }
}

/// Backing that projects heap extensions into the kernel context through
/// the virtual memory layer.
#[derive(Debug)]
pub struct KernelHeapBacking<M: super::phys::PhysMem> {
    vm: super::virt::VirtualMemory<M>,
    context: super::virt::ContextId,
}

impl<M: super::phys::PhysMem> KernelHeapBacking<M> {
    pub fn new(vm: super::virt::VirtualMemory<M>, context: super::virt::ContextId) -> Self {
        Self { vm, context }
    }

    pub fn vm(&self) -> &super::virt::VirtualMemory<M> {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut super::virt::VirtualMemory<M> {
        &mut self.vm
    }
}

impl<M: super::phys::PhysMem> HeapBacking for KernelHeapBacking<M> {
    fn extend(&mut self, start: VirtAddr, size: u32) -> Result<(), ErrorKind> {
        use super::virt::{
            MemoryType,
            PagePermission,
        };
        let mut mapped = start;
        while mapped < start + size {
            let result = self.vm.map_random(
                self.context,
                mapped,
                MemoryType::Normal,
                PagePermission::READ | PagePermission::WRITE,
            );
            if let Err(kind) = result {
                // roll the partial extension back
                let mut cursor = start;
                while cursor < mapped {
                    let _ = self.vm.unmap(self.context, cursor, true);
                    cursor += super::PAGE_SIZE as u32;
                }
                return Err(kind);
            }
            mapped += super::PAGE_SIZE as u32;
        }
        Ok(())
    }

    fn shrink(&mut self, start: VirtAddr, size: u32) {
        let mut cursor = start;
        while cursor < start + size {
            let _ = self.vm.unmap(self.context, cursor, true);
            cursor += super::PAGE_SIZE as u32;
        }
    }
}
