//! Synthetic ELF32/ARM images and an in-memory process environment for
//! the loader tests. The builder lays every table at a fixed offset
//! inside a single loadable page-sized segment.

use crate::elf;
use crate::env::{
    FileId,
    LoaderEnv,
    Protection,
};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use libember::error::ErrorKind;

/// Fixed layout of a built image (offsets relative to the image base).
pub const OFF_STRTAB: u32 = 0x100;
pub const STRTAB_SIZE: u32 = 0x100;
pub const OFF_SYMTAB: u32 = 0x200;
pub const OFF_HASH: u32 = 0x300;
pub const OFF_REL: u32 = 0x400;
pub const OFF_JMPREL: u32 = 0x500;
pub const OFF_GOT: u32 = 0x600;
pub const OFF_DATA: u32 = 0x700;
pub const OFF_INIT_ARRAY: u32 = 0x800;
pub const OFF_FINI_ARRAY: u32 = 0x880;
pub const OFF_DYNAMIC: u32 = 0x900;
pub const OFF_CODE: u32 = 0xb00;
pub const IMAGE_SIZE: u32 = 0x1000;

/// Builds one single-LOAD shared object or executable image.
#[derive(Debug)]
pub struct ElfBuilder {
    base: u32,
    gnu_hash: bool,
    with_rela: bool,
    with_pltgot: bool,
    symbols: Vec<(String, u32, u32, bool)>,
    needed: Vec<String>,
    rels: Vec<(u32, u32, u32)>,
    jmprels: Vec<(u32, u32, u32)>,
    init: Option<u32>,
    fini: Option<u32>,
    init_array: Vec<u32>,
    fini_array: Vec<u32>,
    content: Vec<(u32, Vec<u8>)>,
}

impl ElfBuilder {
    /// A library image: preferred base zero, always relocated.
    pub fn library() -> Self {
        Self::at_base(0)
    }

    /// An image with a fixed preferred base; mapped there and therefore
    /// not relocated.
    pub fn at_base(base: u32) -> Self {
        Self {
            base,
            gnu_hash: false,
            with_rela: false,
            with_pltgot: false,
            symbols: Vec::new(),
            needed: Vec::new(),
            rels: Vec::new(),
            jmprels: Vec::new(),
            init: None,
            fini: None,
            init_array: Vec::new(),
            fini_array: Vec::new(),
            content: Vec::new(),
        }
    }

    pub fn gnu_hash(mut self) -> Self {
        self.gnu_hash = true;
        self
    }

    pub fn with_rela(mut self) -> Self {
        self.with_rela = true;
        self
    }

    pub fn with_pltgot(mut self) -> Self {
        self.with_pltgot = true;
        self
    }

    /// Registers a symbol; returns its symbol table index. `value` is an
    /// image offset; undefined symbols are imports.
    pub fn symbol(&mut self, name: &str, value: u32, size: u32, defined: bool) -> u32 {
        self.symbols
            .push((String::from(name), value, size, defined));
        self.symbols.len() as u32
    }

    pub fn needs(mut self, name: &str) -> Self {
        self.needed.push(String::from(name));
        self
    }

    /// Adds a data relocation; `offset` is image relative.
    pub fn rel(mut self, offset: u32, symbol: u32, kind: u32) -> Self {
        self.rels.push((offset, symbol, kind));
        self
    }

    /// Adds a jump-slot relocation.
    pub fn jmprel(mut self, offset: u32, symbol: u32) -> Self {
        self.jmprels
            .push((offset, symbol, elf::R_ARM_JUMP_SLOT));
        self
    }

    pub fn init(mut self, offset: u32) -> Self {
        self.init = Some(offset);
        self
    }

    pub fn fini(mut self, offset: u32) -> Self {
        self.fini = Some(offset);
        self
    }

    pub fn init_array(mut self, entries: &[u32]) -> Self {
        self.init_array = entries.to_vec();
        self
    }

    pub fn fini_array(mut self, entries: &[u32]) -> Self {
        self.fini_array = entries.to_vec();
        self
    }

    /// Writes raw bytes into the image at an image relative offset.
    pub fn content(mut self, offset: u32, bytes: &[u8]) -> Self {
        self.content.push((offset, bytes.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut image = vec![0u8; IMAGE_SIZE as usize];
        let base = self.base;

        let put_u16 = |image: &mut Vec<u8>, offset: usize, value: u16| {
            image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        };
        let put_u32 = |image: &mut Vec<u8>, offset: usize, value: u32| {
            image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        };

        // ELF header
        image[0..4].copy_from_slice(&elf::ELF_MAGIC);
        image[4] = elf::ELFCLASS32;
        image[5] = elf::ELFDATA2LSB;
        image[6] = 1; // version
        put_u16(&mut image, 16, 3); // ET_DYN
        put_u16(&mut image, 18, elf::EM_ARM);
        put_u32(&mut image, 20, 1); // version
        put_u32(&mut image, 24, base + OFF_CODE); // entry
        put_u32(&mut image, 28, 52); // phoff
        put_u32(&mut image, 32, 0x1000); // shoff (fake but nonzero)
        put_u16(&mut image, 42, elf::PHDR_SIZE as u16);
        put_u16(&mut image, 44, 2); // phnum
        put_u16(&mut image, 46, 40); // shentsize
        put_u16(&mut image, 48, 0); // shnum

        // program headers: one load plus the dynamic segment
        let mut phdr = 52;
        for (p_type, p_offset, p_vaddr, p_filesz, p_memsz, p_flags) in [
            (elf::PT_LOAD, 0, base, IMAGE_SIZE, IMAGE_SIZE, elf::PF_R | elf::PF_W | elf::PF_X),
            (
                elf::PT_DYNAMIC,
                OFF_DYNAMIC,
                base + OFF_DYNAMIC,
                0x200,
                0x200,
                elf::PF_R,
            ),
        ] {
            put_u32(&mut image, phdr, p_type);
            put_u32(&mut image, phdr + 4, p_offset);
            put_u32(&mut image, phdr + 8, p_vaddr);
            put_u32(&mut image, phdr + 12, p_vaddr);
            put_u32(&mut image, phdr + 16, p_filesz);
            put_u32(&mut image, phdr + 20, p_memsz);
            put_u32(&mut image, phdr + 24, p_flags);
            put_u32(&mut image, phdr + 28, 0x1000);
            phdr += elf::PHDR_SIZE;
        }

        // string table: offset zero is the empty string
        let mut strtab: Vec<u8> = vec![0];
        let mut string_offsets: BTreeMap<String, u32> = BTreeMap::new();
        for name in self
            .symbols
            .iter()
            .map(|(name, ..)| name.clone())
            .chain(self.needed.iter().cloned())
        {
            if !string_offsets.contains_key(&name) {
                string_offsets.insert(name.clone(), strtab.len() as u32);
                strtab.extend_from_slice(name.as_bytes());
                strtab.push(0);
            }
        }
        assert!(strtab.len() <= STRTAB_SIZE as usize, "string table overflow");
        let strtab_area = OFF_STRTAB as usize;
        image[strtab_area..strtab_area + strtab.len()].copy_from_slice(&strtab);

        // symbol table, index zero reserved
        for (position, (name, value, size, defined)) in self.symbols.iter().enumerate() {
            let offset = OFF_SYMTAB as usize + (position + 1) * elf::SYM_SIZE;
            put_u32(&mut image, offset, string_offsets[name]);
            put_u32(&mut image, offset + 4, if *defined { base + value } else { 0 });
            put_u32(&mut image, offset + 8, *size);
            image[offset + 12] = 0x12; // global func
            put_u16(
                &mut image,
                offset + 14,
                if *defined { 1 } else { elf::SHN_UNDEF },
            );
        }

        // hash table: one bucket, a single chain over all symbols
        let nsyms = self.symbols.len() as u32;
        let hash = OFF_HASH as usize;
        put_u32(&mut image, hash, 1); // nbucket
        put_u32(&mut image, hash + 4, nsyms + 1); // nchain
        put_u32(&mut image, hash + 8, if nsyms > 0 { 1 } else { 0 });
        for index in 1..=nsyms {
            let next = if index < nsyms { index + 1 } else { 0 };
            put_u32(&mut image, hash + 12 + index as usize * 4, next);
        }

        // relocation tables
        for (position, (offset, symbol, kind)) in self.rels.iter().enumerate() {
            let rel = OFF_REL as usize + position * elf::REL_SIZE;
            put_u32(&mut image, rel, base + offset);
            put_u32(&mut image, rel + 4, (symbol << 8) | kind);
        }
        for (position, (offset, symbol, kind)) in self.jmprels.iter().enumerate() {
            let rel = OFF_JMPREL as usize + position * elf::REL_SIZE;
            put_u32(&mut image, rel, base + offset);
            put_u32(&mut image, rel + 4, (symbol << 8) | kind);
        }

        // init / fini arrays
        for (position, entry) in self.init_array.iter().enumerate() {
            put_u32(
                &mut image,
                OFF_INIT_ARRAY as usize + position * 4,
                base + entry,
            );
        }
        for (position, entry) in self.fini_array.iter().enumerate() {
            put_u32(
                &mut image,
                OFF_FINI_ARRAY as usize + position * 4,
                base + entry,
            );
        }

        // user supplied content
        for (offset, bytes) in &self.content {
            let offset = *offset as usize;
            image[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        // dynamic section
        let mut dynamic: Vec<(u32, u32)> = Vec::new();
        dynamic.push((elf::DT_STRTAB, base + OFF_STRTAB));
        dynamic.push((elf::DT_STRSZ, STRTAB_SIZE));
        dynamic.push((elf::DT_SYMTAB, base + OFF_SYMTAB));
        let hash_tag = if self.gnu_hash {
            elf::DT_GNU_HASH
        } else {
            elf::DT_HASH
        };
        dynamic.push((hash_tag, base + OFF_HASH));
        for name in &self.needed {
            dynamic.push((elf::DT_NEEDED, string_offsets[name]));
        }
        if !self.rels.is_empty() {
            dynamic.push((elf::DT_REL, base + OFF_REL));
            dynamic.push((elf::DT_RELSZ, (self.rels.len() * elf::REL_SIZE) as u32));
            dynamic.push((elf::DT_RELENT, elf::REL_SIZE as u32));
        }
        if !self.jmprels.is_empty() {
            dynamic.push((elf::DT_JMPREL, base + OFF_JMPREL));
            dynamic.push((elf::DT_PLTREL, elf::DT_REL));
            dynamic.push((
                elf::DT_PLTRELSZ,
                (self.jmprels.len() * elf::REL_SIZE) as u32,
            ));
        }
        if self.with_pltgot {
            dynamic.push((elf::DT_PLTGOT, base + OFF_GOT));
        }
        if self.with_rela {
            dynamic.push((elf::DT_RELA, base + OFF_REL));
            dynamic.push((elf::DT_RELASZ, elf::REL_SIZE as u32));
            dynamic.push((elf::DT_RELAENT, 12));
        }
        if let Some(init) = self.init {
            dynamic.push((elf::DT_INIT, base + init));
        }
        if let Some(fini) = self.fini {
            dynamic.push((elf::DT_FINI, base + fini));
        }
        if !self.init_array.is_empty() {
            dynamic.push((elf::DT_INIT_ARRAY, base + OFF_INIT_ARRAY));
            dynamic.push((elf::DT_INIT_ARRAYSZ, self.init_array.len() as u32 * 4));
        }
        if !self.fini_array.is_empty() {
            dynamic.push((elf::DT_FINI_ARRAY, base + OFF_FINI_ARRAY));
            dynamic.push((elf::DT_FINI_ARRAYSZ, self.fini_array.len() as u32 * 4));
        }
        dynamic.push((elf::DT_NULL, 0));
        for (position, (tag, value)) in dynamic.iter().enumerate() {
            let offset = OFF_DYNAMIC as usize + position * elf::DYN_SIZE;
            put_u32(&mut image, offset, *tag);
            put_u32(&mut image, offset + 4, *value);
        }

        image
    }
}

/// Paged in-memory process environment.
#[derive(Debug, Default)]
pub struct TestEnv {
    files: BTreeMap<String, Vec<u8>>,
    open: BTreeMap<FileId, String>,
    next_file: FileId,
    pages: BTreeMap<u32, Vec<u8>>,
    next_base: u32,
    pub invocations: Vec<u32>,
}

/// Sentinel address of the lazy resolve trampoline.
pub const LAZY_RESOLVER: u32 = 0xffff_f000;

impl TestEnv {
    pub fn new() -> Self {
        Self {
            next_base: 0x4000_0000,
            ..Self::default()
        }
    }

    pub fn add_file(&mut self, path: &str, data: Vec<u8>) {
        self.files.insert(String::from(path), data);
    }

    /// Bytes currently mapped into the fake address space.
    pub fn mapped_bytes(&self) -> usize {
        self.pages.len() * 4096
    }

    fn install(&mut self, base: u32, size: u32, content: impl Fn(usize) -> u8) {
        let pages = (size as usize + 4095) / 4096;
        for page in 0..pages {
            let mut data = vec![0u8; 4096];
            for (index, byte) in data.iter_mut().enumerate() {
                let offset = page * 4096 + index;
                if offset < size as usize {
                    *byte = content(offset);
                }
            }
            self.pages.insert(base + (page * 4096) as u32, data);
        }
    }

    fn pick_base(&mut self, size: u32) -> u32 {
        let base = self.next_base;
        self.next_base += ((size + 0xffff) & !0xffff) + 0x10000;
        base
    }
}

impl LoaderEnv for TestEnv {
    fn open(&mut self, path: &str) -> Result<FileId, ErrorKind> {
        if !self.files.contains_key(path) {
            return Err(ErrorKind::NotFound);
        }
        self.next_file += 1;
        self.open.insert(self.next_file, String::from(path));
        Ok(self.next_file)
    }

    fn read_at(&mut self, file: FileId, offset: u32, buffer: &mut [u8]) -> Result<usize, ErrorKind> {
        let path = self.open.get(&file).ok_or(ErrorKind::BadHandle)?;
        let data = self.files.get(path).ok_or(ErrorKind::NotFound)?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let count = core::cmp::min(buffer.len(), data.len() - offset);
        buffer[..count].copy_from_slice(&data[offset..offset + count]);
        Ok(count)
    }

    fn close(&mut self, file: FileId) {
        self.open.remove(&file);
    }

    fn map_file(
        &mut self,
        base: Option<u32>,
        size: u32,
        _protection: Protection,
        file: FileId,
        offset: u32,
    ) -> Result<u32, ErrorKind> {
        let path = self.open.get(&file).ok_or(ErrorKind::BadHandle)?.clone();
        let data = self.files.get(&path).ok_or(ErrorKind::NotFound)?.clone();
        let base = match base {
            Some(base) => base,
            None => self.pick_base(size),
        };
        assert_eq!(base % 4096, 0, "mapping base must be page aligned");
        self.install(base, size, |index| {
            data.get(offset as usize + index).copied().unwrap_or(0)
        });
        Ok(base)
    }

    fn map_anonymous(
        &mut self,
        base: Option<u32>,
        size: u32,
        _protection: Protection,
    ) -> Result<u32, ErrorKind> {
        let base = match base {
            Some(base) => base,
            None => self.pick_base(size),
        };
        self.install(base, size, |_| 0);
        Ok(base)
    }

    fn unmap(&mut self, base: u32, size: u32) {
        let first = base & !0xfff;
        let last = base.wrapping_add(size).wrapping_add(0xfff) & !0xfff;
        let doomed: Vec<u32> = self
            .pages
            .range(first..last)
            .map(|(&page, _)| page)
            .collect();
        for page in doomed {
            self.pages.remove(&page);
        }
    }

    fn read_mem(&self, addr: u32, buffer: &mut [u8]) -> Result<(), ErrorKind> {
        for (index, byte) in buffer.iter_mut().enumerate() {
            let current = addr + index as u32;
            let page = self
                .pages
                .get(&(current & !0xfff))
                .ok_or(ErrorKind::InvalidArgument)?;
            *byte = page[(current & 0xfff) as usize];
        }
        Ok(())
    }

    fn write_mem(&mut self, addr: u32, data: &[u8]) -> Result<(), ErrorKind> {
        for (index, &byte) in data.iter().enumerate() {
            let current = addr + index as u32;
            let page = self
                .pages
                .get_mut(&(current & !0xfff))
                .ok_or(ErrorKind::InvalidArgument)?;
            page[(current & 0xfff) as usize] = byte;
        }
        Ok(())
    }

    fn invoke(&mut self, addr: u32) {
        self.invocations.push(addr);
    }

    fn lazy_resolver(&self) -> u32 {
        LAZY_RESOLVER
    }
}
