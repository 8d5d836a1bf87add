//! `dlopen` / `dlsym` / `dlclose` over the environment seam.

use crate::elf::{
    self,
    Dyn,
    Header,
    ProgramHeader,
    Rel,
    Sym,
    DYN_SIZE,
    EHDR_SIZE,
    PHDR_SIZE,
    REL_SIZE,
    SYM_SIZE,
};
use crate::env::{
    read_word,
    write_word,
    FileId,
    LoaderEnv,
    Protection,
};
use crate::error::{
    DlError,
    DlErrorKind,
};
use crate::handle::{
    HashStyle,
    HashTable,
    ImageHandle,
    ImageId,
};
use alloc::string::String;
use alloc::vec::Vec;

/// Load everything at `dlopen` time instead of lazily through the PLT.
pub const RTLD_NOW: u32 = 0x0002;
/// Default: jump slots get patched on first use.
pub const RTLD_LAZY: u32 = 0x0001;

/// Colon separated list searched for plain library names.
pub const DEFAULT_SEARCH_PATH: &str = "/lib:/usr/lib:/ramdisk/lib:/ramdisk/usr/lib";

const fn page_floor(value: u32) -> u32 {
    value & !0xfff
}

const fn page_ceil(value: u32) -> u32 {
    (value + 0xfff) & !0xfff
}

/// Copy of the handle fields the relocation and lookup code needs, so no
/// image borrow has to live across environment calls.
#[derive(Debug, Clone, Copy)]
struct View {
    memory_start: u32,
    relocated: bool,
    open_mode: u32,
    strtab: u32,
    strsz: u32,
    symtab: u32,
    hash: HashTable,
    jmprel: Option<u32>,
    pltrel: u32,
    pltrelsz: u32,
    rel: Option<u32>,
    relsz: u32,
    relent: u32,
    rela: Option<u32>,
    pltgot: Option<u32>,
    init: Option<u32>,
    init_array: Option<(u32, u32)>,
    fini: Option<u32>,
    fini_array: Option<(u32, u32)>,
}

impl View {
    const fn target(&self, vaddr: u32) -> u32 {
        if self.relocated {
            self.memory_start.wrapping_add(vaddr)
        } else {
            vaddr
        }
    }

    const fn absolute(&self, offset: u32) -> u32 {
        self.memory_start.wrapping_add(offset)
    }
}

/// The dynamic loader of one process.
#[derive(Debug)]
pub struct Loader<E: LoaderEnv> {
    env: E,
    images: Vec<Option<ImageHandle>>,
    /// Arena indices in load order; the first entry is the root object.
    order: Vec<usize>,
    error: Option<DlError>,
}

impl<E: LoaderEnv> Loader<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            images: Vec::new(),
            order: Vec::new(),
            error: None,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    /// Number of currently loaded images.
    pub fn image_count(&self) -> usize {
        self.order.len()
    }

    pub fn image(&self, id: ImageId) -> Option<&ImageHandle> {
        self.images.get(id.0).and_then(Option::as_ref)
    }

    /// Images in load order.
    pub fn images_in_order(&self) -> impl Iterator<Item = (ImageId, &ImageHandle)> {
        self.order
            .iter()
            .filter_map(|&index| Some((ImageId(index), self.images[index].as_ref()?)))
    }

    /// Returns and clears the last error, `dlerror` style.
    pub fn dlerror(&mut self) -> String {
        match self.error.take() {
            Some(error) => error.render(),
            None => String::from("no error"),
        }
    }

    fn fail(&mut self, kind: DlErrorKind, location: &'static str, detail: &str) {
        self.error = Some(DlError::with_detail(kind, location, detail));
    }

    /// Opens (or re-references) an image and everything it needs. `None`
    /// as file returns the root object. On `None` return the error state
    /// is set and every handle of this session has been freed again.
    pub fn dlopen(&mut self, file: Option<&str>, mode: u32) -> Option<ImageId> {
        let Some(file) = file else {
            return self.order.first().map(|&index| ImageId(index));
        };
        let session_start = self.order.len();
        let result = self.open_internal(file, mode);
        if result.is_none() {
            // free every handle allocated in this session
            let added = self.order.split_off(session_start);
            for index in added {
                self.discard(index);
            }
        }
        result
    }

    fn open_internal(&mut self, file: &str, mode: u32) -> Option<ImageId> {
        let (path, descriptor) = if file.starts_with('/') {
            match self.env.open(file) {
                Ok(descriptor) => (String::from(file), descriptor),
                Err(_) => {
                    self.fail(DlErrorKind::CannotOpen, "dlopen", file);
                    return None;
                }
            }
        } else {
            let mut found = None;
            for part in DEFAULT_SEARCH_PATH.split(':') {
                let candidate = format!("{part}/{file}");
                if let Ok(descriptor) = self.env.open(&candidate) {
                    found = Some((candidate, descriptor));
                    break;
                }
            }
            match found {
                Some(found) => found,
                None => {
                    self.fail(DlErrorKind::CannotOpen, "dlopen", file);
                    return None;
                }
            }
        };

        // a handle for the resolved name short-circuits the load
        if let Some(id) = self.find_loaded(&path) {
            if let Some(image) = self.images[id.0].as_mut() {
                image.link_count += 1;
            }
            self.env.close(descriptor);
            return Some(id);
        }

        log::debug!("loading {path}");
        let id = match self.load_entry(&path, mode, descriptor) {
            Ok(id) => id,
            Err(error) => {
                // the session cleanup owns the partially built handle
                self.error = Some(error);
                return None;
            }
        };

        // load needed images with the same open mode
        let needed = self.images[id.0]
            .as_ref()
            .map(|image| image.needed.clone())
            .unwrap_or_default();
        for name in needed {
            self.open_internal(&name, mode)?;
        }

        if let Err(error) = self.relocate(id) {
            self.error = Some(error);
            return None;
        }
        Some(id)
    }

    /// Finds an already loaded image by resolved file name.
    pub fn find_loaded(&self, path: &str) -> Option<ImageId> {
        self.order
            .iter()
            .find(|&&index| {
                self.images[index]
                    .as_ref()
                    .map(|image| image.filename == path)
                    .unwrap_or(false)
            })
            .map(|&index| ImageId(index))
    }

    /// Removes an image from the arena, unmapping its memory and closing
    /// its descriptor. The order list is maintained by the callers.
    fn discard(&mut self, index: usize) {
        if let Some(image) = self.images.get_mut(index).and_then(Option::take) {
            if image.memory_size != 0 {
                self.env.unmap(image.memory_start, image.memory_size);
            }
            self.env.close(image.descriptor);
        }
    }

    fn view(&self, id: ImageId) -> Option<View> {
        let image = self.image(id)?;
        Some(View {
            memory_start: image.memory_start,
            relocated: image.relocated,
            open_mode: image.open_mode,
            strtab: image.strtab,
            strsz: image.strsz,
            symtab: image.symtab,
            hash: image.hash,
            jmprel: image.jmprel,
            pltrel: image.pltrel,
            pltrelsz: image.pltrelsz,
            rel: image.rel,
            relsz: image.relsz,
            relent: image.relent,
            rela: image.rela,
            pltgot: image.pltgot,
            init: image.init,
            init_array: image.init_array,
            fini: image.fini,
            fini_array: image.fini_array,
        })
    }

    // ------------------------------------------------------------------
    // image loading

    fn load_entry(
        &mut self,
        path: &str,
        mode: u32,
        descriptor: FileId,
    ) -> Result<ImageId, DlError> {
        // allocate the handle first; on failure the session cleanup takes
        // care of whatever has been set up already
        let index = match self.images.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                self.images.push(None);
                self.images.len() - 1
            }
        };
        let mut image = ImageHandle {
            filename: String::from(path),
            open_mode: mode,
            link_count: 1,
            descriptor,
            ..ImageHandle::default()
        };
        self.order.push(index);

        let mut raw_header = [0u8; EHDR_SIZE];
        let read = self
            .env
            .read_at(descriptor, 0, &mut raw_header)
            .unwrap_or(0);
        if read != EHDR_SIZE {
            self.images[index] = Some(image);
            return Err(DlError::with_detail(DlErrorKind::ReadHeader, "dlopen", path));
        }
        let header = match Header::parse(&raw_header) {
            Some(header) => header,
            None => {
                self.images[index] = Some(image);
                return Err(DlError::with_detail(DlErrorKind::HeaderMagic, "dlopen", path));
            }
        };
        image.header = header;
        if header.ident_class != elf::ELFCLASS32 || header.ident_data != elf::ELFDATA2LSB {
            self.images[index] = Some(image);
            return Err(DlError::with_detail(DlErrorKind::HeaderClass, "dlopen", path));
        }
        if header.e_machine != elf::EM_ARM {
            self.images[index] = Some(image);
            return Err(DlError::with_detail(DlErrorKind::HeaderMachine, "dlopen", path));
        }
        if header.e_phentsize == 0 {
            self.images[index] = Some(image);
            return Err(DlError::with_detail(DlErrorKind::HeaderProgram, "dlopen", path));
        }
        if header.e_shentsize == 0 {
            self.images[index] = Some(image);
            return Err(DlError::with_detail(DlErrorKind::HeaderSection, "dlopen", path));
        }

        // read all program headers and remember the loadable ones
        let mut loads: Vec<ProgramHeader> = Vec::new();
        let mut dynamic: Option<ProgramHeader> = None;
        for entry in 0..header.e_phnum as u32 {
            let offset = header.e_phoff + entry * header.e_phentsize as u32;
            let mut raw = [0u8; PHDR_SIZE];
            let read = self.env.read_at(descriptor, offset, &mut raw).unwrap_or(0);
            if read != PHDR_SIZE {
                self.images[index] = Some(image);
                return Err(DlError::with_detail(DlErrorKind::IoError, "dlopen", path));
            }
            let program_header = ProgramHeader::parse(&raw);
            image.phdr.push(program_header);
            match program_header.p_type {
                elf::PT_LOAD => loads.push(program_header),
                elf::PT_DYNAMIC => dynamic = Some(program_header),
                _ => {}
            }
        }

        let map_result = self.map_image(&loads, descriptor);
        let (memory_start, memory_size, relocated) = match map_result {
            Ok(mapped) => mapped,
            Err(kind) => {
                self.images[index] = Some(image);
                return Err(DlError::with_detail(kind, "dlopen", path));
            }
        };
        image.memory_start = memory_start;
        image.memory_size = memory_size;
        image.relocated = relocated;
        image.first_vaddr = loads[0].p_vaddr;

        if let Some(dynamic) = dynamic {
            if let Err(kind) = self.parse_dynamic(&mut image, &loads[0], &dynamic) {
                self.images[index] = Some(image);
                return Err(DlError::with_detail(kind, "dlopen", path));
            }
        }

        self.images[index] = Some(image);
        Ok(ImageId(index))
    }

    /// Projects the loadable segments. Either one contiguous segment or
    /// the classical text plus data pair is supported.
    fn map_image(
        &mut self,
        loads: &[ProgramHeader],
        descriptor: FileId,
    ) -> Result<(u32, u32, bool), DlErrorKind> {
        match loads {
            [only] => {
                let offset = page_floor(only.p_offset);
                let hint = (only.p_vaddr != 0).then(|| page_floor(only.p_vaddr));
                let memory = self
                    .env
                    .map_file(
                        hint,
                        page_ceil(only.p_memsz),
                        Protection::from_segment_flags(only.p_flags),
                        descriptor,
                        offset,
                    )
                    .map_err(|_| DlErrorKind::NoMemory)?;
                Ok((memory, only.p_memsz, memory != only.p_vaddr))
            }
            [text, data] => {
                let text_address = page_floor(text.p_vaddr);
                let text_offset = page_floor(text.p_offset);
                let text_off = text.p_offset & 0xfff;
                let text_size = page_ceil(text.p_memsz + text_off);

                let data_address = page_floor(data.p_vaddr);
                let data_offset = page_floor(data.p_offset);
                let data_off = data.p_offset & 0xfff;
                let data_size = page_ceil(data.p_memsz + data_off);
                let data_file_size = page_ceil(data.p_filesz + data_off);

                let hint = (text_address != 0).then_some(text_address);
                let memory = self
                    .env
                    .map_file(
                        hint,
                        text_size,
                        Protection::from_segment_flags(text.p_flags),
                        descriptor,
                        text_offset,
                    )
                    .map_err(|_| DlErrorKind::NoMemory)?;
                let mapped_data = self
                    .env
                    .map_file(
                        Some(memory + (data_address - text_address)),
                        data_file_size,
                        Protection::from_segment_flags(data.p_flags),
                        descriptor,
                        data_offset,
                    )
                    .map_err(|_| DlErrorKind::NoMemory)?;
                // zero the slack behind the file backed data
                let content_end = data_off + data.p_filesz;
                if data_file_size > content_end {
                    let zeros = vec![0u8; (data_file_size - content_end) as usize];
                    self.env
                        .write_mem(mapped_data + content_end, &zeros)
                        .map_err(|_| DlErrorKind::NoMemory)?;
                }
                // anonymous filler for the bss tail
                if data_size > data_file_size {
                    self.env
                        .map_anonymous(
                            Some(mapped_data + data_file_size),
                            data_size - data_file_size,
                            Protection::READ | Protection::WRITE,
                        )
                        .map_err(|_| DlErrorKind::NoMemory)?;
                }
                Ok((memory, text_size + data_size, memory != text.p_vaddr))
            }
            _ => Err(DlErrorKind::LoadSegmentCount),
        }
    }

    /// Walks the `DT_*` entries and validates every referenced table
    /// against the image bounds.
    fn parse_dynamic(
        &mut self,
        image: &mut ImageHandle,
        first_load: &ProgramHeader,
        dynamic: &ProgramHeader,
    ) -> Result<(), DlErrorKind> {
        let base = image
            .memory_start
            .wrapping_add(dynamic.p_vaddr.wrapping_sub(first_load.p_vaddr));
        let bound = core::cmp::max(dynamic.p_filesz, dynamic.p_memsz) / DYN_SIZE as u32;
        if bound == 0 {
            return Err(DlErrorKind::Malformed);
        }

        let mut needed_offsets = Vec::new();
        let mut entry = 0;
        loop {
            if entry >= bound {
                return Err(DlErrorKind::Malformed);
            }
            let mut raw = [0u8; DYN_SIZE];
            self.env
                .read_mem(base + entry * DYN_SIZE as u32, &mut raw)
                .map_err(|_| DlErrorKind::Malformed)?;
            let dyn_entry = Dyn::parse(&raw);
            let pointer = dyn_entry.d_val.wrapping_sub(first_load.p_vaddr);
            match dyn_entry.d_tag {
                elf::DT_NULL => break,
                elf::DT_NEEDED => needed_offsets.push(dyn_entry.d_val),
                elf::DT_STRTAB => image.strtab = pointer,
                elf::DT_STRSZ => image.strsz = dyn_entry.d_val,
                elf::DT_SYMTAB => image.symtab = pointer,
                elf::DT_HASH => {
                    image.hash.offset = pointer;
                    image.hash.style = Some(HashStyle::SysV);
                }
                elf::DT_GNU_HASH => {
                    image.hash.offset = pointer;
                    image.hash.style = Some(HashStyle::Gnu);
                }
                elf::DT_JMPREL => image.jmprel = Some(pointer),
                elf::DT_PLTREL => image.pltrel = dyn_entry.d_val,
                elf::DT_PLTRELSZ => image.pltrelsz = dyn_entry.d_val,
                elf::DT_REL => image.rel = Some(pointer),
                elf::DT_RELSZ => image.relsz = dyn_entry.d_val,
                elf::DT_RELENT => image.relent = dyn_entry.d_val,
                elf::DT_RELA => image.rela = Some(pointer),
                elf::DT_RELASZ | elf::DT_RELAENT => {}
                elf::DT_PLTGOT => image.pltgot = Some(pointer),
                elf::DT_INIT => image.init = Some(pointer),
                elf::DT_FINI => image.fini = Some(pointer),
                elf::DT_INIT_ARRAY => {
                    let size = image.init_array.map(|(_, size)| size).unwrap_or(0);
                    image.init_array = Some((pointer, size));
                }
                elf::DT_INIT_ARRAYSZ => {
                    let offset = image.init_array.map(|(offset, _)| offset).unwrap_or(0);
                    image.init_array = Some((offset, dyn_entry.d_val / 4));
                }
                elf::DT_FINI_ARRAY => {
                    let size = image.fini_array.map(|(_, size)| size).unwrap_or(0);
                    image.fini_array = Some((pointer, size));
                }
                elf::DT_FINI_ARRAYSZ => {
                    let offset = image.fini_array.map(|(offset, _)| offset).unwrap_or(0);
                    image.fini_array = Some((offset, dyn_entry.d_val / 4));
                }
                _ => {}
            }
            entry += 1;
        }

        let memory_size = image.memory_size;
        // string table bounds plus guaranteed termination
        if image.strsz > u32::MAX - image.strtab || image.strtab + image.strsz > memory_size {
            return Err(DlErrorKind::Malformed);
        }
        if image.strsz > 0 {
            let mut last = [0u8; 1];
            self.env
                .read_mem(image.memory_start + image.strtab + image.strsz - 1, &mut last)
                .map_err(|_| DlErrorKind::Malformed)?;
            if last[0] != 0 {
                return Err(DlErrorKind::Malformed);
            }
        }
        // symbol table
        if image.symtab > memory_size {
            return Err(DlErrorKind::Malformed);
        }
        // hash table geometry
        if image.hash.style.is_some() {
            if image.hash.offset > memory_size.saturating_sub(8) {
                return Err(DlErrorKind::Malformed);
            }
            let table = image.memory_start + image.hash.offset;
            image.hash.nbucket =
                read_word(&self.env, table).map_err(|_| DlErrorKind::Malformed)?;
            image.hash.nchain =
                read_word(&self.env, table + 4).map_err(|_| DlErrorKind::Malformed)?;
            if image.hash.nbucket > u32::MAX - image.hash.nchain
                || image.hash.nbucket + image.hash.nchain
                    > (memory_size - image.hash.offset) / 4
            {
                return Err(DlErrorKind::Malformed);
            }
        }
        // relocation tables
        if let Some(jmprel) = image.jmprel {
            if image.pltrelsz > u32::MAX - jmprel || jmprel + image.pltrelsz > memory_size {
                return Err(DlErrorKind::Malformed);
            }
        }
        if let Some(rel) = image.rel {
            if image.relsz > u32::MAX - rel || rel + image.relsz > memory_size {
                return Err(DlErrorKind::Malformed);
            }
        }
        if let Some(rela) = image.rela {
            if rela > memory_size {
                return Err(DlErrorKind::Malformed);
            }
        }

        // resolve dependency names now; the string table is validated
        for offset in needed_offsets {
            let name = self
                .string_at(image.memory_start + image.strtab, image.strsz, offset)
                .ok_or(DlErrorKind::Malformed)?;
            image.needed.push(name);
        }
        Ok(())
    }

    /// Reads a NUL terminated string out of a bounded string table.
    fn string_at(&self, table: u32, table_size: u32, offset: u32) -> Option<String> {
        if offset >= table_size {
            return None;
        }
        let mut bytes = Vec::new();
        let mut cursor = offset;
        loop {
            if cursor >= table_size {
                return None;
            }
            let mut byte = [0u8; 1];
            self.env.read_mem(table + cursor, &mut byte).ok()?;
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
            cursor += 1;
        }
        String::from_utf8(bytes).ok()
    }

    // ------------------------------------------------------------------
    // symbols

    fn read_sym(&self, view: &View, index: u32) -> Option<Sym> {
        let mut raw = [0u8; SYM_SIZE];
        self.env
            .read_mem(view.absolute(view.symtab) + index * SYM_SIZE as u32, &mut raw)
            .ok()?;
        Some(Sym::parse(&raw))
    }

    fn symbol_name(&self, view: &View, index: u32) -> Option<String> {
        let sym = self.read_sym(view, index)?;
        self.string_at(view.absolute(view.strtab), view.strsz, sym.st_name)
    }

    /// Global symbol search across the images starting at load-order
    /// position `start`.
    fn lookup_from(&self, start: usize, name: &str) -> Option<u32> {
        for &index in self.order.get(start..)? {
            let view = self.view(ImageId(index))?;
            let Some(style) = view.hash.style else {
                continue;
            };
            if view.hash.nbucket == 0 {
                continue;
            }
            let hash = match style {
                HashStyle::SysV => elf::elf_symbol_name_hash(name),
                HashStyle::Gnu => elf::gnu_symbol_name_hash(name),
            };
            let table = view.absolute(view.hash.offset);
            let buckets = table + 8;
            let chain = table + 8 + view.hash.nbucket * 4;
            let mut sym_index =
                read_word(&self.env, buckets + (hash % view.hash.nbucket) * 4).ok()?;
            while sym_index != elf::STN_UNDEF {
                if sym_index > view.hash.nchain {
                    break;
                }
                let Some(sym) = self.read_sym(&view, sym_index) else {
                    break;
                };
                if sym.st_name > view.strsz {
                    break;
                }
                let sym_name =
                    self.string_at(view.absolute(view.strtab), view.strsz, sym.st_name);
                if sym_name.as_deref() == Some(name) {
                    if sym.is_defined() {
                        return Some(view.target(sym.st_value));
                    }
                    // undefined here, next image may define it
                    break;
                }
                sym_index = read_word(&self.env, chain + sym_index * 4).ok()?;
            }
        }
        None
    }

    /// `dlsym`: `None` searches global load order, a handle searches from
    /// that image onwards.
    pub fn dlsym(&mut self, handle: Option<ImageId>, name: &str) -> Option<u32> {
        let start = match handle {
            None => 0,
            Some(id) => match self.order.iter().position(|&index| index == id.0) {
                Some(position) => position,
                None => {
                    self.fail(DlErrorKind::NotFound, "dlsym", name);
                    return None;
                }
            },
        };
        let found = self.lookup_from(start, name);
        if found.is_none() {
            self.fail(DlErrorKind::UnknownSymbol, "dlsym", name);
        }
        found
    }

    /// Patches one jump slot on demand; `offset` is the byte offset into
    /// the `JMPREL` table as pushed by the PLT trampoline.
    pub fn resolve_lazy(&mut self, id: ImageId, offset: u32) -> Option<u32> {
        let view = self.view(id)?;
        let jmprel = view.jmprel?;
        let mut raw = [0u8; REL_SIZE];
        self.env
            .read_mem(view.absolute(jmprel) + offset, &mut raw)
            .ok()?;
        let rel = Rel::parse(&raw);
        let name = self.symbol_name(&view, rel.symbol())?;
        let value = self.lookup_from(0, &name)?;
        write_word(&mut self.env, view.target(rel.r_offset), value).ok()?;
        Some(value)
    }

    // ------------------------------------------------------------------
    // relocation

    fn relocate(&mut self, id: ImageId) -> Result<(), DlError> {
        let view = self
            .view(id)
            .ok_or_else(|| DlError::new(DlErrorKind::NotFound, "dlopen"))?;

        // global offset table bootstrap
        if let Some(pltgot) = view.pltgot {
            let got = view.absolute(pltgot);
            if view.relocated {
                let word = read_word(&self.env, got)
                    .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                write_word(&mut self.env, got, word.wrapping_add(view.memory_start))
                    .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
            }
            // self handle and the lazy resolve trampoline
            let resolver = self.env.lazy_resolver();
            write_word(&mut self.env, got + 4, id.0 as u32)
                .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
            write_word(&mut self.env, got + 8, resolver)
                .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
        }

        // jump slots
        if let Some(jmprel) = view.jmprel {
            if view.pltrel == elf::DT_RELA {
                return Err(DlError::new(DlErrorKind::DtRelaUnsupported, "dlopen"));
            }
            if view.pltrel == elf::DT_REL {
                let count = view.pltrelsz / REL_SIZE as u32;
                for entry in 0..count {
                    let mut raw = [0u8; REL_SIZE];
                    self.env
                        .read_mem(view.absolute(jmprel) + entry * REL_SIZE as u32, &mut raw)
                        .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                    let rel = Rel::parse(&raw);
                    if view.open_mode & RTLD_NOW != 0 {
                        let Some(name) = self.symbol_name(&view, rel.symbol()) else {
                            continue;
                        };
                        if let Some(value) = self.lookup_from(0, &name) {
                            write_word(&mut self.env, view.target(rel.r_offset), value)
                                .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                        }
                    } else if view.relocated {
                        // keep the lazy slot pointing into the moved image
                        let target = view.memory_start.wrapping_add(rel.r_offset);
                        let word = read_word(&self.env, target)
                            .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                        write_word(&mut self.env, target, word.wrapping_add(view.memory_start))
                            .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                    }
                }
            }
        }

        // data relocations
        if let Some(rel_table) = view.rel {
            let entry_size = if view.relent == 0 {
                REL_SIZE as u32
            } else {
                view.relent
            };
            let count = view.relsz / entry_size;
            for entry in 0..count {
                let mut raw = [0u8; REL_SIZE];
                self.env
                    .read_mem(view.absolute(rel_table) + entry * entry_size, &mut raw)
                    .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                let rel = Rel::parse(&raw);
                self.apply_relocation(id, &view, &rel)?;
            }
        }

        // rela stays reserved until someone needs it
        if view.rela.is_some() {
            return Err(DlError::new(DlErrorKind::DtRelaUnsupported, "dlopen"));
        }

        self.post_init(&view);
        Ok(())
    }

    fn apply_relocation(&mut self, id: ImageId, view: &View, rel: &Rel) -> Result<(), DlError> {
        let target = view.target(rel.r_offset);
        match rel.kind() {
            elf::R_ARM_NONE => {}
            elf::R_ARM_COPY => {
                let sym = self
                    .read_sym(view, rel.symbol())
                    .ok_or_else(|| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                let name = self
                    .symbol_name(view, rel.symbol())
                    .ok_or_else(|| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                // the definition comes from the images after this one
                let position = self
                    .order
                    .iter()
                    .position(|&index| index == id.0)
                    .unwrap_or(0);
                let source = self
                    .lookup_from(position + 1, &name)
                    .ok_or_else(|| {
                        DlError::with_detail(DlErrorKind::UnknownSymbol, "dlopen", &name)
                    })?;
                let mut buffer = vec![0u8; sym.st_size as usize];
                self.env
                    .read_mem(source, &mut buffer)
                    .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                self.env
                    .write_mem(target, &buffer)
                    .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
            }
            elf::R_ARM_GLOB_DAT | elf::R_ARM_JUMP_SLOT => {
                let Some(name) = self.symbol_name(view, rel.symbol()) else {
                    return Ok(());
                };
                let position = self
                    .order
                    .iter()
                    .position(|&index| index == id.0)
                    .unwrap_or(0);
                if let Some(value) = self.lookup_from(position, &name) {
                    write_word(&mut self.env, target, value)
                        .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                }
            }
            elf::R_ARM_ABS32 => {
                let sym = self
                    .read_sym(view, rel.symbol())
                    .ok_or_else(|| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                let value = if sym.is_defined() {
                    Some(view.target(sym.st_value))
                } else {
                    let name = self
                        .symbol_name(view, rel.symbol())
                        .ok_or_else(|| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                    self.lookup_from(0, &name)
                };
                if let Some(value) = value {
                    write_word(&mut self.env, target, value)
                        .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                }
            }
            elf::R_ARM_RELATIVE => {
                if view.relocated {
                    let word = read_word(&self.env, target)
                        .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                    write_word(&mut self.env, target, word.wrapping_add(view.memory_start))
                        .map_err(|_| DlError::new(DlErrorKind::Malformed, "dlopen"))?;
                }
            }
            kind => {
                log::error!("unsupported relocation type {kind}");
                return Err(DlError::new(DlErrorKind::UnknownSymbol, "dlopen"));
            }
        }
        Ok(())
    }

    /// Runs `DT_INIT` and then every `DT_INIT_ARRAY` entry in order.
    fn post_init(&mut self, view: &View) {
        if let Some(init) = view.init {
            self.env.invoke(view.absolute(init));
        }
        if let Some((offset, count)) = view.init_array {
            for entry in 0..count {
                if let Ok(word) = read_word(&self.env, view.absolute(offset) + entry * 4) {
                    self.env.invoke(word);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // closing

    /// Drops one reference; the last one runs fini code, closes the
    /// dependencies and unmaps the image.
    pub fn dlclose(&mut self, id: ImageId) -> Result<(), DlErrorKind> {
        let Some(image) = self.images.get_mut(id.0).and_then(Option::as_mut) else {
            return Err(DlErrorKind::NotFound);
        };
        image.link_count -= 1;
        if image.link_count > 0 {
            return Ok(());
        }

        let view = self.view(id).ok_or(DlErrorKind::NotFound)?;
        // fini, then the fini array in reverse order
        if let Some(fini) = view.fini {
            self.env.invoke(view.absolute(fini));
        }
        if let Some((offset, count)) = view.fini_array {
            for entry in (0..count).rev() {
                if let Ok(word) = read_word(&self.env, view.absolute(offset) + entry * 4) {
                    self.env.invoke(word);
                }
            }
        }

        // release the dependencies
        let needed = self.images[id.0]
            .as_ref()
            .map(|image| image.needed.clone())
            .unwrap_or_default();
        for name in needed {
            let dependency = self
                .order
                .iter()
                .find(|&&index| {
                    self.images[index]
                        .as_ref()
                        .map(|image| {
                            image.filename == name || image.filename.ends_with(&format!("/{name}"))
                        })
                        .unwrap_or(false)
                })
                .map(|&index| ImageId(index));
            if let Some(dependency) = dependency {
                let _ = self.dlclose(dependency);
            }
        }

        self.order.retain(|&index| index != id.0);
        self.discard(id.0);
        log::debug!("image {:?} unloaded", id);
        Ok(())
    }
}
