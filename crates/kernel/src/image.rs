//! Program images: 32-bit ELF executables and flat binaries.
//!
//! Flat binaries are read into physically contiguous, zeroed frames and mapped as
//! one region. Each loadable ELF segment gets frames of its own, sized for its
//! in-memory length, so the part past the file contents reads as zero.

use alloc::vec::Vec;

use elf::ElfBytes;
use elf::abi::{PF_W, PT_LOAD};
use elf::endian::LittleEndian;
use elf::file::Class;
use vmm::{
    AddressSpace, FrameAllocator, HumanSize, PAGE_SIZE, PageFlags, PhysicalAddress,
    PhysicalMemory, VirtualAddress,
};

use crate::config::PROGRAM_VIRTUAL_ADDRESS;
use crate::error::KernelError;
use crate::fs::{self, FileSystem};

/// A program header the loader keeps after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: u32,
    pub offset: usize,
    pub vaddr: VirtualAddress,
    pub file_size: usize,
    pub mem_size: usize,
    pub writable: bool,
}

impl Segment {
    pub fn is_load(&self) -> bool {
        self.kind == PT_LOAD
    }

    /// Bytes of frames backing the segment, from its page start.
    fn span(&self) -> usize {
        (self.vaddr.page_offset() + self.mem_size).div_ceil(PAGE_SIZE) * PAGE_SIZE
    }
}

/// A parsed ELF executable with its loadable segments resident in physical memory.
#[derive(Debug)]
pub struct ElfFile {
    entry: VirtualAddress,
    segments: Vec<Segment>,
    /// Page-aligned frames per segment, `None` for segments with nothing to map.
    frames: Vec<Option<PhysicalAddress>>,
    size: usize,
    virtual_base: VirtualAddress,
    virtual_end: VirtualAddress,
    physical_base: PhysicalAddress,
    physical_end: PhysicalAddress,
}

impl ElfFile {
    /// Loads and validates the ELF executable at `path`.
    pub fn load<F, A>(fs: &mut F, path: &str, frames: &A) -> Result<Self, KernelError>
    where
        F: FileSystem + ?Sized,
        A: FrameAllocator + ?Sized,
    {
        let data = fs::read_to_end(fs, path)?;
        Self::from_bytes(&data, frames)
    }

    /// Parses `data` and copies every loadable segment into fresh zeroed frames.
    ///
    /// Anything that is not a little-endian 32-bit ELF with program headers is
    /// reported as [`KernelError::FormatNotRecognized`]; an ELF whose headers point
    /// outside the file or the address space is [`KernelError::InvalidArgument`].
    pub fn from_bytes<A: FrameAllocator + ?Sized>(
        data: &[u8],
        frames: &A,
    ) -> Result<Self, KernelError> {
        let (entry, segments) = parse(data)?;

        let mut file = Self {
            entry,
            frames: Vec::with_capacity(segments.len()),
            segments,
            size: 0,
            virtual_base: VirtualAddress::default(),
            virtual_end: VirtualAddress::default(),
            physical_base: PhysicalAddress::default(),
            physical_end: PhysicalAddress::default(),
        };

        for index in 0..file.segments.len() {
            let segment = file.segments[index];
            if !segment.is_load() || segment.mem_size == 0 {
                file.frames.push(None);
                continue;
            }

            let base = match frames.allocate_zeroed(segment.span()) {
                Ok(base) => base,
                Err(err) => {
                    file.close(frames);
                    return Err(err.into());
                }
            };
            let contents = &data[segment.offset..segment.offset + segment.file_size];
            // SAFETY: the grant covers `page_offset + mem_size >= page_offset + file_size`.
            unsafe { PhysicalMemory::write(base + segment.vaddr.page_offset(), contents) };

            file.frames.push(Some(base));
            file.size += segment.span();
        }
        file.compute_bounds();

        log::debug!(
            "elf: {} resident, entry {}, {} segments",
            HumanSize(file.size),
            file.entry,
            file.segments.len()
        );
        Ok(file)
    }

    fn compute_bounds(&mut self) {
        let mut resident = (0..self.segments.len()).filter(|index| self.frames[*index].is_some());
        let Some(first) = resident.next() else {
            return;
        };

        let mut lowest = first;
        let mut highest = first;
        for index in resident {
            let segment = &self.segments[index];
            if segment.vaddr <= self.segments[lowest].vaddr {
                lowest = index;
            }
            let top = &self.segments[highest];
            if segment.vaddr + segment.file_size >= top.vaddr + top.file_size {
                highest = index;
            }
        }

        let top = self.segments[highest];
        self.virtual_base = self.segments[lowest].vaddr;
        self.virtual_end = top.vaddr + top.file_size;
        let bases = (self.segment_physical(lowest), self.segment_physical(highest));
        if let (Some(base), Some(end)) = bases {
            self.physical_base = base;
            self.physical_end = end + top.file_size;
        }
    }

    pub fn entry(&self) -> VirtualAddress {
        self.entry
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Bytes of frames held for the segments.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn virtual_base(&self) -> VirtualAddress {
        self.virtual_base
    }

    pub fn virtual_end(&self) -> VirtualAddress {
        self.virtual_end
    }

    pub fn physical_base(&self) -> PhysicalAddress {
        self.physical_base
    }

    pub fn physical_end(&self) -> PhysicalAddress {
        self.physical_end
    }

    /// Physical address holding the first byte of segment `index`.
    pub fn segment_physical(&self, index: usize) -> Option<PhysicalAddress> {
        let base = (*self.frames.get(index)?)?;
        Some(base + self.segments[index].vaddr.page_offset())
    }

    /// Maps every resident segment at its virtual address.
    pub fn map_into(&self, space: &mut AddressSpace) -> Result<(), KernelError> {
        for (segment, base) in self.segments.iter().zip(&self.frames) {
            let Some(base) = *base else {
                continue;
            };
            let mut flags = PageFlags::PRESENT | PageFlags::USER;
            if segment.writable {
                flags |= PageFlags::WRITABLE;
            }

            space.map_range(
                segment.vaddr.align_down(PAGE_SIZE),
                base,
                base + segment.span(),
                flags,
            )?;
        }
        Ok(())
    }

    /// Releases the segment frames.
    pub fn close<A: FrameAllocator + ?Sized>(self, frames: &A) {
        for base in self.frames.into_iter().flatten() {
            frames.deallocate(base);
        }
    }
}

fn parse(data: &[u8]) -> Result<(VirtualAddress, Vec<Segment>), KernelError> {
    let file = ElfBytes::<LittleEndian>::minimal_parse(data).map_err(|err| {
        log::trace!("elf: not an executable image: {}", err);
        KernelError::FormatNotRecognized
    })?;

    if file.ehdr.class != Class::ELF32 || file.ehdr.e_phoff == 0 {
        return Err(KernelError::FormatNotRecognized);
    }
    let Some(table) = file.segments() else {
        return Err(KernelError::FormatNotRecognized);
    };

    let entry = u32::try_from(file.ehdr.e_entry).map_err(|_| KernelError::FormatNotRecognized)?;
    if entry < PROGRAM_VIRTUAL_ADDRESS {
        log::warn!("elf: entry point {:#x} below program base", entry);
        return Err(KernelError::InvalidArgument);
    }

    let mut segments = Vec::with_capacity(table.len());
    for (index, header) in table.iter().enumerate() {
        let in_memory = header
            .p_vaddr
            .checked_add(header.p_memsz)
            .is_some_and(|end| end <= u64::from(u32::MAX));
        let in_file = header
            .p_offset
            .checked_add(header.p_filesz)
            .is_some_and(|end| end <= data.len() as u64);
        if !in_memory || !in_file || header.p_filesz > header.p_memsz {
            log::warn!(
                "elf: program header {} out of range (offset {:#x}, file {:#x}, memory {:#x})",
                index,
                header.p_offset,
                header.p_filesz,
                header.p_memsz
            );
            return Err(KernelError::InvalidArgument);
        }

        segments.push(Segment {
            kind: header.p_type,
            offset: header.p_offset as usize,
            vaddr: VirtualAddress::from(header.p_vaddr as u32),
            file_size: header.p_filesz as usize,
            mem_size: header.p_memsz as usize,
            writable: header.p_flags & PF_W != 0,
        });
    }

    Ok((VirtualAddress::from(entry), segments))
}

/// The loaded program of a process.
#[derive(Debug)]
pub enum ProgramImage {
    Elf(ElfFile),
    Binary { data: PhysicalAddress, size: usize },
}

impl ProgramImage {
    /// Loads `path` as an ELF executable, falling back to a flat binary when the
    /// file is not ELF.
    pub fn load<F, A>(fs: &mut F, path: &str, frames: &A) -> Result<Self, KernelError>
    where
        F: FileSystem + ?Sized,
        A: FrameAllocator + ?Sized,
    {
        let data = fs::read_to_end(fs, path)?;
        match ElfFile::from_bytes(&data, frames) {
            Ok(file) => Ok(Self::Elf(file)),
            Err(KernelError::FormatNotRecognized) => {
                log::debug!("{}: loading as flat binary", path);
                Self::binary_from_bytes(&data, frames)
            }
            Err(err) => Err(err),
        }
    }

    /// Loads `path` as a flat binary whatever its contents.
    pub fn load_binary<F, A>(fs: &mut F, path: &str, frames: &A) -> Result<Self, KernelError>
    where
        F: FileSystem + ?Sized,
        A: FrameAllocator + ?Sized,
    {
        let data = fs::read_to_end(fs, path)?;
        Self::binary_from_bytes(&data, frames)
    }

    fn binary_from_bytes<A: FrameAllocator + ?Sized>(
        data: &[u8],
        frames: &A,
    ) -> Result<Self, KernelError> {
        let memory = frames.allocate_zeroed(data.len())?;
        // SAFETY: the grant covers `data.len()` bytes.
        unsafe { PhysicalMemory::write(memory, data) };
        Ok(Self::Binary {
            data: memory,
            size: data.len(),
        })
    }

    /// Address the task starts executing at.
    pub fn entry(&self) -> VirtualAddress {
        match self {
            Self::Elf(file) => file.entry(),
            Self::Binary { .. } => VirtualAddress::from(PROGRAM_VIRTUAL_ADDRESS),
        }
    }

    /// Maps the image into a task's address space.
    pub fn map_into(&self, space: &mut AddressSpace) -> Result<(), KernelError> {
        match self {
            Self::Elf(file) => file.map_into(space),
            Self::Binary { data, size } => {
                space.map_range(
                    VirtualAddress::from(PROGRAM_VIRTUAL_ADDRESS),
                    *data,
                    (*data + *size).align_up(PAGE_SIZE),
                    PageFlags::USER_RW,
                )?;
                Ok(())
            }
        }
    }

    pub fn is_elf(&self) -> bool {
        matches!(self, Self::Elf(_))
    }

    /// Releases the image memory.
    pub fn release<A: FrameAllocator + ?Sized>(self, frames: &A) {
        match self {
            Self::Elf(file) => file.close(frames),
            Self::Binary { data, .. } => frames.deallocate(data),
        }
    }
}
