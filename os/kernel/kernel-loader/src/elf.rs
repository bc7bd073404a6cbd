//! ELF32 executables, little endian.

use alloc::vec::Vec;
use bitfield_struct::bitfield;
use kernel_env::KernelError;
use kernel_memory_addresses::ByteLayout;
use utils_layout_derive::ByteLayout;

/// `\x7fELF` read as a little-endian word.
pub const ELF_MAGIC: u32 = 0x464c_457f;

pub const PT_LOAD: u32 = 1;

/// `Elf32_Ehdr`.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, ByteLayout)]
#[repr(C)]
pub struct ElfHeader {
    pub magic: u32,
    pub ident: [u8; 12],
    pub ty: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u32,
    pub phoff: u32,
    pub shoff: u32,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// `Elf32_Phdr`.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, ByteLayout)]
#[repr(C)]
pub struct ProgramHeader {
    pub ty: u32,
    pub offset: u32,
    pub va: u32,
    pub pa: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
    pub align: u32,
}

/// `Elf32_Phdr.p_flags` (SVr4): bit0=X, bit1=W, bit2=R.
#[bitfield(u32)]
pub struct PFlags {
    pub execute: bool, // PF_X = 1
    pub write: bool,   // PF_W = 2
    pub read: bool,    // PF_R = 4
    #[bits(29)]
    __: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ElfError {
    #[error("image too short for its headers")]
    TooShort,
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("program header table out of range")]
    BadProgramHeaders,
}

impl From<ElfError> for KernelError {
    fn from(_: ElfError) -> Self {
        Self::InvalidImage
    }
}

impl ElfHeader {
    /// Decode and check the header at the start of `bytes`.
    ///
    /// # Errors
    /// - [`ElfError::TooShort`] if `bytes` cannot hold a header.
    /// - [`ElfError::BadMagic`] if the magic word is wrong.
    pub fn parse(bytes: &[u8]) -> Result<Self, ElfError> {
        if bytes.len() < Self::SIZE {
            return Err(ElfError::TooShort);
        }
        let header = Self::read_le(bytes);
        if header.magic != ELF_MAGIC {
            return Err(ElfError::BadMagic(header.magic));
        }
        Ok(header)
    }

    /// File offsets of the program headers.
    ///
    /// # Errors
    /// - [`ElfError::BadProgramHeaders`] if the table would overflow the
    ///   32-bit file offset range.
    pub fn program_header_offsets(&self) -> Result<impl Iterator<Item = u32> + use<>, ElfError> {
        #[allow(clippy::cast_possible_truncation)]
        let stride = ProgramHeader::SIZE as u32;
        let phoff = self.phoff;
        let count = u32::from(self.phnum);
        count
            .checked_mul(stride)
            .and_then(|len| phoff.checked_add(len))
            .ok_or(ElfError::BadProgramHeaders)?;
        Ok((0..count).map(move |i| phoff + i * stride))
    }
}

impl ProgramHeader {
    #[inline]
    #[must_use]
    pub const fn is_load(&self) -> bool {
        self.ty == PT_LOAD
    }

    #[inline]
    #[must_use]
    pub const fn pflags(&self) -> PFlags {
        PFlags::from_bits(self.flags)
    }
}

/// Assembles small executables: a header, one program header per segment,
/// then the segment bytes.
#[derive(Debug, Default, Clone)]
pub struct ImageBuilder {
    entry: u32,
    segments: Vec<(u32, Vec<u8>, u32)>,
}

impl ImageBuilder {
    #[must_use]
    pub const fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// Add a loadable segment at `va` holding `bytes`, `memsz` bytes long in
    /// memory.
    #[must_use]
    pub fn segment(mut self, va: u32, bytes: &[u8], memsz: u32) -> Self {
        self.segments.push((va, bytes.to_vec(), memsz));
        self
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut offset = ElfHeader::SIZE + phnum * ProgramHeader::SIZE;
        let mut image = alloc::vec![0u8; offset];

        let header = ElfHeader {
            magic: ELF_MAGIC,
            ident: [1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            ty: 2,
            machine: 3,
            version: 1,
            entry: self.entry,
            phoff: ElfHeader::SIZE as u32,
            ehsize: ElfHeader::SIZE as u16,
            phentsize: ProgramHeader::SIZE as u16,
            phnum: phnum as u16,
            ..ElfHeader::default()
        };
        header.write_le(&mut image[..ElfHeader::SIZE]);

        for (i, (va, bytes, memsz)) in self.segments.iter().enumerate() {
            offset = offset.next_multiple_of(16);
            let ph = ProgramHeader {
                ty: PT_LOAD,
                offset: offset as u32,
                va: *va,
                pa: *va,
                filesz: bytes.len() as u32,
                memsz: *memsz,
                flags: PFlags::new().with_read(true).with_write(true).with_execute(true).into_bits(),
                align: 16,
            };
            let at = ElfHeader::SIZE + i * ProgramHeader::SIZE;
            ph.write_le(&mut image[at..at + ProgramHeader::SIZE]);

            image.resize(offset, 0);
            image.extend_from_slice(bytes);
            offset = image.len();
        }
        image
    }
}
