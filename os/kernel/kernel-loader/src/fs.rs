//! The file-system environment, as far as the loader needs it.
//!
//! The file-system server keeps every disk block `b` mapped at
//! [`diskaddr(b)`](diskaddr) in its own address space. A file is described
//! by a 256-byte [`File`] record living in one of those blocks:
//!
//! ```text
//!  ┌──────────────┬──────┬──────┬──────────────┬──────────┬─────────┐
//!  │ name[128]    │ size │ type │ direct[10]   │ indirect │ pad[76] │
//!  └──────────────┴──────┴──────┴──────────────┴──────────┴─────────┘
//! ```
//!
//! File block `i` is `direct[i]` for `i < NDIRECT`, otherwise entry
//! `i - NDIRECT` of the indirect block. Block number 0 means "no block".

use crate::ImageSource;
use alloc::string::String;
use alloc::vec::Vec;
use kernel_env::{AccessError, EnvId, EnvType, Kernel, KernelError};
use kernel_info::memory::{BLKSIZE, DISKMAP, DISKSIZE};
use kernel_memory_addresses::{ByteLayout, VirtualAddress};
use kernel_vmem::{Access, PagePermissions};
use log::{debug, info};
use utils_layout_derive::ByteLayout;

pub const MAXNAMELEN: usize = 128;
pub const NDIRECT: usize = 10;
/// Block numbers per indirect block.
pub const NINDIRECT: u32 = BLKSIZE / 4;
pub const FTYPE_REG: u32 = 0;

/// Address of disk block `blockno` in the file-system environment.
#[must_use]
pub const fn diskaddr(blockno: u32) -> Option<VirtualAddress> {
    if blockno == 0 || blockno >= DISKSIZE / BLKSIZE {
        return None;
    }
    Some(VirtualAddress::new(DISKMAP + blockno * BLKSIZE))
}

/// On-disk file record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ByteLayout)]
#[repr(C)]
pub struct File {
    pub name: [u8; MAXNAMELEN],
    pub size: u32,
    pub ty: u32,
    pub direct: [u32; NDIRECT],
    pub indirect: u32,
    pub pad: [u8; 76],
}

impl File {
    /// The name up to its terminating NUL.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAXNAMELEN);
        &self.name[..len]
    }
}

/// Backing-store failures read as a broken image.
fn image_error(e: AccessError) -> KernelError {
    match e {
        AccessError::Env(e) => e,
        AccessError::Fault(_) => KernelError::InvalidImage,
    }
}

/// A file opened for reading out of the file-system environment.
#[derive(Debug, Clone)]
pub struct FsFile {
    fs_env: EnvId,
    file: File,
}

impl FsFile {
    /// Read the [`File`] record at `file_va` in `fs_env`.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `fs_env` is not live.
    /// - [`KernelError::InvalidArgument`] if nothing is mapped at `file_va`.
    pub fn open(kernel: &Kernel, fs_env: EnvId, file_va: VirtualAddress) -> Result<Self, KernelError> {
        let mut raw = [0u8; File::SIZE];
        kernel
            .read_memory(fs_env, file_va, &mut raw, Access::Kernel)
            .map_err(|e| match e {
                AccessError::Env(e) => e,
                AccessError::Fault(_) => KernelError::InvalidArgument,
            })?;
        let file = File::read_le(&raw);
        debug!("opened {:?} ({} bytes) at {file_va}", String::from_utf8_lossy(file.name()), file.size);
        Ok(Self { fs_env, file })
    }

    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }

    /// Disk block holding file block `filebno`.
    fn block_number(&self, kernel: &Kernel, filebno: u32) -> Result<u32, KernelError> {
        let blockno = if let Some(&b) = self.file.direct.get(filebno as usize) {
            b
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let index = filebno - NDIRECT as u32;
            if index >= NINDIRECT {
                return Err(KernelError::InvalidImage);
            }
            let table = diskaddr(self.file.indirect).ok_or(KernelError::InvalidImage)?;
            let mut raw = [0u8; 4];
            kernel
                .read_memory(self.fs_env, table + index * 4, &mut raw, Access::Kernel)
                .map_err(image_error)?;
            u32::from_le_bytes(raw)
        };
        if blockno == 0 {
            return Err(KernelError::InvalidImage);
        }
        Ok(blockno)
    }
}

impl ImageSource for FsFile {
    fn size(&self) -> u32 {
        self.file.size
    }

    fn read_at(&self, kernel: &Kernel, offset: u32, buf: &mut [u8]) -> Result<(), KernelError> {
        let len = u32::try_from(buf.len()).map_err(|_| KernelError::InvalidImage)?;
        let end = offset.checked_add(len).ok_or(KernelError::InvalidImage)?;
        if end > self.file.size {
            return Err(KernelError::InvalidImage);
        }

        let mut off = offset;
        let mut done = 0usize;
        while off < end {
            let in_block = off % BLKSIZE;
            let n = (BLKSIZE - in_block).min(end - off);
            let block = diskaddr(self.block_number(kernel, off / BLKSIZE)?).ok_or(KernelError::InvalidImage)?;
            kernel
                .read_memory(self.fs_env, block + in_block, &mut buf[done..done + n as usize], Access::Kernel)
                .map_err(image_error)?;
            off += n;
            done += n as usize;
        }
        Ok(())
    }
}

/// A file-system environment populated with a fixed set of files.
#[derive(Debug, Clone)]
pub struct FsImage {
    env: EnvId,
    files: Vec<(String, VirtualAddress)>,
}

impl FsImage {
    /// Create a `FileSystem` environment holding `files`.
    ///
    /// File records fill the blocks from 1 on, sixteen per block; file
    /// contents follow. The environment is left `NotRunnable`: only its
    /// address space is ever used.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] for names that do not fit a record.
    /// - [`KernelError::InvalidImage`] for files beyond the indirect block's reach.
    /// - [`KernelError::ResourceExhausted`] or [`KernelError::OutOfMemory`]
    ///   if the environment or its blocks cannot be allocated.
    pub fn install(kernel: &mut Kernel, files: &[(&str, &[u8])]) -> Result<Self, KernelError> {
        const RECORDS_PER_BLOCK: usize = BLKSIZE as usize / File::SIZE;

        if files.iter().any(|(name, _)| name.len() >= MAXNAMELEN) {
            return Err(KernelError::InvalidArgument);
        }
        let env = kernel.create_root(EnvType::FileSystem)?;
        let mut disk = Disk { kernel, env, next: 1 };

        let record_blocks = files.len().div_ceil(RECORDS_PER_BLOCK);
        let mut record_block = Vec::with_capacity(record_blocks);
        for _ in 0..record_blocks {
            record_block.push(disk.allocate()?);
        }

        let mut installed = Vec::with_capacity(files.len());
        for (i, (name, bytes)) in files.iter().enumerate() {
            let file = disk.store(name, bytes)?;
            #[allow(clippy::cast_possible_truncation)]
            let at = diskaddr(record_block[i / RECORDS_PER_BLOCK]).ok_or(KernelError::OutOfMemory)?
                + ((i % RECORDS_PER_BLOCK) * File::SIZE) as u32;
            let mut raw = [0u8; File::SIZE];
            file.write_le(&mut raw);
            disk.write(at, &raw)?;
            installed.push((String::from(*name), at));
        }

        info!("[{env}] file system with {} files, {} blocks", files.len(), disk.next - 1);
        Ok(Self { env, files: installed })
    }

    #[must_use]
    pub const fn env(&self) -> EnvId {
        self.env
    }

    /// Address of the record for `name`.
    #[must_use]
    pub fn open(&self, name: &str) -> Option<VirtualAddress> {
        self.files.iter().find(|(n, _)| n == name).map(|&(_, va)| va)
    }
}

/// Block allocator over a fresh file-system environment.
struct Disk<'k> {
    kernel: &'k mut Kernel,
    env: EnvId,
    next: u32,
}

impl Disk<'_> {
    fn allocate(&mut self) -> Result<u32, KernelError> {
        let blockno = self.next;
        let va = diskaddr(blockno).ok_or(KernelError::OutOfMemory)?;
        self.kernel.alloc_page(self.env, va, PagePermissions::user_rw())?;
        self.next += 1;
        Ok(blockno)
    }

    fn write(&mut self, va: VirtualAddress, bytes: &[u8]) -> Result<(), KernelError> {
        self.kernel
            .write_memory(self.env, va, bytes, Access::Kernel)
            .map_err(image_error)
    }

    fn store(&mut self, name: &str, bytes: &[u8]) -> Result<File, KernelError> {
        let mut file = File {
            name: [0; MAXNAMELEN],
            size: u32::try_from(bytes.len()).map_err(|_| KernelError::InvalidImage)?,
            ty: FTYPE_REG,
            direct: [0; NDIRECT],
            indirect: 0,
            pad: [0; 76],
        };
        file.name[..name.len()].copy_from_slice(name.as_bytes());

        for (filebno, chunk) in bytes.chunks(BLKSIZE as usize).enumerate() {
            let blockno = self.allocate()?;
            let va = diskaddr(blockno).ok_or(KernelError::OutOfMemory)?;
            self.write(va, chunk)?;

            if filebno < NDIRECT {
                file.direct[filebno] = blockno;
                continue;
            }
            if file.indirect == 0 {
                file.indirect = self.allocate()?;
            }
            let index = u32::try_from(filebno - NDIRECT).map_err(|_| KernelError::InvalidImage)?;
            if index >= NINDIRECT {
                return Err(KernelError::InvalidImage);
            }
            let table = diskaddr(file.indirect).ok_or(KernelError::OutOfMemory)?;
            self.write(table + index * 4, &blockno.to_le_bytes())?;
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_env::KernelConfig;

    #[test]
    fn record_size() {
        assert_eq!(File::SIZE, 256);
        assert_eq!(diskaddr(0), None);
        assert_eq!(diskaddr(3), Some(VirtualAddress::new(0x1000_3000)));
    }

    #[test]
    fn files_read_back_across_direct_and_indirect_blocks() {
        let mut k = Kernel::new(KernelConfig::default().with_max_envs(4).with_physical_pages(256))
            .expect("boot");
        #[allow(clippy::cast_possible_truncation)]
        let big: Vec<u8> = (0..(NDIRECT as u32 + 3) * BLKSIZE).map(|i| (i / 7) as u8).collect();
        let fs = FsImage::install(&mut k, &[("small", &b"hello world"[..]), ("big", big.as_slice())]).expect("install");
        assert_eq!(k.env(fs.env()).map(kernel_env::Env::env_type), Some(EnvType::FileSystem));
        assert_eq!(fs.open("missing"), None);

        let small = FsFile::open(&k, fs.env(), fs.open("small").expect("small")).expect("open");
        assert_eq!(small.file().name(), b"small");
        let mut buf = [0u8; 5];
        small.read_at(&k, 6, &mut buf).expect("read");
        assert_eq!(&buf, b"world");
        assert_eq!(small.read_at(&k, 8, &mut buf), Err(KernelError::InvalidImage));

        let file = FsFile::open(&k, fs.env(), fs.open("big").expect("big")).expect("open");
        assert_eq!(file.size(), (NDIRECT as u32 + 3) * BLKSIZE);
        assert_ne!(file.file().indirect, 0);

        // A read straddling the last direct block and the first indirect one.
        let start = NDIRECT as u32 * BLKSIZE - 10;
        let mut buf = [0u8; 20];
        file.read_at(&k, start, &mut buf).expect("read");
        assert_eq!(&buf[..], &big[start as usize..start as usize + 20]);
    }
}
