//! Replacing an environment's image in place.
//!
//! ```text
//!  USTACKTOP ┬───────────────────────┐
//!            │ "arg0\0arg1\0..."     │  packed strings
//!            ├───────────────────────┤  (4-byte aligned)
//!            │ NULL                  │
//!            │ argv[argc-1] ... [0]  │  pointers into the strings
//!            ├───────────────────────┤ ◄── argv
//!            │ argv                  │
//!            │ argc                  │ ◄── esp
//!            │ ...                   │
//!  -2*PGSIZE ┴───────────────────────┘
//! ```
//!
//! Everything that can be rejected is checked before the caller's address
//! space is touched. Once it has been, the old image is gone and any failure
//! takes the caller down with it.

use crate::ImageSource;
use crate::elf::{ElfHeader, ProgramHeader};
use crate::fs::FsFile;
use alloc::vec;
use alloc::vec::Vec;
use kernel_env::{AccessError, EnvId, EnvType, Kernel, KernelError};
use kernel_info::memory::{BLKSIZE, PGSIZE, USTACKTOP, UTOP};
use kernel_memory_addresses::{ByteLayout, VirtualAddress, VirtualPage, align_down, align_up};
use kernel_vmem::{Access, PagePermissions};
use log::{debug, info, warn};

/// Bottom of the two pages `exec` builds the initial stack in.
const STACK_BOTTOM: u32 = USTACKTOP - 2 * PGSIZE;

/// Why `exec` did not complete.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ExecError {
    /// Nothing was changed; the caller sees the error code.
    #[error("exec rejected: {0}")]
    Rejected(KernelError),
    /// The caller's old image was already gone and it has been destroyed.
    #[error("exec failed after teardown, environment destroyed: {0}")]
    Destroyed(KernelError),
}

impl ExecError {
    #[must_use]
    pub const fn error(&self) -> KernelError {
        match self {
            Self::Rejected(e) | Self::Destroyed(e) => *e,
        }
    }
}

/// A loadable segment that passed validation.
#[derive(Debug, Copy, Clone)]
struct Segment {
    offset: u32,
    va: u32,
    filesz: u32,
    memsz: u32,
}

/// The `exec` system call: replace the running environment's image with the
/// file whose record sits at `file_va` in the file-system environment.
///
/// `argv_va` is a NULL-terminated array of string pointers in the caller's
/// memory.
///
/// # Errors
/// - [`ExecError::Rejected`] with [`KernelError::BadEnvironment`] if nothing
///   is running or there is no file-system environment.
/// - [`ExecError::Rejected`] with [`KernelError::Faulted`] if the argument
///   vector is not readable user memory.
/// - Otherwise as for [`replace_image`].
pub fn exec(kernel: &mut Kernel, file_va: VirtualAddress, argv_va: VirtualAddress) -> Result<(), ExecError> {
    let caller = kernel
        .current()
        .ok_or(ExecError::Rejected(KernelError::BadEnvironment))?;
    let fs_env = kernel.find_by_type(EnvType::FileSystem).ok_or_else(|| {
        warn!("[{caller}] exec without a file-system environment");
        ExecError::Rejected(KernelError::BadEnvironment)
    })?;
    let file = FsFile::open(kernel, fs_env, file_va).map_err(ExecError::Rejected)?;
    let argv = read_argv(kernel, caller, argv_va).map_err(ExecError::Rejected)?;
    replace_image(kernel, caller, &file, &argv)
}

/// Replace the image of `id` with the executable in `image`, started with
/// `argv`.
///
/// On success `id` resumes at the image's entry point with the stack laid
/// out as in the module docs, no exception upcall, and no other user
/// mappings than the stack and the loaded segments.
///
/// # Errors
/// - [`ExecError::Rejected`] with [`KernelError::InvalidImage`] for a bad
///   header, or segments outside the file, above `UTOP`, or on top of the
///   stack pages.
/// - [`ExecError::Rejected`] with [`KernelError::InvalidArgument`] if the
///   arguments do not fit in the stack pages.
/// - [`ExecError::Destroyed`] with [`KernelError::InvalidImage`] for a
///   segment whose file size exceeds its memory size.
/// - [`ExecError::Destroyed`] if memory runs out while loading.
pub fn replace_image<S, A>(kernel: &mut Kernel, id: EnvId, image: &S, argv: &[A]) -> Result<(), ExecError>
where
    S: ImageSource + ?Sized,
    A: AsRef<[u8]>,
{
    if kernel.env(id).is_none() {
        return Err(ExecError::Rejected(KernelError::BadEnvironment));
    }

    let (header, segments) = match parse(kernel, image) {
        Ok(parsed) => parsed,
        Err(Malformed::Rejected(e)) => {
            warn!("[{id}] exec: image rejected");
            return Err(ExecError::Rejected(e));
        }
        Err(Malformed::Fatal) => {
            warn!("[{id}] exec: segment file size exceeds memory size");
            destroy(kernel, id);
            return Err(ExecError::Destroyed(KernelError::InvalidImage));
        }
    };
    let (stack, esp) = build_stack(argv).map_err(ExecError::Rejected)?;

    match load(kernel, id, image, &segments, &stack) {
        Ok(()) => {}
        Err(e) => {
            warn!("[{id}] exec: load failed after teardown: {e}");
            destroy(kernel, id);
            return Err(ExecError::Destroyed(e));
        }
    }
    kernel
        .enter_image(id, header.entry, esp)
        .map_err(ExecError::Destroyed)?;
    info!(
        "[{id}] exec: {} segments, entry {:#010x}, {} args",
        segments.len(),
        header.entry,
        argv.len()
    );
    Ok(())
}

/// Boot-time creation of an environment running `image`.
///
/// The environment has no parent, no arguments and is left `Runnable`.
///
/// # Errors
/// - [`KernelError::ResourceExhausted`] or [`KernelError::OutOfMemory`] if
///   the environment cannot be created or loaded.
/// - [`KernelError::InvalidImage`] if `image` is not a valid executable.
pub fn create_env(kernel: &mut Kernel, image: &[u8], ty: EnvType) -> Result<EnvId, KernelError> {
    const NO_ARGS: &[&[u8]] = &[];

    let id = kernel.create_root(ty)?;
    match replace_image(kernel, id, image, NO_ARGS) {
        Ok(()) => {}
        Err(ExecError::Rejected(e)) => {
            destroy(kernel, id);
            return Err(e);
        }
        Err(ExecError::Destroyed(e)) => return Err(e),
    }
    kernel.mark_runnable(id)?;
    Ok(id)
}

fn destroy(kernel: &mut Kernel, id: EnvId) {
    if let Err(e) = kernel.destroy(id) {
        debug!("[{id}] already gone: {e}");
    }
}

enum Malformed {
    Rejected(KernelError),
    Fatal,
}

impl From<KernelError> for Malformed {
    fn from(e: KernelError) -> Self {
        Self::Rejected(e)
    }
}

/// Read and check the header and every loadable segment.
fn parse<S: ImageSource + ?Sized>(kernel: &Kernel, image: &S) -> Result<(ElfHeader, Vec<Segment>), Malformed> {
    let mut raw = [0u8; ElfHeader::SIZE];
    image.read_at(kernel, 0, &mut raw)?;
    let header = ElfHeader::parse(&raw).map_err(KernelError::from)?;

    let mut segments = Vec::new();
    let mut fatal = false;
    for off in header.program_header_offsets().map_err(KernelError::from)? {
        let mut raw = [0u8; ProgramHeader::SIZE];
        image.read_at(kernel, off, &mut raw)?;
        let ph = ProgramHeader::read_le(&raw);
        if !ph.is_load() {
            continue;
        }

        let file_end = ph.offset.checked_add(ph.filesz);
        if file_end.is_none_or(|end| end > image.size()) {
            debug!("segment at file offset {:#x} runs past the file", ph.offset);
            return Err(KernelError::InvalidImage.into());
        }
        let mem_end = ph.va.checked_add(ph.memsz);
        if mem_end.is_none_or(|end| end > UTOP) {
            debug!("segment at {:#010x} reaches above UTOP", ph.va);
            return Err(KernelError::InvalidImage.into());
        }
        if ph.memsz > 0 && mem_end.is_some_and(|end| ph.va < USTACKTOP && end > STACK_BOTTOM) {
            debug!("segment at {:#010x} overlaps the stack", ph.va);
            return Err(KernelError::InvalidImage.into());
        }
        fatal |= ph.filesz > ph.memsz;

        segments.push(Segment {
            offset: ph.offset,
            va: ph.va,
            filesz: ph.filesz,
            memsz: ph.memsz,
        });
    }
    if fatal {
        return Err(Malformed::Fatal);
    }
    Ok((header, segments))
}

/// The contents of the two stack pages and the initial `esp`.
#[allow(clippy::cast_possible_truncation)]
fn build_stack<A: AsRef<[u8]>>(argv: &[A]) -> Result<(Vec<u8>, u32), KernelError> {
    let argc = argv.len() as u32;
    let strings_len: usize = argv.iter().map(|a| a.as_ref().len() + 1).sum();
    let needed = strings_len
        .checked_add(3)
        .and_then(|n| n.checked_add((argv.len() + 1) * 4 + 8));
    if needed.is_none_or(|n| n > (2 * PGSIZE) as usize) {
        debug!("{} bytes of arguments do not fit the stack", strings_len);
        return Err(KernelError::InvalidArgument);
    }

    let mut stack = vec![0u8; (2 * PGSIZE) as usize];
    let at = |va: u32| (va - STACK_BOTTOM) as usize;

    let strings = USTACKTOP - strings_len as u32;
    let argv_at = align_down(strings, 4) - 4 * (argc + 1);
    let mut cursor = strings;
    for (i, arg) in argv.iter().enumerate() {
        let arg = arg.as_ref();
        stack[at(cursor)..at(cursor) + arg.len()].copy_from_slice(arg);
        let slot = at(argv_at) + i * 4;
        stack[slot..slot + 4].copy_from_slice(&cursor.to_le_bytes());
        cursor += arg.len() as u32 + 1;
    }

    let esp = argv_at - 8;
    stack[at(esp)..at(esp) + 4].copy_from_slice(&argc.to_le_bytes());
    stack[at(esp) + 4..at(esp) + 8].copy_from_slice(&argv_at.to_le_bytes());
    Ok((stack, esp))
}

/// Copy the argument vector out of `id`'s memory.
fn read_argv(kernel: &Kernel, id: EnvId, argv_va: VirtualAddress) -> Result<Vec<Vec<u8>>, KernelError> {
    let budget = (2 * PGSIZE) as usize;
    let mut used = 8usize;
    let mut argv = Vec::new();

    let mut slot = argv_va;
    loop {
        let mut word = [0u8; 4];
        user_read(kernel, id, slot, &mut word)?;
        let ptr = u32::from_le_bytes(word);
        used += 4;
        if ptr == 0 {
            break;
        }

        let mut arg = Vec::new();
        let mut va = VirtualAddress::new(ptr);
        loop {
            let mut byte = [0u8; 1];
            user_read(kernel, id, va, &mut byte)?;
            used += 1;
            if used > budget {
                return Err(KernelError::InvalidArgument);
            }
            if byte[0] == 0 {
                break;
            }
            arg.push(byte[0]);
            va = va.checked_add(1).ok_or(KernelError::Faulted)?;
        }
        argv.push(arg);
        slot = slot.checked_add(4).ok_or(KernelError::Faulted)?;
    }
    Ok(argv)
}

fn user_read(kernel: &Kernel, id: EnvId, va: VirtualAddress, buf: &mut [u8]) -> Result<(), KernelError> {
    kernel
        .read_memory(id, va, buf, Access::User)
        .map_err(|e| match e {
            AccessError::Env(e) => e,
            AccessError::Fault(fault) => {
                warn!("[{id}] exec: bad argument pointer: {fault}");
                KernelError::Faulted
            }
        })
}

fn kernel_write(kernel: &mut Kernel, id: EnvId, va: VirtualAddress, bytes: &[u8]) -> Result<(), KernelError> {
    kernel
        .write_memory(id, va, bytes, Access::Kernel)
        .map_err(|e| match e {
            AccessError::Env(e) => e,
            AccessError::Fault(_) => KernelError::OutOfMemory,
        })
}

/// Tear down the old image and load the new one.
fn load<S: ImageSource + ?Sized>(
    kernel: &mut Kernel,
    id: EnvId,
    image: &S,
    segments: &[Segment],
    stack: &[u8],
) -> Result<(), KernelError> {
    let stack_pages = [
        VirtualPage::containing(VirtualAddress::new(STACK_BOTTOM)),
        VirtualPage::containing(VirtualAddress::new(STACK_BOTTOM + PGSIZE)),
    ];
    for page in stack_pages {
        kernel.alloc_page(id, page.base(), PagePermissions::user_rw())?;
    }
    kernel_write(kernel, id, VirtualAddress::new(STACK_BOTTOM), stack)?;
    kernel.clear_user_mappings(id, &stack_pages)?;

    let mut chunk = vec![0u8; BLKSIZE as usize];
    for seg in segments.iter().filter(|s| s.memsz > 0) {
        let end = align_up(seg.va + seg.memsz, PGSIZE).unwrap_or(UTOP);
        let mut page = align_down(seg.va, PGSIZE);
        while page < end {
            let va = VirtualAddress::new(page);
            if !kernel.page_entry(id, va).is_some_and(|e| e.present()) {
                kernel.alloc_page(id, va, PagePermissions::user_rw())?;
            }
            page += PGSIZE;
        }

        let mut off = seg.offset;
        let file_end = seg.offset + seg.filesz;
        let mut dst = VirtualAddress::new(seg.va);
        while off < file_end {
            let n = (BLKSIZE - off % BLKSIZE).min(file_end - off);
            let buf = &mut chunk[..n as usize];
            image.read_at(kernel, off, buf)?;
            kernel_write(kernel, id, dst, buf)?;
            off += n;
            dst += n;
        }

        let bss = seg.memsz - seg.filesz;
        if bss > 0 {
            kernel
                .zero_memory(id, dst, bss, Access::Kernel)
                .map_err(|_| KernelError::OutOfMemory)?;
        }
        debug!("[{id}] segment {:#010x}+{:#x} ({:#x} from file)", seg.va, seg.memsz, seg.filesz);
    }
    Ok(())
}
