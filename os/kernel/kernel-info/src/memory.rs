//! # Memory Layout

/// Bytes mapped by a page.
pub const PGSIZE: u32 = 4096;

/// Bytes mapped by a page directory entry.
pub const PTSIZE: u32 = PGSIZE * 1024;

/// All physical memory is mapped at this address for the kernel.
pub const KERNBASE: u32 = 0xf000_0000;

/// Top of the user-readable region; nothing at or above is user accessible.
pub const ULIM: u32 = KERNBASE - 2 * PTSIZE;

/// Read-only window onto the current address space's page tables.
pub const UVPT: u32 = ULIM - PTSIZE;

/// Read-only copies of the physical page bookkeeping.
pub const UPAGES: u32 = UVPT - PTSIZE;

/// Read-only copies of the environment table.
pub const UENVS: u32 = UPAGES - PTSIZE;

/// Top of user-mapped memory. User syscalls may only name addresses below.
pub const UTOP: u32 = UENVS;

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: u32 = UTOP;

/// Top of the normal user stack; one empty guard page separates it from the
/// exception stack.
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE;

/// Where user programs generally begin.
pub const UTEXT: u32 = 2 * PTSIZE;

/// Scratch region for temporary user mappings.
pub const UTEMP: u32 = PTSIZE;

/// Temporary page used by the copy-on-write fault handler.
pub const PFTEMP: u32 = UTEMP + PTSIZE - PGSIZE;

/// Start of the file-system environment's block cache window.
pub const DISKMAP: u32 = 0x1000_0000;

/// Largest disk the block cache window can hold.
pub const DISKSIZE: u32 = 0xc000_0000;

/// Bytes per file-system block.
pub const BLKSIZE: u32 = PGSIZE;

const _: () = {
    assert!(UTOP % PTSIZE == 0);
    assert!(UTOP < ULIM);
    assert!(ULIM < KERNBASE);
    assert!(USTACKTOP + 2 * PGSIZE == UXSTACKTOP);
    assert!(PFTEMP < UTEXT);
    assert!(UTEXT < DISKMAP);
    assert!(DISKMAP < USTACKTOP);
    assert!(BLKSIZE == PGSIZE);
};
