//! # Virtual Memory Support
//!
//! Two-level 32-bit x86 paging for environment address spaces.
//!
//! ## What you get
//! - [`PageEntryBits`], a typed view of a page-table entry.
//! - [`PagePermissions`], the capability set a user mapping may carry
//!   (present, writable, user, copy-on-write, share-on-fork).
//! - [`AddressSpace`], an owned two-level tree of page tables for one
//!   environment, with the validated mutations the system calls need.
//! - [`KernelRegion`], the mappings above [`UTOP`](kernel_info::memory::UTOP)
//!   that every address space shares.
//! - [`FrameAlloc`], the reference-counted physical page interface the
//!   address space draws its pages and page tables from.
//!
//! ## 32-bit x86 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PDX  |  PTX  | Offset |
//! ```
//!
//! ```text
//!  Page Directory  →  Page Table  →  Physical Page
//!        │                 │
//!        │                 └───► PTE → maps 4 KiB page
//!        └─────────────────────► PDE → points at a page table
//! ```
//!
//! Each table holds 1024 four-byte entries, so one directory entry spans
//! 4 MiB and the whole directory spans the 4 GiB address space.
//!
//! ## Reference counting
//!
//! Physical pages are shared, never owned: every present user mapping holds
//! one reference on its page, and so does every page table and the page
//! directory itself. A page returns to the free pool when its last mapping
//! goes away. Installing a mapping always takes the new reference **before**
//! dropping the one it replaces, so re-inserting a page at the address it is
//! already mapped at cannot free it.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod address_space;
mod kernel_region;
mod page_entry_bits;
mod page_table;
mod permissions;
#[cfg(test)]
mod test_frames;

pub use crate::address_space::{AddressSpace, UserMapping};
pub use crate::kernel_region::KernelRegion;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::PageTable;
pub use crate::permissions::PagePermissions;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress};
use kernel_registers::FaultErrorCode;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Bytes in a page, as a `usize` for buffer arithmetic.
pub const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Minimal interface to the physical page pool.
///
/// Pages come back from [`alloc_zeroed`](Self::alloc_zeroed) zero-filled and
/// with a reference count of zero; the caller takes the first reference by
/// mapping it. A page whose count drops back to zero is returned to the pool.
pub trait FrameAlloc {
    /// Allocate one zero-filled 4 KiB physical page, or `None` when exhausted.
    fn alloc_zeroed(&mut self) -> Option<PhysicalPage>;

    /// Take one reference on `page`.
    fn incref(&mut self, page: PhysicalPage);

    /// Drop one reference on `page`, freeing it when none are left.
    fn decref(&mut self, page: PhysicalPage);

    /// Current reference count of `page`.
    fn refcount(&self, page: PhysicalPage) -> u32;

    /// The page's 4 KiB of contents.
    fn contents(&self, page: PhysicalPage) -> &[u8];

    /// The page's 4 KiB of contents, writable.
    fn contents_mut(&mut self, page: PhysicalPage) -> &mut [u8];
}

/// Failures of address-space operations.
///
/// Every operation validates before it mutates: an `Err` means the address
/// space is exactly as it was, except that an intermediate page table may
/// have been allocated on the way to an [`OutOfMemory`](Self::OutOfMemory).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("address {0} is misaligned or outside user space")]
    InvalidAddress(VirtualAddress),
    #[error("permission bits {0:#x} are not allowed")]
    InvalidPermissions(u32),
    #[error("no mapping at {0}")]
    NotMapped(VirtualAddress),
    #[error("mapping at {0} is not writable")]
    PermissionDenied(VirtualAddress),
    #[error("out of physical memory")]
    OutOfMemory,
}

/// Privilege of a simulated memory access.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    /// CPL 3: needs the user bit, and the writable bit for stores.
    User,
    /// CPL 0: needs only a present mapping.
    Kernel,
}

/// A memory access the MMU refused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("page fault at {va}: {}", .code.explain())]
pub struct PageFault {
    /// First faulting byte.
    pub va: VirtualAddress,
    pub code: FaultErrorCode,
}
