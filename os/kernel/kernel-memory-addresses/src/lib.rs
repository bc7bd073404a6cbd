//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the 32-bit addresses and page numbers used by
//! the two-level paging code and the environment manager.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | A byte address as seen by an environment (translated by paging). |
//! | [`VirtualPage`] | The page-aligned base of a virtual page. |
//! | [`PhysicalAddress`] | A byte address in (simulated) physical memory. |
//! | [`PhysicalPage`] | A physical page **number**, i.e. an index into the frame arena. |
//!
//! All types are `#[repr(transparent)]` around `u32` and implement `Copy`,
//! `Eq`, `Ord` and `Hash`, so they can be used as map keys.
//!
//! ## Two-level split
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PDX  |  PTX  | Offset |
//! ```
//!
//! [`VirtualAddress::directory_index`] selects the page-directory entry and
//! [`VirtualAddress::table_index`] the page-table entry below it.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0080_1234);
//! assert_eq!(va.directory_index(), 2);
//! assert_eq!(va.table_index(), 1);
//! assert_eq!(va.page_offset(), 0x234);
//! assert_eq!(va.page().base(), VirtualAddress::new(0x0080_1000));
//! ```
//!
//! ## Byte layouts
//!
//! The [`ByteLayout`] trait describes records that cross the user/kernel
//! boundary through memory (trap frames, executable headers, file records).
//! Implementations are usually generated with `#[derive(ByteLayout)]` from
//! `utils-layout-derive`.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod byte_layout;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use crate::byte_layout::ByteLayout;
pub use crate::physical_address::PhysicalAddress;
pub use crate::physical_page::PhysicalPage;
pub use crate::virtual_address::VirtualAddress;
pub use crate::virtual_page::VirtualPage;

/// Bytes mapped by a single page-table entry.
pub const PAGE_SIZE: u32 = 4096;

/// log2([`PAGE_SIZE`]).
pub const PAGE_SHIFT: u32 = 12;

/// Entries in a page directory.
pub const DIRECTORY_ENTRIES: usize = 1024;

/// Entries in a page table.
pub const TABLE_ENTRIES: usize = 1024;

/// Bytes mapped by a single page-directory entry (one full page table).
pub const TABLE_SPAN: u32 = PAGE_SIZE * TABLE_ENTRIES as u32;

/// Bit position of the directory index within a virtual address.
pub const DIRECTORY_SHIFT: u32 = 22;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0, 4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`, or `None` on overflow.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(1, 4096), Some(4096));
/// assert_eq!(align_up(4096, 4096), Some(4096));
/// assert_eq!(align_up(u32::MAX, 4096), None);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> Option<u32> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_roundtrip() {
        let va = VirtualAddress::new(0xeebf_dffc);
        let page = va.page();
        assert_eq!(page.base().as_u32(), 0xeebf_d000);
        assert_eq!(page.base().as_u32() + va.page_offset(), va.as_u32());
        assert_eq!(va.directory_index(), 0x3ba);
        assert_eq!(va.table_index(), 0x3fd);
    }

    #[test]
    fn alignment_checks() {
        assert!(VirtualAddress::new(0x0080_0000).is_page_aligned());
        assert!(!VirtualAddress::new(0x0080_0004).is_page_aligned());
        assert!(VirtualPage::try_from(VirtualAddress::new(0x1001)).is_err());
        assert_eq!(
            VirtualPage::try_from(VirtualAddress::new(0x2000)).map(VirtualPage::number),
            Ok(2)
        );
    }

    #[test]
    fn physical_page_numbers() {
        let pp = PhysicalPage::new(7);
        assert_eq!(pp.base(), PhysicalAddress::new(7 * PAGE_SIZE));
        assert_eq!(PhysicalAddress::new(0x7123).page(), pp);
        assert_eq!(pp.index(), 7);
    }

    #[test]
    fn checked_offsets() {
        let va = VirtualAddress::new(u32::MAX - 1);
        assert_eq!(va.checked_add(1), Some(VirtualAddress::new(u32::MAX)));
        assert_eq!(va.checked_add(2), None);
    }
}
