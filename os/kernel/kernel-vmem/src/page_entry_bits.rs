use crate::PagePermissions;
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// A single 32-bit x86 page-directory or page-table entry in raw bitfield form.
///
/// ### Bit layout
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P`             | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (leaf only) |
/// | 7      | `PS`            | 4 MiB page (directory entries only) |
/// | 8      | `G`             | Global |
/// | 9      | avail           | Free for OS use |
/// | 10     | `SHARE`         | Software: keep shared across fork |
/// | 11     | `COW`           | Software: copy-on-write |
/// | 12–31  | `frame`         | Physical page number |
///
/// Bits 9–11 are ignored by the MMU; the kernel uses two of them for the
/// share-on-fork and copy-on-write capabilities (see [`PagePermissions`]).
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalPage;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_writable(true);
/// e.set_physical_page(PhysicalPage::new(0x12345));
/// assert!(e.present());
/// assert_eq!(e.into_bits(), 0x1234_5003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    pub accessed: bool,

    /// Dirty (D, bit 6), leaf only.
    pub dirty: bool,

    /// Page Size (PS, bit 7). Never set by this kernel.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// OS-available (bit 9). Unused.
    pub os_available: bool,

    /// Share-on-fork (software, bit 10).
    pub share: bool,

    /// Copy-on-write (software, bit 11).
    pub copy_on_write: bool,

    /// Physical page number (bits 12..=31).
    #[bits(20)]
    frame: u32,
}

impl PageEntryBits {
    /// Build a present leaf entry for `page` with the given capabilities.
    #[inline]
    #[must_use]
    pub const fn leaf(page: PhysicalPage, perm: PagePermissions) -> Self {
        Self::from_bits(perm.into_bits()).with_frame(page.number())
    }

    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage) {
        self.set_frame(page.number());
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage {
        PhysicalPage::new(self.frame())
    }

    /// The capability bits of this entry, as a system call would name them.
    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> PagePermissions {
        PagePermissions::from_bits(self.into_bits() & PagePermissions::SYSCALL_MASK)
    }
}
