use crate::PageEntryBits;
use alloc::boxed::Box;
use kernel_memory_addresses::{PhysicalPage, TABLE_ENTRIES};

/// One second-level page table: 1024 entries backed by a physical page.
///
/// The entries are kept next to the frame rather than inside it so that the
/// frame's reference count, not its contents, is what the table shares with
/// the physical page pool.
pub struct PageTable {
    frame: PhysicalPage,
    entries: Box<[PageEntryBits; TABLE_ENTRIES]>,
}

impl PageTable {
    pub(crate) fn new(frame: PhysicalPage) -> Self {
        Self {
            frame,
            entries: Box::new([PageEntryBits::new(); TABLE_ENTRIES]),
        }
    }

    /// Physical page holding this table.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage {
        self.frame
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> PageEntryBits {
        self.entries[index]
    }

    #[inline]
    pub(crate) fn set(&mut self, index: usize, entry: PageEntryBits) {
        self.entries[index] = entry;
    }

    /// Present entries with their index.
    pub fn iter_present(&self) -> impl Iterator<Item = (usize, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.present())
    }

    /// Number of present entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter_present().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter_present().next().is_none()
    }
}
