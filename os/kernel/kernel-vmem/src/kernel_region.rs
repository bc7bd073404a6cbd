use crate::{FrameAlloc, PageEntryBits, VmemError};
use alloc::collections::BTreeMap;
use kernel_info::memory::{KERNBASE, PGSIZE, UENVS, UTOP};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
use log::debug;

/// The mappings at and above `UTOP` shared by every address space.
///
/// Built once at boot and handed to each new address space behind an `Arc`,
/// so sharing is by construction: nothing that takes an `&mut AddressSpace`
/// can reach these entries. Contains the kernel image (supervisor only) and
/// the read-only environment window at `UENVS`.
pub struct KernelRegion {
    entries: BTreeMap<VirtualPage, PageEntryBits>,
}

impl KernelRegion {
    /// Map `image_pages` pages of kernel image at `KERNBASE` and one
    /// read-only user page at `UENVS`.
    ///
    /// The pages stay referenced for the lifetime of the kernel.
    ///
    /// # Errors
    /// - [`VmemError::OutOfMemory`] if the pool cannot hold the region.
    pub fn boot<A: FrameAlloc>(frames: &mut A, image_pages: u32) -> Result<Self, VmemError> {
        let mut region = Self {
            entries: BTreeMap::new(),
        };

        let kernel_rw = PageEntryBits::new().with_present(true).with_writable(true);
        for i in 0..image_pages {
            let va = VirtualAddress::new(KERNBASE + i * PGSIZE);
            region.pin(frames, va, kernel_rw)?;
        }

        let user_ro = PageEntryBits::new()
            .with_present(true)
            .with_user_access(true);
        region.pin(frames, VirtualAddress::new(UENVS), user_ro)?;

        debug!(
            "kernel region: {} image pages at {:#010x}, env window at {:#010x}",
            image_pages, KERNBASE, UENVS
        );
        Ok(region)
    }

    fn pin<A: FrameAlloc>(
        &mut self,
        frames: &mut A,
        va: VirtualAddress,
        bits: PageEntryBits,
    ) -> Result<PhysicalPage, VmemError> {
        debug_assert!(va.as_u32() >= UTOP);
        let page = frames.alloc_zeroed().ok_or(VmemError::OutOfMemory)?;
        frames.incref(page);
        let mut entry = bits;
        entry.set_physical_page(page);
        self.entries.insert(va.page(), entry);
        Ok(page)
    }

    /// Entry for `va`, if the region maps it.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        self.entries.get(&va.page()).copied()
    }

    /// All region mappings in address order.
    pub fn iter(&self) -> impl Iterator<Item = (VirtualPage, PageEntryBits)> + '_ {
        self.entries.iter().map(|(va, e)| (*va, *e))
    }

    /// Number of physical pages the region holds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
