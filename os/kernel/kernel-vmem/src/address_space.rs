//! # Address Space (32-bit x86, two-level)
//!
//! One environment's page directory and the page tables below it, covering
//! the user region `[0, UTOP)`. Entries at and above `UTOP` come from the
//! shared [`KernelRegion`] and are read-only through this type.
//!
//! ## Highlights
//!
//! - [`AddressSpace::allocate`] installs a fresh zero-filled page.
//! - [`AddressSpace::grant`] + [`AddressSpace::insert`] share a page that is
//!   already mapped elsewhere, without ever escalating to write access.
//! - [`AddressSpace::unmap`] removes a mapping, silently if there is none.
//! - [`AddressSpace::read`] / [`AddressSpace::write`] model the MMU: an
//!   access either succeeds or yields the [`PageFault`] the hardware would
//!   raise.
//!
//! ## Design
//!
//! - Page tables are allocated lazily from the same physical page pool as
//!   user pages, so building a mapping can fail with `OutOfMemory`.
//! - Validation always runs before the first mutation.
//! - There is no `Drop`: a space is torn down explicitly with
//!   [`AddressSpace::release`], which needs the page pool.

use crate::{
    Access, FrameAlloc, KernelRegion, PAGE_BYTES, PageEntryBits, PageFault, PagePermissions,
    PageTable, VmemError,
};
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_info::memory::{ULIM, UTOP};
use kernel_memory_addresses::{
    DIRECTORY_SHIFT, PAGE_SIZE, PhysicalPage, VirtualAddress, VirtualPage, align_down,
};
use kernel_registers::FaultErrorCode;
use log::trace;

/// Directory slots that belong to user space.
const USER_TABLES: usize = (UTOP >> DIRECTORY_SHIFT) as usize;

/// A present user mapping, as seen through the read-only page-table window.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UserMapping {
    pub page: VirtualPage,
    pub entry: PageEntryBits,
}

impl UserMapping {
    #[inline]
    #[must_use]
    pub const fn va(&self) -> VirtualAddress {
        self.page.base()
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage {
        self.entry.physical_page()
    }

    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> PagePermissions {
        self.entry.permissions()
    }
}

/// Handle to a single, concrete address space.
pub struct AddressSpace {
    directory: PhysicalPage,
    tables: Vec<Option<PageTable>>,
    region: Arc<KernelRegion>,
}

impl AddressSpace {
    /// A new, empty address space sharing `region` above `UTOP`.
    ///
    /// # Errors
    /// - [`VmemError::OutOfMemory`] if no page is left for the directory.
    pub fn new<A: FrameAlloc>(frames: &mut A, region: Arc<KernelRegion>) -> Result<Self, VmemError> {
        let directory = frames.alloc_zeroed().ok_or(VmemError::OutOfMemory)?;
        frames.incref(directory);

        let mut tables = Vec::with_capacity(USER_TABLES);
        tables.resize_with(USER_TABLES, || None);

        trace!("new address space, directory {directory}");
        Ok(Self {
            directory,
            tables,
            region,
        })
    }

    /// Physical page of the page directory.
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> PhysicalPage {
        self.directory
    }

    /// The shared upper region.
    #[inline]
    #[must_use]
    pub const fn region(&self) -> &Arc<KernelRegion> {
        &self.region
    }

    /// Accept only page-aligned addresses below `UTOP`.
    fn check_user_page(va: VirtualAddress) -> Result<(), VmemError> {
        if va.as_u32() >= UTOP || !va.is_page_aligned() {
            return Err(VmemError::InvalidAddress(va));
        }
        Ok(())
    }

    /// The page table covering `va`, allocating it if missing.
    fn ensure_table<A: FrameAlloc>(
        &mut self,
        frames: &mut A,
        va: VirtualAddress,
    ) -> Result<&mut PageTable, VmemError> {
        let slot = &mut self.tables[va.directory_index()];
        if slot.is_none() {
            let frame = frames.alloc_zeroed().ok_or(VmemError::OutOfMemory)?;
            frames.incref(frame);
            trace!("page table {frame} for {:#010x}", align_down(va.as_u32(), 1 << DIRECTORY_SHIFT));
            *slot = Some(PageTable::new(frame));
        }
        slot.as_mut().ok_or(VmemError::OutOfMemory)
    }

    /// Allocate a zero-filled page and map it at `va`, replacing (and
    /// releasing) whatever was mapped there.
    ///
    /// # Errors
    /// - [`VmemError::InvalidAddress`] if `va` is misaligned or not below `UTOP`.
    /// - [`VmemError::OutOfMemory`] if no page is left for the data or its table.
    pub fn allocate<A: FrameAlloc>(
        &mut self,
        frames: &mut A,
        va: VirtualAddress,
        perm: PagePermissions,
    ) -> Result<PhysicalPage, VmemError> {
        Self::check_user_page(va)?;
        self.ensure_table(frames, va)?;
        let page = frames.alloc_zeroed().ok_or(VmemError::OutOfMemory)?;
        self.insert(frames, va, page, perm)?;
        Ok(page)
    }

    /// Look up the page at `va` for sharing with `perm`.
    ///
    /// Nothing is changed; pair with [`insert`](Self::insert) on the
    /// receiving space.
    ///
    /// # Errors
    /// - [`VmemError::InvalidAddress`] if `va` is misaligned or not below `UTOP`.
    /// - [`VmemError::NotMapped`] if nothing is mapped at `va`.
    /// - [`VmemError::PermissionDenied`] if `perm` asks for write access to a
    ///   mapping that is not writable.
    pub fn grant(&self, va: VirtualAddress, perm: PagePermissions) -> Result<PhysicalPage, VmemError> {
        Self::check_user_page(va)?;
        let (page, entry) = self.lookup(va).ok_or(VmemError::NotMapped(va))?;
        if perm.writable() && !entry.writable() {
            return Err(VmemError::PermissionDenied(va));
        }
        Ok(page)
    }

    /// Map `page` at `va` with `perm`, replacing any previous mapping.
    ///
    /// # Errors
    /// - [`VmemError::InvalidAddress`] if `va` is misaligned or not below `UTOP`.
    /// - [`VmemError::OutOfMemory`] if the page table cannot be allocated.
    pub fn insert<A: FrameAlloc>(
        &mut self,
        frames: &mut A,
        va: VirtualAddress,
        page: PhysicalPage,
        perm: PagePermissions,
    ) -> Result<(), VmemError> {
        Self::check_user_page(va)?;
        let perm = perm.with_present(true).with_user(true);
        let table = self.ensure_table(frames, va)?;

        frames.incref(page);
        let old = table.get(va.table_index());
        table.set(va.table_index(), PageEntryBits::leaf(page, perm));
        if old.present() {
            frames.decref(old.physical_page());
        }

        trace!("map {va} -> {page} perm {:#x}", perm.into_bits());
        Ok(())
    }

    /// Remove the mapping at `va`, if any.
    ///
    /// # Errors
    /// - [`VmemError::InvalidAddress`] if `va` is misaligned or not below `UTOP`.
    pub fn unmap<A: FrameAlloc>(&mut self, frames: &mut A, va: VirtualAddress) -> Result<(), VmemError> {
        Self::check_user_page(va)?;
        if let Some(table) = self.tables[va.directory_index()].as_mut() {
            let old = table.get(va.table_index());
            if old.present() {
                table.set(va.table_index(), PageEntryBits::new());
                frames.decref(old.physical_page());
                trace!("unmap {va}");
            }
        }
        Ok(())
    }

    /// The mapped physical page and its entry, or `None` if not mapped.
    ///
    /// Works for the whole address space, including the shared region.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<(PhysicalPage, PageEntryBits)> {
        let entry = self.entry(va);
        entry.present().then(|| (entry.physical_page(), entry))
    }

    /// The page-table entry for `va`, or an empty entry.
    ///
    /// This is what the read-only page-table window shows user code.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> PageEntryBits {
        if va.as_u32() >= UTOP {
            return self.region.lookup(va).unwrap_or_default();
        }
        self.tables[va.directory_index()]
            .as_ref()
            .map_or_else(PageEntryBits::new, |t| t.get(va.table_index()))
    }

    /// Whether the directory slot covering `va` has a page table.
    #[must_use]
    pub fn has_table(&self, va: VirtualAddress) -> bool {
        va.as_u32() < UTOP && self.tables[va.directory_index()].is_some()
    }

    /// Every present user mapping, in address order.
    pub fn user_mappings(&self) -> impl Iterator<Item = UserMapping> + '_ {
        self.tables
            .iter()
            .enumerate()
            .filter_map(|(pdx, t)| t.as_ref().map(|t| (pdx, t)))
            .flat_map(|(pdx, t)| {
                t.iter_present().map(move |(ptx, entry)| UserMapping {
                    page: VirtualAddress::from_indices(pdx, ptx).page(),
                    entry,
                })
            })
    }

    /// Number of page tables currently allocated.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.iter().filter(|t| t.is_some()).count()
    }

    /// Unmap every user page except those in `keep`.
    pub fn clear_user<A: FrameAlloc>(&mut self, frames: &mut A, keep: &[VirtualPage]) {
        let doomed: Vec<VirtualPage> = self
            .user_mappings()
            .map(|m| m.page)
            .filter(|p| !keep.contains(p))
            .collect();
        for page in doomed {
            // In range and aligned by construction.
            let _ = self.unmap(frames, page.base());
        }
    }

    /// Check that user code may access `[va, va + len)` with at least the
    /// `need` bits (present is always required).
    ///
    /// # Errors
    /// The first offending address: the first byte of the range if the
    /// first page fails, the start of the failing page otherwise.
    pub fn check_user_range(
        &self,
        va: VirtualAddress,
        len: u32,
        need: PageEntryBits,
    ) -> Result<(), VirtualAddress> {
        if len == 0 {
            return Ok(());
        }
        let Some(last) = va.checked_add(len - 1) else {
            return Err(va);
        };
        let need = need.with_present(true).into_bits();

        let mut page = va.page();
        loop {
            let base = page.base();
            let entry = self.entry(base).into_bits();
            if base.as_u32() >= ULIM || entry & need != need {
                return Err(base.max(va));
            }
            if page == last.page() {
                return Ok(());
            }
            match page.next() {
                Some(next) => page = next,
                None => return Err(base),
            }
        }
    }

    /// Resolve `va` for an access, or return the fault the MMU would raise.
    fn translate(&self, va: VirtualAddress, write: bool, access: Access) -> Result<PhysicalPage, PageFault> {
        let user = access == Access::User;
        let entry = self.entry(va);
        let fault = |present| PageFault {
            va,
            code: FaultErrorCode::new()
                .with_present(present)
                .with_write(write)
                .with_user(user),
        };

        if !entry.present() {
            return Err(fault(false));
        }
        if user && (!entry.user_access() || va.as_u32() >= ULIM) {
            return Err(fault(true));
        }
        if user && write && !entry.writable() {
            return Err(fault(true));
        }
        Ok(entry.physical_page())
    }

    /// Copy `buf.len()` bytes starting at `va` out of this address space.
    ///
    /// # Errors
    /// The fault for the first inaccessible page; bytes before it are copied.
    pub fn read<A: FrameAlloc>(
        &self,
        frames: &A,
        va: VirtualAddress,
        buf: &mut [u8],
        access: Access,
    ) -> Result<(), PageFault> {
        let mut done = 0usize;
        while done < buf.len() {
            #[allow(clippy::cast_possible_truncation)]
            let at = VirtualAddress::new(va.as_u32().wrapping_add(done as u32));
            let page = self.translate(at, false, access)?;
            let offset = at.page_offset() as usize;
            let n = (PAGE_BYTES - offset).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&frames.contents(page)[offset..offset + n]);
            done += n;
        }
        Ok(())
    }

    /// Copy `bytes` into this address space starting at `va`.
    ///
    /// # Errors
    /// The fault for the first inaccessible page; bytes before it are written.
    pub fn write<A: FrameAlloc>(
        &self,
        frames: &mut A,
        va: VirtualAddress,
        bytes: &[u8],
        access: Access,
    ) -> Result<(), PageFault> {
        let mut done = 0usize;
        while done < bytes.len() {
            #[allow(clippy::cast_possible_truncation)]
            let at = VirtualAddress::new(va.as_u32().wrapping_add(done as u32));
            let page = self.translate(at, true, access)?;
            let offset = at.page_offset() as usize;
            let n = (PAGE_BYTES - offset).min(bytes.len() - done);
            frames.contents_mut(page)[offset..offset + n].copy_from_slice(&bytes[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Zero `len` bytes starting at `va`.
    ///
    /// # Errors
    /// As for [`write`](Self::write).
    pub fn zero<A: FrameAlloc>(
        &self,
        frames: &mut A,
        va: VirtualAddress,
        len: u32,
        access: Access,
    ) -> Result<(), PageFault> {
        const ZEROS: [u8; PAGE_BYTES] = [0; PAGE_BYTES];
        let mut done = 0u32;
        while done < len {
            let at = VirtualAddress::new(va.as_u32().wrapping_add(done));
            let n = (PAGE_SIZE - at.page_offset()).min(len - done);
            self.write(frames, at, &ZEROS[..n as usize], access)?;
            done += n;
        }
        Ok(())
    }

    /// Drop every page reference this space holds, including its page
    /// tables and directory.
    pub fn release<A: FrameAlloc>(self, frames: &mut A) {
        let mut pages = 0usize;
        for table in self.tables.into_iter().flatten() {
            for (_, entry) in table.iter_present() {
                frames.decref(entry.physical_page());
                pages += 1;
            }
            frames.decref(table.frame());
        }
        frames.decref(self.directory);
        trace!("released address space {}: {pages} user pages", self.directory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_frames::TestFrames;
    use kernel_info::memory::{KERNBASE, UENVS, UTEXT};

    fn space(frames: &mut TestFrames) -> AddressSpace {
        let region = Arc::new(KernelRegion::boot(frames, 2).expect("region"));
        AddressSpace::new(frames, region).expect("space")
    }

    fn va(v: u32) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn snapshot(s: &AddressSpace) -> Vec<UserMapping> {
        s.user_mappings().collect()
    }

    #[test]
    fn allocate_then_lookup_is_zeroed_with_exact_permissions() {
        let mut frames = TestFrames::new(64);
        let mut s = space(&mut frames);

        for (addr, perm) in [
            (UTEXT, PagePermissions::user_rw()),
            (UTEXT + 0x1000, PagePermissions::user_ro()),
            (0x0040_0000, PagePermissions::user_cow()),
            (UTOP - PAGE_SIZE, PagePermissions::user_rw().with_share(true)),
            (0, PagePermissions::user_ro()),
        ] {
            let page = s.allocate(&mut frames, va(addr), perm).expect("allocate");
            let (found, entry) = s.lookup(va(addr)).expect("mapped");
            assert_eq!(found, page);
            assert_eq!(entry.permissions(), perm);
            assert_eq!(frames.refcount(page), 1);
            assert!(frames.contents(page).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn invalid_addresses_are_rejected_without_mutation() {
        let mut frames = TestFrames::new(64);
        let mut s = space(&mut frames);
        let page = s
            .allocate(&mut frames, va(UTEXT), PagePermissions::user_rw())
            .expect("allocate");
        let before = snapshot(&s);
        let free = frames.free();

        for bad in [UTOP, UTOP + PAGE_SIZE, KERNBASE, UTEXT + 1, UTEXT + 0xfff, u32::MAX] {
            assert_eq!(
                s.allocate(&mut frames, va(bad), PagePermissions::user_rw()),
                Err(VmemError::InvalidAddress(va(bad)))
            );
            assert_eq!(
                s.insert(&mut frames, va(bad), page, PagePermissions::user_rw()),
                Err(VmemError::InvalidAddress(va(bad)))
            );
            assert_eq!(s.unmap(&mut frames, va(bad)), Err(VmemError::InvalidAddress(va(bad))));
            assert_eq!(
                s.grant(va(bad), PagePermissions::user_ro()),
                Err(VmemError::InvalidAddress(va(bad)))
            );
        }

        assert_eq!(snapshot(&s), before);
        assert_eq!(frames.free(), free);
        assert_eq!(frames.refcount(page), 1);
    }

    #[test]
    fn grant_never_escalates_to_write() {
        let mut frames = TestFrames::new(64);
        let mut src = space(&mut frames);
        let dst = space(&mut frames);
        src.allocate(&mut frames, va(UTEXT), PagePermissions::user_ro())
            .expect("allocate");

        assert_eq!(
            src.grant(va(UTEXT), PagePermissions::user_rw()),
            Err(VmemError::PermissionDenied(va(UTEXT)))
        );
        assert!(dst.lookup(va(0x0090_0000)).is_none());

        assert!(src.grant(va(UTEXT), PagePermissions::user_ro()).is_ok());
        assert!(src.grant(va(UTEXT), PagePermissions::user_cow()).is_ok());
        assert_eq!(
            src.grant(va(UTEXT + PAGE_SIZE), PagePermissions::user_ro()),
            Err(VmemError::NotMapped(va(UTEXT + PAGE_SIZE)))
        );
    }

    #[test]
    fn insert_shares_and_replaces() {
        let mut frames = TestFrames::new(64);
        let mut a = space(&mut frames);
        let mut b = space(&mut frames);

        let p = a
            .allocate(&mut frames, va(UTEXT), PagePermissions::user_rw())
            .expect("allocate");
        let granted = a.grant(va(UTEXT), PagePermissions::user_rw()).expect("grant");
        b.insert(&mut frames, va(0x0090_0000), granted, PagePermissions::user_rw())
            .expect("insert");
        assert_eq!(frames.refcount(p), 2);

        // Re-inserting the same page at the same address keeps it alive.
        a.insert(&mut frames, va(UTEXT), p, PagePermissions::user_cow())
            .expect("reinsert");
        assert_eq!(frames.refcount(p), 2);
        assert_eq!(a.entry(va(UTEXT)).permissions(), PagePermissions::user_cow());

        // Replacing drops the old reference.
        let q = a
            .allocate(&mut frames, va(UTEXT), PagePermissions::user_rw())
            .expect("replace");
        assert_ne!(p, q);
        assert_eq!(frames.refcount(p), 1);

        b.unmap(&mut frames, va(0x0090_0000)).expect("unmap");
        assert_eq!(frames.refcount(p), 0);
        assert!(frames.is_free(p));

        // Unmapping nothing is fine.
        b.unmap(&mut frames, va(0x0090_0000)).expect("unmap twice");
    }

    #[test]
    fn out_of_memory_for_page_tables() {
        let mut frames = TestFrames::new(6);
        let mut s = space(&mut frames); // 3 region pages + directory
        s.allocate(&mut frames, va(UTEXT), PagePermissions::user_rw())
            .expect("table + page fit");
        assert_eq!(frames.free(), 0);

        // Same table, no page left.
        assert_eq!(
            s.allocate(&mut frames, va(UTEXT + PAGE_SIZE), PagePermissions::user_rw()),
            Err(VmemError::OutOfMemory)
        );
        // New table needed.
        assert_eq!(
            s.allocate(&mut frames, va(0x0100_0000), PagePermissions::user_rw()),
            Err(VmemError::OutOfMemory)
        );
        assert_eq!(s.user_mappings().count(), 1);
    }

    #[test]
    fn mmu_faults() {
        let mut frames = TestFrames::new(64);
        let mut s = space(&mut frames);
        s.allocate(&mut frames, va(UTEXT), PagePermissions::user_ro())
            .expect("allocate");

        let mut buf = [0u8; 8];
        s.read(&frames, va(UTEXT + 8), &mut buf, Access::User).expect("read");

        let fault = s
            .write(&mut frames, va(UTEXT + 8), &[1, 2], Access::User)
            .expect_err("read-only");
        assert_eq!(fault.va, va(UTEXT + 8));
        assert!(fault.code.present() && fault.code.write() && fault.code.user());

        // Straddling into an unmapped page faults at the first missing byte.
        let fault = s
            .read(&frames, va(UTEXT + PAGE_SIZE - 4), &mut buf, Access::User)
            .expect_err("unmapped");
        assert_eq!(fault.va, va(UTEXT + PAGE_SIZE));
        assert!(!fault.code.present());

        // Kernel image is supervisor only; the env window is read-only.
        let fault = s.read(&frames, va(KERNBASE), &mut buf, Access::User).expect_err("kernel");
        assert!(fault.code.present());
        s.read(&frames, va(KERNBASE), &mut buf, Access::Kernel).expect("kernel read");
        s.read(&frames, va(UENVS), &mut buf, Access::User).expect("env window");
        assert!(s.write(&mut frames, va(UENVS), &[0], Access::User).is_err());

        // Kernel writes ignore the writable bit.
        s.write(&mut frames, va(UTEXT), b"abc", Access::Kernel).expect("kernel write");
        s.read(&frames, va(UTEXT), &mut buf[..3], Access::User).expect("read back");
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn user_range_checks_report_first_bad_address() {
        let mut frames = TestFrames::new(64);
        let mut s = space(&mut frames);
        s.allocate(&mut frames, va(UTEXT), PagePermissions::user_rw())
            .expect("allocate");
        s.allocate(&mut frames, va(UTEXT + PAGE_SIZE), PagePermissions::user_ro())
            .expect("allocate");

        let user = PageEntryBits::new().with_user_access(true);
        let user_w = user.with_writable(true);

        assert_eq!(s.check_user_range(va(UTEXT + 10), 2 * PAGE_SIZE - 20, user), Ok(()));
        assert_eq!(
            s.check_user_range(va(UTEXT + 10), PAGE_SIZE, user_w),
            Err(va(UTEXT + PAGE_SIZE))
        );
        assert_eq!(s.check_user_range(va(UTEXT + 0x20), 4, user_w), Ok(()));
        assert_eq!(
            s.check_user_range(va(UTEXT - 4), 8, user),
            Err(va(UTEXT - 4))
        );
        assert_eq!(s.check_user_range(va(KERNBASE), 4, user), Err(va(KERNBASE)));
        assert_eq!(s.check_user_range(va(UENVS + 4), 4, user), Ok(()));
        assert_eq!(s.check_user_range(va(u32::MAX - 2), 8, user), Err(va(u32::MAX - 2)));
        assert_eq!(s.check_user_range(va(0), 0, user_w), Ok(()));
    }

    #[test]
    fn clear_and_release_return_every_page() {
        let mut frames = TestFrames::new(64);
        let region = Arc::new(KernelRegion::boot(&mut frames, 2).expect("region"));
        let baseline = frames.free();

        let mut s = AddressSpace::new(&mut frames, Arc::clone(&region)).expect("space");
        let keep = [va(UTEXT).page()];
        for i in 0..4 {
            s.allocate(&mut frames, va(UTEXT + i * PAGE_SIZE), PagePermissions::user_rw())
                .expect("allocate");
        }
        s.allocate(&mut frames, va(0x0100_0000), PagePermissions::user_rw())
            .expect("allocate");
        assert_eq!(s.table_count(), 2);

        s.clear_user(&mut frames, &keep);
        let left: Vec<_> = s.user_mappings().map(|m| m.page).collect();
        assert_eq!(left, keep);

        s.release(&mut frames);
        assert_eq!(frames.free(), baseline);
    }
}
