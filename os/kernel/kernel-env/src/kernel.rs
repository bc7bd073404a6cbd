use crate::{AccessError, Env, EnvId, EnvStatus, EnvTable, EnvType, KernelConfig, KernelError};
use alloc::sync::Arc;
use kernel_alloc::FrameTable;
use kernel_info::memory::{USTACKTOP, UTOP};
use kernel_memory_addresses::{VirtualAddress, VirtualPage};
use kernel_registers::TrapFrame;
use kernel_vmem::{
    Access, AddressSpace, KernelRegion, PageEntryBits, PagePermissions, UserMapping,
};
use log::{debug, info, trace, warn};

/// All kernel state: the page pool, the shared upper region, the
/// environment table and which environment holds the CPU.
pub struct Kernel {
    config: KernelConfig,
    pub(crate) frames: FrameTable,
    region: Arc<KernelRegion>,
    pub(crate) envs: EnvTable,
    pub(crate) current: Option<EnvId>,
}

/// Accept only page-aligned addresses below `UTOP`.
pub(crate) fn check_user_page(va: VirtualAddress) -> Result<(), KernelError> {
    if va.as_u32() >= UTOP || !va.is_page_aligned() {
        debug!("rejecting user page address {va}");
        return Err(KernelError::InvalidArgument);
    }
    Ok(())
}

impl Kernel {
    /// Boot: build the page pool and the shared kernel region.
    ///
    /// # Errors
    /// - [`KernelError::OutOfMemory`] if the pool cannot hold the kernel region.
    pub fn new(config: KernelConfig) -> Result<Self, KernelError> {
        let mut frames = FrameTable::new(config.physical_pages);
        let region = Arc::new(KernelRegion::boot(&mut frames, config.kernel_image_pages)?);
        info!(
            "kernel up: {} env slots, {} free pages",
            config.max_envs,
            frames.free_frames()
        );
        Ok(Self {
            config,
            frames,
            region,
            envs: EnvTable::new(config.max_envs),
            current: None,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn frames(&self) -> &FrameTable {
        &self.frames
    }

    #[must_use]
    pub const fn envs(&self) -> &EnvTable {
        &self.envs
    }

    /// The environment holding the CPU, or `None` when idle.
    #[must_use]
    pub const fn current(&self) -> Option<EnvId> {
        self.current
    }

    #[must_use]
    pub fn env(&self, id: EnvId) -> Option<&Env> {
        self.envs.get(id)
    }

    pub(crate) fn live(&self, id: EnvId) -> Result<&Env, KernelError> {
        self.envs.get(id).ok_or(KernelError::BadEnvironment)
    }

    pub(crate) fn live_mut(&mut self, id: EnvId) -> Result<&mut Env, KernelError> {
        self.envs.get_mut(id).ok_or(KernelError::BadEnvironment)
    }

    /// Saved registers of the running environment; this is what trap entry
    /// has filled in by the time a handler runs.
    pub fn current_frame_mut(&mut self) -> Option<&mut TrapFrame> {
        let id = self.current?;
        self.envs.get_mut(id).map(|e| &mut e.frame)
    }

    /// First live environment with the given role.
    #[must_use]
    pub fn find_by_type(&self, ty: EnvType) -> Option<EnvId> {
        self.envs.iter().find(|e| e.ty == ty).map(Env::id)
    }

    /// Allocate and set up a new environment.
    ///
    /// The child starts `NotRunnable` with an empty user address space and a
    /// copy of the parent's saved registers (a fresh user frame if `parent`
    /// is not a live environment).
    ///
    /// # Errors
    /// - [`KernelError::ResourceExhausted`] if every slot is taken.
    /// - [`KernelError::OutOfMemory`] if the page directory cannot be allocated.
    pub fn create(&mut self, parent: EnvId) -> Result<EnvId, KernelError> {
        let id = self.envs.next_id().ok_or_else(|| {
            warn!("[{parent}] out of environments");
            KernelError::ResourceExhausted
        })?;
        let frame = self
            .envs
            .get(parent)
            .map_or_else(|| TrapFrame::new_user(USTACKTOP), |p| p.frame);
        let space = AddressSpace::new(&mut self.frames, Arc::clone(&self.region))?;

        self.envs.insert(Env::new(id, parent, space, frame));
        info!("[{parent}] new env {id}");
        Ok(id)
    }

    /// Create a parentless environment with the given role.
    ///
    /// # Errors
    /// As for [`create`](Self::create).
    pub fn create_root(&mut self, ty: EnvType) -> Result<EnvId, KernelError> {
        let id = self.create(EnvId::CURRENT)?;
        self.live_mut(id)?.ty = ty;
        Ok(id)
    }

    /// Create a child of the caller that will see `0` returned from this call.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if no environment is running.
    /// - Otherwise as for [`create`](Self::create).
    pub fn exofork(&mut self) -> Result<EnvId, KernelError> {
        let parent = self.current.ok_or(KernelError::BadEnvironment)?;
        let child = self.create(parent)?;
        self.live_mut(child)?.frame.regs.eax = 0;
        Ok(child)
    }

    /// Free `id` and everything it holds.
    ///
    /// Does not check ownership. Destroying the running environment gives
    /// the CPU to the next runnable one.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `id` is not live.
    pub fn destroy(&mut self, id: EnvId) -> Result<(), KernelError> {
        self.live_mut(id)?.status = EnvStatus::Dying;
        let env = self.envs.remove(id).ok_or(KernelError::BadEnvironment)?;

        if env.ipc.receiving {
            debug!("[{id}] dropping pending receive");
        }
        env.space.release(&mut self.frames);

        match self.current {
            Some(caller) => info!("[{caller}] free env {id}"),
            None => info!("free env {id}"),
        }

        if self.current == Some(id) {
            self.current = None;
            self.yield_cpu();
        }
        Ok(())
    }

    /// Translate `id` to a live environment.
    ///
    /// [`EnvId::CURRENT`] names the caller. With `require_ownership`, the
    /// caller must be the target or its parent; kernel-initiated requests
    /// (no environment running) may name any environment.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] for stale or unknown ids, or when
    ///   the ownership check fails.
    pub fn resolve(&self, id: EnvId, require_ownership: bool) -> Result<EnvId, KernelError> {
        if id.is_current() {
            return self.current.ok_or(KernelError::BadEnvironment);
        }
        let env = self.live(id)?;
        if require_ownership
            && let Some(caller) = self.current
            && env.id != caller
            && env.parent != caller
        {
            debug!("[{caller}] may not touch env {id}");
            return Err(KernelError::BadEnvironment);
        }
        Ok(id)
    }

    /// Set `id` to `Runnable` or `NotRunnable`.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] as for [`resolve`](Self::resolve).
    /// - [`KernelError::InvalidArgument`] for any other status value.
    pub fn set_status(&mut self, id: EnvId, raw: u32) -> Result<(), KernelError> {
        let id = self.resolve(id, true)?;
        let status = match EnvStatus::from_raw(raw) {
            Some(s @ (EnvStatus::Runnable | EnvStatus::NotRunnable)) => s,
            _ => return Err(KernelError::InvalidArgument),
        };
        self.live_mut(id)?.status = status;
        debug!("env {id} -> {status:?}");
        Ok(())
    }

    /// Replace the saved registers of `id`.
    ///
    /// The stored frame always runs at CPL 3 with interrupts on and IOPL 0.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] as for [`resolve`](Self::resolve).
    pub fn set_trapframe(&mut self, id: EnvId, mut frame: TrapFrame) -> Result<(), KernelError> {
        let id = self.resolve(id, true)?;
        frame.sanitize_for_user();
        self.live_mut(id)?.frame = frame;
        Ok(())
    }

    /// Map a fresh zero page at `va` in `id`.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] as for [`resolve`](Self::resolve).
    /// - [`KernelError::InvalidArgument`] for a bad `va` or permission bits.
    /// - [`KernelError::OutOfMemory`] if the page or its table cannot be allocated.
    pub fn page_alloc(&mut self, id: EnvId, va: VirtualAddress, perm: u32) -> Result<(), KernelError> {
        let id = self.resolve(id, true)?;
        check_user_page(va)?;
        let perm = PagePermissions::from_syscall(perm)?;
        self.alloc_page(id, va, perm)
    }

    /// Map the page at `srcva` in `src` at `dstva` in `dst`.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] as for [`resolve`](Self::resolve),
    ///   for either environment.
    /// - [`KernelError::InvalidArgument`] for bad addresses or permission
    ///   bits, an unmapped source, or write access to a read-only source.
    /// - [`KernelError::OutOfMemory`] if the destination page table cannot
    ///   be allocated.
    pub fn page_map(
        &mut self,
        src: EnvId,
        srcva: VirtualAddress,
        dst: EnvId,
        dstva: VirtualAddress,
        perm: u32,
    ) -> Result<(), KernelError> {
        let src = self.resolve(src, true)?;
        let dst = self.resolve(dst, true)?;
        check_user_page(srcva)?;
        check_user_page(dstva)?;
        let perm = PagePermissions::from_syscall(perm)?;

        let page = self.live(src)?.space.grant(srcva, perm)?;
        let env = self.envs.get_mut(dst).ok_or(KernelError::BadEnvironment)?;
        env.space.insert(&mut self.frames, dstva, page, perm)?;
        Ok(())
    }

    /// Remove the mapping at `va` in `id`, if there is one.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] as for [`resolve`](Self::resolve).
    /// - [`KernelError::InvalidArgument`] for a bad `va`.
    pub fn page_unmap(&mut self, id: EnvId, va: VirtualAddress) -> Result<(), KernelError> {
        let id = self.resolve(id, true)?;
        check_user_page(va)?;
        let env = self.envs.get_mut(id).ok_or(KernelError::BadEnvironment)?;
        env.space.unmap(&mut self.frames, va)?;
        Ok(())
    }

    /// The page-table entry user code sees for `va` in `id`.
    #[must_use]
    pub fn page_entry(&self, id: EnvId, va: VirtualAddress) -> Option<PageEntryBits> {
        self.envs.get(id).map(|e| e.space.entry(va))
    }

    /// Present user mappings of `id`, in address order.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `id` is not live.
    pub fn user_mappings(&self, id: EnvId) -> Result<impl Iterator<Item = UserMapping> + '_, KernelError> {
        Ok(self.live(id)?.space.user_mappings())
    }

    /// Kernel-side allocation for `id`, without ownership checks.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `id` is not live.
    /// - [`KernelError::InvalidArgument`] for a bad `va`.
    /// - [`KernelError::OutOfMemory`] if the page or its table cannot be allocated.
    pub fn alloc_page(&mut self, id: EnvId, va: VirtualAddress, perm: PagePermissions) -> Result<(), KernelError> {
        let env = self.envs.get_mut(id).ok_or(KernelError::BadEnvironment)?;
        let page = env.space.allocate(&mut self.frames, va, perm)?;
        trace!("[{id}] page {page} at {va}");
        Ok(())
    }

    /// Unmap every user page of `id` except `keep`.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `id` is not live.
    pub fn clear_user_mappings(&mut self, id: EnvId, keep: &[VirtualPage]) -> Result<(), KernelError> {
        let env = self.envs.get_mut(id).ok_or(KernelError::BadEnvironment)?;
        env.space.clear_user(&mut self.frames, keep);
        Ok(())
    }

    /// Point `id` at a freshly loaded image.
    ///
    /// The exception upcall and handler table are reset; the exception stack
    /// they relied on is gone.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `id` is not live.
    pub fn enter_image(&mut self, id: EnvId, entry: u32, esp: u32) -> Result<(), KernelError> {
        let env = self.live_mut(id)?;
        env.frame.eip = entry;
        env.frame.esp = esp;
        env.exception_upcall = None;
        env.handlers = [None; kernel_info::env::NEXCEPTIONS];
        debug!("[{id}] entering image at {entry:#010x}, esp {esp:#010x}");
        Ok(())
    }

    /// Check that `id` may access `[va, va + len)` from user mode, for
    /// writing if `write` is set.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `id` is not live.
    /// - [`KernelError::Faulted`] if any byte of the range is inaccessible.
    pub fn check_user_range(&self, id: EnvId, va: VirtualAddress, len: u32, write: bool) -> Result<(), KernelError> {
        let need = PageEntryBits::new().with_user_access(true).with_writable(write);
        self.live(id)?
            .space
            .check_user_range(va, len, need)
            .map_err(|bad| {
                warn!("[{id}] user_mem_check assertion failure for va {bad}");
                KernelError::Faulted
            })
    }

    /// Copy out of `id`'s memory as an access at privilege `access` would.
    ///
    /// # Errors
    /// - [`AccessError::Env`] if `id` is not live.
    /// - [`AccessError::Fault`] with the fault the access raises.
    pub fn read_memory(&self, id: EnvId, va: VirtualAddress, buf: &mut [u8], access: Access) -> Result<(), AccessError> {
        let env = self.live(id)?;
        env.space.read(&self.frames, va, buf, access)?;
        Ok(())
    }

    /// Copy into `id`'s memory as an access at privilege `access` would.
    ///
    /// # Errors
    /// As for [`read_memory`](Self::read_memory).
    pub fn write_memory(&mut self, id: EnvId, va: VirtualAddress, bytes: &[u8], access: Access) -> Result<(), AccessError> {
        let env = self.envs.get(id).ok_or(KernelError::BadEnvironment)?;
        env.space.write(&mut self.frames, va, bytes, access)?;
        Ok(())
    }

    /// Zero `len` bytes of `id`'s memory.
    ///
    /// # Errors
    /// As for [`read_memory`](Self::read_memory).
    pub fn zero_memory(&mut self, id: EnvId, va: VirtualAddress, len: u32, access: Access) -> Result<(), AccessError> {
        let env = self.envs.get(id).ok_or(KernelError::BadEnvironment)?;
        env.space.zero(&mut self.frames, va, len, access)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::UTEXT;
    use kernel_vmem::FrameAlloc;

    fn kernel() -> Kernel {
        Kernel::new(KernelConfig::default().with_max_envs(8).with_physical_pages(256)).expect("boot")
    }

    #[test]
    fn slots_and_generations() {
        let mut k = kernel();
        let a = k.create_root(EnvType::User).expect("a");
        let b = k.create(a).expect("b");
        assert_eq!(a.as_u32(), 0x1000);
        assert_eq!(b.as_u32(), 0x1001);
        assert_eq!(k.env(b).map(Env::parent), Some(a));
        assert_eq!(k.env(b).map(Env::status), Some(EnvStatus::NotRunnable));

        k.destroy(b).expect("destroy");
        assert!(k.env(b).is_none());
        assert_eq!(k.resolve(b, false), Err(KernelError::BadEnvironment));

        let c = k.create(a).expect("c");
        assert_eq!(c.index(), b.index());
        assert_ne!(c, b);
        assert_eq!(c.as_u32(), 0x2001);
    }

    #[test]
    fn table_full() {
        let mut k = Kernel::new(KernelConfig::default().with_max_envs(2).with_physical_pages(64))
            .expect("boot");
        k.create_root(EnvType::User).expect("1");
        k.create_root(EnvType::User).expect("2");
        assert_eq!(k.create_root(EnvType::User), Err(KernelError::ResourceExhausted));
    }

    #[test]
    fn ownership() {
        let mut k = kernel();
        let a = k.create_root(EnvType::User).expect("a");
        let child = k.create(a).expect("child");
        let other = k.create_root(EnvType::User).expect("other");

        k.run(a).expect("run");
        assert_eq!(k.resolve(EnvId::CURRENT, true), Ok(a));
        assert_eq!(k.resolve(child, true), Ok(child));
        assert_eq!(k.resolve(other, true), Err(KernelError::BadEnvironment));
        assert_eq!(k.resolve(other, false), Ok(other));
        assert_eq!(
            k.page_alloc(other, VirtualAddress::new(UTEXT), 0x7),
            Err(KernelError::BadEnvironment)
        );
    }

    #[test]
    fn status_values() {
        let mut k = kernel();
        let a = k.create_root(EnvType::User).expect("a");
        for raw in [0, 1, 3, 5, u32::MAX] {
            assert_eq!(k.set_status(a, raw), Err(KernelError::InvalidArgument));
        }
        k.set_status(a, EnvStatus::Runnable as u32).expect("runnable");
        assert_eq!(k.env(a).map(Env::status), Some(EnvStatus::Runnable));
    }

    #[test]
    fn trapframe_is_sanitized() {
        let mut k = kernel();
        let a = k.create_root(EnvType::User).expect("a");
        let mut tf = TrapFrame {
            cs: 0x08,
            ss: 0x10,
            eip: 0x0080_0123,
            ..TrapFrame::default()
        };
        tf.eflags.set_iopl(3);
        k.set_trapframe(a, tf).expect("set");

        let saved = k.env(a).map(|e| *e.trap_frame()).expect("live");
        assert!(saved.is_user());
        assert_eq!(saved.eflags.iopl(), 0);
        assert!(saved.eflags.if_interrupt_enable());
        assert_eq!(saved.eip, 0x0080_0123);
    }

    #[test]
    fn exofork_returns_zero_in_child() {
        let mut k = kernel();
        let a = k.create_root(EnvType::User).expect("a");
        k.run(a).expect("run");
        if let Some(tf) = k.current_frame_mut() {
            tf.regs.eax = 99;
            tf.eip = 0x0080_0040;
        }
        let child = k.exofork().expect("exofork");
        let tf = *k.env(child).expect("child").trap_frame();
        assert_eq!(tf.regs.eax, 0);
        assert_eq!(tf.eip, 0x0080_0040);
        assert_eq!(k.user_mappings(child).expect("live").count(), 0);
    }

    #[test]
    fn memory_syscall_validation_order() {
        let mut k = kernel();
        let a = k.create_root(EnvType::User).expect("a");
        let va = VirtualAddress::new(UTEXT);

        assert_eq!(k.page_alloc(a, VirtualAddress::new(UTOP), 0x7), Err(KernelError::InvalidArgument));
        assert_eq!(k.page_alloc(a, va, 0x207), Err(KernelError::InvalidArgument));
        assert_eq!(k.page_alloc(a, va, 0x807), Err(KernelError::InvalidArgument));
        assert_eq!(k.user_mappings(a).expect("live").count(), 0);

        // Present and user are implied.
        k.page_alloc(a, va, 0x2).expect("alloc");
        assert_eq!(
            k.page_entry(a, va).map(|e| e.permissions()),
            Some(PagePermissions::user_rw())
        );

        assert_eq!(
            k.page_map(a, va + 0x1000, a, VirtualAddress::new(0x0090_0000), 0x5),
            Err(KernelError::InvalidArgument)
        );
        k.page_unmap(a, va).expect("unmap");
        k.page_unmap(a, va).expect("unmap absent");
    }

    #[test]
    fn destroying_sole_mapper_returns_pages() {
        let mut k = kernel();
        let baseline = k.frames().free_frames();
        let a = k.create_root(EnvType::User).expect("a");
        for i in 0..5 {
            k.page_alloc(a, VirtualAddress::new(UTEXT + i * 0x1000), 0x7).expect("alloc");
        }
        // Directory, one page table, five pages.
        assert_eq!(k.frames().free_frames(), baseline - 7);
        k.destroy(a).expect("destroy");
        assert_eq!(k.frames().free_frames(), baseline);
    }

    #[test]
    fn shared_pages_survive_one_mapper() {
        let mut k = kernel();
        let a = k.create_root(EnvType::User).expect("a");
        let b = k.create(a).expect("b");
        let va = VirtualAddress::new(UTEXT);
        k.page_alloc(a, va, 0x7).expect("alloc");
        k.page_map(a, va, b, va, 0x5).expect("map");

        let (page, _) = k.env(a).and_then(|e| e.address_space().lookup(va)).expect("mapped");
        assert_eq!(k.frames().refcount(page), 2);
        k.destroy(a).expect("destroy");
        assert_eq!(k.frames().refcount(page), 1);
    }
}
