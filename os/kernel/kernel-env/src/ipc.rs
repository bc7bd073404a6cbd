//! Rendezvous IPC: one scalar and at most one page, no queueing.
//!
//! The receiver parks itself with [`Kernel::ipc_recv`]; the first
//! [`Kernel::ipc_try_send`] that finds it waiting fills in its [`IpcState`]
//! and makes it runnable again. Every other sender sees
//! [`KernelError::IpcNotReceiving`] and is expected to yield and retry.
//!
//! [`IpcState`]: crate::IpcState

use crate::kernel::check_user_page;
use crate::{EnvId, EnvStatus, IpcState, Kernel, KernelError};
use kernel_info::memory::UTOP;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PagePermissions;
use log::debug;

impl Kernel {
    /// Block the caller until a value arrives.
    ///
    /// A `dstva` below `UTOP` asks for a page to be mapped there; anything
    /// at or above `UTOP` declines pages. On success the caller is parked
    /// and the CPU goes to whichever environment runs next, which is
    /// returned.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if no environment is running.
    /// - [`KernelError::InvalidArgument`] if `dstva` is below `UTOP` but
    ///   not page aligned.
    pub fn ipc_recv(&mut self, dstva: VirtualAddress) -> Result<Option<EnvId>, KernelError> {
        let id = self.current.ok_or(KernelError::BadEnvironment)?;
        let dstva = if dstva.as_u32() < UTOP {
            check_user_page(dstva)?;
            Some(dstva)
        } else {
            None
        };

        let env = self.live_mut(id)?;
        env.ipc = IpcState {
            receiving: true,
            dstva,
            value: env.ipc.value,
            from: None,
            perm: None,
        };
        env.status = EnvStatus::NotRunnable;
        debug!("[{id}] waiting for ipc, page at {dstva:?}");

        Ok(self.yield_cpu())
    }

    /// Try to deliver `value` (and the page at `srcva`) to `target`.
    ///
    /// The page goes along only if `srcva` is below `UTOP` and the receiver
    /// asked for one; otherwise `srcva` and `perm` are ignored.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if no environment is running or
    ///   `target` is not live. Ownership is not required.
    /// - [`KernelError::IpcNotReceiving`] if `target` is not waiting or
    ///   another sender got there first.
    /// - [`KernelError::InvalidArgument`] for a misaligned or unmapped
    ///   `srcva`, bad permission bits, or write access to a read-only page.
    /// - [`KernelError::OutOfMemory`] if the receiver's page table cannot
    ///   be allocated.
    pub fn ipc_try_send(
        &mut self,
        target: EnvId,
        value: u32,
        srcva: VirtualAddress,
        perm: u32,
    ) -> Result<(), KernelError> {
        let sender = self.current.ok_or(KernelError::BadEnvironment)?;
        let target = self.resolve(target, false)?;

        let ipc = self.live(target)?.ipc;
        if !ipc.receiving || ipc.from.is_some() {
            return Err(KernelError::IpcNotReceiving);
        }

        let transfer = match ipc.dstva {
            Some(dstva) if srcva.as_u32() < UTOP => {
                check_user_page(srcva)?;
                let perm = PagePermissions::from_syscall(perm)?;
                let page = self.live(sender)?.space.grant(srcva, perm)?;
                Some((dstva, page, perm))
            }
            _ => None,
        };

        if let Some((dstva, page, perm)) = transfer {
            let env = self.envs.get_mut(target).ok_or(KernelError::BadEnvironment)?;
            env.space.insert(&mut self.frames, dstva, page, perm)?;
        }

        let env = self.live_mut(target)?;
        env.ipc.receiving = false;
        env.ipc.from = Some(sender);
        env.ipc.value = value;
        env.ipc.perm = transfer.map(|(_, _, perm)| perm);
        env.frame.regs.eax = 0;
        env.status = EnvStatus::Runnable;
        debug!("[{sender}] sent {value:#x} to {target}");
        Ok(())
    }
}
