//! IPC helpers over the rendezvous primitives.
//!
//! A receive blocks the caller, so [`UserEnv::ipc_recv`] cannot hand back
//! the message itself. It returns a [`PendingReceive`] that is polled once
//! the environment runs again.

use crate::{UserEnv, UserError};
use kernel_env::{EnvId, Kernel, KernelError};
use kernel_info::memory::UTOP;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PagePermissions;
use log::trace;

/// Sends a blocked peer gets to finish before `ipc_send` gives up.
const SEND_ATTEMPTS: usize = 64;

/// A delivered IPC message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Message {
    pub from: EnvId,
    pub value: u32,
    /// Permissions of the page mapped at the receive address, if a page came
    /// along.
    pub perm: Option<PagePermissions>,
}

/// A receive in progress.
#[must_use]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PendingReceive {
    id: EnvId,
}

impl PendingReceive {
    #[must_use]
    pub const fn env(&self) -> EnvId {
        self.id
    }

    /// The message, once a sender has delivered one.
    #[must_use]
    pub fn poll(&self, kernel: &Kernel) -> Option<Message> {
        let ipc = kernel.env(self.id)?.ipc();
        if ipc.receiving {
            return None;
        }
        Some(Message {
            from: ipc.from?,
            value: ipc.value,
            perm: ipc.perm,
        })
    }
}

impl UserEnv<'_> {
    /// Wait for a message. With `Some(page)`, a page the sender passes is
    /// mapped there.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] for a misaligned `page`.
    pub fn ipc_recv(&mut self, page: Option<VirtualAddress>) -> Result<PendingReceive, UserError> {
        let dstva = page.unwrap_or(VirtualAddress::new(UTOP));
        self.sys_ipc_recv(dstva)?;
        Ok(PendingReceive { id: self.id })
    }

    /// Send once, without waiting for `to` to be ready.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] with [`KernelError::IpcNotReceiving`] if
    ///   `to` is not waiting.
    pub fn ipc_try_send(
        &mut self,
        to: EnvId,
        value: u32,
        page: Option<(VirtualAddress, PagePermissions)>,
    ) -> Result<(), UserError> {
        let (srcva, perm) = page.map_or((VirtualAddress::new(UTOP), 0), |(va, perm)| {
            (va, perm.into_bits() & PagePermissions::SYSCALL_MASK)
        });
        self.sys_ipc_try_send(to, value, srcva, perm)
    }

    /// Send, yielding between attempts until `to` is waiting.
    ///
    /// # Errors
    /// - [`UserError::NotRunning`] if a yield handed the CPU to someone
    ///   else; the send has not happened.
    /// - [`UserError::Syscall`] with [`KernelError::IpcNotReceiving`] if `to`
    ///   never started waiting, or as for [`ipc_try_send`](Self::ipc_try_send).
    pub fn ipc_send(
        &mut self,
        to: EnvId,
        value: u32,
        page: Option<(VirtualAddress, PagePermissions)>,
    ) -> Result<(), UserError> {
        for attempt in 0..SEND_ATTEMPTS {
            match self.ipc_try_send(to, value, page) {
                Err(UserError::Syscall(KernelError::IpcNotReceiving)) => {
                    trace!("[{}] {to} not receiving, attempt {attempt}", self.id);
                    self.sys_yield()?;
                    self.ensure_running()?;
                }
                other => return other,
            }
        }
        Err(KernelError::IpcNotReceiving.into())
    }
}
