//! Typed system call wrappers.
//!
//! Each wrapper loads the argument registers in gateway order and decodes
//! the result. Environment arguments of [`EnvId::CURRENT`] name the caller.

use crate::{UserEnv, UserError};
use kernel_env::{EnvId, EnvStatus};
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::{Completion, Sysno};

impl UserEnv<'_> {
    /// Print `len` bytes at `s` on the console.
    ///
    /// # Errors
    /// - [`UserError::Destroyed`] if the range is not readable: the kernel
    ///   kills the caller.
    pub fn sys_cputs(&mut self, s: VirtualAddress, len: u32) -> Result<(), UserError> {
        self.call(Sysno::Cputs, [s.as_u32(), len, 0, 0, 0]).map(drop)
    }

    /// The next console character, if any is waiting.
    ///
    /// # Errors
    /// - [`UserError::NotRunning`] if the environment does not hold the CPU.
    pub fn sys_cgetc(&mut self) -> Result<Option<u8>, UserError> {
        let c = self.call(Sysno::Cgetc, [0; 5])?;
        Ok(u8::try_from(c).ok().filter(|&c| c != 0))
    }

    /// # Errors
    /// - [`UserError::NotRunning`] if the environment does not hold the CPU.
    pub fn sys_getenvid(&mut self) -> Result<EnvId, UserError> {
        self.call(Sysno::GetEnvId, [0; 5]).map(EnvId::from_raw)
    }

    /// Destroy `id`, which may be the caller itself.
    ///
    /// # Errors
    /// - [`UserError::Destroyed`] after destroying the caller.
    /// - [`UserError::Syscall`] if `id` is unknown or not a child.
    pub fn sys_env_destroy(&mut self, id: EnvId) -> Result<(), UserError> {
        self.call(Sysno::EnvDestroy, [id.as_u32(), 0, 0, 0, 0]).map(drop)
    }

    /// Create a blank child. The child later resumes from this same call
    /// with a return value of zero.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] if no environment slot or memory is left.
    pub fn sys_exofork(&mut self) -> Result<EnvId, UserError> {
        self.call(Sysno::Exofork, [0; 5]).map(EnvId::from_raw)
    }

    /// # Errors
    /// - [`UserError::Syscall`] if `id` is not a child or `status` is not
    ///   settable.
    pub fn sys_env_set_status(&mut self, id: EnvId, status: EnvStatus) -> Result<(), UserError> {
        self.call(Sysno::EnvSetStatus, [id.as_u32(), status as u32, 0, 0, 0])
            .map(drop)
    }

    /// Replace the saved registers of `id` with the frame stored at `tf`.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] if `id` is not a child or `tf` is not
    ///   readable.
    pub fn sys_env_set_trapframe(&mut self, id: EnvId, tf: VirtualAddress) -> Result<(), UserError> {
        self.call(Sysno::EnvSetTrapframe, [id.as_u32(), tf.as_u32(), 0, 0, 0])
            .map(drop)
    }

    /// Back `va` in `id` with a fresh zeroed page.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] for a bad address, bad permissions, or no
    ///   memory.
    pub fn sys_page_alloc(&mut self, id: EnvId, va: VirtualAddress, perm: u32) -> Result<(), UserError> {
        self.call(Sysno::PageAlloc, [id.as_u32(), va.as_u32(), perm, 0, 0])
            .map(drop)
    }

    /// # Errors
    /// - [`UserError::Syscall`] as the kernel reports it.
    pub fn sys_page_map(
        &mut self,
        src: EnvId,
        srcva: VirtualAddress,
        dst: EnvId,
        dstva: VirtualAddress,
        perm: u32,
    ) -> Result<(), UserError> {
        self.call(
            Sysno::PageMap,
            [src.as_u32(), srcva.as_u32(), dst.as_u32(), dstva.as_u32(), perm],
        )
        .map(drop)
    }

    /// # Errors
    /// - [`UserError::Syscall`] for a bad address or environment.
    pub fn sys_page_unmap(&mut self, id: EnvId, va: VirtualAddress) -> Result<(), UserError> {
        self.call(Sysno::PageUnmap, [id.as_u32(), va.as_u32(), 0, 0, 0])
            .map(drop)
    }

    /// # Errors
    /// - [`UserError::Syscall`] if `id` is not a child.
    pub fn sys_env_set_exception_upcall(&mut self, id: EnvId, entry: VirtualAddress) -> Result<(), UserError> {
        self.call(Sysno::EnvSetExceptionUpcall, [id.as_u32(), entry.as_u32(), 0, 0, 0])
            .map(drop)
    }

    /// # Errors
    /// - [`UserError::Syscall`] if `id` is not a child or `trapno` is out of
    ///   range.
    pub fn sys_env_set_exception_handler(
        &mut self,
        id: EnvId,
        trapno: u32,
        handler: VirtualAddress,
    ) -> Result<(), UserError> {
        self.call(
            Sysno::EnvSetExceptionHandler,
            [id.as_u32(), trapno, handler.as_u32(), 0, 0],
        )
        .map(drop)
    }

    /// Give up the CPU. Returns once the call has been made; whether the
    /// caller still runs afterwards depends on who else is runnable.
    ///
    /// # Errors
    /// - [`UserError::NotRunning`] if the environment does not hold the CPU.
    pub fn sys_yield(&mut self) -> Result<(), UserError> {
        match self.syscall(Sysno::Yield, [0; 5])? {
            Completion::Descheduled => Ok(()),
            other => self.returned(other).map(drop),
        }
    }

    /// # Errors
    /// - [`UserError::Syscall`] with `IpcNotReceiving` if `to` is not
    ///   waiting, or as the kernel reports a bad page transfer.
    pub fn sys_ipc_try_send(
        &mut self,
        to: EnvId,
        value: u32,
        srcva: VirtualAddress,
        perm: u32,
    ) -> Result<(), UserError> {
        self.call(Sysno::IpcTrySend, [to.as_u32(), value, srcva.as_u32(), perm, 0])
            .map(drop)
    }

    /// Block until a message arrives; a page, if one is sent, lands at
    /// `dstva` when it is below `UTOP`.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] for a misaligned `dstva`.
    pub fn sys_ipc_recv(&mut self, dstva: VirtualAddress) -> Result<(), UserError> {
        match self.syscall(Sysno::IpcRecv, [dstva.as_u32(), 0, 0, 0, 0])? {
            Completion::Descheduled => Ok(()),
            other => self.returned(other).map(drop),
        }
    }

    /// Replace this environment's image with the file at `file` in the
    /// file-system environment, passing the argument vector at `argv`.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] if the image was rejected and the caller
    ///   continues unchanged.
    /// - [`UserError::Destroyed`] if loading failed after the old image was
    ///   torn down.
    pub fn sys_exec(&mut self, file: VirtualAddress, argv: VirtualAddress) -> Result<(), UserError> {
        match self.syscall(Sysno::Exec, [file.as_u32(), argv.as_u32(), 0, 0, 0])? {
            Completion::Replaced => Ok(()),
            other => self.returned(other).map(drop),
        }
    }

    /// Destroy the caller.
    ///
    /// # Errors
    /// - [`UserError::NotRunning`] if the environment does not hold the CPU.
    pub fn exit(&mut self) -> Result<(), UserError> {
        match self.sys_env_destroy(EnvId::CURRENT) {
            Err(UserError::Destroyed(_)) => Ok(()),
            other => other,
        }
    }
}
