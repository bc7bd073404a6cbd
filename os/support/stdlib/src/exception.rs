use crate::{Program, UserEnv, UserError};
use kernel_env::EnvId;
use kernel_info::memory::{PGSIZE, UXSTACKTOP};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PagePermissions;
use log::debug;

impl UserEnv<'_> {
    /// Route exception `trapno` to `handler`.
    ///
    /// The first registration allocates the exception stack and points the
    /// upcall at the trampoline.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] if the stack cannot be allocated or
    ///   `trapno` is out of range.
    pub fn set_exception_handler(&mut self, trapno: u32, handler: VirtualAddress) -> Result<(), UserError> {
        if self.this_env()?.exception_upcall().is_none() {
            let xstack = VirtualAddress::new(UXSTACKTOP - PGSIZE);
            self.sys_page_alloc(EnvId::CURRENT, xstack, PagePermissions::user_rw().into_bits())?;
            self.sys_env_set_exception_upcall(EnvId::CURRENT, Program::TRAMPOLINE)?;
            debug!("[{}] exception stack at {xstack}", self.id);
        }
        self.sys_env_set_exception_handler(EnvId::CURRENT, trapno, handler)
    }

    /// Take processor exception `trapno` at the current instruction, the
    /// way a faulting `div` or a bad segment load would.
    ///
    /// Returns once a handler has dealt with it and the interrupted context
    /// is back in place.
    ///
    /// # Errors
    /// - [`UserError::Destroyed`] if nothing handled the exception or the
    ///   handler exited.
    pub fn raise(&mut self, trapno: u32) -> Result<(), UserError> {
        self.ensure_running()?;
        let delivery = self
            .kernel
            .deliver_exception(self.id, trapno, VirtualAddress::zero(), 0)?;
        self.upcall(delivery)
    }
}
