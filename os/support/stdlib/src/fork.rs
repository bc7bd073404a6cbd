//! Copy-on-write `fork`.
//!
//! Writable pages are mapped copy-on-write into both parent and child. The
//! first write on either side faults into [`pgfault`], which swaps in a
//! private copy.

use crate::{Program, UserEnv, UserError};
use kernel_env::{EnvId, EnvStatus};
use kernel_info::memory::{PFTEMP, PGSIZE, USTACKTOP, UXSTACKTOP};
use kernel_memory_addresses::{VirtualAddress, align_down};
use kernel_registers::trap::T_PGFLT;
use kernel_registers::{FaultErrorCode, UTrapframe};
use kernel_vmem::{PagePermissions, UserMapping};
use log::{error, trace};

/// Resolve a write to a copy-on-write page with a private copy.
///
/// Any other fault is fatal.
pub(crate) fn pgfault(env: &mut UserEnv<'_>, utf: &UTrapframe) -> Result<(), UserError> {
    let va = VirtualAddress::new(align_down(utf.fault_va, PGSIZE));
    let code = FaultErrorCode::from_bits(utf.err);
    let entry = env.page_entry(va);
    if !code.write() || !entry.copy_on_write() {
        error!(
            "[{}] fatal fault at {:#010x} ip {:#010x}: {}",
            env.id(),
            utf.fault_va,
            utf.eip,
            code.explain()
        );
        env.exit()?;
        return Err(UserError::Destroyed(env.id()));
    }

    let scratch = VirtualAddress::new(PFTEMP);
    let rw = PagePermissions::user_rw().into_bits();
    env.sys_page_alloc(EnvId::CURRENT, scratch, rw)?;
    let mut page = alloc::vec![0u8; PGSIZE as usize];
    env.read(va, &mut page)?;
    env.write(scratch, &page)?;
    env.sys_page_map(EnvId::CURRENT, scratch, EnvId::CURRENT, va, rw)?;
    env.sys_page_unmap(EnvId::CURRENT, scratch)?;
    trace!("[{}] copied {va} on write", env.id());
    Ok(())
}

impl UserEnv<'_> {
    /// Duplicate this environment.
    ///
    /// Returns the child's id to the parent. The child is left runnable and,
    /// when it is scheduled, resumes from the same point with a return value
    /// of zero in `eax`.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] if the kernel runs out of environments or
    ///   memory part way. A half-built child is left not runnable.
    pub fn fork(&mut self) -> Result<EnvId, UserError> {
        self.set_exception_handler(T_PGFLT, Program::PGFAULT)?;
        let child = self.sys_exofork()?;

        let mappings: alloc::vec::Vec<UserMapping> = self
            .kernel
            .user_mappings(self.id)?
            .filter(|m| m.va().as_u32() < USTACKTOP)
            .collect();
        for mapping in &mappings {
            self.duppage(child, mapping)?;
        }

        let xstack = VirtualAddress::new(UXSTACKTOP - PGSIZE);
        self.sys_page_alloc(child, xstack, PagePermissions::user_rw().into_bits())?;
        self.sys_env_set_exception_upcall(child, Program::TRAMPOLINE)?;
        let handlers = *self.this_env()?.exception_handlers();
        for (trapno, handler) in (0u32..).zip(handlers) {
            if let Some(handler) = handler {
                self.sys_env_set_exception_handler(child, trapno, handler)?;
            }
        }

        self.sys_env_set_status(child, EnvStatus::Runnable)?;
        Ok(child)
    }

    /// Map one of our pages into `child`, copy-on-write unless it is shared
    /// or read-only. The child is mapped before our own entry is
    /// downgraded.
    fn duppage(&mut self, child: EnvId, mapping: &UserMapping) -> Result<(), UserError> {
        let va = mapping.va();
        let perm = mapping.permissions().for_fork();
        let bits = perm.into_bits() & PagePermissions::SYSCALL_MASK;
        self.sys_page_map(EnvId::CURRENT, va, child, va, bits)?;
        if perm.copy_on_write() && !mapping.permissions().copy_on_write() {
            self.sys_page_map(EnvId::CURRENT, va, EnvId::CURRENT, va, bits)?;
        }
        Ok(())
    }
}
