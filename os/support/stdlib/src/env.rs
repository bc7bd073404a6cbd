use crate::fork::pgfault;
use alloc::vec::Vec;
use core::fmt;
use kernel_env::{AccessError, Delivery, Env, EnvId, Kernel, KernelError};
use kernel_memory_addresses::{ByteLayout, VirtualAddress};
use kernel_registers::UTrapframe;
use kernel_registers::trap::trap_name;
use kernel_syscall::{Completion, Console, Sysno, syscall_trap};
use kernel_vmem::{PageEntryBits, PageFault};
use log::{debug, warn};

/// Faults a single access may take before it is given up on.
const MAX_FAULTS: usize = 8;

/// A user-level exception handler.
///
/// Runs on the exception stack with the faulting context in the record; the
/// trampoline resumes that context when the handler returns `Ok`.
pub type Handler = fn(&mut UserEnv<'_>, &UTrapframe) -> Result<(), UserError>;

/// Why a user-level operation did not complete.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum UserError {
    /// A system call returned an error code.
    #[error(transparent)]
    Syscall(#[from] KernelError),
    /// The environment does not hold the CPU, typically because it blocked
    /// or yielded; it continues when it is next scheduled.
    #[error("env {0} is not running")]
    NotRunning(EnvId),
    #[error("env {0} has been destroyed")]
    Destroyed(EnvId),
    /// An access kept faulting after its handler returned.
    #[error("unresolved {0}")]
    Unresolved(PageFault),
}

/// The text of a user program: which handler lives at which address.
///
/// The library's own code sits at fixed addresses: the upcall
/// [`TRAMPOLINE`](Self::TRAMPOLINE) and the copy-on-write fault handler at
/// [`PGFAULT`](Self::PGFAULT). Handlers added with
/// [`register`](Self::register) follow from `TEXT + 0x1000`.
#[derive(Clone)]
pub struct Program {
    handlers: Vec<(VirtualAddress, Handler)>,
}

impl Program {
    /// Base of the library text.
    pub const TEXT: u32 = 0x00f0_0000;

    /// The exception upcall entry.
    pub const TRAMPOLINE: VirtualAddress = VirtualAddress::new(Self::TEXT);

    /// The copy-on-write page fault handler.
    pub const PGFAULT: VirtualAddress = VirtualAddress::new(Self::TEXT + 0x40);

    const USER_TEXT: u32 = Self::TEXT + 0x1000;
    const HANDLER_ALIGN: u32 = 0x10;

    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: alloc::vec![(Self::PGFAULT, pgfault as Handler)],
        }
    }

    /// Place `handler` in the program text and return its address.
    pub fn register(&mut self, handler: Handler) -> VirtualAddress {
        let user = self.handlers.len() - 1;
        #[allow(clippy::cast_possible_truncation)]
        let va = VirtualAddress::new(Self::USER_TEXT + user as u32 * Self::HANDLER_ALIGN);
        self.handlers.push((va, handler));
        va
    }

    /// The handler whose code starts at `va`.
    #[must_use]
    pub fn handler_at(&self, va: VirtualAddress) -> Option<Handler> {
        self.handlers.iter().find(|(at, _)| *at == va).map(|&(_, h)| h)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.iter().map(|(va, _)| va)).finish()
    }
}

/// One environment's view of the machine.
pub struct UserEnv<'k> {
    pub(crate) kernel: &'k mut Kernel,
    pub(crate) console: &'k mut dyn Console,
    pub(crate) program: &'k Program,
    pub(crate) id: EnvId,
}

impl<'k> UserEnv<'k> {
    /// Act as `id`. System calls and memory accesses only succeed while
    /// `id` holds the CPU.
    pub fn new(kernel: &'k mut Kernel, console: &'k mut dyn Console, program: &'k Program, id: EnvId) -> Self {
        Self {
            kernel,
            console,
            program,
            id,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EnvId {
        self.id
    }

    #[must_use]
    pub fn kernel(&self) -> &Kernel {
        self.kernel
    }

    /// This environment's read-only record, the way user code sees it
    /// through the environment table window.
    ///
    /// # Errors
    /// - [`UserError::Destroyed`] if the environment is gone.
    pub fn this_env(&self) -> Result<&Env, UserError> {
        self.kernel.env(self.id).ok_or(UserError::Destroyed(self.id))
    }

    /// The page-table entry for `va`, through the read-only page-table window.
    #[must_use]
    pub fn page_entry(&self, va: VirtualAddress) -> PageEntryBits {
        self.kernel.page_entry(self.id, va).unwrap_or_else(PageEntryBits::new)
    }

    pub(crate) fn ensure_running(&self) -> Result<(), UserError> {
        if self.kernel.env(self.id).is_none() {
            return Err(UserError::Destroyed(self.id));
        }
        if self.kernel.current() != Some(self.id) {
            return Err(UserError::NotRunning(self.id));
        }
        Ok(())
    }

    /// Trap into the kernel with `sysno` and the five argument registers.
    ///
    /// # Errors
    /// - [`UserError::NotRunning`] or [`UserError::Destroyed`] if the
    ///   environment cannot issue system calls.
    pub fn syscall(&mut self, sysno: Sysno, args: [u32; 5]) -> Result<Completion, UserError> {
        self.ensure_running()?;
        let tf = self
            .kernel
            .current_frame_mut()
            .ok_or(UserError::NotRunning(self.id))?;
        tf.regs.eax = sysno.into();
        [tf.regs.edx, tf.regs.ecx, tf.regs.ebx, tf.regs.edi, tf.regs.esi] = args;
        syscall_trap(self.kernel, self.console).ok_or(UserError::NotRunning(self.id))
    }

    /// Interpret a completion as a plain return value.
    pub(crate) fn returned(&self, completion: Completion) -> Result<u32, UserError> {
        match completion {
            Completion::Returned(v) if v >= 0 => Ok(v.cast_unsigned()),
            Completion::Returned(v) => Err(KernelError::from_code(v)
                .unwrap_or(KernelError::InvalidArgument)
                .into()),
            Completion::Destroyed => Err(UserError::Destroyed(self.id)),
            Completion::Descheduled | Completion::Replaced => Err(UserError::NotRunning(self.id)),
        }
    }

    pub(crate) fn call(&mut self, sysno: Sysno, args: [u32; 5]) -> Result<u32, UserError> {
        let completion = self.syscall(sysno, args)?;
        self.returned(completion)
    }

    /// Load from user memory.
    ///
    /// # Errors
    /// - [`UserError::Destroyed`] if the fault could not be handled.
    /// - [`UserError::Unresolved`] if the handler did not fix the fault.
    pub fn read(&mut self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), UserError> {
        self.access(|kernel, id| kernel.user_read(id, va, buf))
    }

    /// Store to user memory.
    ///
    /// # Errors
    /// As for [`read`](Self::read).
    pub fn write(&mut self, va: VirtualAddress, bytes: &[u8]) -> Result<(), UserError> {
        self.access(|kernel, id| kernel.user_write(id, va, bytes))
    }

    /// # Errors
    /// As for [`read`](Self::read).
    pub fn read_u32(&mut self, va: VirtualAddress) -> Result<u32, UserError> {
        let mut word = [0u8; 4];
        self.read(va, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// # Errors
    /// As for [`read`](Self::read).
    pub fn write_u32(&mut self, va: VirtualAddress, value: u32) -> Result<(), UserError> {
        self.write(va, &value.to_le_bytes())
    }

    /// Run a memory access, taking page faults through the upcall until it
    /// goes through.
    fn access<F>(&mut self, mut op: F) -> Result<(), UserError>
    where
        F: FnMut(&mut Kernel, EnvId) -> Result<(), AccessError>,
    {
        let mut last = None;
        for _ in 0..MAX_FAULTS {
            self.ensure_running()?;
            match op(self.kernel, self.id) {
                Ok(()) => return Ok(()),
                Err(AccessError::Env(e)) => return Err(e.into()),
                Err(AccessError::Fault(fault)) => {
                    if last == Some(fault) {
                        return Err(UserError::Unresolved(fault));
                    }
                    last = Some(fault);
                    let delivery = self.kernel.page_fault(self.id, fault)?;
                    self.upcall(delivery)?;
                }
            }
        }
        Err(last.map_or(UserError::NotRunning(self.id), UserError::Unresolved))
    }

    /// Continue at wherever the kernel sent the environment.
    pub(crate) fn upcall(&mut self, delivery: Delivery) -> Result<(), UserError> {
        match delivery {
            Delivery::Destroyed => Err(UserError::Destroyed(self.id)),
            Delivery::Upcall { entry, frame } if entry == Program::TRAMPOLINE => self.trampoline(frame),
            Delivery::Upcall { entry, .. } => {
                warn!("[{}] upcall to {entry}, which is not the trampoline", self.id);
                self.kill()
            }
        }
    }

    /// The upcall entry: dispatch on the record's trap number, then return
    /// to the interrupted context.
    fn trampoline(&mut self, frame: VirtualAddress) -> Result<(), UserError> {
        let mut raw = [0u8; UTrapframe::SIZE];
        self.read(frame, &mut raw)?;
        let utf = UTrapframe::read_le(&raw);

        let handler = self
            .kernel
            .exception_handler(self.id, utf.trapno)
            .and_then(|va| self.program.handler_at(va));
        let Some(handler) = handler else {
            warn!("[{}] no handler for {}", self.id, trap_name(utf.trapno));
            return self.kill();
        };

        handler(self, &utf)?;
        self.ensure_running()?;
        self.kernel
            .resume_from_upcall(self.id)
            .map_err(|e| match e {
                AccessError::Env(e) => UserError::Syscall(e),
                AccessError::Fault(fault) => UserError::Unresolved(fault),
            })?;
        debug!("[{}] resumed at {:#010x}", self.id, utf.eip);
        Ok(())
    }

    /// Die the way an unhandled fault does.
    pub(crate) fn kill(&mut self) -> Result<(), UserError> {
        if let Err(e) = self.kernel.destroy(self.id) {
            debug!("[{}] {e}", self.id);
        }
        Err(UserError::Destroyed(self.id))
    }
}
