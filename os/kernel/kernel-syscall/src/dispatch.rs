use crate::{Console, Sysno};
use alloc::vec;
use core::fmt;
use kernel_env::{EnvId, Kernel, KernelError};
use kernel_loader::ExecError;
use kernel_memory_addresses::{ByteLayout, VirtualAddress};
use kernel_registers::TrapFrame;
use log::{debug, trace, warn};

/// The five argument registers of a system call.
#[derive(Default, Copy, Clone, Eq, PartialEq)]
pub struct Args {
    regs: [u32; 5],
}

impl Args {
    #[must_use]
    pub const fn new(regs: [u32; 5]) -> Self {
        Self { regs }
    }

    /// `edx, ecx, ebx, edi, esi`.
    #[must_use]
    pub const fn from_frame(tf: &TrapFrame) -> Self {
        Self::new([tf.regs.edx, tf.regs.ecx, tf.regs.ebx, tf.regs.edi, tf.regs.esi])
    }

    /// Argument `n`, counting from 1.
    #[must_use]
    pub const fn get(&self, n: usize) -> u32 {
        self.regs[n - 1]
    }

    const fn env(&self, n: usize) -> EnvId {
        EnvId::from_raw(self.get(n))
    }

    const fn va(&self, n: usize) -> VirtualAddress {
        VirtualAddress::new(self.get(n))
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a1, a2, a3, a4, a5] = self.regs;
        write!(f, "({a1:#x}, {a2:#x}, {a3:#x}, {a4:#x}, {a5:#x})")
    }
}

/// How a system call left its caller.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Completion {
    /// The caller resumes with this value in `eax`.
    Returned(i32),
    /// The caller gave up the CPU; whatever it resumes with is already in
    /// its saved registers.
    Descheduled,
    /// The caller now runs a new image.
    Replaced,
    /// The caller no longer exists.
    Destroyed,
}

impl From<Result<i32, KernelError>> for Completion {
    fn from(r: Result<i32, KernelError>) -> Self {
        Self::Returned(r.unwrap_or_else(KernelError::code))
    }
}

impl From<Result<(), KernelError>> for Completion {
    fn from(r: Result<(), KernelError>) -> Self {
        Self::from(r.map(|()| 0_i32))
    }
}

/// Handle the system call the running environment has set up in its
/// registers, and write the result back to `eax`.
///
/// Returns `None` if no environment is running.
pub fn syscall_trap(kernel: &mut Kernel, console: &mut dyn Console) -> Option<Completion> {
    let caller = kernel.current()?;
    let tf = *kernel.env(caller)?.trap_frame();

    let completion = dispatch(kernel, console, tf.regs.eax, Args::from_frame(&tf));
    if let Completion::Returned(value) = completion {
        match kernel.current_frame_mut() {
            Some(tf) => tf.regs.eax = value.cast_unsigned(),
            None => warn!("[{caller}] returned {value} but is no longer running"),
        }
    }
    Some(completion)
}

/// Run system call `sysno` for the running environment.
///
/// Unknown numbers fail with [`KernelError::InvalidArgument`].
pub fn dispatch(kernel: &mut Kernel, console: &mut dyn Console, sysno: u32, args: Args) -> Completion {
    let Some(caller) = kernel.current() else {
        return Completion::Returned(KernelError::BadEnvironment.code());
    };
    let sysno = match Sysno::try_from(sysno) {
        Ok(sysno) => sysno,
        Err(e) => {
            debug!("[{caller}] {e}");
            return Completion::Returned(KernelError::InvalidArgument.code());
        }
    };
    trace!("[{caller}] {sysno:?}{args:?}");

    match sysno {
        Sysno::Cputs => cputs(kernel, console, caller, args.va(1), args.get(2)),
        Sysno::Cgetc => Completion::Returned(console.read_char().map_or(0, i32::from)),
        Sysno::GetEnvId => Completion::Returned(caller.as_i32()),
        Sysno::EnvDestroy => env_destroy(kernel, caller, args.env(1)),
        Sysno::PageAlloc => kernel.page_alloc(args.env(1), args.va(2), args.get(3)).into(),
        Sysno::PageMap => kernel
            .page_map(args.env(1), args.va(2), args.env(3), args.va(4), args.get(5))
            .into(),
        Sysno::PageUnmap => kernel.page_unmap(args.env(1), args.va(2)).into(),
        Sysno::Exofork => kernel.exofork().map(EnvId::as_i32).into(),
        Sysno::EnvSetStatus => kernel.set_status(args.env(1), args.get(2)).into(),
        Sysno::EnvSetTrapframe => env_set_trapframe(kernel, caller, args.env(1), args.va(2)).into(),
        Sysno::EnvSetExceptionUpcall => kernel.set_exception_upcall(args.env(1), args.va(2)).into(),
        Sysno::EnvSetExceptionHandler => kernel
            .set_exception_handler(args.env(1), args.get(2), args.va(3))
            .into(),
        Sysno::Yield => {
            if let Some(tf) = kernel.current_frame_mut() {
                tf.regs.eax = 0;
            }
            kernel.yield_cpu();
            Completion::Descheduled
        }
        Sysno::IpcTrySend => kernel
            .ipc_try_send(args.env(1), args.get(2), args.va(3), args.get(4))
            .into(),
        Sysno::IpcRecv => match kernel.ipc_recv(args.va(1)) {
            Ok(_) => Completion::Descheduled,
            Err(e) => Completion::Returned(e.code()),
        },
        Sysno::Exec => match kernel_loader::exec(kernel, args.va(1), args.va(2)) {
            Ok(()) => Completion::Replaced,
            Err(ExecError::Rejected(e)) => Completion::Returned(e.code()),
            Err(ExecError::Destroyed(_)) => Completion::Destroyed,
        },
    }
}

/// Print a user string. A bad pointer is fatal to the caller.
fn cputs(kernel: &mut Kernel, console: &mut dyn Console, caller: EnvId, s: VirtualAddress, len: u32) -> Completion {
    if kernel.check_user_range(caller, s, len, false).is_err() {
        if let Err(e) = kernel.destroy(caller) {
            debug!("[{caller}] {e}");
        }
        return Completion::Destroyed;
    }
    let mut buf = vec![0u8; len as usize];
    match kernel.user_read(caller, s, &mut buf) {
        Ok(()) => {
            console.write(&buf);
            Completion::Returned(0)
        }
        Err(e) => {
            warn!("[{caller}] cputs: {e}");
            Completion::Returned(KernelError::Faulted.code())
        }
    }
}

fn env_destroy(kernel: &mut Kernel, caller: EnvId, id: EnvId) -> Completion {
    let target = match kernel.resolve(id, true) {
        Ok(target) => target,
        Err(e) => return Completion::Returned(e.code()),
    };
    if let Err(e) = kernel.destroy(target) {
        return Completion::Returned(e.code());
    }
    if target == caller {
        Completion::Destroyed
    } else {
        Completion::Returned(0)
    }
}

/// The new frame is read out of the caller's memory.
fn env_set_trapframe(kernel: &mut Kernel, caller: EnvId, id: EnvId, tf_va: VirtualAddress) -> Result<(), KernelError> {
    #[allow(clippy::cast_possible_truncation)]
    kernel.check_user_range(caller, tf_va, TrapFrame::SIZE as u32, false)?;
    let mut raw = [0u8; TrapFrame::SIZE];
    kernel
        .user_read(caller, tf_va, &mut raw)
        .map_err(|_| KernelError::Faulted)?;
    kernel.set_trapframe(id, TrapFrame::read_le(&raw))
}
