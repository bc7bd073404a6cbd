//! User-level exception delivery.
//!
//! Each environment registers one upcall entry point. On a trap the kernel
//! pushes a [`UTrapframe`] onto the one-page exception stack below
//! `UXSTACKTOP` and resumes the environment at the upcall, which consults the
//! per-trap handler table and eventually returns to the faulting context on
//! its own.
//!
//! ```text
//!  UXSTACKTOP ┬──────────────────┐
//!             │ UTrapframe       │ ◄── first fault
//!             ├──────────────────┤
//!             │ scratch word     │
//!             │ UTrapframe       │ ◄── fault taken while on this stack
//!             │ ...              │
//!  -PGSIZE    ┴──────────────────┘
//! ```

use crate::{EnvId, Kernel, KernelError};
use kernel_info::env::NEXCEPTIONS;
use kernel_info::memory::{PGSIZE, UXSTACKTOP};
use kernel_memory_addresses::{ByteLayout, VirtualAddress};
use kernel_registers::UTrapframe;
use kernel_registers::trap::{T_PGFLT, trap_name};
use kernel_vmem::{Access, PageEntryBits, PageFault};
use log::{debug, warn};

/// Outcome of delivering a trap to an environment.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Delivery {
    /// The environment resumes at `entry` with `esp` at `frame`.
    Upcall {
        entry: VirtualAddress,
        frame: VirtualAddress,
    },
    /// The trap could not be delivered and the environment is gone.
    Destroyed,
}

/// A simulated memory access that did not complete.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error(transparent)]
    Fault(#[from] PageFault),
    #[error(transparent)]
    Env(#[from] KernelError),
}

impl Kernel {
    /// Set the upcall entry of `id`; zero clears it.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] as for [`resolve`](Self::resolve).
    pub fn set_exception_upcall(&mut self, id: EnvId, entry: VirtualAddress) -> Result<(), KernelError> {
        let id = self.resolve(id, true)?;
        self.live_mut(id)?.exception_upcall = (entry.as_u32() != 0).then_some(entry);
        debug!("[{id}] exception upcall {entry}");
        Ok(())
    }

    /// Record the handler the upcall should run for `trapno`; zero clears it.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] as for [`resolve`](Self::resolve).
    /// - [`KernelError::InvalidArgument`] if `trapno` is not an exception vector.
    pub fn set_exception_handler(
        &mut self,
        id: EnvId,
        trapno: u32,
        handler: VirtualAddress,
    ) -> Result<(), KernelError> {
        let id = self.resolve(id, true)?;
        let slot = usize::try_from(trapno)
            .ok()
            .filter(|&t| t < NEXCEPTIONS)
            .ok_or(KernelError::InvalidArgument)?;
        self.live_mut(id)?.handlers[slot] = (handler.as_u32() != 0).then_some(handler);
        debug!("[{id}] handler for {} at {handler}", trap_name(trapno));
        Ok(())
    }

    /// The handler `id` registered for `trapno`.
    #[must_use]
    pub fn exception_handler(&self, id: EnvId, trapno: u32) -> Option<VirtualAddress> {
        let env = self.envs.get(id)?;
        *env.handlers.get(usize::try_from(trapno).ok()?)?
    }

    /// Deliver trap `trapno` to `id`.
    ///
    /// Without an upcall, or without a writable exception stack with room for
    /// the record, the environment is destroyed.
    ///
    /// # Errors
    /// - [`KernelError::BadEnvironment`] if `id` is not live.
    pub fn deliver_exception(
        &mut self,
        id: EnvId,
        trapno: u32,
        fault_va: VirtualAddress,
        err: u32,
    ) -> Result<Delivery, KernelError> {
        let env = self.live(id)?;
        let Some(entry) = env.exception_upcall else {
            warn!(
                "[{id}] user fault va {fault_va} ip {:#010x}: {} with no upcall",
                env.frame.eip,
                trap_name(trapno)
            );
            self.destroy(id)?;
            return Ok(Delivery::Destroyed);
        };

        #[allow(clippy::cast_possible_truncation)]
        let size = UTrapframe::SIZE as u32;
        let bottom = UXSTACKTOP - PGSIZE;
        let esp = env.frame.esp;
        let top = if (bottom..UXSTACKTOP).contains(&esp) {
            esp.wrapping_sub(4)
        } else {
            UXSTACKTOP
        };
        let frame = top.checked_sub(size).filter(|&f| f >= bottom);

        let need = PageEntryBits::new().with_user_access(true).with_writable(true);
        let frame = match frame {
            Some(f) if env.space.check_user_range(VirtualAddress::new(f), size, need).is_ok() => {
                VirtualAddress::new(f)
            }
            _ => {
                warn!("[{id}] exception stack overflow or unmapped, esp {esp:#010x}");
                self.destroy(id)?;
                return Ok(Delivery::Destroyed);
            }
        };

        let record = UTrapframe {
            fault_va: fault_va.as_u32(),
            err,
            trapno,
            regs: env.frame.regs,
            eip: env.frame.eip,
            eflags: env.frame.eflags,
            esp,
        };
        let mut bytes = [0u8; UTrapframe::SIZE];
        record.write_le(&mut bytes);
        if self.write_memory(id, frame, &bytes, Access::User).is_err() {
            self.destroy(id)?;
            return Ok(Delivery::Destroyed);
        }

        let env = self.live_mut(id)?;
        env.frame.trapno = trapno;
        env.frame.err = err;
        env.frame.eip = entry.as_u32();
        env.frame.esp = frame.as_u32();
        debug!("[{id}] {} at {fault_va} -> upcall {entry}, frame {frame}", trap_name(trapno));
        Ok(Delivery::Upcall { entry, frame })
    }

    /// Deliver a page fault to `id`.
    ///
    /// # Errors
    /// As for [`deliver_exception`](Self::deliver_exception).
    pub fn page_fault(&mut self, id: EnvId, fault: PageFault) -> Result<Delivery, KernelError> {
        self.deliver_exception(id, T_PGFLT, fault.va, fault.code.into_bits())
    }

    /// The trampoline's return path: reload the faulting context from the
    /// record at the saved stack pointer.
    ///
    /// # Errors
    /// - [`AccessError::Env`] if `id` is not live.
    /// - [`AccessError::Fault`] if the record cannot be read.
    pub fn resume_from_upcall(&mut self, id: EnvId) -> Result<UTrapframe, AccessError> {
        let esp = VirtualAddress::new(self.live(id)?.frame.esp);
        let mut bytes = [0u8; UTrapframe::SIZE];
        self.user_read(id, esp, &mut bytes)?;
        let record = UTrapframe::read_le(&bytes);

        let env = self.live_mut(id)?;
        env.frame.regs = record.regs;
        env.frame.eip = record.eip;
        env.frame.eflags = record.eflags.sanitized();
        env.frame.esp = record.esp;
        Ok(record)
    }

    /// Read `id`'s memory with user privilege.
    ///
    /// # Errors
    /// As for [`read_memory`](Self::read_memory).
    pub fn user_read(&self, id: EnvId, va: VirtualAddress, buf: &mut [u8]) -> Result<(), AccessError> {
        self.read_memory(id, va, buf, Access::User)
    }

    /// Write `id`'s memory with user privilege.
    ///
    /// # Errors
    /// As for [`read_memory`](Self::read_memory).
    pub fn user_write(&mut self, id: EnvId, va: VirtualAddress, bytes: &[u8]) -> Result<(), AccessError> {
        self.write_memory(id, va, bytes, Access::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EnvType, KernelConfig};
    use kernel_info::memory::{USTACKTOP, UTEXT};
    use kernel_registers::trap::T_DIVIDE;

    const UPCALL: u32 = 0x00f0_0000;

    fn setup(with_stack: bool) -> (Kernel, EnvId) {
        let mut k = Kernel::new(KernelConfig::default().with_max_envs(4).with_physical_pages(128))
            .expect("boot");
        let a = k.create_root(EnvType::User).expect("a");
        k.run(a).expect("run");
        if with_stack {
            k.page_alloc(a, VirtualAddress::new(UXSTACKTOP - PGSIZE), 0x7).expect("xstack");
        }
        k.set_exception_upcall(a, VirtualAddress::new(UPCALL)).expect("upcall");
        (k, a)
    }

    #[test]
    fn no_upcall_destroys() {
        let mut k = Kernel::new(KernelConfig::default().with_max_envs(4).with_physical_pages(64))
            .expect("boot");
        let a = k.create_root(EnvType::User).expect("a");
        assert_eq!(
            k.deliver_exception(a, T_DIVIDE, VirtualAddress::zero(), 0),
            Ok(Delivery::Destroyed)
        );
        assert!(k.env(a).is_none());
    }

    #[test]
    fn missing_exception_stack_destroys() {
        let (mut k, a) = setup(false);
        assert_eq!(
            k.deliver_exception(a, T_DIVIDE, VirtualAddress::zero(), 0),
            Ok(Delivery::Destroyed)
        );
        assert!(k.env(a).is_none());
    }

    #[test]
    fn record_is_pushed_and_restored() {
        let (mut k, a) = setup(true);
        if let Some(tf) = k.current_frame_mut() {
            tf.eip = UTEXT + 0x42;
            tf.esp = USTACKTOP - 16;
            tf.regs.eax = 0x1234;
        }

        let d = k
            .deliver_exception(a, T_PGFLT, VirtualAddress::new(UTEXT), 7)
            .expect("deliver");
        let frame = VirtualAddress::new(UXSTACKTOP - 56);
        assert_eq!(
            d,
            Delivery::Upcall {
                entry: VirtualAddress::new(UPCALL),
                frame
            }
        );

        let tf = *k.env(a).expect("live").trap_frame();
        assert_eq!(tf.eip, UPCALL);
        assert_eq!(tf.esp, frame.as_u32());

        let mut bytes = [0u8; UTrapframe::SIZE];
        k.user_read(a, frame, &mut bytes).expect("read record");
        let record = UTrapframe::read_le(&bytes);
        assert_eq!(record.fault_va, UTEXT);
        assert_eq!(record.err, 7);
        assert_eq!(record.eip, UTEXT + 0x42);
        assert_eq!(record.esp, USTACKTOP - 16);

        k.resume_from_upcall(a).expect("resume");
        let tf = *k.env(a).expect("live").trap_frame();
        assert_eq!(tf.eip, UTEXT + 0x42);
        assert_eq!(tf.esp, USTACKTOP - 16);
        assert_eq!(tf.regs.eax, 0x1234);
    }

    #[test]
    fn nested_fault_leaves_a_scratch_word() {
        let (mut k, a) = setup(true);
        k.deliver_exception(a, T_PGFLT, VirtualAddress::new(UTEXT), 6)
            .expect("first");
        let d = k
            .deliver_exception(a, T_PGFLT, VirtualAddress::new(UTEXT + 4), 6)
            .expect("nested");
        assert_eq!(
            d,
            Delivery::Upcall {
                entry: VirtualAddress::new(UPCALL),
                frame: VirtualAddress::new(UXSTACKTOP - 56 - 4 - 56),
            }
        );
    }

    #[test]
    fn overflowing_the_exception_stack_destroys() {
        let (mut k, a) = setup(true);
        let mut delivered = 0;
        loop {
            match k.deliver_exception(a, T_PGFLT, VirtualAddress::new(UTEXT), 6) {
                Ok(Delivery::Upcall { .. }) => delivered += 1,
                Ok(Delivery::Destroyed) => break,
                Err(e) => panic!("unexpected {e}"),
            }
        }
        // 4096 / (56 + 4) with the first record needing no scratch word.
        assert_eq!(delivered, 68);
        assert!(k.env(a).is_none());
    }

    #[test]
    fn handler_table() {
        let (mut k, a) = setup(true);
        let h = VirtualAddress::new(UPCALL + 0x1000);
        k.set_exception_handler(a, T_DIVIDE, h).expect("set");
        assert_eq!(k.exception_handler(a, T_DIVIDE), Some(h));
        assert_eq!(k.exception_handler(a, T_PGFLT), None);
        assert_eq!(
            k.set_exception_handler(a, 32, h),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(k.exception_handler(a, 99), None);
    }
}
