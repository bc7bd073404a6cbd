use crate::eflags::Eflags;
use crate::trap::{GD_UD, GD_UT, RPL_USER};
use utils_layout_derive::ByteLayout;

/// General-purpose registers in `pushal` order.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, ByteLayout)]
#[repr(C)]
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Useless; ignored on restore.
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

/// Saved user register state, restored when the environment is dispatched.
///
/// Segment selectors are stored zero-extended to 32 bits, which matches the
/// hardware frame where the upper halves are padding.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, ByteLayout)]
#[repr(C)]
pub struct TrapFrame {
    pub regs: PushRegs,
    pub es: u32,
    pub ds: u32,
    pub trapno: u32,
    /// Error code pushed by the processor, or zero.
    pub err: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: Eflags,
    pub esp: u32,
    pub ss: u32,
}

impl TrapFrame {
    /// A fresh user-mode frame with the stack pointer at `stack_top`.
    #[must_use]
    pub fn new_user(stack_top: u32) -> Self {
        Self {
            es: GD_UD | RPL_USER,
            ds: GD_UD | RPL_USER,
            cs: GD_UT | RPL_USER,
            ss: GD_UD | RPL_USER,
            eflags: Eflags::user(),
            esp: stack_top,
            ..Self::default()
        }
    }

    /// Force CPL 3 selectors, interrupts enabled and IOPL 0, whatever the
    /// frame previously said.
    pub const fn sanitize_for_user(&mut self) {
        self.cs = GD_UT | RPL_USER;
        self.ds = GD_UD | RPL_USER;
        self.es = GD_UD | RPL_USER;
        self.ss = GD_UD | RPL_USER;
        self.eflags = self.eflags.sanitized();
    }

    /// Whether the frame would run at user privilege.
    #[must_use]
    pub const fn is_user(&self) -> bool {
        self.cs & 3 == RPL_USER
    }
}

/// Fault record pushed onto the user exception stack before the kernel
/// enters the environment's exception upcall.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, ByteLayout)]
#[repr(C)]
pub struct UTrapframe {
    /// Faulting linear address for page faults, zero otherwise.
    pub fault_va: u32,
    pub err: u32,
    pub trapno: u32,
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: Eflags,
    pub esp: u32,
}
