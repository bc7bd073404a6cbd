use bitfield_struct::bitfield;
use kernel_memory_addresses::ByteLayout;

/// Architectural EFLAGS model for 32-bit x86.
///
/// Bits that are architecturally fixed are modeled as `#[bits(default = ..)]`
/// so a freshly built value is always well-formed.
#[bitfield(u32, order = Lsb)]
#[derive(PartialEq, Eq)]
pub struct Eflags {
    /// Carry Flag
    pub cf_carry: bool, // 0

    /// Always 1.
    #[bits(default = true)]
    always1: bool, // 1

    /// Parity Flag
    pub pf_parity: bool, // 2

    #[bits(default = false)]
    __rsvd3: bool, // 3

    /// Adjust Flag
    pub af_adjust: bool, // 4

    #[bits(default = false)]
    __rsvd5: bool, // 5

    /// Zero Flag
    pub zf_zero: bool, // 6

    /// Sign Flag
    pub sf_sign: bool, // 7

    /// Trap Flag
    pub tf_trap: bool, // 8

    /// Interrupt Enable Flag
    pub if_interrupt_enable: bool, // 9

    /// Direction Flag
    pub df_direction: bool, // 10

    /// Overflow Flag
    pub of_overflow: bool, // 11

    /// I/O Privilege Level (2 bits)
    #[bits(2)]
    pub iopl: u8, // 12–13

    /// Nested Task
    pub nt_nested: bool, // 14

    #[bits(default = false)]
    __rsvd15: bool, // 15

    /// Resume Flag
    pub rf_resume: bool, // 16

    /// Virtual 8086 mode
    pub vm_virtual_8086: bool, // 17

    /// Alignment Check
    pub ac_alignment_check: bool, // 18

    /// Virtual Interrupt Flag
    pub vif_virtual_interrupt: bool, // 19

    /// Virtual Interrupt Pending
    pub vip_virtual_interrupt_pending: bool, // 20

    /// ID Flag: allows toggling CPUID.
    pub id_cpuid: bool, // 21

    #[bits(10, default = 0)]
    __reserved: u16,
}

impl Eflags {
    /// Flags an environment starts with: interrupts on, no I/O privilege.
    #[inline]
    #[must_use]
    pub const fn user() -> Self {
        Self::new().with_if_interrupt_enable(true)
    }

    /// Force the bits user code may never control: interrupts enabled,
    /// IOPL 0, and no virtual-8086 mode.
    #[inline]
    #[must_use]
    pub const fn sanitized(self) -> Self {
        self.with_if_interrupt_enable(true)
            .with_iopl(0)
            .with_vm_virtual_8086(false)
            .with_always1(true)
    }
}

impl ByteLayout for Eflags {
    const SIZE: usize = 4;

    fn write_le(&self, out: &mut [u8]) {
        self.into_bits().write_le(out);
    }

    fn read_le(bytes: &[u8]) -> Self {
        Self::from_bits(u32::read_le(bytes))
    }
}
