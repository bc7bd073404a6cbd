use crate::VmemError;
use bitfield_struct::bitfield;

/// The capability set a user mapping may carry.
///
/// Bit positions match [`PageEntryBits`](crate::PageEntryBits), so a value
/// can be dropped straight into a page-table entry. Every user mapping is
/// present and user-accessible; on top of that a mapping may be writable,
/// copy-on-write, or share-on-fork.
///
/// A mapping is never writable and copy-on-write at the same time: the
/// copy-on-write bit means "writes go through the fault path", so pairing it
/// with direct write access is rejected by [`from_syscall`](Self::from_syscall).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PagePermissions {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    #[bits(7)]
    __hardware: u8,
    /// Keep the mapping shared (not copy-on-write) across fork.
    pub share: bool,
    /// Writes must fault and be resolved by a private copy.
    pub copy_on_write: bool,
    #[bits(20)]
    __frame: u32,
}

impl PagePermissions {
    /// Every bit a system call may name.
    pub const SYSCALL_MASK: u32 = 0x0c07;

    /// Validate raw permission bits coming from user space.
    ///
    /// Present and user are always added.
    ///
    /// # Errors
    /// - [`VmemError::InvalidPermissions`] for bits outside
    ///   [`SYSCALL_MASK`](Self::SYSCALL_MASK), or for writable plus
    ///   copy-on-write.
    pub const fn from_syscall(raw: u32) -> Result<Self, VmemError> {
        if raw & !Self::SYSCALL_MASK != 0 {
            return Err(VmemError::InvalidPermissions(raw));
        }
        let perm = Self::from_bits(raw).with_present(true).with_user(true);
        if perm.writable() && perm.copy_on_write() {
            return Err(VmemError::InvalidPermissions(raw));
        }
        Ok(perm)
    }

    /// Present, user, read-only.
    #[inline]
    #[must_use]
    pub const fn user_ro() -> Self {
        Self::new().with_present(true).with_user(true)
    }

    /// Present, user, writable.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::user_ro().with_writable(true)
    }

    /// Present, user, copy-on-write (and therefore not writable).
    #[inline]
    #[must_use]
    pub const fn user_cow() -> Self {
        Self::user_ro().with_copy_on_write(true)
    }

    /// The mapping a forked child and its parent converge on.
    ///
    /// Shared pages stay as they are; writable or already copy-on-write pages
    /// become copy-on-write without direct write access; read-only pages stay
    /// read-only.
    #[inline]
    #[must_use]
    pub const fn for_fork(self) -> Self {
        if self.share() {
            self
        } else if self.writable() || self.copy_on_write() {
            self.with_writable(false).with_copy_on_write(true)
        } else {
            self
        }
    }
}
