use core::fmt;
use kernel_info::env::{ENVGENSHIFT, NENV};

/// Generation-tagged environment identifier.
///
/// ```text
/// | 31 | 30 ‒ 12    | 11 ‒ 10 | 9 ‒ 0 |
/// | 0  | generation |    0    | index |
/// ```
///
/// The generation advances every time a slot is reused, so an id that
/// outlived its environment never resolves to the slot's next tenant. Ids are
/// always positive when read as `i32`; zero is reserved for
/// [`EnvId::CURRENT`].
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EnvId(u32);

impl EnvId {
    /// "The calling environment" in system call arguments.
    pub const CURRENT: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The id as the syscall ABI returns it.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }

    /// Slot index in the environment table.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize & (NENV - 1)
    }

    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.0 >> ENVGENSHIFT
    }

    #[inline]
    #[must_use]
    pub const fn is_current(self) -> bool {
        self.0 == 0
    }

    /// The id the next tenant of slot `index` gets, given the slot's previous id.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub(crate) const fn next(previous: Self, index: usize) -> Self {
        let mut generation = previous.0.wrapping_add(1 << ENVGENSHIFT) & !(NENV as u32 - 1);
        if generation as i32 <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        Self(generation | index as u32)
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for EnvId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}
