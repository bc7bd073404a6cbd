//! Console printing from user space.
//!
//! Formatted text is staged in a private page and handed to the kernel with
//! `sys_cputs`, a page at a time.

use crate::{UserEnv, UserError};
use kernel_env::EnvId;
use kernel_info::memory::{PGSIZE, UTEMP};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PagePermissions;

/// Where `print!` stages its output.
pub const PRINTBUF: VirtualAddress = VirtualAddress::new(UTEMP - PGSIZE);

/// Print formatted text on the console as `env`.
///
/// # Errors
/// As for [`UserEnv::cputs`].
pub fn user_write(env: &mut UserEnv<'_>, args: core::fmt::Arguments<'_>) -> Result<(), UserError> {
    let s = alloc::fmt::format(args);
    env.cputs(&s)
}

impl UserEnv<'_> {
    /// Print `s` on the console.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] if the staging page cannot be allocated.
    pub fn cputs(&mut self, s: &str) -> Result<(), UserError> {
        if !self.page_entry(PRINTBUF).present() {
            self.sys_page_alloc(EnvId::CURRENT, PRINTBUF, PagePermissions::user_rw().into_bits())?;
        }
        for chunk in s.as_bytes().chunks(PGSIZE as usize) {
            #[allow(clippy::cast_possible_truncation)]
            let len = chunk.len() as u32;
            self.write(PRINTBUF, chunk)?;
            self.sys_cputs(PRINTBUF, len)?;
        }
        Ok(())
    }
}

/// Print to the console of a [`UserEnv`](crate::UserEnv).
#[macro_export]
macro_rules! print {
    ($env:expr, $($arg:tt)*) => {
        $crate::fmt::user_write($env, format_args!($($arg)*))
    };
}

/// Print a line to the console of a [`UserEnv`](crate::UserEnv).
#[macro_export]
macro_rules! println {
    ($env:expr) => {
        $crate::print!($env, "\n")
    };
    ($env:expr, $($arg:tt)*) => {
        $crate::fmt::user_write($env, format_args!("{}\n", format_args!($($arg)*)))
    };
}
