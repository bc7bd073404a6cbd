use crate::{UserEnv, UserError};
use alloc::vec::Vec;
use kernel_env::{EnvId, KernelError};
use kernel_info::memory::{PGSIZE, UTEMP};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PagePermissions;

impl UserEnv<'_> {
    /// Replace this environment's image with `file`, one of the file-system
    /// environment's open files, passing `argv`.
    ///
    /// The argument vector is staged in the `UTEMP` page: a NULL-terminated
    /// pointer table first, the strings after it.
    ///
    /// # Errors
    /// - [`UserError::Syscall`] with [`KernelError::InvalidArgument`] if
    ///   `argv` does not fit in a page, or whatever the kernel rejected the
    ///   image with. Either way the caller is unchanged.
    /// - [`UserError::Destroyed`] if the load failed past the point of no
    ///   return.
    pub fn exec(&mut self, file: VirtualAddress, argv: &[&str]) -> Result<(), UserError> {
        let page = marshal_argv(argv).ok_or(KernelError::InvalidArgument)?;
        let staging = VirtualAddress::new(UTEMP);
        self.sys_page_alloc(EnvId::CURRENT, staging, PagePermissions::user_rw().into_bits())?;
        self.write(staging, &page)?;

        match self.sys_exec(file, staging) {
            Err(UserError::Syscall(e)) => {
                self.sys_page_unmap(EnvId::CURRENT, staging)?;
                Err(e.into())
            }
            other => other,
        }
    }
}

/// Lay out `argv` as it will sit at `UTEMP`.
fn marshal_argv(argv: &[&str]) -> Option<Vec<u8>> {
    let table = 4 * (argv.len() + 1);
    let strings: usize = argv.iter().map(|a| a.len() + 1).sum();
    if table + strings > PGSIZE as usize {
        return None;
    }

    let mut page = Vec::with_capacity(table + strings);
    let mut at = UTEMP + u32::try_from(table).ok()?;
    for arg in argv {
        page.extend_from_slice(&at.to_le_bytes());
        at += u32::try_from(arg.len() + 1).ok()?;
    }
    page.extend_from_slice(&[0; 4]);
    for arg in argv {
        page.extend_from_slice(arg.as_bytes());
        page.push(0);
    }
    Some(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_table_then_strings() {
        let page = marshal_argv(&["ls", "-l"]).expect("fits");
        let word = |i: usize| u32::from_le_bytes(page[4 * i..4 * i + 4].try_into().expect("word"));
        assert_eq!(word(0), UTEMP + 12);
        assert_eq!(word(1), UTEMP + 15);
        assert_eq!(word(2), 0);
        assert_eq!(&page[12..], b"ls\0-l\0");
    }

    #[test]
    fn must_fit_in_a_page() {
        let long = "x".repeat(PGSIZE as usize);
        assert!(marshal_argv(&[long.as_str()]).is_none());
        assert_eq!(marshal_argv(&[]), Some(alloc::vec![0; 4]));
    }
}
