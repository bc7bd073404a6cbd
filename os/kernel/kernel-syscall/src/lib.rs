//! # System Call Gateway
//!
//! The single entry point user environments reach the kernel through.
//!
//! ## ABI
//!
//! | register | meaning          |
//! |----------|------------------|
//! | `eax`    | [`Sysno`]        |
//! | `edx`    | argument 1       |
//! | `ecx`    | argument 2       |
//! | `ebx`    | argument 3       |
//! | `edi`    | argument 4       |
//! | `esi`    | argument 5       |
//!
//! The result comes back in `eax`: zero or a non-negative value on success,
//! a negative [`KernelError::code`](kernel_env::KernelError::code) on
//! failure. Calls that block, replace or destroy the caller do not write
//! `eax`; see [`Completion`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod console;
mod dispatch;
mod sysno;

pub use crate::console::{BufferConsole, Console};
pub use crate::dispatch::{Args, Completion, dispatch, syscall_trap};
pub use crate::sysno::{Sysno, UnknownSyscall};
