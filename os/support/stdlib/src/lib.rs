//! # User Support Library
//!
//! What a user environment links against: typed system call wrappers, the
//! exception upcall trampoline, copy-on-write `fork`, IPC helpers, `exec`
//! and console printing.
//!
//! Code here runs "as" one environment and talks to the kernel only
//! through the system call gateway and the memory the environment can see.
//! A [`UserEnv`] binds the three things such code needs: the kernel it
//! traps into, the console, and the [`Program`] whose text the kernel jumps
//! to on an exception upcall.
//!
//! ```text
//!   user access ──fault──► kernel: push UTrapframe on the exception stack
//!        ▲                           │
//!        │                           ▼
//!      retry ◄── resume ◄── trampoline ──► handler[trapno]
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod env;
mod exception;
mod exec;
#[macro_use]
pub mod fmt;
mod fork;
mod ipc;
mod syscall;

pub use crate::env::{Handler, Program, UserEnv, UserError};
pub use crate::ipc::{Message, PendingReceive};
