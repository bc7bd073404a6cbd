//! # Environments
//!
//! The environment table and everything that acts on it: creation and
//! destruction, the memory system calls, round-robin scheduling, exception
//! upcalls, and rendezvous IPC.
//!
//! ## Model
//!
//! Exactly one environment runs at a time and every kernel entry runs to
//! completion. [`Kernel`] owns all state, so a system call is simply a
//! `&mut Kernel` method; there is nothing to lock.
//!
//! ```text
//!            create/exofork          set_status(Runnable)
//!   Free ─────────────────► NotRunnable ─────────────────► Runnable
//!    ▲                          ▲  │                        │   ▲
//!    │ destroy                  │  │ ipc_try_send           │   │ yield
//!    │                 ipc_recv │  └────────────────────────┘   │
//!  Dying ◄──────────────────── Running ◄──────────────────────-─┘
//!                                          run
//! ```
//!
//! Calls that block (`ipc_recv`) or replace the caller (`exec`, `destroy`
//! of self) never "return" to the caller: their success is observed through
//! the environment's saved state the next time it is scheduled.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod config;
mod env;
mod error;
mod exception;
mod id;
mod ipc;
mod kernel;
mod sched;
mod table;

pub use crate::config::KernelConfig;
pub use crate::env::{Env, EnvStatus, EnvType, IpcState};
pub use crate::error::KernelError;
pub use crate::exception::{AccessError, Delivery};
pub use crate::id::EnvId;
pub use crate::kernel::Kernel;
pub use crate::table::EnvTable;
