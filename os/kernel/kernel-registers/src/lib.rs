//! # Typed 32-bit x86 Processor State
//!
//! The register-level records that cross the user/kernel boundary: the saved
//! [`TrapFrame`] of every environment, the [`UTrapframe`] fault record pushed
//! onto a user exception stack, the [`Eflags`] register and the page-fault
//! [`FaultErrorCode`].
//!
//! All records derive `ByteLayout`, so they can be copied in and out of
//! environment memory with their hardware byte layout.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![forbid(unsafe_code)]

mod eflags;
mod fault;
pub mod trap;
mod trapframe;

pub use crate::eflags::Eflags;
pub use crate::fault::FaultErrorCode;
pub use crate::trapframe::{PushRegs, TrapFrame, UTrapframe};
