//! # Kernel Configuration and Memory Layout
//!
//! This crate defines the compile-time constants that every other kernel
//! crate agrees on: where user space ends, where the user and exception
//! stacks live, where the file-system environment exposes its disk blocks,
//! and how many environments the kernel can track.
//!
//! ## Virtual Address Space Layout
//!
//! Every environment sees the same 32-bit layout. Everything at or above
//! [`UTOP`](memory::UTOP) is shared by all address spaces and can never be
//! changed through a system call.
//!
//! ```text
//! 4 GiB  ┌─────────────────────────────┐
//!        │   Kernel image & data       │  supervisor only
//! KERNBASE ├───────────────────────────┤ 0xf000_0000
//!        │   Kernel stacks (invalid)   │
//! ULIM   ├─────────────────────────────┤ 0xef80_0000
//!        │   Page-table window (RO)    │
//! UVPT   ├─────────────────────────────┤ 0xef40_0000
//!        │   Page info window (RO)     │
//! UPAGES ├─────────────────────────────┤ 0xef00_0000
//!        │   Environment window (RO)   │
//! UTOP   ├─────────────────────────────┤ 0xeec0_0000 = UENVS = UXSTACKTOP
//!        │   User exception stack      │  one page
//!        ├─────────────────────────────┤ 0xeebf_f000
//!        │   Empty guard page          │
//! USTACKTOP ├──────────────────────────┤ 0xeebf_e000
//!        │   Normal user stack         │  grows down
//!        ├─────────────────────────────┤
//!        │   ...                       │
//! DISKMAP ├────────────────────────────┤ 0x1000_0000 (file-system env only)
//!        │   ...                       │
//! UTEXT  ├─────────────────────────────┤ 0x0080_0000
//! PFTEMP ├─────────────────────────────┤ 0x007f_f000
//!        │   Scratch mappings          │
//! UTEMP  ├─────────────────────────────┤ 0x0040_0000
//!        │   Empty                     │
//! 0      └─────────────────────────────┘
//! ```
//!
//! ## Environment Limits
//!
//! Environment identifiers are `(generation << ENVGENSHIFT) | index`; see
//! [`env`] for the bit budget.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod env;
pub mod memory;
