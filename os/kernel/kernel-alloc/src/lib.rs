//! # Physical Page Pool
//!
//! The kernel's simulated physical memory: a fixed number of 4 KiB pages,
//! each with a reference count and (once written) its contents.
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬─────┬──────────┐
//! │ page 0   │ page 1   │ page 2   │ ... │ page N-1 │
//! │ reserved │ refs, [] │ refs, [] │     │ refs, [] │
//! └──────────┴──────────┴──────────┴─────┴──────────┘
//! ```
//!
//! Page 0 is never handed out, so a zero page number can always be read as
//! "no page". Free pages are kept on a stack; the lowest numbers are handed
//! out first after boot.
//!
//! The pool implements [`kernel_vmem::FrameAlloc`]; address spaces are the
//! only holders of references.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod frame_table;

pub use crate::frame_table::FrameTable;
