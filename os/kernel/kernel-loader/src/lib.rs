//! # Program Loading
//!
//! Replacing an environment's image with an ELF32 executable.
//!
//! - [`elf`]: header and program-header records.
//! - [`fs`]: the file-system environment's on-"disk" format, read through
//!   its block window at `DISKMAP`.
//! - [`exec`]: the in-place image replacement behind the `exec` system call,
//!   and [`create_env`] for boot-time environments.
//!
//! Image bytes are only ever read through [`ImageSource`], so the loader
//! never has to switch into the file-system environment's address space.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod elf;
pub mod exec;
pub mod fs;
mod image;

pub use crate::exec::{ExecError, create_env, exec, replace_image};
pub use crate::fs::{FsFile, FsImage};
pub use crate::image::ImageSource;
