//! # Environment Limits

/// log2 of the maximum number of environments.
pub const LOG2NENV: u32 = 10;

/// Maximum number of environments the table can hold.
pub const NENV: usize = 1 << LOG2NENV;

/// Bit position of the generation counter within an environment id.
pub const ENVGENSHIFT: u32 = 12;

/// Number of hardware exception vectors an environment may install handlers for.
pub const NEXCEPTIONS: usize = 32;

const _: () = {
    assert!(ENVGENSHIFT >= LOG2NENV);
};
