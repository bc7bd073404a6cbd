use kernel_vmem::VmemError;

pub const E_BAD_ENV: i32 = 2;
pub const E_INVAL: i32 = 3;
pub const E_NO_MEM: i32 = 4;
pub const E_NO_FREE_ENV: i32 = 5;
pub const E_FAULT: i32 = 6;
pub const E_IPC_NOT_RECV: i32 = 7;
pub const E_NOT_EXEC: i32 = 14;

/// Errors a system call can report back to user space.
///
/// On the ABI each kind travels as a negative number, see
/// [`code`](Self::code).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("bad environment")]
    BadEnvironment,
    #[error("invalid parameter")]
    InvalidArgument,
    #[error("out of memory")]
    OutOfMemory,
    #[error("out of environments")]
    ResourceExhausted,
    #[error("env is not recving")]
    IpcNotReceiving,
    #[error("file is not a valid executable")]
    InvalidImage,
    #[error("bad user address")]
    Faulted,
}

impl KernelError {
    /// The negative ABI return value.
    #[must_use]
    pub const fn code(self) -> i32 {
        let code = match self {
            Self::BadEnvironment => E_BAD_ENV,
            Self::InvalidArgument => E_INVAL,
            Self::OutOfMemory => E_NO_MEM,
            Self::ResourceExhausted => E_NO_FREE_ENV,
            Self::IpcNotReceiving => E_IPC_NOT_RECV,
            Self::InvalidImage => E_NOT_EXEC,
            Self::Faulted => E_FAULT,
        };
        -code
    }

    /// The error a negative ABI return value stands for, if any.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code.wrapping_neg() {
            E_BAD_ENV => Self::BadEnvironment,
            E_INVAL => Self::InvalidArgument,
            E_NO_MEM => Self::OutOfMemory,
            E_NO_FREE_ENV => Self::ResourceExhausted,
            E_IPC_NOT_RECV => Self::IpcNotReceiving,
            E_NOT_EXEC => Self::InvalidImage,
            E_FAULT => Self::Faulted,
            _ => return None,
        })
    }
}

/// Address-space failures as seen through a system call: everything but
/// memory exhaustion is a bad argument.
impl From<VmemError> for KernelError {
    fn from(e: VmemError) -> Self {
        match e {
            VmemError::OutOfMemory => Self::OutOfMemory,
            VmemError::InvalidAddress(_)
            | VmemError::InvalidPermissions(_)
            | VmemError::NotMapped(_)
            | VmemError::PermissionDenied(_) => Self::InvalidArgument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for e in [
            KernelError::BadEnvironment,
            KernelError::InvalidArgument,
            KernelError::OutOfMemory,
            KernelError::ResourceExhausted,
            KernelError::IpcNotReceiving,
            KernelError::InvalidImage,
            KernelError::Faulted,
        ] {
            assert!(e.code() < 0);
            assert_eq!(KernelError::from_code(e.code()), Some(e));
        }
        assert_eq!(KernelError::from_code(0), None);
        assert_eq!(KernelError::from_code(-1), None);
        assert_eq!(KernelError::InvalidImage.code(), -14);
    }
}
