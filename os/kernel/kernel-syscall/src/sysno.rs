/// System call numbers, as passed in `eax`.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Sysno {
    /// Write a string to the console.
    Cputs = 0,
    /// Read one character from the console, zero if none is waiting.
    Cgetc,
    GetEnvId,
    EnvDestroy,
    PageAlloc,
    PageMap,
    PageUnmap,
    Exofork,
    EnvSetStatus,
    EnvSetTrapframe,
    EnvSetExceptionUpcall,
    EnvSetExceptionHandler,
    Yield,
    IpcTrySend,
    IpcRecv,
    Exec,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("unknown system call {0}")]
pub struct UnknownSyscall(pub u32);

impl Sysno {
    pub const ALL: [Self; 16] = [
        Self::Cputs,
        Self::Cgetc,
        Self::GetEnvId,
        Self::EnvDestroy,
        Self::PageAlloc,
        Self::PageMap,
        Self::PageUnmap,
        Self::Exofork,
        Self::EnvSetStatus,
        Self::EnvSetTrapframe,
        Self::EnvSetExceptionUpcall,
        Self::EnvSetExceptionHandler,
        Self::Yield,
        Self::IpcTrySend,
        Self::IpcRecv,
        Self::Exec,
    ];
}

impl TryFrom<u32> for Sysno {
    type Error = UnknownSyscall;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        usize::try_from(raw)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(UnknownSyscall(raw))
    }
}

impl From<Sysno> for u32 {
    fn from(sysno: Sysno) -> Self {
        sysno as Self
    }
}
