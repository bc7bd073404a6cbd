use crate::EnvId;
use kernel_info::env::NEXCEPTIONS;
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::TrapFrame;
use kernel_vmem::{AddressSpace, PagePermissions};

/// Scheduling state of an environment slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum EnvStatus {
    Free = 0,
    Dying = 1,
    Runnable = 2,
    Running = 3,
    NotRunnable = 4,
}

impl EnvStatus {
    /// Decode an ABI status value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Free,
            1 => Self::Dying,
            2 => Self::Runnable,
            3 => Self::Running,
            4 => Self::NotRunnable,
            _ => return None,
        })
    }
}

/// Well-known role tag.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[repr(u32)]
pub enum EnvType {
    #[default]
    User = 0,
    /// The file-system server; exec reads images out of its block window.
    FileSystem = 1,
}

/// Pending-receive bookkeeping, owned by the receiver.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct IpcState {
    /// Blocked in `ipc_recv` and not yet claimed by a sender.
    pub receiving: bool,
    /// Where a transferred page goes; `None` if no page is wanted.
    pub dstva: Option<VirtualAddress>,
    /// Value from the last successful send.
    pub value: u32,
    /// Sender of the last successful send.
    pub from: Option<EnvId>,
    /// Permissions of the transferred page, if one was transferred.
    pub perm: Option<PagePermissions>,
}

/// One environment.
pub struct Env {
    pub(crate) id: EnvId,
    pub(crate) parent: EnvId,
    pub(crate) ty: EnvType,
    pub(crate) status: EnvStatus,
    pub(crate) runs: u32,
    pub(crate) frame: TrapFrame,
    pub(crate) space: AddressSpace,
    pub(crate) exception_upcall: Option<VirtualAddress>,
    pub(crate) handlers: [Option<VirtualAddress>; NEXCEPTIONS],
    pub(crate) ipc: IpcState,
}

impl Env {
    pub(crate) fn new(id: EnvId, parent: EnvId, space: AddressSpace, frame: TrapFrame) -> Self {
        Self {
            id,
            parent,
            ty: EnvType::User,
            status: EnvStatus::NotRunnable,
            runs: 0,
            frame,
            space,
            exception_upcall: None,
            handlers: [None; NEXCEPTIONS],
            ipc: IpcState::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> EnvId {
        self.id
    }

    /// Creator of record; `EnvId::CURRENT` for boot-time environments.
    #[must_use]
    pub const fn parent(&self) -> EnvId {
        self.parent
    }

    #[must_use]
    pub const fn env_type(&self) -> EnvType {
        self.ty
    }

    #[must_use]
    pub const fn status(&self) -> EnvStatus {
        self.status
    }

    /// Times this environment has been dispatched.
    #[must_use]
    pub const fn runs(&self) -> u32 {
        self.runs
    }

    #[must_use]
    pub const fn trap_frame(&self) -> &TrapFrame {
        &self.frame
    }

    #[must_use]
    pub const fn address_space(&self) -> &AddressSpace {
        &self.space
    }

    #[must_use]
    pub const fn exception_upcall(&self) -> Option<VirtualAddress> {
        self.exception_upcall
    }

    #[must_use]
    pub const fn exception_handlers(&self) -> &[Option<VirtualAddress>; NEXCEPTIONS] {
        &self.handlers
    }

    #[must_use]
    pub const fn ipc(&self) -> &IpcState {
        &self.ipc
    }
}
