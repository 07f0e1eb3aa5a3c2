use crate::context::ContextPhase;
use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("no filesystem driver named {0}")]
    UnknownDriver(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("context busy in phase {0}")]
    Busy(ContextPhase),

    #[error("{0} exceeds the {1} byte limit")]
    TooLarge(&'static str, usize),

    #[error("diagnostic message larger than the supplied buffer")]
    MessageTooLarge,

    #[error("descriptor {0} is not a mount configuration context")]
    BadDescriptor(u32),

    #[error("value buffer shorter than its declared length")]
    Fault,

    #[error("interrupted while waiting for the context lock")]
    Interrupted,

    #[error("no diagnostic data available")]
    NoData,
}

impl FsError {
    /// Errno a syscall-shaped caller would see for this error.
    pub fn errno(&self) -> Errno {
        match self {
            FsError::PermissionDenied => Errno::EPERM,
            FsError::InvalidArgument(_) => Errno::EINVAL,
            FsError::AllocationFailed(_) => Errno::ENOMEM,
            FsError::UnknownDriver(_) => Errno::ENODEV,
            FsError::NotFound(_) => Errno::ENOENT,
            FsError::Unsupported(_) => Errno::EOPNOTSUPP,
            FsError::Busy(_) => Errno::EBUSY,
            FsError::TooLarge(_, _) => Errno::E2BIG,
            FsError::MessageTooLarge => Errno::EMSGSIZE,
            FsError::BadDescriptor(_) => Errno::EBADF,
            FsError::Fault => Errno::EFAULT,
            FsError::Interrupted => Errno::EINTR,
            FsError::NoData => Errno::ENODATA,
        }
    }
}
