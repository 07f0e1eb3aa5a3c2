use bitflags::bitflags;
use fsctx_core::{FsError, SuperBlock};
use std::sync::Arc;

/// Directory-descriptor value meaning "relative to the current directory".
pub const AT_FDCWD: i64 = nix::libc::AT_FDCWD as i64;

bitflags! {
    /// Flags accepted when opening a context for a new mount.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const CLOEXEC = 0x0000_0001;
    }

    /// Flags accepted when picking an existing mount for reconfiguration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PickFlags: u32 {
        const CLOEXEC          = 0x0000_0001;
        const SYMLINK_NOFOLLOW = 0x0000_0002;
        const NO_AUTOMOUNT     = 0x0000_0004;
        const EMPTY_PATH       = 0x0000_0008;
    }

    /// Name-resolution behavior handed to the path resolver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LookupFlags: u32 {
        const FOLLOW    = 0x0000_0001;
        const AUTOMOUNT = 0x0000_0002;
        const EMPTY     = 0x0000_0004;
    }
}

/// Commands understood by the configure entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    SetFlag,
    SetString,
    SetBinary,
    SetPath,
    SetPathEmpty,
    SetFd,
    Create,
    Reconfigure,
}

impl ConfigCommand {
    /// Decode the raw command word. Unknown values are not an error here so
    /// the caller can report them as unsupported rather than malformed.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::SetFlag),
            1 => Some(Self::SetString),
            2 => Some(Self::SetBinary),
            3 => Some(Self::SetPath),
            4 => Some(Self::SetPathEmpty),
            5 => Some(Self::SetFd),
            6 => Some(Self::Create),
            7 => Some(Self::Reconfigure),
            _ => None,
        }
    }
}

/// Identity of the caller invoking an entry point, as established by the
/// surrounding environment. Entry points consult only the
/// mount-administration capability.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    admin: bool,
}

impl Caller {
    /// A caller holding mount administration rights in its namespace.
    pub fn privileged() -> Self {
        Self { admin: true }
    }

    pub fn unprivileged() -> Self {
        Self { admin: false }
    }

    pub fn may_admin_mounts(&self) -> bool {
        self.admin
    }
}

/// Name resolution, supplied by the surrounding environment.
pub trait PathResolver: Send + Sync {
    fn resolve(
        &self,
        dfd: i64,
        path: &str,
        flags: LookupFlags,
    ) -> Result<ResolvedLocation, FsError>;
}

/// Outcome of a successful resolution: the superblock holding the resolved
/// object. Dropped exactly once by whoever ends up owning it.
pub struct ResolvedLocation {
    pub superblock: Arc<SuperBlock>,
}
