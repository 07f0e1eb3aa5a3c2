use crate::table::ContextTable;
use crate::types::{
    AT_FDCWD, Caller, ConfigCommand, LookupFlags, OpenFlags, PathResolver, PickFlags,
};
use fsctx_core::{
    DriverRegistry, FsContext, FsError, FsParam, Interrupt, ParamValue, SecurityPolicy,
};
use std::sync::Arc;

/// Longest accepted filesystem driver name.
const FS_NAME_MAX: usize = 4096;
/// Longest accepted parameter key.
const KEY_MAX: usize = 256;
/// Longest accepted string parameter value.
const STRING_VALUE_MAX: usize = 256;
/// Largest accepted binary parameter value.
const BINARY_VALUE_MAX: i64 = 1024 * 1024;

/// The externally callable surface: the three syscall-shaped entry points
/// plus the descriptor-level read, close and duplicate operations.
///
/// Collaborators are injected so the surface can be driven against fakes:
/// the registry resolves driver names, the resolver performs name lookup for
/// reconfiguration picks, and the security policy vets context allocation.
pub struct MountApi {
    registry: Arc<dyn DriverRegistry>,
    resolver: Arc<dyn PathResolver>,
    security: Arc<dyn SecurityPolicy>,
    table: ContextTable,
}

impl MountApi {
    pub fn new(
        registry: Arc<dyn DriverRegistry>,
        resolver: Arc<dyn PathResolver>,
        security: Arc<dyn SecurityPolicy>,
    ) -> Self {
        Self {
            registry,
            resolver,
            security,
            table: ContextTable::new(),
        }
    }

    /// Open a named filesystem driver for configuration toward a new mount.
    pub fn fsopen(&self, caller: &Caller, fs_name: &str, flags: u32) -> Result<u32, FsError> {
        if !caller.may_admin_mounts() {
            return Err(FsError::PermissionDenied);
        }
        let flags = OpenFlags::from_bits(flags)
            .ok_or_else(|| FsError::InvalidArgument("unknown fsopen flags".into()))?;
        if fs_name.len() >= FS_NAME_MAX {
            return Err(FsError::TooLarge("filesystem name", FS_NAME_MAX));
        }
        let driver = self
            .registry
            .lookup(fs_name)
            .ok_or_else(|| FsError::UnknownDriver(fs_name.to_owned()))?;
        let context = FsContext::for_new_mount(driver, self.security.clone())?;
        let fd = self
            .table
            .bind(Arc::new(context), flags.contains(OpenFlags::CLOEXEC));
        tracing::debug!("fsopen {} -> fd {}", fs_name, fd);
        Ok(fd)
    }

    /// Pick an existing mount, by path, for reconfiguration.
    pub fn fspick(
        &self,
        caller: &Caller,
        dfd: i64,
        path: &str,
        flags: u32,
    ) -> Result<u32, FsError> {
        if !caller.may_admin_mounts() {
            return Err(FsError::PermissionDenied);
        }
        let flags = PickFlags::from_bits(flags)
            .ok_or_else(|| FsError::InvalidArgument("unknown fspick flags".into()))?;

        let mut lookup = LookupFlags::FOLLOW | LookupFlags::AUTOMOUNT;
        if flags.contains(PickFlags::SYMLINK_NOFOLLOW) {
            lookup.remove(LookupFlags::FOLLOW);
        }
        if flags.contains(PickFlags::NO_AUTOMOUNT) {
            lookup.remove(LookupFlags::AUTOMOUNT);
        }
        if flags.contains(PickFlags::EMPTY_PATH) {
            lookup.insert(LookupFlags::EMPTY);
        }

        let target = self.resolver.resolve(dfd, path, lookup)?;
        if !target.superblock.supports_reconfigure() {
            return Err(FsError::Unsupported(format!(
                "{} does not support reconfiguration",
                target.superblock.driver().name()
            )));
        }
        let context = FsContext::for_reconfigure(target.superblock, self.security.clone())?;
        let fd = self
            .table
            .bind(Arc::new(context), flags.contains(PickFlags::CLOEXEC));
        tracing::debug!("fspick {} -> fd {}", path, fd);
        Ok(fd)
    }

    /// Set a parameter on, or trigger an action against, the context bound
    /// to `fd`. Caller data is copied into owned buffers before the context
    /// lock is taken; the copies are released whatever the outcome.
    pub async fn fsconfig(
        &self,
        fd: u32,
        cmd: u32,
        key: Option<&str>,
        value: Option<&[u8]>,
        aux: i64,
        intr: &Interrupt,
    ) -> Result<(), FsError> {
        let Some(cmd) = ConfigCommand::from_raw(cmd) else {
            return Err(FsError::Unsupported(format!("fsconfig command {cmd}")));
        };
        validate_shape(cmd, key.is_some(), value.is_some(), aux)?;

        let file = self.table.get(fd)?;
        let context = file.context();

        let key = match key {
            Some(k) if k.len() >= KEY_MAX => return Err(FsError::TooLarge("key", KEY_MAX)),
            Some(k) => Some(k.to_owned()),
            None => None,
        };
        let value = copy_value(cmd, value, aux)?;

        match cmd {
            ConfigCommand::SetFlag | ConfigCommand::SetString | ConfigCommand::SetBinary => {
                let Some(key) = key.as_deref() else {
                    return Err(FsError::InvalidArgument("missing parameter key".into()));
                };
                let value = match (cmd, value.as_ref()) {
                    (ConfigCommand::SetFlag, None) => ParamValue::Flag,
                    (ConfigCommand::SetString, Some(CopiedValue::Text(s))) => {
                        ParamValue::Text(s.as_str())
                    }
                    (ConfigCommand::SetBinary, Some(CopiedValue::Blob(b))) => {
                        ParamValue::Blob(b.as_slice())
                    }
                    _ => {
                        return Err(FsError::InvalidArgument(
                            "malformed parameter value".into(),
                        ));
                    }
                };
                context.set_param(FsParam { key, value }, intr).await
            }
            ConfigCommand::SetPath | ConfigCommand::SetPathEmpty => {
                Err(FsError::Unsupported("path-valued parameters".into()))
            }
            ConfigCommand::SetFd => {
                Err(FsError::Unsupported("descriptor-valued parameters".into()))
            }
            ConfigCommand::Create => context.trigger_create(intr).await,
            ConfigCommand::Reconfigure => context.trigger_reconfigure(intr).await,
        }
    }

    /// Drain one diagnostic line from the context bound to `fd`.
    pub async fn read(&self, fd: u32, buf: &mut [u8], intr: &Interrupt) -> Result<usize, FsError> {
        self.table.get(fd)?.read(buf, intr).await
    }

    /// Release the binding for `fd`, dropping its context reference.
    pub fn close(&self, fd: u32) -> Result<(), FsError> {
        tracing::debug!("closing context fd {}", fd);
        self.table.close(fd)
    }

    /// Duplicate `fd`, sharing its context.
    pub fn dup(&self, fd: u32) -> Result<u32, FsError> {
        self.table.dup(fd)
    }

    /// The context bound to `fd`, for hand-off to mount attachment.
    pub fn context(&self, fd: u32) -> Result<Arc<FsContext>, FsError> {
        Ok(self.table.get(fd)?.context().clone())
    }
}

/// Argument-shape rules for each command, checked before any copies or
/// descriptor work.
fn validate_shape(
    cmd: ConfigCommand,
    has_key: bool,
    has_value: bool,
    aux: i64,
) -> Result<(), FsError> {
    let ok = match cmd {
        ConfigCommand::SetFlag => has_key && !has_value && aux == 0,
        ConfigCommand::SetString => has_key && has_value && aux == 0,
        ConfigCommand::SetBinary => has_key && has_value && aux > 0 && aux <= BINARY_VALUE_MAX,
        ConfigCommand::SetPath | ConfigCommand::SetPathEmpty => {
            has_key && has_value && (aux == AT_FDCWD || aux >= 0)
        }
        ConfigCommand::SetFd => has_key && !has_value && aux >= 0,
        ConfigCommand::Create | ConfigCommand::Reconfigure => !has_key && !has_value && aux == 0,
    };
    if ok {
        Ok(())
    } else {
        Err(FsError::InvalidArgument(format!(
            "malformed {cmd:?} arguments"
        )))
    }
}

enum CopiedValue {
    Text(String),
    Blob(Vec<u8>),
}

/// Owned, bounded copy of the caller's value buffer. Path- and fd-valued
/// commands copy nothing; they are rejected at dispatch.
fn copy_value(
    cmd: ConfigCommand,
    value: Option<&[u8]>,
    aux: i64,
) -> Result<Option<CopiedValue>, FsError> {
    match cmd {
        ConfigCommand::SetString => {
            let Some(raw) = value else {
                return Err(FsError::InvalidArgument("missing string value".into()));
            };
            let text = std::str::from_utf8(raw)
                .map_err(|_| FsError::InvalidArgument("string value is not valid UTF-8".into()))?;
            if text.len() >= STRING_VALUE_MAX {
                return Err(FsError::TooLarge("string value", STRING_VALUE_MAX));
            }
            Ok(Some(CopiedValue::Text(text.to_owned())))
        }
        ConfigCommand::SetBinary => {
            let Some(raw) = value else {
                return Err(FsError::InvalidArgument("missing binary value".into()));
            };
            let declared = aux as usize;
            if raw.len() < declared {
                // The caller promised more bytes than it handed over.
                return Err(FsError::Fault);
            }
            Ok(Some(CopiedValue::Blob(raw[..declared].to_vec())))
        }
        _ => Ok(None),
    }
}
