use crate::error::FsError;
use crate::options::{FsParam, MountParams};
use fsctx_log::DiagLog;
use std::collections::HashMap;
use std::sync::Arc;

/// A filesystem type implementation. Hooks run under the owning context's
/// exclusive lock and must not block. Diagnostics go to the context log; a
/// driver may clone the handle and keep writing after the context is gone.
pub trait FilesystemDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare a fresh parameter bag. `root` is the existing superblock for
    /// reconfiguration contexts. The default leaves the bag untouched, for
    /// drivers without per-context setup.
    fn init_context(
        &self,
        params: &mut MountParams,
        root: Option<&SuperBlock>,
    ) -> Result<(), FsError> {
        let _ = (params, root);
        Ok(())
    }

    /// Interpret one parameter that did not take the source fast path.
    fn parse_param(
        &self,
        params: &mut MountParams,
        log: &Arc<DiagLog>,
        param: FsParam<'_>,
    ) -> Result<(), FsError>;

    /// Build the filesystem instance from the accumulated parameters.
    fn create_tree(
        &self,
        params: &mut MountParams,
        log: &Arc<DiagLog>,
    ) -> Result<Arc<SuperBlock>, FsError>;

    /// Apply the accumulated parameters to an existing superblock.
    fn reconfigure(
        &self,
        root: &SuperBlock,
        params: &mut MountParams,
        log: &Arc<DiagLog>,
    ) -> Result<(), FsError> {
        let _ = (root, params, log);
        Err(FsError::Unsupported(format!(
            "{} does not support reconfiguration",
            self.name()
        )))
    }

    fn supports_reconfigure(&self) -> bool {
        false
    }
}

/// An instantiated filesystem, as produced by a create trigger or resolved
/// from an existing mount.
pub struct SuperBlock {
    driver: Arc<dyn FilesystemDriver>,
    source: Option<String>,
}

impl SuperBlock {
    pub fn new(driver: Arc<dyn FilesystemDriver>, source: Option<String>) -> Self {
        Self { driver, source }
    }

    pub fn driver(&self) -> &Arc<dyn FilesystemDriver> {
        &self.driver
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn supports_reconfigure(&self) -> bool {
        self.driver.supports_reconfigure()
    }
}

/// Lookup service mapping driver names to implementations. Injected so the
/// configuration core never reaches for process-global state.
pub trait DriverRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Arc<dyn FilesystemDriver>>;
}

/// Plain table-backed registry.
#[derive(Default)]
pub struct DriverTable {
    drivers: HashMap<String, Arc<dyn FilesystemDriver>>,
}

impl DriverTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn FilesystemDriver>) {
        self.drivers.insert(driver.name().to_owned(), driver);
    }
}

impl DriverRegistry for DriverTable {
    fn lookup(&self, name: &str) -> Option<Arc<dyn FilesystemDriver>> {
        self.drivers.get(name).cloned()
    }
}

/// Security-module hook consulted when a context is allocated or
/// re-initialized.
pub trait SecurityPolicy: Send + Sync {
    fn context_alloc(
        &self,
        driver: &dyn FilesystemDriver,
        root: Option<&SuperBlock>,
    ) -> Result<(), FsError>;
}

/// Policy that admits every context.
pub struct PermitAll;

impl SecurityPolicy for PermitAll {
    fn context_alloc(
        &self,
        _driver: &dyn FilesystemDriver,
        _root: Option<&SuperBlock>,
    ) -> Result<(), FsError> {
        Ok(())
    }
}
