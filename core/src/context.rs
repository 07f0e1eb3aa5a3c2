use crate::driver::{FilesystemDriver, SecurityPolicy, SuperBlock};
use crate::error::FsError;
use crate::interrupt::Interrupt;
use crate::options::{self, FsParam, MountParams};
use fsctx_log::DiagLog;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Position of a context in its configuration life cycle. Gates which
/// operations are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
    /// Accepting parameters for a new mount.
    CreateParams,
    /// The create trigger is running.
    Creating,
    /// The filesystem instance exists and awaits attachment.
    AwaitingMount,
    /// Accepting parameters for a reconfiguration.
    ReconfParams,
    /// A reconfiguration completed; the next parameter re-arms the context.
    AwaitingReconf,
    /// A collaborator failed; only release is left.
    Failed,
}

impl fmt::Display for ContextPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextPhase::CreateParams => write!(f, "create-params"),
            ContextPhase::Creating => write!(f, "creating"),
            ContextPhase::AwaitingMount => write!(f, "awaiting-mount"),
            ContextPhase::ReconfParams => write!(f, "reconfigure-params"),
            ContextPhase::AwaitingReconf => write!(f, "awaiting-reconfigure"),
            ContextPhase::Failed => write!(f, "failed"),
        }
    }
}

/// What a context was opened for. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPurpose {
    NewMount,
    Reconfigure,
}

#[derive(Clone, Copy)]
enum ContextOp {
    SetParam,
    TriggerCreate,
    TriggerReconfigure,
}

/// Single source of truth for which operations each phase admits. A pair
/// absent here fails busy; `AwaitingReconf` admits parameters only through
/// re-initialization.
const fn op_allowed(phase: ContextPhase, op: ContextOp) -> bool {
    matches!(
        (phase, op),
        (ContextPhase::CreateParams, ContextOp::SetParam)
            | (ContextPhase::CreateParams, ContextOp::TriggerCreate)
            | (ContextPhase::ReconfParams, ContextOp::SetParam)
            | (ContextPhase::ReconfParams, ContextOp::TriggerReconfigure)
            | (ContextPhase::AwaitingReconf, ContextOp::SetParam)
    )
}

/// Mutable half of a context, only reachable through the exclusive lock.
pub struct ContextState {
    phase: ContextPhase,
    params: MountParams,
    tree: Option<Arc<SuperBlock>>,
}

impl ContextState {
    pub fn phase(&self) -> ContextPhase {
        self.phase
    }

    pub fn params(&self) -> &MountParams {
        &self.params
    }

    pub fn built_tree(&self) -> Option<&Arc<SuperBlock>> {
        self.tree.as_ref()
    }
}

/// An in-progress mount creation or reconfiguration, shared between its
/// descriptor binding and any in-flight operation.
pub struct FsContext {
    purpose: ContextPurpose,
    driver: Arc<dyn FilesystemDriver>,
    root: Option<Arc<SuperBlock>>,
    log: Arc<DiagLog>,
    security: Arc<dyn SecurityPolicy>,
    state: Mutex<ContextState>,
}

impl std::fmt::Debug for FsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsContext")
            .field("purpose", &self.purpose)
            .field("root", &self.root.is_some())
            .finish_non_exhaustive()
    }
}

impl FsContext {
    /// Build a context for creating a new mount of `driver`'s type.
    pub fn for_new_mount(
        driver: Arc<dyn FilesystemDriver>,
        security: Arc<dyn SecurityPolicy>,
    ) -> Result<Self, FsError> {
        Self::new(driver, None, ContextPurpose::NewMount, security)
    }

    /// Build a context for reconfiguring the mount rooted at `root`.
    pub fn for_reconfigure(
        root: Arc<SuperBlock>,
        security: Arc<dyn SecurityPolicy>,
    ) -> Result<Self, FsError> {
        let driver = root.driver().clone();
        Self::new(driver, Some(root), ContextPurpose::Reconfigure, security)
    }

    fn new(
        driver: Arc<dyn FilesystemDriver>,
        root: Option<Arc<SuperBlock>>,
        purpose: ContextPurpose,
        security: Arc<dyn SecurityPolicy>,
    ) -> Result<Self, FsError> {
        let mut params = MountParams::default();
        driver.init_context(&mut params, root.as_deref())?;
        security.context_alloc(driver.as_ref(), root.as_deref())?;
        let phase = match purpose {
            ContextPurpose::NewMount => ContextPhase::CreateParams,
            ContextPurpose::Reconfigure => ContextPhase::ReconfParams,
        };
        Ok(Self {
            purpose,
            driver,
            root,
            log: Arc::new(DiagLog::new()),
            security,
            state: Mutex::new(ContextState {
                phase,
                params,
                tree: None,
            }),
        })
    }

    pub fn purpose(&self) -> ContextPurpose {
        self.purpose
    }

    pub fn driver(&self) -> &Arc<dyn FilesystemDriver> {
        &self.driver
    }

    pub fn log(&self) -> &Arc<DiagLog> {
        &self.log
    }

    pub fn root(&self) -> Option<&Arc<SuperBlock>> {
        self.root.as_ref()
    }

    /// Take the exclusive lock, giving up with `Interrupted` if `intr` fires
    /// first. Once acquired, the lock is held to the end of the operation.
    pub async fn lock_uapi(
        &self,
        intr: &Interrupt,
    ) -> Result<MutexGuard<'_, ContextState>, FsError> {
        tokio::select! {
            guard = self.state.lock() => Ok(guard),
            _ = intr.fired() => Err(FsError::Interrupted),
        }
    }

    /// Phase snapshot for observers that do not already hold the lock.
    pub async fn current_phase(&self) -> ContextPhase {
        self.state.lock().await.phase
    }

    /// The superblock built by a successful create trigger, for hand-off to
    /// mount attachment.
    pub async fn built_tree(&self) -> Option<Arc<SuperBlock>> {
        self.state.lock().await.tree.clone()
    }

    /// Apply one parameter. Legal while the context accepts parameters; a
    /// context idling after a reconfiguration is re-initialized first.
    pub async fn set_param(&self, param: FsParam<'_>, intr: &Interrupt) -> Result<(), FsError> {
        let mut st = self.lock_uapi(intr).await?;
        if st.phase == ContextPhase::AwaitingReconf {
            self.reinitialize(&mut st)?;
        }
        if !op_allowed(st.phase, ContextOp::SetParam) {
            return Err(FsError::Busy(st.phase));
        }
        tracing::debug!("{}: parameter {:?}", self.driver.name(), param.key);
        options::apply_param(self.driver.as_ref(), &mut st.params, &self.log, param)
    }

    /// Run the create action, moving the context to `AwaitingMount` on
    /// success and `Failed` on error.
    pub async fn trigger_create(&self, intr: &Interrupt) -> Result<(), FsError> {
        let mut st = self.lock_uapi(intr).await?;
        if !op_allowed(st.phase, ContextOp::TriggerCreate) {
            return Err(FsError::Busy(st.phase));
        }
        st.phase = ContextPhase::Creating;
        tracing::debug!("{}: creating filesystem tree", self.driver.name());
        match self.driver.create_tree(&mut st.params, &self.log) {
            Ok(tree) => {
                st.tree = Some(tree);
                st.phase = ContextPhase::AwaitingMount;
                Ok(())
            }
            Err(err) => {
                tracing::warn!("{}: create failed: {}", self.driver.name(), err);
                st.phase = ContextPhase::Failed;
                Err(err)
            }
        }
    }

    /// Run the reconfigure action against the picked root, returning the
    /// context to `AwaitingReconf` for a future cycle.
    pub async fn trigger_reconfigure(&self, intr: &Interrupt) -> Result<(), FsError> {
        let mut st = self.lock_uapi(intr).await?;
        if !op_allowed(st.phase, ContextOp::TriggerReconfigure) {
            return Err(FsError::Busy(st.phase));
        }
        let Some(root) = self.root.as_deref() else {
            return Err(FsError::Unsupported(
                "context has no superblock to reconfigure".into(),
            ));
        };
        tracing::debug!("{}: reconfiguring", self.driver.name());
        match self.driver.reconfigure(root, &mut st.params, &self.log) {
            Ok(()) => {
                st.phase = ContextPhase::AwaitingReconf;
                Ok(())
            }
            Err(err) => {
                tracing::warn!("{}: reconfigure failed: {}", self.driver.name(), err);
                st.phase = ContextPhase::Failed;
                Err(err)
            }
        }
    }

    /// Driver re-init and security re-check before a context that finished a
    /// reconfiguration accepts new parameters.
    fn reinitialize(&self, st: &mut ContextState) -> Result<(), FsError> {
        let root = self.root.as_deref();
        st.params = MountParams::default();
        if let Err(err) = self.driver.init_context(&mut st.params, root) {
            st.phase = ContextPhase::Failed;
            return Err(err);
        }
        // Security runs last: re-initialization may change what the context
        // subscribes to.
        if let Err(err) = self.security.context_alloc(self.driver.as_ref(), root) {
            st.phase = ContextPhase::Failed;
            return Err(err);
        }
        st.phase = ContextPhase::ReconfParams;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::PermitAll;
    use crate::options::{MountOption, OptionValue, ParamValue};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeDriver {
        fail_create: bool,
        fail_init: AtomicBool,
        init_calls: AtomicUsize,
        parse_calls: AtomicUsize,
        reconf_calls: AtomicUsize,
    }

    impl FilesystemDriver for FakeDriver {
        fn name(&self) -> &str {
            "fakefs"
        }

        fn init_context(
            &self,
            _params: &mut MountParams,
            _root: Option<&SuperBlock>,
        ) -> Result<(), FsError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(FsError::AllocationFailed("fakefs context".into()));
            }
            Ok(())
        }

        fn parse_param(
            &self,
            params: &mut MountParams,
            log: &Arc<DiagLog>,
            param: FsParam<'_>,
        ) -> Result<(), FsError> {
            self.parse_calls.fetch_add(1, Ordering::SeqCst);
            let value = match param.value {
                ParamValue::Flag => OptionValue::Flag,
                ParamValue::Text(s) => OptionValue::Text(s.to_owned()),
                ParamValue::Blob(b) => OptionValue::Blob(b.to_vec()),
            };
            params.options.push(MountOption {
                key: param.key.to_owned(),
                value,
            });
            log.info(format!("applied {}", param.key));
            Ok(())
        }

        fn create_tree(
            &self,
            params: &mut MountParams,
            log: &Arc<DiagLog>,
        ) -> Result<Arc<SuperBlock>, FsError> {
            if self.fail_create {
                log.error("fakefs is out of space");
                return Err(FsError::AllocationFailed("no space".into()));
            }
            Ok(Arc::new(SuperBlock::new(
                Arc::new(FakeDriver::default()),
                params.source.clone(),
            )))
        }

        fn reconfigure(
            &self,
            _root: &SuperBlock,
            _params: &mut MountParams,
            log: &Arc<DiagLog>,
        ) -> Result<(), FsError> {
            self.reconf_calls.fetch_add(1, Ordering::SeqCst);
            log.info("reconfigured");
            Ok(())
        }

        fn supports_reconfigure(&self) -> bool {
            true
        }
    }

    struct DenyAll;

    impl SecurityPolicy for DenyAll {
        fn context_alloc(
            &self,
            _driver: &dyn FilesystemDriver,
            _root: Option<&SuperBlock>,
        ) -> Result<(), FsError> {
            Err(FsError::PermissionDenied)
        }
    }

    fn flag(key: &str) -> FsParam<'_> {
        FsParam {
            key,
            value: ParamValue::Flag,
        }
    }

    fn new_mount(driver: &Arc<FakeDriver>) -> FsContext {
        FsContext::for_new_mount(driver.clone(), Arc::new(PermitAll)).unwrap()
    }

    fn reconf(driver: &Arc<FakeDriver>) -> FsContext {
        let root = Arc::new(SuperBlock::new(driver.clone(), None));
        FsContext::for_reconfigure(root, Arc::new(PermitAll)).unwrap()
    }

    #[tokio::test]
    async fn create_flow_reaches_awaiting_mount() {
        let driver = Arc::new(FakeDriver::default());
        let ctx = new_mount(&driver);
        let intr = Interrupt::new();

        assert_eq!(ctx.purpose(), ContextPurpose::NewMount);
        assert_eq!(ctx.current_phase().await, ContextPhase::CreateParams);

        ctx.set_param(flag("ro"), &intr).await.unwrap();
        ctx.trigger_create(&intr).await.unwrap();

        assert_eq!(ctx.current_phase().await, ContextPhase::AwaitingMount);
        assert!(ctx.built_tree().await.is_some());

        let err = ctx.set_param(flag("noatime"), &intr).await.unwrap_err();
        assert!(matches!(err, FsError::Busy(ContextPhase::AwaitingMount)));
        assert_eq!(ctx.current_phase().await, ContextPhase::AwaitingMount);
    }

    #[tokio::test]
    async fn failed_create_is_terminal() {
        let driver = Arc::new(FakeDriver {
            fail_create: true,
            ..FakeDriver::default()
        });
        let ctx = new_mount(&driver);
        let intr = Interrupt::new();

        let err = ctx.trigger_create(&intr).await.unwrap_err();
        assert!(matches!(err, FsError::AllocationFailed(_)));
        assert_eq!(ctx.current_phase().await, ContextPhase::Failed);
        assert_eq!(ctx.log().pop_front().as_deref(), Some("e fakefs is out of space"));

        let err = ctx.set_param(flag("ro"), &intr).await.unwrap_err();
        assert!(matches!(err, FsError::Busy(ContextPhase::Failed)));
        let err = ctx.trigger_create(&intr).await.unwrap_err();
        assert!(matches!(err, FsError::Busy(ContextPhase::Failed)));
    }

    #[tokio::test]
    async fn triggers_respect_the_context_purpose() {
        let driver = Arc::new(FakeDriver::default());
        let intr = Interrupt::new();

        let create_ctx = new_mount(&driver);
        let err = create_ctx.trigger_reconfigure(&intr).await.unwrap_err();
        assert!(matches!(err, FsError::Busy(ContextPhase::CreateParams)));

        let reconf_ctx = reconf(&driver);
        let err = reconf_ctx.trigger_create(&intr).await.unwrap_err();
        assert!(matches!(err, FsError::Busy(ContextPhase::ReconfParams)));
    }

    #[tokio::test]
    async fn reconfigure_cycle_reinitializes_before_new_params() {
        let driver = Arc::new(FakeDriver::default());
        let ctx = reconf(&driver);
        let intr = Interrupt::new();

        assert_eq!(driver.init_calls.load(Ordering::SeqCst), 1);

        ctx.set_param(flag("ro"), &intr).await.unwrap();
        ctx.trigger_reconfigure(&intr).await.unwrap();
        assert_eq!(ctx.current_phase().await, ContextPhase::AwaitingReconf);
        assert_eq!(driver.reconf_calls.load(Ordering::SeqCst), 1);

        // A trigger straight out of the idle phase is illegal until a
        // parameter has re-armed the context.
        let err = ctx.trigger_reconfigure(&intr).await.unwrap_err();
        assert!(matches!(err, FsError::Busy(ContextPhase::AwaitingReconf)));

        ctx.set_param(flag("noatime"), &intr).await.unwrap();
        assert_eq!(ctx.current_phase().await, ContextPhase::ReconfParams);
        assert_eq!(driver.init_calls.load(Ordering::SeqCst), 2);

        // Re-initialization handed the driver a clean bag.
        {
            let st = ctx.lock_uapi(&intr).await.unwrap();
            assert_eq!(st.params().options.len(), 1);
            assert_eq!(st.params().options[0].key, "noatime");
        }

        ctx.trigger_reconfigure(&intr).await.unwrap();
        assert_eq!(driver.reconf_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_reinitialization_is_terminal() {
        let driver = Arc::new(FakeDriver::default());
        let ctx = reconf(&driver);
        let intr = Interrupt::new();

        ctx.trigger_reconfigure(&intr).await.unwrap();
        driver.fail_init.store(true, Ordering::SeqCst);

        let err = ctx.set_param(flag("ro"), &intr).await.unwrap_err();
        assert!(matches!(err, FsError::AllocationFailed(_)));
        assert_eq!(ctx.current_phase().await, ContextPhase::Failed);
    }

    #[tokio::test]
    async fn security_denial_blocks_construction() {
        let driver = Arc::new(FakeDriver::default());
        let err = FsContext::for_new_mount(driver, Arc::new(DenyAll)).unwrap_err();
        assert!(matches!(err, FsError::PermissionDenied));
    }

    #[tokio::test]
    async fn fired_interrupt_aborts_the_lock_wait() {
        let driver = Arc::new(FakeDriver::default());
        let ctx = new_mount(&driver);

        let holder = Interrupt::new();
        let _guard = ctx.lock_uapi(&holder).await.unwrap();

        let intr = Interrupt::new();
        intr.fire();
        let err = ctx.set_param(flag("ro"), &intr).await.unwrap_err();
        assert!(matches!(err, FsError::Interrupted));
    }

    #[tokio::test]
    async fn params_accumulate_in_order() {
        let driver = Arc::new(FakeDriver::default());
        let ctx = new_mount(&driver);
        let intr = Interrupt::new();

        ctx.set_param(
            FsParam {
                key: "source",
                value: ParamValue::Text("none"),
            },
            &intr,
        )
        .await
        .unwrap();
        ctx.set_param(
            FsParam {
                key: "mode",
                value: ParamValue::Text("0755"),
            },
            &intr,
        )
        .await
        .unwrap();
        ctx.set_param(flag("ro"), &intr).await.unwrap();

        let st = ctx.lock_uapi(&intr).await.unwrap();
        assert_eq!(st.params().source.as_deref(), Some("none"));
        assert_eq!(
            st.params().options,
            vec![
                MountOption {
                    key: "mode".into(),
                    value: OptionValue::Text("0755".into()),
                },
                MountOption {
                    key: "ro".into(),
                    value: OptionValue::Flag,
                },
            ]
        );
    }
}
