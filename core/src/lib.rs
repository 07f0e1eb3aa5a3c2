mod context;
mod driver;
mod error;
mod interrupt;
mod options;

pub use context::{ContextPhase, ContextPurpose, ContextState, FsContext};
pub use driver::{
    DriverRegistry, DriverTable, FilesystemDriver, PermitAll, SecurityPolicy, SuperBlock,
};
pub use error::FsError;
pub use fsctx_log::{DiagLog, LOG_CAPACITY};
pub use interrupt::Interrupt;
pub use options::{FsParam, MountOption, MountParams, OptionValue, ParamValue};
