mod service;
mod table;
mod types;

pub use service::MountApi;
pub use table::{ContextFile, ContextTable};
pub use types::{
    AT_FDCWD, Caller, ConfigCommand, LookupFlags, OpenFlags, PathResolver, PickFlags,
    ResolvedLocation,
};
