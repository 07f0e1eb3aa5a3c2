use crate::driver::FilesystemDriver;
use crate::error::FsError;
use fsctx_log::DiagLog;
use std::sync::Arc;

/// One parameter as submitted by the caller, borrowing the owned copies made
/// at the entry point.
#[derive(Debug, Clone, Copy)]
pub struct FsParam<'a> {
    pub key: &'a str,
    pub value: ParamValue<'a>,
}

#[derive(Debug, Clone, Copy)]
pub enum ParamValue<'a> {
    Flag,
    Text(&'a str),
    Blob(&'a [u8]),
}

/// Parameters a context accumulates between construction and trigger.
#[derive(Debug, Default)]
pub struct MountParams {
    pub source: Option<String>,
    pub options: Vec<MountOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOption {
    pub key: String,
    pub value: OptionValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Flag,
    Text(String),
    Blob(Vec<u8>),
}

/// Route one parameter: the `source` text key has a dedicated setter, every
/// other key goes to the driver's parser. Neither path touches the phase.
pub(crate) fn apply_param(
    driver: &dyn FilesystemDriver,
    params: &mut MountParams,
    log: &Arc<DiagLog>,
    param: FsParam<'_>,
) -> Result<(), FsError> {
    if param.key == "source"
        && let ParamValue::Text(source) = param.value
    {
        return set_source(params, source);
    }
    driver.parse_param(params, log, param)
}

fn set_source(params: &mut MountParams, source: &str) -> Result<(), FsError> {
    if params.source.is_some() {
        return Err(FsError::InvalidArgument("source is already set".into()));
    }
    params.source = Some(source.to_owned());
    Ok(())
}
