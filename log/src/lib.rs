mod ring;

pub use ring::{DiagLog, LOG_CAPACITY};
