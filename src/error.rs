use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("Unsupported system: {0}")]
    UnsupportedSystem(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl GpioError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        GpioError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, GpioError::InvalidArgument(_))
    }
}
