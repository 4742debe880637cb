//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! failures that end up in front of a caller: configuration, I/O, the transport to the
//! instrument and the persistence collaborator.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` when the settings file or environment
//!   overrides cannot be parsed.
//! - **`Configuration`**: Semantic errors in otherwise well-formed settings, caught by
//!   [`Settings::validate`](crate::config::Settings::validate).
//! - **`Io`**: Wraps `std::io::Error`.
//! - **`Transport`**: Failures talking to the instrument (see [`TransportError`]).
//! - **`Persistence`**: Failures of the durable store. These are logged by the ingestion
//!   path and never interrupt acquisition.
//!
//! Malformed frames are *not* errors at this level. The decoder reports them as data on
//! the [`Reading`](crate::protocol::Reading) using [`FrameParseError`].

use thiserror::Error;

pub use crate::protocol::FrameParseError;
pub use crate::transport::TransportError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Top-level error for the EGM-4 host driver.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The configuration sources could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration parsed but contains invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure of the byte transport to the instrument.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The ingestion controller already owns an open connection.
    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    /// An operation required an open connection.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// Serial I/O was requested in a build without serial support.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// Durable storage failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A stored record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_convert() {
        let err: DaqError = TransportError::NotConnected.into();
        assert!(matches!(err, DaqError::Transport(TransportError::NotConnected)));
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DaqError = io.into();
        assert!(matches!(err, DaqError::Io(_)));
    }

    #[test]
    fn configuration_message_is_preserved() {
        let err = DaqError::Configuration("flux.window must be at least 2".into());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: flux.window must be at least 2"
        );
    }
}
