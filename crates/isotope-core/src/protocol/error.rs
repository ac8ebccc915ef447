//! Protocol errors

use thiserror::Error;

use crate::firmware::FirmwareVersion;
use crate::port::Capability;

/// Errors raised by the communication engine and the port drivers.
///
/// Device error codes, malformed replies and response timeouts are not
/// errors in this sense: they come back as a [`Reply`](super::Reply) with an
/// errored status so control loops can keep running.
#[derive(Error, Debug)]
pub enum IsotopeError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Not connected to the Isotope board")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("No Isotope board found: {0}")]
    BoardNotFound(String),

    #[error("Wrong firmware format: {0}")]
    InvalidFirmwareFormat(String),

    #[error("Requires minimum firmware v{required}, board firmware is v{found}")]
    IncompatibleFirmware {
        required: FirmwareVersion,
        found: FirmwareVersion,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid {capability} port ID {index}, valid values are 0..{len}")]
    PortOutOfRange {
        capability: Capability,
        index: usize,
        len: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IsotopeError {
    /// True for failures of the physical link (port missing, closed, I/O).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IsotopeError::SerialError(_)
                | IsotopeError::NotConnected
                | IsotopeError::ConnectionFailed(_)
                | IsotopeError::IoError(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IsotopeError>;
