//! Error types for elanflash.

use std::io;
use thiserror::Error;

/// Result type for elanflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for elanflash operations.
///
/// Each variant maps to a stable numeric kind via [`Error::code`] so that
/// callers can report machine-readable failure codes alongside the message.
#[derive(Debug, Error)]
pub enum Error {
    /// A command or request was built with out-of-range parameters.
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// Device did not respond within the allotted timeout.
    #[error("I/O timeout: {0}")]
    IoTimeout(String),

    /// Transport-level read or write failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Response bytes did not match the expected pattern.
    #[error("Unexpected response pattern: {0}")]
    DataPattern(String),

    /// Read-back data did not match what was written or expected.
    #[error("Data mismatch: expected {expected:#06x}, got {actual:#06x}")]
    DataMismatched {
        /// Expected value.
        expected: u32,
        /// Value actually observed.
        actual: u32,
    },

    /// No matching touch controller was found on the host.
    #[error("Touch device not found")]
    DeviceNotFound,

    /// Hello packet did not match any known controller generation.
    #[error("Unknown device type (hello code {0:#04x})")]
    UnknownDeviceType(u8),

    /// Firmware file does not exist.
    #[error("Firmware file not found: {0}")]
    FileNotFound(String),

    /// Firmware file I/O failure.
    #[error("File I/O error: {0}")]
    FileIo(#[from] io::Error),

    /// HID interface could not be opened.
    #[error("No usable HID interface: {0}")]
    NoInterface(String),
}

impl Error {
    /// Numeric error kind, stable across releases.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::IoTimeout(_) => 0x0003,
            Self::DataPattern(_) => 0x0005,
            Self::NoInterface(_) => 0x0006,
            Self::InvalidParam(_) => 0x0008,
            Self::Io(_) => 0x0009,
            Self::DataMismatched { .. } => 0x000A,
            Self::DeviceNotFound => 0x0104,
            Self::FileNotFound(_) => 0x0105,
            Self::FileIo(_) => 0x0107,
            Self::UnknownDeviceType(_) => 0x010F,
        }
    }

    /// Whether this error is transient and worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::IoTimeout(_) | Self::Io(_))
    }
}
