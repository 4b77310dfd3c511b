//! HID transport abstraction.
//!
//! This module provides a unified `HidPort` trait that abstracts over raw
//! HID report I/O:
//!
//! - **Native platforms** (Linux, macOS, Windows): Uses the `hidapi` crate
//! - **Tests**: Scripted mock ports implementing the same trait
//!
//! The protocol layer only ever sees fixed-size reports, so the trait is
//! deliberately small: write one output report, read one input report,
//! plus enough metadata (bus type, reconnect) for the update flow.

#[cfg(feature = "native")]
pub mod native;

use std::time::Duration;

use crate::error::Result;

/// ELAN USB vendor ID.
pub const ELAN_VID: u16 = 0x04F3;

/// Product ID reported by controllers stuck in recovery (boot-code) mode.
pub const RECOVERY_PID: u16 = 0x0732;

/// Output report size: 1 report-ID byte plus 32 command bytes.
///
/// The controller firmware only accepts commands delivered as a full
/// 33-byte report; shorter writes are silently dropped.
pub const OUTPUT_REPORT_LEN: usize = 33;

/// Input report size: 1 report-ID byte plus 64 data bytes.
pub const INPUT_REPORT_LEN: usize = 65;

/// Report ID carried by command (output) reports.
pub const OUTPUT_REPORT_ID: u8 = 0x03;

/// Report ID carried by command responses.
pub const INPUT_REPORT_ID: u8 = 0x02;

/// Report ID of finger touch reports.
pub const FINGER_REPORT_ID: u8 = 0x01;

/// Report ID of pen reports.
pub const PEN_REPORT_ID: u8 = 0x07;

/// Report ID of pen debug reports.
pub const PEN_DEBUG_REPORT_ID: u8 = 0x17;

/// Default command/response timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Host-side bus the HID device hangs off.
///
/// The update flow needs this because SPI-attached controllers drop off
/// the bus after a flash commit and the handle must be reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusType {
    /// I2C-attached HID (`BUS_I2C`).
    I2c,
    /// SPI-attached HID (`BUS_SPI`).
    Spi,
    /// USB-attached HID (`BUS_USB`).
    Usb,
    /// Anything else.
    #[default]
    Unknown,
}

impl BusType {
    /// Map a Linux input bus code to a [`BusType`].
    #[must_use]
    pub fn from_raw(bus: u16) -> Self {
        match bus {
            0x03 => Self::Usb,
            0x18 => Self::I2c,
            0x1C => Self::Spi,
            _ => Self::Unknown,
        }
    }
}

/// Unified port trait for raw HID report I/O.
pub trait HidPort: Send {
    /// Write one output report. `buf` must already carry the report ID.
    fn write_raw(&mut self, buf: &[u8], timeout: Duration) -> Result<()>;

    /// Read one input report into `buf`, returning the number of bytes read.
    ///
    /// Returns [`crate::Error::IoTimeout`] when nothing arrives in time.
    fn read_raw(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Bus the device is attached over.
    fn bus_type(&self) -> BusType;

    /// Human-readable device name (path or product string).
    fn name(&self) -> &str;

    /// Reopen the device after a reset dropped the handle.
    fn reconnect(&mut self) -> Result<()>;
}

#[cfg(feature = "native")]
pub use native::NativeHidPort;
