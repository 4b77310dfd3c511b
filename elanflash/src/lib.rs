//! # elanflash
//!
//! A library for updating firmware on ELAN HID touch controllers.
//!
//! This crate provides the core functionality for talking to ELAN touch
//! controllers over HID, including:
//!
//! - Mode and generation detection (Gen5/6/7 and Gen8, normal and recovery)
//! - Firmware information and calibration-counter queries
//! - Page-based firmware flashing through the controller's IAP engine
//! - Info-page update metadata (counter and timestamp)
//! - Remark ID gating between image and device
//!
//! ## Supported Buses
//!
//! I2C-HID, SPI-HID and USB, as enumerated by the operating system's HID
//! stack.
//!
//! ## Features
//!
//! - `native` (default): device access via the `hidapi` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use elanflash::{FirmwareFile, TouchFlasher, UpdateOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let firmware = FirmwareFile::open("touch.ekt")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let port = elanflash::NativeHidPort::open(0)?;
//!         let mut flasher = TouchFlasher::new(port);
//!
//!         let (generation, mode) = flasher.detect()?;
//!         println!("found {generation} controller in {mode} mode");
//!
//!         flasher.update_firmware(&firmware, &UpdateOptions::default(), &mut |done, total| {
//!             println!("page {done}/{total}");
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod firmware;
pub mod flasher;
pub mod info_page;
pub mod port;
pub mod protocol;
pub mod retry;
pub mod target;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::NativeHidPort;
pub use {
    connection::{Connection, ProtocolIo},
    error::{Error, Result},
    firmware::FirmwareFile,
    flasher::{
        FirmwareInfo, TouchFlasher, UpdateError, UpdateOptions, UpdatePhase,
    },
    info_page::{InfoPage, UpdateInfo, UpdateTime},
    port::{BusType, ELAN_VID, HidPort, RECOVERY_PID},
    protocol::queries::{HelloPacket, InfoQuery},
    target::{BootMode, FlashProtocol, Generation, RemarkId},
};
