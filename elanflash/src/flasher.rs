//! Firmware update orchestration.
//!
//! [`TouchFlasher`] owns the connection and sequences a full update:
//! mode detection, remark check, IAP entry, erase, the page-write loop,
//! info-page update, recalibration and verification. Every fatal error
//! carries the phase it happened in.

use std::{thread, time::Duration};

use log::{debug, info, warn};
use thiserror::Error as ThisError;

use crate::{
    connection::{Connection, ProtocolIo},
    error::{Error, Result},
    firmware::FirmwareFile,
    info_page::{self, UpdateTime},
    port::{BusType, HidPort},
    protocol::queries::{self, InfoQuery},
    retry::{ERROR_RETRY_COUNT, RETRY_BACKOFF, with_retry},
    target::{
        BootMode, FlashProtocol, Generation, LEGACY_NORMAL_HELLO, RemarkId, classify_hello,
        gen8::Gen8Protocol,
        legacy::LegacyProtocol,
    },
};

/// Skip-action bit disabling the remark ID check.
pub const ACTION_REMARK_CHECK: u8 = 0x01;

/// Skip-action bit disabling the info-page update.
pub const ACTION_INFO_UPDATE: u8 = 0x02;

/// Gen8 parts self-calibrate after power-on; give them time to finish.
pub const GEN8_CALIBRATION_SETTLE: Duration = Duration::from_millis(300);

/// SPI re-enumeration after a flash commit can take a few seconds.
const RECONNECT_RETRY_COUNT: u32 = 10;
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Update phases, reported alongside fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// Hello packet and generation/mode classification.
    ModeDetection,
    /// Pre-update firmware information readout.
    FirmwareInfo,
    /// Remark ID comparison between image and device.
    RemarkCheck,
    /// Switching the controller into boot code.
    EnterIap,
    /// Flash erase ahead of writing.
    Erase,
    /// The page-write loop.
    PageWrite,
    /// Info-page counter/timestamp update.
    InfoUpdate,
    /// Reopening the device after an SPI reset.
    Reconnect,
    /// Post-update recalibration (or settle wait on Gen8).
    Recalibrate,
    /// Post-update sanity readback.
    Verify,
}

impl std::fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ModeDetection => "mode detection",
            Self::FirmwareInfo => "firmware information",
            Self::RemarkCheck => "remark ID check",
            Self::EnterIap => "IAP entry",
            Self::Erase => "flash erase",
            Self::PageWrite => "page write",
            Self::InfoUpdate => "info page update",
            Self::Reconnect => "device reconnect",
            Self::Recalibrate => "recalibration",
            Self::Verify => "verification",
        };
        write!(f, "{name}")
    }
}

/// A fatal update failure, tagged with the phase it happened in.
#[derive(Debug, ThisError)]
#[error("{phase} failed: {source}")]
pub struct UpdateError {
    /// Phase that failed.
    pub phase: UpdatePhase,
    /// Underlying error.
    #[source]
    pub source: Error,
}

/// Firmware identification read from a normal-mode controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    /// Firmware project ID.
    pub fw_id: u16,
    /// Running firmware version.
    pub fw_version: u16,
    /// Test (solution) version.
    pub test_version: u16,
    /// Boot code version.
    pub bc_version: u16,
}

impl FirmwareInfo {
    /// Solution ID (high byte of the firmware version).
    #[must_use]
    pub fn solution_id(&self) -> u8 {
        queries::solution_id(self.fw_version)
    }
}

/// Options for one update invocation.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Skip the remark ID gate.
    pub skip_remark_check: bool,
    /// Skip the info-page counter/timestamp update.
    pub skip_info_update: bool,
    /// Timeout for the flash-commit acknowledgement of each page.
    pub page_commit_timeout: Duration,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            skip_remark_check: false,
            skip_info_update: false,
            page_commit_timeout: Duration::from_millis(1000),
        }
    }
}

impl UpdateOptions {
    /// Build options from the numeric skip-action bit mask.
    #[must_use]
    pub fn from_skip_mask(mask: u8) -> Self {
        Self {
            skip_remark_check: mask & ACTION_REMARK_CHECK != 0,
            skip_info_update: mask & ACTION_INFO_UPDATE != 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DeviceState {
    generation: Generation,
    mode: BootMode,
    read_variant: u8,
}

/// Update orchestrator for one connected touch controller.
pub struct TouchFlasher<P: HidPort> {
    conn: Connection<P>,
    state: Option<DeviceState>,
}

impl<P: HidPort> TouchFlasher<P> {
    /// Wrap an open port.
    pub fn new(port: P) -> Self {
        Self {
            conn: Connection::new(port),
            state: None,
        }
    }

    /// Wrap an existing connection.
    pub fn with_connection(conn: Connection<P>) -> Self {
        Self { conn, state: None }
    }

    /// Device name of the underlying port.
    #[must_use]
    pub fn name(&self) -> &str {
        self.conn.name()
    }

    /// Detect the controller generation and boot mode.
    ///
    /// A legacy normal-mode hello needs a follow-up boot-code version
    /// query: the first boot code of two Gen8 silicon families answers
    /// with the legacy hello codes.
    pub fn detect(&mut self) -> Result<(Generation, BootMode)> {
        let timeout = self.conn.timeout();
        let hello = queries::hello_packet(&mut self.conn, timeout)?;

        let bc_version = if hello.code == LEGACY_NORMAL_HELLO {
            queries::read_info(&mut self.conn, InfoQuery::BootCodeVersion, timeout)?
        } else {
            hello.bc_version
        };

        let (generation, mode) = classify_hello(hello.code, bc_version)?;
        info!("detected {generation} controller in {mode} mode (bc {bc_version:#06x})");

        let read_variant = match (generation, mode) {
            (Generation::Legacy, BootMode::Normal) => {
                let fw_version =
                    queries::read_info(&mut self.conn, InfoQuery::FwVersion, timeout)?;
                crate::protocol::rom::variant_for_solution(queries::solution_id(fw_version))
            },
            (Generation::Legacy, BootMode::Recovery) => {
                crate::protocol::rom::variant_for_boot_code(bc_version)
            },
            (Generation::Gen8, _) => 0,
        };

        self.state = Some(DeviceState {
            generation,
            mode,
            read_variant,
        });
        Ok((generation, mode))
    }

    fn state(&mut self) -> Result<DeviceState> {
        if self.state.is_none() {
            self.detect()?;
        }
        self.state
            .ok_or_else(|| Error::InvalidParam("controller not detected".into()))
    }

    fn protocol(&mut self) -> Result<Box<dyn FlashProtocol>> {
        let state = self.state()?;
        Ok(match state.generation {
            Generation::Legacy => Box::new(LegacyProtocol::new(state.read_variant)),
            Generation::Gen8 => Box::new(Gen8Protocol::new()),
        })
    }

    /// Read firmware identification. Normal mode only: recovery-mode
    /// controllers run no firmware to answer these queries.
    pub fn firmware_information(&mut self) -> Result<FirmwareInfo> {
        let state = self.state()?;
        if state.mode == BootMode::Recovery {
            return Err(Error::InvalidParam(
                "firmware information is not available in recovery mode".into(),
            ));
        }
        let timeout = self.conn.timeout();
        Ok(FirmwareInfo {
            fw_id: queries::read_info(&mut self.conn, InfoQuery::FwId, timeout)?,
            fw_version: queries::read_info(&mut self.conn, InfoQuery::FwVersion, timeout)?,
            test_version: queries::read_info(&mut self.conn, InfoQuery::TestVersion, timeout)?,
            bc_version: queries::read_info(&mut self.conn, InfoQuery::BootCodeVersion, timeout)?,
        })
    }

    /// Read the calibration counter. Normal mode only.
    pub fn calibration_counter(&mut self) -> Result<u16> {
        let state = self.state()?;
        if state.mode == BootMode::Recovery {
            return Err(Error::InvalidParam(
                "calibration counter is not available in recovery mode".into(),
            ));
        }
        let timeout = self.conn.timeout();
        queries::read_info(&mut self.conn, InfoQuery::CalibrationCounter, timeout)
    }

    /// Trigger a recalibration and verify the counter incremented.
    ///
    /// Gen8 parts do not support triggered recalibration.
    pub fn calibrate(&mut self) -> Result<()> {
        let state = self.state()?;
        if state.generation == Generation::Gen8 {
            return Err(Error::InvalidParam(
                "re-calibration is not supported on Gen8 parts".into(),
            ));
        }
        let before = self.calibration_counter()?;
        with_retry(ERROR_RETRY_COUNT, RETRY_BACKOFF, || {
            queries::calibrate(&mut self.conn)
        })?;
        // The 0x66 0x66 ack arrives only after calibration completes,
        // so one counter re-read settles the outcome.
        let after = self.calibration_counter()?;
        if after == before {
            return Err(Error::DataMismatched {
                expected: u32::from(before) + 1,
                actual: u32::from(after),
            });
        }
        debug!("calibration counter {before} -> {after}");
        Ok(())
    }

    /// Compare the image's remark ID against the device ROM.
    ///
    /// Devices reporting the non-remark sentinel bypass the gate.
    pub fn check_remark_id(&mut self, firmware: &FirmwareFile) -> Result<()> {
        let proto = self.protocol()?;
        let timeout = self.conn.timeout();

        let Some(device_id) = proto.read_device_remark_id(&mut self.conn, timeout)? else {
            debug!("device reports non-remark sentinel, skipping remark check");
            return Ok(());
        };
        let fw_id = proto.firmware_remark_id(firmware);

        if fw_id != Some(device_id) {
            warn!("remark ID mismatch: device {device_id}, image {fw_id:?}");
            return Err(Error::DataMismatched {
                expected: remark_key(&device_id),
                actual: fw_id.as_ref().map_or(0, remark_key),
            });
        }
        Ok(())
    }

    /// Run a full firmware update.
    ///
    /// `progress` is called after every committed page with
    /// `(pages_written, pages_total)`.
    pub fn update_firmware(
        &mut self,
        firmware: &FirmwareFile,
        options: &UpdateOptions,
        progress: &mut dyn FnMut(u32, u32),
    ) -> std::result::Result<(), UpdateError> {
        let state = self.state().map_err(at(UpdatePhase::ModeDetection))?;
        let proto = self.protocol().map_err(at(UpdatePhase::ModeDetection))?;
        let recovery = state.mode == BootMode::Recovery;

        // Log the running firmware before overwriting it.
        if !recovery {
            let current = self
                .firmware_information()
                .map_err(at(UpdatePhase::FirmwareInfo))?;
            info!(
                "current firmware: id {:#06x}, version {:#06x}, test {:#06x}, bc {:#06x}",
                current.fw_id, current.fw_version, current.test_version, current.bc_version
            );
        }

        if options.skip_remark_check {
            info!("remark ID check skipped on request");
        } else {
            self.check_remark_id(firmware)
                .map_err(at(UpdatePhase::RemarkCheck))?;
        }

        proto
            .enter_iap(&mut self.conn, state.mode)
            .map_err(at(UpdatePhase::EnterIap))?;

        let page_count = firmware.page_count(proto.page_data_size());
        if page_count == 0 {
            return Err(UpdateError {
                phase: UpdatePhase::PageWrite,
                source: Error::InvalidParam("empty firmware image".into()),
            });
        }
        proto
            .erase_code_region(&mut self.conn, page_count)
            .map_err(at(UpdatePhase::Erase))?;

        info!(
            "writing {page_count} pages ({} bytes) to {} controller",
            firmware.size(),
            state.generation
        );
        let mut page_buf = vec![0u8; proto.page_data_size() as usize];
        for index in 0..page_count {
            firmware
                .read_page(index, &mut page_buf)
                .map_err(at(UpdatePhase::PageWrite))?;
            let address = proto.page_address(index);
            // A transient commit failure restarts this page from its
            // first fragment; anything else aborts the update.
            with_retry(ERROR_RETRY_COUNT, RETRY_BACKOFF, || {
                proto.write_page(&mut self.conn, address, &page_buf, options.page_commit_timeout)
            })
            .map_err(at(UpdatePhase::PageWrite))?;
            progress(index + 1, page_count);
        }

        if options.skip_info_update {
            info!("info page update skipped on request");
        } else {
            self.update_info_page(proto.as_ref(), options.page_commit_timeout)
                .map_err(at(UpdatePhase::InfoUpdate))?;
        }

        // SPI parts reset and re-enumerate after the last commit.
        if self.conn.bus_type() == BusType::Spi {
            with_retry(RECONNECT_RETRY_COUNT, RECONNECT_BACKOFF, || {
                self.conn.reconnect()
            })
            .map_err(at(UpdatePhase::Reconnect))?;
        }

        if recovery {
            // Boot code cannot answer firmware queries; a completed
            // write is the success condition here.
            info!("recovery update complete ({page_count} pages)");
            return Ok(());
        }

        if proto.supports_recalibration() {
            with_retry(ERROR_RETRY_COUNT, RETRY_BACKOFF, || {
                queries::calibrate(&mut self.conn)
            })
            .map_err(at(UpdatePhase::Recalibrate))?;
        } else {
            thread::sleep(GEN8_CALIBRATION_SETTLE);
        }

        // Read back what is now running. No rollback on oddities, the
        // flash is already overwritten; report and let the caller rerun.
        let updated = self
            .firmware_information()
            .map_err(at(UpdatePhase::Verify))?;
        let counter = self
            .calibration_counter()
            .map_err(at(UpdatePhase::Verify))?;
        info!(
            "updated firmware: id {:#06x}, version {:#06x}, calibration counter {counter}",
            updated.fw_id, updated.fw_version
        );
        Ok(())
    }

    fn update_info_page(&mut self, proto: &dyn FlashProtocol, commit_timeout: Duration) -> Result<()> {
        let timeout = self.conn.timeout();
        let mut page = proto.read_info_page(&mut self.conn, timeout)?;

        let apply = match proto.generation() {
            Generation::Legacy => info_page::legacy_apply_update,
            Generation::Gen8 => info_page::gen8_apply_update,
        };
        apply(&mut page, UpdateTime::now())?;

        proto.erase_info_region(&mut self.conn)?;
        proto.write_info_page(&mut self.conn, &page, commit_timeout)
    }
}

/// Map an error into an [`UpdateError`] at the given phase.
fn at(phase: UpdatePhase) -> impl Fn(Error) -> UpdateError {
    move |source| UpdateError { phase, source }
}

/// Numeric key for mismatch reporting (legacy ID, or the leading
/// word of a Gen8 ID).
fn remark_key(id: &RemarkId) -> u32 {
    match id {
        RemarkId::Legacy(v) => u32::from(*v),
        RemarkId::Gen8(bytes) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_mask_bits() {
        let opts = UpdateOptions::from_skip_mask(0);
        assert!(!opts.skip_remark_check);
        assert!(!opts.skip_info_update);

        let opts = UpdateOptions::from_skip_mask(ACTION_REMARK_CHECK);
        assert!(opts.skip_remark_check);
        assert!(!opts.skip_info_update);

        let opts = UpdateOptions::from_skip_mask(ACTION_REMARK_CHECK | ACTION_INFO_UPDATE);
        assert!(opts.skip_remark_check);
        assert!(opts.skip_info_update);
    }

    #[test]
    fn test_update_error_display() {
        let err = UpdateError {
            phase: UpdatePhase::PageWrite,
            source: Error::IoTimeout("no commit ack".into()),
        };
        let message = err.to_string();
        assert!(message.contains("page write"));
        assert_eq!(err.source.code(), 0x0003);
    }

    #[test]
    fn test_remark_key() {
        assert_eq!(remark_key(&RemarkId::Legacy(0x1234)), 0x1234);
        let mut id = [0u8; 16];
        id[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(remark_key(&RemarkId::Gen8(id)), 0xDEADBEEF);
    }
}
