//! Controller generations and their flash protocols.
//!
//! Two command sets exist: the legacy one shared by Gen5/6/7 parts and
//! the Gen8 one with 32-bit addressing and explicit flash erase. Both
//! share the page transfer shape (fragment, stream, commit), captured
//! here behind the [`FlashProtocol`] trait.

pub mod gen8;
pub mod legacy;

use std::{fmt, time::Duration};

use crate::{
    connection::ProtocolIo,
    error::{Error, Result},
    firmware::FirmwareFile,
    info_page::InfoPage,
    protocol::codec::{BRIDGE_RECEIVE_PAGE, BRIDGE_WRITE_FLASH},
};

/// Hello code of a legacy controller running normal firmware.
pub const LEGACY_NORMAL_HELLO: u8 = 0x20;

/// Hello code of a legacy controller stuck in boot code.
pub const LEGACY_RECOVERY_HELLO: u8 = 0x56;

/// Hello code of a Gen8 controller running normal firmware.
pub const GEN8_NORMAL_HELLO: u8 = 0x21;

/// Hello code of a Gen8 controller stuck in boot code.
pub const GEN8_RECOVERY_HELLO: u8 = 0x57;

/// Boot-code version high bytes of the EM32F901/EM32F902 first boot
/// code, which answers with the legacy hello codes despite being Gen8.
pub const GEN8_FIRST_BC_MARKERS: [u8; 2] = [0x95, 0x9C];

/// Image bytes carried per page-transfer frame
/// (33-byte report minus report ID and 3-byte bridge header, word-aligned).
pub const PAGE_FRAME_DATA_LEN: usize = 28;

/// First response byte of a successful flash commit.
pub const FLASH_WRITE_ACK: u8 = 0xFA;

/// Settle delay after switching the controller into boot code.
pub const IAP_SETTLE: Duration = Duration::from_millis(15);

/// Controller hardware generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Gen5/6/7 parts with the 16-bit command set.
    Legacy,
    /// Gen8 parts with 32-bit addressing.
    Gen8,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "Gen5/6/7"),
            Self::Gen8 => write!(f, "Gen8"),
        }
    }
}

/// Which code the controller booted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Normal firmware is running.
    Normal,
    /// Only the boot code is running (normal firmware absent or corrupt).
    Recovery,
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Recovery => write!(f, "recovery"),
        }
    }
}

/// Classify a hello code into generation and boot mode.
///
/// `bc_version` is the boot-code version relevant for the mode: the
/// normal-mode query result for `0x20`, the version echoed inside the
/// hello packet for `0x56`. A legacy hello whose boot-code high byte
/// carries one of [`GEN8_FIRST_BC_MARKERS`] is reclassified as Gen8.
pub fn classify_hello(code: u8, bc_version: u16) -> Result<(Generation, BootMode)> {
    let bc_high = (bc_version >> 8) as u8;
    let legacy_generation = if GEN8_FIRST_BC_MARKERS.contains(&bc_high) {
        Generation::Gen8
    } else {
        Generation::Legacy
    };

    match code {
        LEGACY_NORMAL_HELLO => Ok((legacy_generation, BootMode::Normal)),
        LEGACY_RECOVERY_HELLO => Ok((legacy_generation, BootMode::Recovery)),
        GEN8_NORMAL_HELLO => Ok((Generation::Gen8, BootMode::Normal)),
        GEN8_RECOVERY_HELLO => Ok((Generation::Gen8, BootMode::Recovery)),
        _ => Err(Error::UnknownDeviceType(code)),
    }
}

/// Remark ID in either generation's width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemarkId {
    /// 16-bit legacy remark ID.
    Legacy(u16),
    /// 16-byte Gen8 remark ID.
    Gen8([u8; 16]),
}

impl fmt::Display for RemarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy(id) => write!(f, "{id:#06x}"),
            Self::Gen8(id) => {
                for b in id {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            },
        }
    }
}

/// Generation-specific flash operations used by the update orchestrator.
pub trait FlashProtocol {
    /// The generation this protocol drives.
    fn generation(&self) -> Generation;

    /// Image bytes carried per flash page.
    fn page_data_size(&self) -> u32;

    /// Flash address of code page `index`.
    fn page_address(&self, index: u32) -> u32;

    /// Switch the controller into boot code, ready for page writes.
    fn enter_iap(&self, io: &mut dyn ProtocolIo, mode: BootMode) -> Result<()>;

    /// Erase the code region ahead of `page_count` page writes.
    fn erase_code_region(&self, io: &mut dyn ProtocolIo, page_count: u32) -> Result<()>;

    /// Erase the info region ahead of an info-page write.
    fn erase_info_region(&self, io: &mut dyn ProtocolIo) -> Result<()>;

    /// Build one page at `address`, stream it and commit it to flash.
    fn write_page(
        &self,
        io: &mut dyn ProtocolIo,
        address: u32,
        data: &[u8],
        commit_timeout: Duration,
    ) -> Result<()>;

    /// Read the info page out of ROM.
    fn read_info_page(&self, io: &mut dyn ProtocolIo, timeout: Duration) -> Result<InfoPage>;

    /// Write a patched info page back (erase plus single-page write).
    fn write_info_page(
        &self,
        io: &mut dyn ProtocolIo,
        page: &InfoPage,
        commit_timeout: Duration,
    ) -> Result<()>;

    /// Remark ID from device ROM, `None` for non-remark parts.
    fn read_device_remark_id(
        &self,
        io: &mut dyn ProtocolIo,
        timeout: Duration,
    ) -> Result<Option<RemarkId>>;

    /// Remark ID carried by a firmware image, `None` when absent.
    fn firmware_remark_id(&self, firmware: &FirmwareFile) -> Option<RemarkId>;

    /// Whether the controller accepts a triggered recalibration.
    fn supports_recalibration(&self) -> bool;
}

/// Stream one assembled page to the IAP engine and commit it.
///
/// The page is cut into [`PAGE_FRAME_DATA_LEN`]-byte fragments sent as
/// receive-page bridge frames, then a payload-less write-flash frame
/// asks the boot code to burn the buffered page.
pub(crate) fn transfer_page(
    io: &mut dyn ProtocolIo,
    page: &[u8],
    commit_timeout: Duration,
) -> Result<()> {
    for fragment in page.chunks(PAGE_FRAME_DATA_LEN) {
        io.send_bridge(BRIDGE_RECEIVE_PAGE, fragment)?;
    }
    io.send_bridge(BRIDGE_WRITE_FLASH, &[])?;

    let resp = io.read_response(2, commit_timeout)?;
    if resp[0] != FLASH_WRITE_ACK {
        return Err(Error::DataPattern(format!(
            "flash commit answered {:#04x}",
            resp[0]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_hello_table() {
        assert_eq!(
            classify_hello(0x20, 0x1234).unwrap(),
            (Generation::Legacy, BootMode::Normal)
        );
        assert_eq!(
            classify_hello(0x56, 0xA701).unwrap(),
            (Generation::Legacy, BootMode::Recovery)
        );
        assert_eq!(
            classify_hello(0x21, 0x0000).unwrap(),
            (Generation::Gen8, BootMode::Normal)
        );
        assert_eq!(
            classify_hello(0x57, 0x0000).unwrap(),
            (Generation::Gen8, BootMode::Recovery)
        );
    }

    #[test]
    fn test_classify_first_boot_code_markers() {
        // EM32F901/902 first boot code answers with legacy hello codes.
        assert_eq!(
            classify_hello(0x56, 0x9501).unwrap(),
            (Generation::Gen8, BootMode::Recovery)
        );
        assert_eq!(
            classify_hello(0x20, 0x9C02).unwrap(),
            (Generation::Gen8, BootMode::Normal)
        );
        // The markers never affect genuine Gen8 hello codes.
        assert_eq!(
            classify_hello(0x21, 0x9501).unwrap(),
            (Generation::Gen8, BootMode::Normal)
        );
    }

    #[test]
    fn test_classify_unknown_code() {
        let err = classify_hello(0x42, 0).unwrap_err();
        assert!(matches!(err, Error::UnknownDeviceType(0x42)));
        assert_eq!(err.code(), 0x010F);
    }

    /// Records bridge traffic and acknowledges every commit.
    struct RecordingIo {
        fragments: Vec<Vec<u8>>,
        commits: usize,
    }

    impl ProtocolIo for RecordingIo {
        fn send_command(&mut self, _cmd: &[u8]) -> Result<()> {
            Ok(())
        }

        fn send_bridge(&mut self, bridge_cmd: u8, payload: &[u8]) -> Result<()> {
            match bridge_cmd {
                BRIDGE_RECEIVE_PAGE => self.fragments.push(payload.to_vec()),
                BRIDGE_WRITE_FLASH => {
                    assert!(payload.is_empty());
                    self.commits += 1;
                },
                other => panic!("unexpected bridge command {other:#04x}"),
            }
            Ok(())
        }

        fn send_vendor(&mut self, _payload: &[u8]) -> Result<()> {
            Ok(())
        }

        fn read_response(&mut self, data_len: usize, _timeout: Duration) -> Result<Vec<u8>> {
            Ok(vec![FLASH_WRITE_ACK; data_len])
        }

        fn read_raw_response(&mut self, data_len: usize, _timeout: Duration) -> Result<Vec<u8>> {
            Ok(vec![0; data_len])
        }

        fn bus_type(&self) -> crate::port::BusType {
            crate::port::BusType::Usb
        }
    }

    #[test]
    fn test_transfer_page_fragments_reassemble() {
        // 132-byte legacy page and 2056-byte Gen8 page.
        for page_len in [132usize, 2056] {
            let page: Vec<u8> = (0..page_len).map(|i| i as u8).collect();
            let mut io = RecordingIo { fragments: Vec::new(), commits: 0 };

            transfer_page(&mut io, &page, Duration::from_millis(10)).unwrap();

            assert_eq!(io.commits, 1);
            assert_eq!(io.fragments.len(), page_len.div_ceil(PAGE_FRAME_DATA_LEN));
            for f in &io.fragments[..io.fragments.len() - 1] {
                assert_eq!(f.len(), PAGE_FRAME_DATA_LEN);
            }
            let reassembled: Vec<u8> = io.fragments.concat();
            assert_eq!(reassembled, page);
        }
    }

    #[test]
    fn test_transfer_page_bad_ack_is_pattern_error() {
        struct NackIo(RecordingIo);
        impl ProtocolIo for NackIo {
            fn send_command(&mut self, cmd: &[u8]) -> Result<()> {
                self.0.send_command(cmd)
            }
            fn send_bridge(&mut self, bridge_cmd: u8, payload: &[u8]) -> Result<()> {
                self.0.send_bridge(bridge_cmd, payload)
            }
            fn send_vendor(&mut self, payload: &[u8]) -> Result<()> {
                self.0.send_vendor(payload)
            }
            fn read_response(&mut self, data_len: usize, _timeout: Duration) -> Result<Vec<u8>> {
                Ok(vec![0x00; data_len])
            }
            fn read_raw_response(&mut self, data_len: usize, timeout: Duration) -> Result<Vec<u8>> {
                self.0.read_raw_response(data_len, timeout)
            }
            fn bus_type(&self) -> crate::port::BusType {
                self.0.bus_type()
            }
        }

        let mut io = NackIo(RecordingIo { fragments: Vec::new(), commits: 0 });
        let err = transfer_page(&mut io, &[0u8; 132], Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::DataPattern(_)));
    }

    #[test]
    fn test_remark_id_display() {
        assert_eq!(RemarkId::Legacy(0x1234).to_string(), "0x1234");
        assert_eq!(
            RemarkId::Gen8([0xAB; 16]).to_string(),
            "ab".repeat(16)
        );
    }
}
