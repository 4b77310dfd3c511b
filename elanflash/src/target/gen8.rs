//! Gen8 flash protocol.
//!
//! 32-bit byte addressing, 2056-byte pages (32-bit address, 2048 data
//! bytes, 32-bit checksum) and explicit flash-section erase commands.

use std::{thread, time::Duration};

use log::debug;

use crate::{
    connection::ProtocolIo,
    error::{Error, Result},
    firmware::FirmwareFile,
    info_page::InfoPage,
    protocol::rom::{self, Gen8ReadLen},
    target::{BootMode, FlashProtocol, Generation, IAP_SETTLE, RemarkId, transfer_page},
};

/// Command switching a normal-mode controller into boot code.
pub const ENTER_IAP_CMD: [u8; 4] = [0x54, 0x00, 0x12, 0x34];

/// Flash key unlocking the IAP engine of a recovery-mode controller.
pub const FLASH_KEY_CMD: [u8; 4] = [0x54, 0xC0, 0xE1, 0x5A];

/// Full page: 32-bit address, 2048 data bytes, 32-bit checksum.
pub const PAGE_SIZE: usize = 2056;

/// Image bytes per page.
pub const PAGE_DATA_SIZE: usize = 2048;

/// Base address of the code region.
pub const CODE_BASE_ADDR: u32 = 0x0000_0000;

/// Flash address of the info page.
pub const INFO_PAGE_ADDR: u32 = 0x0004_1800;

/// ROM address of the 16-byte remark ID.
pub const REMARK_ID_ROM_ADDR: u32 = 0x0004_2200;

/// First response byte of a successful section erase.
pub const ERASE_ACK: u8 = 0xAA;

/// Mass erase of the code region can take a while.
pub const ERASE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Assemble one 2056-byte flash page.
///
/// All fields are little-endian; the trailing checksum is the wrapping
/// 32-bit sum of the 513 preceding words.
pub fn build_page(address: u32, data: &[u8; PAGE_DATA_SIZE]) -> Vec<u8> {
    let mut page = Vec::with_capacity(PAGE_SIZE);
    page.extend_from_slice(&address.to_le_bytes());
    page.extend_from_slice(data);

    let mut checksum = 0u32;
    for word in page.chunks_exact(4) {
        checksum = checksum.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
    }
    page.extend_from_slice(&checksum.to_le_bytes());
    page
}

/// Flash protocol of Gen8 controllers.
#[derive(Default)]
pub struct Gen8Protocol;

impl Gen8Protocol {
    /// Create a protocol instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Erase `page_count` pages starting at `address`.
    #[allow(clippy::unused_self)]
    fn erase_section(
        &self,
        io: &mut dyn ProtocolIo,
        address: u32,
        page_count: u16,
    ) -> Result<()> {
        let [a3, a2, a1, a0] = address.to_be_bytes();
        let [pc_high, pc_low] = page_count.to_be_bytes();
        io.send_command(&[0x54, 0x01, a3, a2, a1, a0, pc_high, pc_low, 0x00, 0x00])?;

        let resp = io.read_response(2, ERASE_TIMEOUT)?;
        if resp[0] != ERASE_ACK {
            return Err(Error::DataPattern(format!(
                "section erase at {address:#010x} answered {:#04x}",
                resp[0]
            )));
        }
        debug!("erased {page_count} page(s) at {address:#010x}");
        Ok(())
    }
}

impl FlashProtocol for Gen8Protocol {
    fn generation(&self) -> Generation {
        Generation::Gen8
    }

    fn page_data_size(&self) -> u32 {
        PAGE_DATA_SIZE as u32
    }

    fn page_address(&self, index: u32) -> u32 {
        CODE_BASE_ADDR + index * PAGE_DATA_SIZE as u32
    }

    fn enter_iap(&self, io: &mut dyn ProtocolIo, mode: BootMode) -> Result<()> {
        match mode {
            BootMode::Normal => io.send_command(&ENTER_IAP_CMD)?,
            BootMode::Recovery => io.send_command(&FLASH_KEY_CMD)?,
        }
        thread::sleep(IAP_SETTLE);
        debug!("gen8 IAP entered ({mode} mode)");
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn erase_code_region(&self, io: &mut dyn ProtocolIo, page_count: u32) -> Result<()> {
        if page_count == 0 || page_count > u32::from(u16::MAX) {
            return Err(Error::InvalidParam(format!(
                "erase page count {page_count} out of range"
            )));
        }
        self.erase_section(io, CODE_BASE_ADDR, page_count as u16)
    }

    fn erase_info_region(&self, io: &mut dyn ProtocolIo) -> Result<()> {
        self.erase_section(io, INFO_PAGE_ADDR, 1)
    }

    fn write_page(
        &self,
        io: &mut dyn ProtocolIo,
        address: u32,
        data: &[u8],
        commit_timeout: Duration,
    ) -> Result<()> {
        let data: &[u8; PAGE_DATA_SIZE] = data.try_into().map_err(|_| {
            Error::InvalidParam(format!("page data must be {PAGE_DATA_SIZE} bytes"))
        })?;
        let page = build_page(address, data);
        transfer_page(io, &page, commit_timeout)
    }

    fn read_info_page(&self, io: &mut dyn ProtocolIo, timeout: Duration) -> Result<InfoPage> {
        // One 32-bit read per word; the page is read once per update.
        // Words keep wire byte order so the write-back is byte-exact.
        let mut data = Vec::with_capacity(PAGE_DATA_SIZE);
        for offset in (0..PAGE_DATA_SIZE as u32).step_by(4) {
            let value = rom::gen8_read(io, INFO_PAGE_ADDR + offset, Gen8ReadLen::Four, timeout)?;
            data.extend_from_slice(&value.to_be_bytes());
        }
        Ok(InfoPage::new(data))
    }

    fn write_info_page(
        &self,
        io: &mut dyn ProtocolIo,
        page: &InfoPage,
        commit_timeout: Duration,
    ) -> Result<()> {
        self.write_page(io, INFO_PAGE_ADDR, page.data(), commit_timeout)
    }

    fn read_device_remark_id(
        &self,
        io: &mut dyn ProtocolIo,
        timeout: Duration,
    ) -> Result<Option<RemarkId>> {
        let mut id = [0u8; 16];
        for (i, chunk) in id.chunks_exact_mut(4).enumerate() {
            let addr = REMARK_ID_ROM_ADDR + (i as u32) * 4;
            let value = rom::gen8_read(io, addr, Gen8ReadLen::Four, timeout)?;
            chunk.copy_from_slice(&value.to_be_bytes());
        }
        Ok((!id.iter().all(|&b| b == 0xFF)).then_some(RemarkId::Gen8(id)))
    }

    fn firmware_remark_id(&self, firmware: &FirmwareFile) -> Option<RemarkId> {
        firmware.gen8_remark_id().map(RemarkId::Gen8)
    }

    fn supports_recalibration(&self) -> bool {
        false
    }
}
