//! Gen5/6/7 flash protocol.
//!
//! 16-bit word addressing, 132-byte pages (address word, 64 data words,
//! checksum word) and an IAP engine that erases implicitly as part of
//! each committed page write.

use std::{thread, time::Duration};

use log::debug;

use crate::{
    connection::ProtocolIo,
    error::{Error, Result},
    firmware::{FirmwareFile, NON_REMARK_SENTINEL},
    info_page::InfoPage,
    port::BusType,
    protocol::rom::{self, BulkRegion},
    retry::{ERROR_RETRY_COUNT, RETRY_BACKOFF, with_retry},
    target::{BootMode, FlashProtocol, Generation, IAP_SETTLE, RemarkId, transfer_page},
};

/// Command switching a normal-mode controller into boot code.
pub const ENTER_IAP_CMD: [u8; 4] = [0x54, 0x00, 0x12, 0x34];

/// Flash key unlocking the IAP engine of a recovery-mode controller.
pub const FLASH_KEY_CMD: [u8; 4] = [0x54, 0xC0, 0xE1, 0x5A];

/// I2C slave address echoed by the boot code once IAP is entered.
pub const I2C_SLAVE_ADDR: u8 = 0x20;

/// Full page: address word, 64 data words, checksum word.
pub const PAGE_SIZE: usize = 132;

/// Image bytes per page.
pub const PAGE_DATA_SIZE: usize = 128;

/// Words per page (also the page-to-page address stride).
pub const PAGE_WORDS: u32 = 64;

/// ROM address the info page is read from.
pub const INFO_PAGE_ROM_ADDR: u16 = 0x8040;

/// Flash address the info page is written back to.
pub const INFO_PAGE_WRITE_ADDR: u16 = 0x0040;

/// ROM address of the remark ID word.
pub const REMARK_ID_ROM_ADDR: u16 = 0x801F;

/// Assemble one 132-byte flash page.
///
/// Words are little-endian; the trailing checksum is the wrapping sum
/// of the 65 preceding words.
pub fn build_page(address: u16, data: &[u8; PAGE_DATA_SIZE]) -> [u8; PAGE_SIZE] {
    let mut page = [0u8; PAGE_SIZE];
    page[..2].copy_from_slice(&address.to_le_bytes());
    page[2..2 + PAGE_DATA_SIZE].copy_from_slice(data);

    let mut checksum = 0u16;
    for word in page[..PAGE_SIZE - 2].chunks_exact(2) {
        checksum = checksum.wrapping_add(u16::from_le_bytes([word[0], word[1]]));
    }
    page[PAGE_SIZE - 2..].copy_from_slice(&checksum.to_le_bytes());
    page
}

/// Flash protocol of Gen5/6/7 controllers.
///
/// `read_variant` selects the ROM read opcode variant for the solution
/// series, derived from the solution ID (normal mode) or the boot-code
/// version (recovery mode).
pub struct LegacyProtocol {
    read_variant: u8,
}

impl LegacyProtocol {
    /// Create a protocol instance with the given ROM read variant.
    #[must_use]
    pub fn new(read_variant: u8) -> Self {
        Self { read_variant }
    }

    /// Confirm the boot code answered on its IAP slave address.
    fn check_slave_address(&self, io: &mut dyn ProtocolIo, timeout: Duration) -> Result<()> {
        io.send_vendor(&[I2C_SLAVE_ADDR])?;
        let resp = io.read_response(1, timeout)?;
        if resp[0] != I2C_SLAVE_ADDR {
            return Err(Error::DataPattern(format!(
                "slave address answered {:#04x}",
                resp[0]
            )));
        }
        Ok(())
    }
}

impl FlashProtocol for LegacyProtocol {
    fn generation(&self) -> Generation {
        Generation::Legacy
    }

    fn page_data_size(&self) -> u32 {
        PAGE_DATA_SIZE as u32
    }

    fn page_address(&self, index: u32) -> u32 {
        index * PAGE_WORDS
    }

    fn enter_iap(&self, io: &mut dyn ProtocolIo, mode: BootMode) -> Result<()> {
        match mode {
            BootMode::Normal => io.send_command(&ENTER_IAP_CMD)?,
            // Boot code is already running; only the flash key is needed.
            BootMode::Recovery => io.send_command(&FLASH_KEY_CMD)?,
        }
        thread::sleep(IAP_SETTLE);

        if io.bus_type() == BusType::I2c {
            self.check_slave_address(io, Duration::from_millis(1000))?;
        }
        debug!("legacy IAP entered ({mode} mode)");
        Ok(())
    }

    fn erase_code_region(&self, _io: &mut dyn ProtocolIo, _page_count: u32) -> Result<()> {
        // The IAP engine erases each page as part of the commit.
        Ok(())
    }

    fn erase_info_region(&self, _io: &mut dyn ProtocolIo) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
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
        if address > u32::from(u16::MAX) {
            return Err(Error::InvalidParam(format!(
                "page address {address:#010x} beyond 16-bit space"
            )));
        }
        let page = build_page(address as u16, data);
        transfer_page(io, &page, commit_timeout)
    }

    fn read_info_page(&self, io: &mut dyn ProtocolIo, timeout: Duration) -> Result<InfoPage> {
        // A lost frame invalidates the rest of the stream; the retry
        // restarts the exchange from the bulk-read command.
        let data = with_retry(ERROR_RETRY_COUNT, RETRY_BACKOFF, || {
            rom::read_page(
                &mut *io,
                BulkRegion::Rom,
                INFO_PAGE_ROM_ADDR,
                PAGE_DATA_SIZE,
                PAGE_DATA_SIZE,
                timeout,
            )
        })?;
        Ok(InfoPage::new(data))
    }

    fn write_info_page(
        &self,
        io: &mut dyn ProtocolIo,
        page: &InfoPage,
        commit_timeout: Duration,
    ) -> Result<()> {
        self.write_page(
            io,
            u32::from(INFO_PAGE_WRITE_ADDR),
            page.data(),
            commit_timeout,
        )
    }

    fn read_device_remark_id(
        &self,
        io: &mut dyn ProtocolIo,
        timeout: Duration,
    ) -> Result<Option<RemarkId>> {
        let id = rom::read_word(io, REMARK_ID_ROM_ADDR, self.read_variant, timeout)?;
        Ok((id != NON_REMARK_SENTINEL).then_some(RemarkId::Legacy(id)))
    }

    fn firmware_remark_id(&self, firmware: &FirmwareFile) -> Option<RemarkId> {
        firmware.remark_id().map(RemarkId::Legacy)
    }

    fn supports_recalibration(&self) -> bool {
        true
    }
}
