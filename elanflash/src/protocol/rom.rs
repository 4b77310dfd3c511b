//! ROM and memory reads.
//!
//! Legacy controllers expose 16-bit word reads at 16-bit word addresses;
//! Gen8 controllers use 32-bit byte addresses and can return 1, 2 or 4
//! bytes per read. Bulk reads stream whole pages through a sequence of
//! input reports.

use std::time::Duration;

use crate::{
    connection::ProtocolIo,
    error::{Error, Result},
    retry::{ERROR_RETRY_COUNT, RETRY_BACKOFF, with_retry},
};

/// Leading byte of a word/Gen8 read response.
const ROM_READ_ECHO: u8 = 0x95;

/// Leading byte of a bulk read response.
const BULK_READ_ECHO: u8 = 0x99;

/// Data bytes carried per input report during a bulk page read.
const PAGE_READ_FRAME_LEN: usize = 60;

/// Solution IDs (high byte of the firmware version) of series whose ROM
/// sits behind the alternate read opcode variant.
const HIGH_ADDR_SOLUTION_IDS: [u8; 7] = [0x61, 0x62, 0x59, 0x15, 0x64, 0x65, 0x67];

/// Boot-code version high bytes of the same series, used when the
/// firmware version is unavailable (recovery mode).
const HIGH_ADDR_BOOT_CODES: [u8; 5] = [0xA7, 0xA8, 0xE6, 0xF6, 0xA9];

/// Memory space addressed by a bulk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BulkRegion {
    /// Flash ROM contents.
    Rom = 0x00,
    /// Live RAM contents.
    Memory = 0x10,
}

/// Number of bytes returned by one Gen8 read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gen8ReadLen {
    /// Single byte.
    One = 1,
    /// 16-bit halfword.
    Two = 2,
    /// 32-bit word.
    Four = 4,
}

/// Read opcode variant for a normal-mode legacy controller.
#[must_use]
pub fn variant_for_solution(solution_id: u8) -> u8 {
    if HIGH_ADDR_SOLUTION_IDS.contains(&solution_id) {
        0x21
    } else {
        0x11
    }
}

/// Read opcode variant for a recovery-mode legacy controller, chosen by
/// the boot-code version since the firmware version is not running.
#[must_use]
pub fn variant_for_boot_code(bc_version: u16) -> u8 {
    if HIGH_ADDR_BOOT_CODES.contains(&((bc_version >> 8) as u8)) {
        0x21
    } else {
        0x11
    }
}

/// Read one 16-bit word from a legacy controller.
pub fn read_word(
    io: &mut dyn ProtocolIo,
    addr: u16,
    variant: u8,
    timeout: Duration,
) -> Result<u16> {
    let [addr_high, addr_low] = addr.to_be_bytes();
    let cmd = [0x96, addr_high, addr_low, 0x00, 0x00, variant];
    with_retry(ERROR_RETRY_COUNT, RETRY_BACKOFF, || {
        io.send_command(&cmd)?;
        let resp = io.read_response(6, timeout)?;
        if resp[0] != ROM_READ_ECHO {
            return Err(Error::DataPattern(format!(
                "word read echo {:#04x} at {addr:#06x}",
                resp[0]
            )));
        }
        Ok(u16::from_be_bytes([resp[3], resp[4]]))
    })
}

/// Read one 16-bit word from a legacy controller via the bulk opcode.
pub fn read_word_bulk(
    io: &mut dyn ProtocolIo,
    region: BulkRegion,
    addr: u16,
    timeout: Duration,
) -> Result<u16> {
    let [addr_high, addr_low] = addr.to_be_bytes();
    let cmd = [0x59, region as u8, addr_high, addr_low, 0x00, 0x01];
    with_retry(ERROR_RETRY_COUNT, RETRY_BACKOFF, || {
        io.send_command(&cmd)?;
        let resp = io.read_response(6, timeout)?;
        if resp[0] != BULK_READ_ECHO {
            return Err(Error::DataPattern(format!(
                "bulk read echo {:#04x} at {addr:#06x}",
                resp[0]
            )));
        }
        Ok(u16::from_be_bytes([resp[3], resp[4]]))
    })
}

/// Read up to 4 bytes from a Gen8 controller at a 32-bit byte address.
pub fn gen8_read(
    io: &mut dyn ProtocolIo,
    addr: u32,
    len: Gen8ReadLen,
    timeout: Duration,
) -> Result<u32> {
    let [a3, a2, a1, a0] = addr.to_be_bytes();
    let cmd = [0x96, len as u8, a3, a2, a1, a0, 0x00, 0x00, 0x00, 0x00];
    with_retry(ERROR_RETRY_COUNT, RETRY_BACKOFF, || {
        io.send_command(&cmd)?;
        let resp = io.read_response(10, timeout)?;
        if resp[0] != ROM_READ_ECHO || resp[1] != len as u8 {
            return Err(Error::DataPattern(format!(
                "read echo {:#04x}/{:#04x} at {addr:#010x}",
                resp[0], resp[1]
            )));
        }
        let value = u32::from_be_bytes([resp[6], resp[7], resp[8], resp[9]]);
        Ok(match len {
            Gen8ReadLen::One => value & 0xFF,
            Gen8ReadLen::Two => value & 0xFFFF,
            Gen8ReadLen::Four => value,
        })
    })
}

/// Bulk-read `len` bytes starting at a legacy word address.
///
/// The controller streams the page back as a sequence of input reports,
/// each with a 3-byte `[0x99, frame_index, data_len]` header followed by
/// up to 60 data bytes. `max_len` bounds the request by the generation's
/// page size.
#[allow(clippy::cast_possible_truncation)]
pub fn read_page(
    io: &mut dyn ProtocolIo,
    region: BulkRegion,
    addr: u16,
    len: usize,
    max_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    if len == 0 || len > max_len || len % 2 != 0 {
        return Err(Error::InvalidParam(format!(
            "page read length {len} outside 2..={max_len}"
        )));
    }

    let words = (len / 2) as u16;
    let [addr_high, addr_low] = addr.to_be_bytes();
    let [len_high, len_low] = words.to_be_bytes();
    io.send_command(&[0x59, region as u8, addr_high, addr_low, len_high, len_low])?;

    let mut page = Vec::with_capacity(len);
    while page.len() < len {
        let chunk = (len - page.len()).min(PAGE_READ_FRAME_LEN);
        let resp = io.read_response(chunk + 3, timeout)?;
        if resp[0] != BULK_READ_ECHO {
            return Err(Error::DataPattern(format!(
                "page read frame echo {:#04x} at {addr:#06x}",
                resp[0]
            )));
        }
        page.extend_from_slice(&resp[3..3 + chunk]);
    }
    Ok(page)
}
