//! Info page model.
//!
//! Every controller reserves one flash page for update metadata: an
//! update counter and the wall-clock time of the last update. Flash is
//! page-granular, so the page is read whole, patched in memory and
//! written back whole. Legacy controllers lay the fields out as 16-bit
//! little-endian words; Gen8 uses one 32-bit word per field, kept in
//! wire byte order (big-endian) as streamed by the ROM read command.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{Datelike, Local, Timelike};

use crate::error::{Error, Result};

/// Update-counter word offset in a legacy info page
/// (ROM 0x8060 relative to the page base 0x8040).
pub const LEGACY_COUNTER_WORD: usize = 0x20;

/// First timestamp word offset in a legacy info page (ROM 0x8061).
pub const LEGACY_TIME_WORD: usize = 0x21;

/// Update-counter byte offset in a Gen8 info page
/// (0x0004_1C00 relative to the page base 0x0004_1800).
pub const GEN8_COUNTER_OFFSET: usize = 0x400;

/// First timestamp field byte offset in a Gen8 info page (0x0004_1C10).
/// Year, month, day, hour and minute follow as consecutive 32-bit words.
pub const GEN8_TIME_OFFSET: usize = 0x410;

/// Wall-clock time of a firmware update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateTime {
    /// Full year (e.g. 2026).
    pub year: u16,
    /// Month, 1..=12.
    pub month: u8,
    /// Day of month, 1..=31.
    pub day: u8,
    /// Hour, 0..=23.
    pub hour: u8,
    /// Minute, 0..=59.
    pub minute: u8,
}

impl UpdateTime {
    /// Current local time.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            year: now.year() as u16,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
        }
    }
}

/// Update metadata stored in the info page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateInfo {
    /// Number of firmware updates applied so far.
    pub update_counter: u32,
    /// When the last update was applied.
    pub last_update_time: UpdateTime,
}

/// One info page held in memory for read-modify-write.
#[derive(Debug, Clone)]
pub struct InfoPage {
    data: Vec<u8>,
}

impl InfoPage {
    /// Wrap page data read from the device.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// The page data, ready to be written back.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Read the 16-bit word at `word_offset` (little-endian).
    pub fn get_word(&self, word_offset: usize) -> Result<u16> {
        let bytes = self
            .data
            .get(word_offset * 2..word_offset * 2 + 2)
            .ok_or_else(|| Error::InvalidParam(format!("word offset {word_offset} out of page")))?;
        Ok(LittleEndian::read_u16(bytes))
    }

    /// Write the 16-bit word at `word_offset` (little-endian).
    pub fn set_word(&mut self, word_offset: usize, value: u16) -> Result<()> {
        let bytes = self
            .data
            .get_mut(word_offset * 2..word_offset * 2 + 2)
            .ok_or_else(|| Error::InvalidParam(format!("word offset {word_offset} out of page")))?;
        LittleEndian::write_u16(bytes, value);
        Ok(())
    }

    /// Read the 32-bit word at `byte_offset` (wire byte order).
    pub fn get_dword(&self, byte_offset: usize) -> Result<u32> {
        let bytes = self
            .data
            .get(byte_offset..byte_offset + 4)
            .ok_or_else(|| Error::InvalidParam(format!("byte offset {byte_offset} out of page")))?;
        Ok(BigEndian::read_u32(bytes))
    }

    /// Write the 32-bit word at `byte_offset` (wire byte order).
    pub fn set_dword(&mut self, byte_offset: usize, value: u32) -> Result<()> {
        let bytes = self
            .data
            .get_mut(byte_offset..byte_offset + 4)
            .ok_or_else(|| Error::InvalidParam(format!("byte offset {byte_offset} out of page")))?;
        BigEndian::write_u32(bytes, value);
        Ok(())
    }
}

/// Decode the update metadata from a legacy info page.
///
/// Erased flash reads back all ones; a 0xFFFF counter means the page was
/// never initialized and counts as zero.
pub fn legacy_get_update_info(page: &InfoPage) -> Result<UpdateInfo> {
    let raw_counter = page.get_word(LEGACY_COUNTER_WORD)?;
    let counter = if raw_counter == 0xFFFF { 0 } else { raw_counter };
    let year = page.get_word(LEGACY_TIME_WORD)?;
    let month_day = page.get_word(LEGACY_TIME_WORD + 1)?;
    let hour_minute = page.get_word(LEGACY_TIME_WORD + 2)?;
    Ok(UpdateInfo {
        update_counter: u32::from(counter),
        last_update_time: UpdateTime {
            year,
            month: (month_day >> 8) as u8,
            day: (month_day & 0xFF) as u8,
            hour: (hour_minute >> 8) as u8,
            minute: (hour_minute & 0xFF) as u8,
        },
    })
}

/// Bump the counter and stamp `now` into a legacy info page.
/// All other page bytes are preserved.
#[allow(clippy::cast_possible_truncation)]
pub fn legacy_apply_update(page: &mut InfoPage, now: UpdateTime) -> Result<()> {
    let info = legacy_get_update_info(page)?;
    page.set_word(LEGACY_COUNTER_WORD, (info.update_counter as u16).wrapping_add(1))?;
    page.set_word(LEGACY_TIME_WORD, now.year)?;
    page.set_word(
        LEGACY_TIME_WORD + 1,
        (u16::from(now.month) << 8) | u16::from(now.day),
    )?;
    page.set_word(
        LEGACY_TIME_WORD + 2,
        (u16::from(now.hour) << 8) | u16::from(now.minute),
    )?;
    Ok(())
}

/// Decode the update metadata from a Gen8 info page.
pub fn gen8_get_update_info(page: &InfoPage) -> Result<UpdateInfo> {
    let raw_counter = page.get_dword(GEN8_COUNTER_OFFSET)?;
    let counter = if raw_counter == 0xFFFF_FFFF { 0 } else { raw_counter };
    Ok(UpdateInfo {
        update_counter: counter,
        last_update_time: UpdateTime {
            year: page.get_dword(GEN8_TIME_OFFSET)? as u16,
            month: page.get_dword(GEN8_TIME_OFFSET + 4)? as u8,
            day: page.get_dword(GEN8_TIME_OFFSET + 8)? as u8,
            hour: page.get_dword(GEN8_TIME_OFFSET + 12)? as u8,
            minute: page.get_dword(GEN8_TIME_OFFSET + 16)? as u8,
        },
    })
}

/// Bump the counter and stamp `now` into a Gen8 info page.
/// All other page bytes are preserved.
pub fn gen8_apply_update(page: &mut InfoPage, now: UpdateTime) -> Result<()> {
    let info = gen8_get_update_info(page)?;
    page.set_dword(GEN8_COUNTER_OFFSET, info.update_counter.wrapping_add(1))?;
    page.set_dword(GEN8_TIME_OFFSET, u32::from(now.year))?;
    page.set_dword(GEN8_TIME_OFFSET + 4, u32::from(now.month))?;
    page.set_dword(GEN8_TIME_OFFSET + 8, u32::from(now.day))?;
    page.set_dword(GEN8_TIME_OFFSET + 12, u32::from(now.hour))?;
    page.set_dword(GEN8_TIME_OFFSET + 16, u32::from(now.minute))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIME: UpdateTime = UpdateTime {
        year: 2026,
        month: 8,
        day: 23,
        hour: 14,
        minute: 30,
    };

    #[test]
    fn test_legacy_counter_increments_only_metadata() {
        let mut page = InfoPage::new(vec![0x5Au8; 128]);
        page.set_word(LEGACY_COUNTER_WORD, 7).unwrap();
        let before = page.data().to_vec();

        legacy_apply_update(&mut page, TIME).unwrap();

        let info = legacy_get_update_info(&page).unwrap();
        assert_eq!(info.update_counter, 8);
        assert_eq!(info.last_update_time, TIME);

        // Only counter and timestamp words changed.
        for (i, (a, b)) in before.iter().zip(page.data()).enumerate() {
            let word = i / 2;
            if (LEGACY_COUNTER_WORD..=LEGACY_TIME_WORD + 2).contains(&word) {
                continue;
            }
            assert_eq!(a, b, "byte {i} changed");
        }
    }

    #[test]
    fn test_legacy_uninitialized_counter_reads_zero() {
        let page = InfoPage::new(vec![0xFF; 128]);
        assert_eq!(legacy_get_update_info(&page).unwrap().update_counter, 0);

        let mut page = page;
        legacy_apply_update(&mut page, TIME).unwrap();
        assert_eq!(legacy_get_update_info(&page).unwrap().update_counter, 1);
    }

    #[test]
    fn test_gen8_round_trip() {
        let mut page = InfoPage::new(vec![0xFF; 2048]);
        gen8_apply_update(&mut page, TIME).unwrap();

        let info = gen8_get_update_info(&page).unwrap();
        assert_eq!(info.update_counter, 1);
        assert_eq!(info.last_update_time, TIME);

        gen8_apply_update(&mut page, TIME).unwrap();
        assert_eq!(gen8_get_update_info(&page).unwrap().update_counter, 2);
    }

    #[test]
    fn test_gen8_fields_keep_wire_byte_order() {
        let mut page = InfoPage::new(vec![0xFF; 2048]);
        gen8_apply_update(&mut page, TIME).unwrap();

        // Patched words sit in the page exactly as they stream over the
        // wire, so untouched bytes survive the write-back unchanged.
        assert_eq!(
            &page.data()[GEN8_COUNTER_OFFSET..GEN8_COUNTER_OFFSET + 4],
            &[0x00, 0x00, 0x00, 0x01]
        );
        // Year 2026 = 0x07EA
        assert_eq!(
            &page.data()[GEN8_TIME_OFFSET..GEN8_TIME_OFFSET + 4],
            &[0x00, 0x00, 0x07, 0xEA]
        );
    }

    #[test]
    fn test_word_accessors_bounds_checked() {
        let mut page = InfoPage::new(vec![0; 8]);
        assert!(page.get_word(3).is_ok());
        assert!(page.get_word(4).is_err());
        assert!(page.set_word(4, 0).is_err());
        assert!(page.get_dword(4).is_ok());
        assert!(page.get_dword(5).is_err());
    }
}
