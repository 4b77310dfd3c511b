//! Firmware image files.
//!
//! An image is a flat flash dump; the flash pipeline slices it into
//! page-sized chunks. The remark ID sits at a fixed offset mirroring its
//! position in device ROM.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Byte offset of the 16-bit remark ID in a legacy image
/// (word address 0x1F of the info block, little-endian).
pub const LEGACY_REMARK_ID_OFFSET: usize = 0x3E;

/// Byte offset of the 16-byte remark ID in a Gen8 image.
pub const GEN8_REMARK_ID_OFFSET: usize = 0x2200;

/// Remark ID reported by ICs without remarking.
pub const NON_REMARK_SENTINEL: u16 = 0xFFFF;

/// Number of pages needed to hold `size` bytes of image data.
#[must_use]
pub fn compute_page_count(size: u32, page_data_size: u32) -> u32 {
    debug_assert!(page_data_size > 0);
    size.div_ceil(page_data_size)
}

/// An in-memory firmware image.
#[derive(Debug, Clone)]
pub struct FirmwareFile {
    data: Vec<u8>,
}

impl FirmwareFile {
    /// Load an image from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(data) => Ok(Self { data }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(path.display().to_string()))
            },
            Err(e) => Err(Error::FileIo(e)),
        }
    }

    /// Wrap raw image bytes.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Image size in bytes.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Number of pages the image occupies at the given page data size.
    #[must_use]
    pub fn page_count(&self, page_data_size: u32) -> u32 {
        compute_page_count(self.size(), page_data_size)
    }

    /// Copy page `index` into `buf`, zero-padding past the image tail.
    ///
    /// The page data size is `buf.len()`.
    pub fn read_page(&self, index: u32, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::InvalidParam("zero-size page buffer".into()));
        }
        let start = index as usize * buf.len();
        if start >= self.data.len() {
            return Err(Error::InvalidParam(format!(
                "page {index} beyond image ({} bytes)",
                self.data.len()
            )));
        }
        let end = (start + buf.len()).min(self.data.len());
        let copied = end - start;
        buf[..copied].copy_from_slice(&self.data[start..end]);
        buf[copied..].fill(0);
        Ok(())
    }

    /// Remark ID of a legacy image, `None` when the image has no remark
    /// section or carries the non-remark sentinel.
    #[must_use]
    pub fn remark_id(&self) -> Option<u16> {
        let bytes = self
            .data
            .get(LEGACY_REMARK_ID_OFFSET..LEGACY_REMARK_ID_OFFSET + 2)?;
        let id = LittleEndian::read_u16(bytes);
        (id != NON_REMARK_SENTINEL).then_some(id)
    }

    /// 16-byte remark ID of a Gen8 image, `None` when absent or all-0xFF.
    #[must_use]
    pub fn gen8_remark_id(&self) -> Option<[u8; 16]> {
        let bytes = self
            .data
            .get(GEN8_REMARK_ID_OFFSET..GEN8_REMARK_ID_OFFSET + 16)?;
        if bytes.iter().all(|&b| b == 0xFF) {
            return None;
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(bytes);
        Some(id)
    }
}
