//! HID report codec.
//!
//! Every command travels as one fixed 33-byte output report and every
//! response as one 65-byte input report.
//!
//! ## Output Report Format
//!
//! ```text
//! +-----------+--------+---------+-----------------+---------+
//! | Report ID | Bridge | Cmd Len |     Command     | Padding |
//! +-----------+--------+---------+-----------------+---------+
//! |  1 byte   | 1 byte | 1 byte  |   1..30 bytes   |  zeros  |
//! +-----------+--------+---------+-----------------+---------+
//! |   0x03    |  0x00  |   len   |    command      |  0x00   |
//! +-----------+--------+---------+-----------------+---------+
//! ```
//!
//! Vendor frames (hello packet, slave address) skip the bridge/length
//! header: the payload follows the report ID directly.
//!
//! ## Input Report Format
//!
//! ```text
//! +-----------+-------------+-----------------+
//! | Report ID | Data Length |      Data       |
//! +-----------+-------------+-----------------+
//! |   0x02    |   1 byte    |  up to 63 bytes |
//! +-----------+-------------+-----------------+
//! ```

use crate::{
    error::{Error, Result},
    port::{
        FINGER_REPORT_ID, INPUT_REPORT_LEN, OUTPUT_REPORT_ID, OUTPUT_REPORT_LEN, PEN_DEBUG_REPORT_ID,
        PEN_REPORT_ID,
    },
};

/// Bridge command: forward a firmware page fragment to the IAP engine.
pub const BRIDGE_RECEIVE_PAGE: u8 = 0x21;

/// Bridge command: burn the buffered page and acknowledge.
pub const BRIDGE_WRITE_FLASH: u8 = 0x22;

/// Bridge command: power down and reset the controller.
pub const BRIDGE_RESET: u8 = 0x11;

/// Largest command that fits one output report after the 3-byte header.
pub const MAX_COMMAND_LEN: usize = OUTPUT_REPORT_LEN - 3;

/// Largest vendor payload that fits after the report ID.
pub const MAX_VENDOR_LEN: usize = OUTPUT_REPORT_LEN - 1;

/// Largest data payload of one input report after the 2-byte header.
pub const MAX_RESPONSE_DATA_LEN: usize = INPUT_REPORT_LEN - 2;

/// A single 33-byte output report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    buf: [u8; OUTPUT_REPORT_LEN],
}

impl CommandFrame {
    /// Build a plain touch-controller command frame (bridge byte 0x00).
    pub fn command(cmd: &[u8]) -> Result<Self> {
        if cmd.is_empty() {
            return Err(Error::InvalidParam("empty command".into()));
        }
        Self::bridge(0x00, cmd)
    }

    /// Build a bridge command frame carrying `payload`.
    ///
    /// Used for page transfer (`0x21`), flash commit (`0x22`) and reset
    /// (`0x11`) in addition to plain commands. The flash-commit frame
    /// carries no payload at all.
    #[allow(clippy::cast_possible_truncation)]
    pub fn bridge(bridge_cmd: u8, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_COMMAND_LEN {
            return Err(Error::InvalidParam(format!(
                "command length {} over {MAX_COMMAND_LEN}",
                payload.len()
            )));
        }
        let mut buf = [0u8; OUTPUT_REPORT_LEN];
        buf[0] = OUTPUT_REPORT_ID;
        buf[1] = bridge_cmd;
        buf[2] = payload.len() as u8; // length checked above
        buf[3..3 + payload.len()].copy_from_slice(payload);
        Ok(Self { buf })
    }

    /// Build a vendor frame: payload follows the report ID directly.
    pub fn vendor(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() || payload.len() > MAX_VENDOR_LEN {
            return Err(Error::InvalidParam(format!(
                "vendor payload length {} outside 1..={MAX_VENDOR_LEN}",
                payload.len()
            )));
        }
        let mut buf = [0u8; OUTPUT_REPORT_LEN];
        buf[0] = OUTPUT_REPORT_ID;
        buf[1..1 + payload.len()].copy_from_slice(payload);
        Ok(Self { buf })
    }

    /// The raw report bytes, always the full 33.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Extract `data_len` response bytes from one raw input report.
///
/// The report ID must be the expected command-response ID or one of the
/// touch report IDs (finger, pen, pen debug); anything else is a
/// [`Error::DataPattern`]. For a command response with `strip_header`
/// set and a payload that fits the data area, the 2-byte
/// `[report_id, data_len]` header is stripped; touch reports and
/// oversize reads are returned raw from the front of the report.
pub fn decode_response(
    raw: &[u8],
    expected_report_id: u8,
    data_len: usize,
    strip_header: bool,
) -> Result<Vec<u8>> {
    if raw.is_empty() || data_len == 0 {
        return Err(Error::InvalidParam("empty response read".into()));
    }

    let report_id = raw[0];
    if report_id != expected_report_id
        && report_id != FINGER_REPORT_ID
        && report_id != PEN_REPORT_ID
        && report_id != PEN_DEBUG_REPORT_ID
    {
        return Err(Error::DataPattern(format!(
            "unexpected report ID {report_id:#04x}"
        )));
    }

    let strip = report_id == expected_report_id && strip_header && data_len <= MAX_RESPONSE_DATA_LEN;
    let start = if strip { 2 } else { 0 };
    if raw.len() < start + data_len {
        return Err(Error::DataPattern(format!(
            "response too short ({} bytes, need {})",
            raw.len(),
            start + data_len
        )));
    }

    Ok(raw[start..start + data_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::INPUT_REPORT_ID;

    #[test]
    fn test_command_frame_layout() {
        let frame = CommandFrame::command(&[0x53, 0xF0, 0x00, 0x01]).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), OUTPUT_REPORT_LEN);
        assert_eq!(bytes[0], 0x03);
        assert_eq!(bytes[1], 0x00);
        assert_eq!(bytes[2], 4);
        assert_eq!(&bytes[3..7], &[0x53, 0xF0, 0x00, 0x01]);
        // Remainder zero-padded
        assert!(bytes[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bridge_frame_layout() {
        let payload = [0xAA; 28];
        let frame = CommandFrame::bridge(BRIDGE_RECEIVE_PAGE, &payload).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(bytes[1], 0x21);
        assert_eq!(bytes[2], 28);
        assert_eq!(&bytes[3..31], &payload);
        assert_eq!(&bytes[31..], &[0, 0]);
    }

    #[test]
    fn test_empty_bridge_frame() {
        // Flash commit: bridge byte only, zero command length.
        let frame = CommandFrame::bridge(BRIDGE_WRITE_FLASH, &[]).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(bytes[0], 0x03);
        assert_eq!(bytes[1], 0x22);
        assert_eq!(bytes[2], 0);
        assert!(bytes[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_vendor_frame_layout() {
        let frame = CommandFrame::vendor(&[0x18]).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(bytes[0], 0x03);
        assert_eq!(bytes[1], 0x18);
        assert!(bytes[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_command_length_bounds() {
        assert!(CommandFrame::command(&[]).is_err());
        assert!(CommandFrame::command(&[0u8; MAX_COMMAND_LEN]).is_ok());
        assert!(CommandFrame::command(&[0u8; MAX_COMMAND_LEN + 1]).is_err());
    }

    #[test]
    fn test_decode_strips_header() {
        let mut raw = vec![INPUT_REPORT_ID, 4, 0x52, 0xF1, 0x23, 0x41];
        raw.resize(INPUT_REPORT_LEN, 0);
        let data = decode_response(&raw, INPUT_REPORT_ID, 4, true).unwrap();
        assert_eq!(data, &[0x52, 0xF1, 0x23, 0x41]);
    }

    #[test]
    fn test_decode_unfiltered_keeps_header() {
        let mut raw = vec![INPUT_REPORT_ID, 4, 0x52, 0xF1, 0x23, 0x41];
        raw.resize(INPUT_REPORT_LEN, 0);
        let data = decode_response(&raw, INPUT_REPORT_ID, 6, false).unwrap();
        assert_eq!(data, &[INPUT_REPORT_ID, 4, 0x52, 0xF1, 0x23, 0x41]);
    }

    #[test]
    fn test_decode_touch_report_passthrough() {
        // A finger report arriving instead of the command response is
        // returned raw, never stripped.
        let mut raw = vec![FINGER_REPORT_ID, 0xDE, 0xAD];
        raw.resize(INPUT_REPORT_LEN, 0);
        let data = decode_response(&raw, INPUT_REPORT_ID, 3, true).unwrap();
        assert_eq!(data, &[FINGER_REPORT_ID, 0xDE, 0xAD]);
    }

    #[test]
    fn test_decode_rejects_unknown_report_id() {
        let raw = [0x42u8; INPUT_REPORT_LEN];
        let err = decode_response(&raw, INPUT_REPORT_ID, 4, true).unwrap_err();
        assert!(matches!(err, Error::DataPattern(_)));
    }

    #[test]
    fn test_decode_oversize_request_keeps_header() {
        let mut raw = vec![INPUT_REPORT_ID, 63];
        raw.resize(INPUT_REPORT_LEN, 0x55);
        let data = decode_response(&raw, INPUT_REPORT_ID, INPUT_REPORT_LEN, true).unwrap();
        assert_eq!(data.len(), INPUT_REPORT_LEN);
        assert_eq!(data[0], INPUT_REPORT_ID);
    }
}
