//! Information queries and device identification.
//!
//! Every query is a 4-byte command answered by a 4-byte response on the
//! command channel. The response echoes the command family (`0x52`) and
//! the query selector in the high nibble of byte 1; the 16-bit value is
//! packed nibble-wise across bytes 1..=3.

use std::time::Duration;

use log::debug;

use crate::{
    connection::ProtocolIo,
    error::{Error, Result},
    retry::{ERROR_RETRY_COUNT, RETRY_BACKOFF, with_retry},
};

/// Vendor payload requesting the hello packet.
pub const HELLO_PACKET_CMD: [u8; 1] = [0x18];

/// Command starting a controller recalibration.
pub const CALIBRATE_CMD: [u8; 4] = [0x54, 0x29, 0x00, 0x01];

/// Expected leading bytes of the recalibration response.
pub const CALIBRATE_ACK: [u8; 2] = [0x66, 0x66];

/// Recalibration can take several seconds of internal scanning.
pub const CALIBRATE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Response echo byte common to all information queries.
const QUERY_ECHO: u8 = 0x52;

/// 4-byte information queries understood by every generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQuery {
    /// Firmware project ID.
    FwId,
    /// Running firmware version.
    FwVersion,
    /// Test (solution) version.
    TestVersion,
    /// Boot code version.
    BootCodeVersion,
    /// Calibration counter.
    CalibrationCounter,
}

impl InfoQuery {
    /// Selector byte placed at command offset 1.
    #[must_use]
    pub fn selector(self) -> u8 {
        match self {
            Self::FwId => 0xF0,
            Self::FwVersion => 0x00,
            Self::TestVersion => 0xE0,
            Self::BootCodeVersion => 0x10,
            Self::CalibrationCounter => 0xD0,
        }
    }

    /// The 4-byte command for this query.
    #[must_use]
    pub fn command(self) -> [u8; 4] {
        [0x53, self.selector(), 0x00, 0x01]
    }
}

/// Validate the query echo and unpack the 16-bit value.
///
/// The response repeats the query selector in the high nibble of byte 1;
/// the remaining nibbles of bytes 1..=3 carry the value.
pub fn unpack_value(resp: &[u8], query: InfoQuery) -> Result<u16> {
    if resp.len() < 4 {
        return Err(Error::DataPattern(format!(
            "query response too short ({} bytes)",
            resp.len()
        )));
    }
    if resp[0] != QUERY_ECHO || (resp[1] & 0xF0) != (query.selector() & 0xF0) {
        return Err(Error::DataPattern(format!(
            "bad echo for {query:?}: {:02x} {:02x}",
            resp[0], resp[1]
        )));
    }

    let high = ((resp[1] & 0x0F) << 4) | (resp[2] >> 4);
    let low = ((resp[2] & 0x0F) << 4) | (resp[3] >> 4);
    Ok(u16::from_be_bytes([high, low]))
}

/// Run one information query, retrying transient transport failures.
pub fn read_info(io: &mut dyn ProtocolIo, query: InfoQuery, timeout: Duration) -> Result<u16> {
    with_retry(ERROR_RETRY_COUNT, RETRY_BACKOFF, || {
        io.send_command(&query.command())?;
        let resp = io.read_response(4, timeout)?;
        unpack_value(&resp, query)
    })
}

/// Solution ID is the high byte of the firmware version.
#[must_use]
pub fn solution_id(fw_version: u16) -> u8 {
    (fw_version >> 8) as u8
}

/// Raw hello packet: mode code plus the boot-code version echoed by
/// recovery-mode controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloPacket {
    /// Mode/type code (first response byte).
    pub code: u8,
    /// Boot-code version carried in bytes 2..=3.
    pub bc_version: u16,
}

/// Request the hello packet, retrying transient transport failures.
pub fn hello_packet(io: &mut dyn ProtocolIo, timeout: Duration) -> Result<HelloPacket> {
    with_retry(ERROR_RETRY_COUNT, RETRY_BACKOFF, || {
        io.send_vendor(&HELLO_PACKET_CMD)?;
        let resp = io.read_response(4, timeout)?;
        let hello = HelloPacket {
            code: resp[0],
            bc_version: u16::from_be_bytes([resp[2], resp[3]]),
        };
        debug!("hello packet: code {:#04x}, bc {:#06x}", hello.code, hello.bc_version);
        Ok(hello)
    })
}

/// Trigger a recalibration and wait for the controller to acknowledge.
pub fn calibrate(io: &mut dyn ProtocolIo) -> Result<()> {
    io.send_command(&CALIBRATE_CMD)?;
    let resp = io.read_response(2, CALIBRATE_TIMEOUT)?;
    if resp[..2] != CALIBRATE_ACK {
        return Err(Error::DataPattern(format!(
            "calibration response {:02x} {:02x}",
            resp[0], resp[1]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_commands() {
        assert_eq!(InfoQuery::FwId.command(), [0x53, 0xF0, 0x00, 0x01]);
        assert_eq!(InfoQuery::FwVersion.command(), [0x53, 0x00, 0x00, 0x01]);
        assert_eq!(InfoQuery::TestVersion.command(), [0x53, 0xE0, 0x00, 0x01]);
        assert_eq!(InfoQuery::BootCodeVersion.command(), [0x53, 0x10, 0x00, 0x01]);
        assert_eq!(
            InfoQuery::CalibrationCounter.command(),
            [0x53, 0xD0, 0x00, 0x01]
        );
    }

    #[test]
    fn test_unpack_value_nibble_packing() {
        // Response 0x52 0xF1 0x23 0x40 carries value 0x1234 for FW ID.
        let value = unpack_value(&[0x52, 0xF1, 0x23, 0x40], InfoQuery::FwId).unwrap();
        assert_eq!(value, 0x1234);
    }

    #[test]
    fn test_unpack_value_fw_version() {
        // FW version echo nibble is 0x0.
        let value = unpack_value(&[0x52, 0x05, 0x92, 0x10], InfoQuery::FwVersion).unwrap();
        assert_eq!(value, 0x5921);
    }

    #[test]
    fn test_unpack_rejects_wrong_echo_byte() {
        let err = unpack_value(&[0x53, 0xF1, 0x23, 0x40], InfoQuery::FwId).unwrap_err();
        assert!(matches!(err, Error::DataPattern(_)));
    }

    #[test]
    fn test_unpack_rejects_wrong_selector_nibble() {
        // Test-version echo arriving for a FW ID query.
        let err = unpack_value(&[0x52, 0xE1, 0x23, 0x40], InfoQuery::FwId).unwrap_err();
        assert!(matches!(err, Error::DataPattern(_)));
    }

    #[test]
    fn test_solution_id_is_high_byte() {
        assert_eq!(solution_id(0x5921), 0x59);
        assert_eq!(solution_id(0x0001), 0x00);
    }
}
