//! Command/response channel over a HID port.
//!
//! [`Connection`] pairs a [`HidPort`] with the report codec so the rest
//! of the crate can speak in commands and responses instead of raw
//! reports. The [`ProtocolIo`] trait keeps the flash protocol
//! implementations object-safe and testable against scripted ports.

use std::time::Duration;

use log::trace;

use crate::{
    error::Result,
    port::{BusType, DEFAULT_TIMEOUT, HidPort, INPUT_REPORT_ID, INPUT_REPORT_LEN},
    protocol::codec::{self, CommandFrame},
};

/// Object-safe command/response channel used by the flash protocols.
pub trait ProtocolIo {
    /// Send a plain touch-controller command.
    fn send_command(&mut self, cmd: &[u8]) -> Result<()>;

    /// Send a bridge command carrying `payload`.
    fn send_bridge(&mut self, bridge_cmd: u8, payload: &[u8]) -> Result<()>;

    /// Send a vendor frame (payload directly after the report ID).
    fn send_vendor(&mut self, payload: &[u8]) -> Result<()>;

    /// Read `data_len` response bytes, stripping the input report header.
    fn read_response(&mut self, data_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Read `data_len` bytes without stripping the report header.
    fn read_raw_response(&mut self, data_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Bus the underlying device is attached over.
    fn bus_type(&self) -> BusType;
}

/// Command/response channel over a concrete HID port.
pub struct Connection<P: HidPort> {
    port: P,
    timeout: Duration,
}

impl<P: HidPort> Connection<P> {
    /// Wrap a port with the default command timeout.
    pub fn new(port: P) -> Self {
        Self {
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace the default command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The default command timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Device name of the underlying port.
    #[must_use]
    pub fn name(&self) -> &str {
        self.port.name()
    }

    /// Reopen the underlying device after a reset.
    pub fn reconnect(&mut self) -> Result<()> {
        self.port.reconnect()
    }

    fn send_frame(&mut self, frame: &CommandFrame) -> Result<()> {
        trace!("send {:02x?}", frame.as_bytes());
        self.port.write_raw(frame.as_bytes(), self.timeout)
    }

    fn read(&mut self, data_len: usize, timeout: Duration, strip: bool) -> Result<Vec<u8>> {
        let mut raw = [0u8; INPUT_REPORT_LEN];
        self.port.read_raw(&mut raw, timeout)?;
        codec::decode_response(&raw, INPUT_REPORT_ID, data_len, strip)
    }
}

impl<P: HidPort> ProtocolIo for Connection<P> {
    fn send_command(&mut self, cmd: &[u8]) -> Result<()> {
        self.send_frame(&CommandFrame::command(cmd)?)
    }

    fn send_bridge(&mut self, bridge_cmd: u8, payload: &[u8]) -> Result<()> {
        self.send_frame(&CommandFrame::bridge(bridge_cmd, payload)?)
    }

    fn send_vendor(&mut self, payload: &[u8]) -> Result<()> {
        self.send_frame(&CommandFrame::vendor(payload)?)
    }

    fn read_response(&mut self, data_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.read(data_len, timeout, true)
    }

    fn read_raw_response(&mut self, data_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.read(data_len, timeout, false)
    }

    fn bus_type(&self) -> BusType {
        self.port.bus_type()
    }
}
