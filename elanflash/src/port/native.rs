//! Native HID transport using the `hidapi` crate.
//!
//! This module provides the HID implementation for native platforms
//! (Linux, macOS, Windows).

use {
    crate::{
        error::{Error, Result},
        port::{BusType, ELAN_VID, HidPort, RECOVERY_PID},
    },
    hidapi::{HidApi, HidDevice},
    log::{debug, trace},
    std::time::Duration,
};

fn map_bus(bus: hidapi::BusType) -> BusType {
    match bus {
        hidapi::BusType::Usb => BusType::Usb,
        hidapi::BusType::I2c => BusType::I2c,
        hidapi::BusType::Spi => BusType::Spi,
        _ => BusType::Unknown,
    }
}

/// Native HID port backed by `hidapi`.
pub struct NativeHidPort {
    api: HidApi,
    device: HidDevice,
    vid: u16,
    pid: u16,
    bus: BusType,
    name: String,
}

impl NativeHidPort {
    /// Open an ELAN touch controller.
    ///
    /// With `pid == 0` the first device matching the ELAN vendor ID is
    /// taken. With an explicit `pid`, the recovery-mode product ID is
    /// probed as a fallback so a controller stranded in boot code is
    /// still reachable.
    pub fn open(pid: u16) -> Result<Self> {
        let api = HidApi::new().map_err(|e| Error::NoInterface(e.to_string()))?;

        let info = Self::find_device(&api, pid)
            .or_else(|| {
                if pid != 0 && pid != RECOVERY_PID {
                    debug!("PID {pid:#06x} not found, probing recovery PID {RECOVERY_PID:#06x}");
                    Self::find_device(&api, RECOVERY_PID)
                } else {
                    None
                }
            })
            .ok_or(Error::DeviceNotFound)?;

        let vid = info.vendor_id();
        let found_pid = info.product_id();
        let bus = map_bus(info.bus_type());
        let name = info
            .product_string()
            .map_or_else(|| info.path().to_string_lossy().into_owned(), String::from);

        let device = info
            .open_device(&api)
            .map_err(|e| Error::NoInterface(e.to_string()))?;

        debug!("Opened {name} (VID {vid:#06x}, PID {found_pid:#06x}, bus {bus:?})");

        Ok(Self {
            api,
            device,
            vid,
            pid: found_pid,
            bus,
            name,
        })
    }

    fn find_device(api: &HidApi, pid: u16) -> Option<&hidapi::DeviceInfo> {
        api.device_list()
            .find(|d| d.vendor_id() == ELAN_VID && (pid == 0 || d.product_id() == pid))
    }

    /// Product ID of the opened device.
    #[must_use]
    pub fn pid(&self) -> u16 {
        self.pid
    }
}

impl HidPort for NativeHidPort {
    fn write_raw(&mut self, buf: &[u8], _timeout: Duration) -> Result<()> {
        trace!("HID write {} bytes", buf.len());
        let written = self
            .device
            .write(buf)
            .map_err(|e| Error::Io(e.to_string()))?;
        if written != buf.len() {
            return Err(Error::Io(format!(
                "short write ({written} of {} bytes)",
                buf.len()
            )));
        }
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let n = self
            .device
            .read_timeout(buf, ms)
            .map_err(|e| Error::Io(e.to_string()))?;
        if n == 0 {
            return Err(Error::IoTimeout(format!(
                "no input report within {} ms",
                timeout.as_millis()
            )));
        }
        trace!("HID read {n} bytes");
        Ok(n)
    }

    fn bus_type(&self) -> BusType {
        self.bus
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn reconnect(&mut self) -> Result<()> {
        debug!("Reopening HID device VID {:#06x} PID {:#06x}", self.vid, self.pid);
        self.api
            .refresh_devices()
            .map_err(|e| Error::Io(e.to_string()))?;
        // The controller may come back under the recovery PID after a reset.
        let info = Self::find_device(&self.api, self.pid)
            .or_else(|| Self::find_device(&self.api, 0))
            .ok_or_else(|| Error::Io("device did not re-enumerate".into()))?;
        self.pid = info.product_id();
        self.bus = map_bus(info.bus_type());
        self.device = info
            .open_device(&self.api)
            .map_err(|e| Error::Io(e.to_string()))?;
        Ok(())
    }
}
