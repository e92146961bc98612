//! Minimal I2C transport under the PN532 controller.
//!
//! One trait method per bus primitive, no buffering; framing and retries
//! live a layer up. The real implementation sits on the Linux i2c-dev
//! character device.

use i2cdev::core::I2CDevice;
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};

use crate::error::TransportError;

/// Bit 0 of the leading status byte: the PN532 has a frame waiting.
const STATUS_READY: u8 = 0x01;

/// Byte-level access to a controller at a fixed 7-bit address.
pub trait Transport: Send {
    /// Transmit `bytes` as one write transaction.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read up to `len` bytes; may return fewer if the controller NAKs early.
    fn read(&mut self, len: usize) -> Result<Vec<u8>, TransportError>;

    /// One-byte status poll. True iff the ready bit is set.
    fn is_ready(&mut self) -> Result<bool, TransportError>;
}

impl From<LinuxI2CError> for TransportError {
    fn from(err: LinuxI2CError) -> Self {
        TransportError(err.to_string())
    }
}

/// PN532 attached to `/dev/i2c-<bus>`.
pub struct I2cTransport {
    dev: LinuxI2CDevice,
}

impl I2cTransport {
    pub fn open(bus: u32, address: u16) -> Result<Self, TransportError> {
        let path = format!("/dev/i2c-{bus}");
        let dev = LinuxI2CDevice::new(&path, address)?;
        tracing::debug!("opened {path} at address {address:#04x}");
        Ok(Self { dev })
    }
}

impl Transport for I2cTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.dev.write(bytes)?;
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        self.dev.read(&mut buf)?;
        Ok(buf)
    }

    fn is_ready(&mut self) -> Result<bool, TransportError> {
        let mut status = [0u8; 1];
        self.dev.read(&mut status)?;
        Ok(status[0] & STATUS_READY != 0)
    }
}
