//! Arduino serial reader.
//!
//! The board streams `key: value` text frames at a fixed baud rate, each frame
//! ending in a terminator token (`txend` by default):
//!
//! ```toml
//! [devices.lac]
//! family = "arduino"
//! baud_rate = 38400
//! terminator = "txend"
//! read_timeout_ms = 1000
//! ```
//!
//! A read that times out returns `Ok(None)` with any partial frame kept for the
//! next call, so one `read_next` never blocks longer than `read_timeout_ms`.

use super::parser::{FrameSplitter, SampleParser};
use super::DeviceReader;
use crate::config::DeviceSettings;
use crate::core::Sample;
use crate::error::{AppResult, DaqError};
use tracing::{debug, info};

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::io::Read;

const READ_CHUNK: usize = 256;

/// Reader for the Arduino `key: value` frame protocol.
pub struct ArduinoReader {
    path: String,
    #[cfg(feature = "instrument_serial")]
    port: Option<Box<dyn SerialPort>>,
    splitter: FrameSplitter,
    parser: SampleParser,
}

impl ArduinoReader {
    /// Opens the serial device at `path`.
    #[cfg(feature = "instrument_serial")]
    pub fn open(path: &str, device: &DeviceSettings) -> AppResult<Self> {
        info!("Opening Arduino reader on {} at {} baud", path, device.baud_rate);
        let port = serialport::new(path, device.baud_rate)
            .timeout(device.read_timeout())
            .open()
            .map_err(|e| DaqError::DeviceOpen {
                path: path.to_string(),
                details: e.to_string(),
            })?;

        Ok(Self {
            path: path.to_string(),
            port: Some(port),
            splitter: FrameSplitter::new(&device.terminator),
            parser: SampleParser::new(device.terminator.clone()),
        })
    }

    /// Serial support is compiled out; opening always fails.
    #[cfg(not(feature = "instrument_serial"))]
    pub fn open(path: &str, _device: &DeviceSettings) -> AppResult<Self> {
        debug!("Refusing to open {}: serial support disabled", path);
        Err(DaqError::SerialFeatureDisabled)
    }

    fn take_sample(&mut self) -> Option<Option<Sample>> {
        let frame = self.splitter.next_frame()?;
        let sample = self.parser.parse(&frame);
        if sample.is_none() {
            debug!("[{}] Rejected frame of {} bytes", self.path, frame.len());
        }
        Some(sample)
    }
}

#[cfg(feature = "instrument_serial")]
impl DeviceReader for ArduinoReader {
    fn read_next(&mut self) -> AppResult<Option<Sample>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(sample) = self.take_sample() {
                return Ok(sample);
            }
            let port = self.port.as_mut().ok_or(DaqError::SerialPortNotConnected)?;
            match port.read(&mut chunk) {
                Ok(0) => return Err(DaqError::SerialUnexpectedEof),
                Ok(n) => self.splitter.extend(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.path);
        }
    }

    fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl DeviceReader for ArduinoReader {
    fn read_next(&mut self) -> AppResult<Option<Sample>> {
        Ok(self.take_sample().flatten())
    }

    fn close(&mut self) {}

    fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for ArduinoReader {
    fn drop(&mut self) {
        self.close();
    }
}
