//! Device readers and the factory that selects them per channel.
//!
//! Every device family implements [`DeviceReader`]. A worker never picks a
//! family itself: it asks the [`ReaderRegistry`] to open the reader registered
//! for its channel, and a channel without a registration is rejected at bind
//! time with [`DaqError::UnsupportedDevice`].

pub mod arduino;
pub mod mock;
pub mod parser;

pub use arduino::ArduinoReader;
pub use mock::{ScriptStep, ScriptedReader, SimulatedReader};
pub use parser::{FrameSplitter, SampleParser};

use crate::channel::ChannelType;
use crate::config::{DeviceFamily, Settings};
use crate::core::Sample;
use crate::error::{AppResult, DaqError};
use std::collections::HashMap;
use tracing::debug;

/// A source of samples owning one device handle.
///
/// `read_next` may block for the device's natural latency, bounded by the
/// reader's own timeout. `Ok(None)` means "no sample this time" (a rejected
/// frame or an idle line) and is not an error.
pub trait DeviceReader: Send {
    /// Reads until one frame is available and decodes it.
    fn read_next(&mut self) -> AppResult<Option<Sample>>;

    /// Releases the device handle. Idempotent.
    fn close(&mut self);

    /// Path the reader was opened on.
    fn path(&self) -> &str;
}

type ReaderFactory = Box<dyn Fn(&str) -> AppResult<Box<dyn DeviceReader>> + Send + Sync>;

/// Explicit channel → device family factory.
pub struct ReaderRegistry {
    factories: HashMap<ChannelType, ReaderFactory>,
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers the configured family of every channel in `settings.devices`.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        let mut registry = Self::new();
        for (channel, device) in settings.device_settings()? {
            debug!("Registering {:?} reader for {}", device.family, channel);
            match device.family {
                DeviceFamily::Arduino => registry.register(channel, move |path| {
                    Ok(Box::new(ArduinoReader::open(path, &device)?) as Box<dyn DeviceReader>)
                }),
                DeviceFamily::Simulated => registry.register(channel, move |path| {
                    Ok(Box::new(SimulatedReader::new(path, device.sample_period()))
                        as Box<dyn DeviceReader>)
                }),
            }
        }
        Ok(registry)
    }

    /// Registers `factory` for `channel`, replacing any previous one.
    pub fn register<F>(&mut self, channel: ChannelType, factory: F)
    where
        F: Fn(&str) -> AppResult<Box<dyn DeviceReader>> + Send + Sync + 'static,
    {
        self.factories.insert(channel, Box::new(factory));
    }

    /// Whether a device family is registered for `channel`.
    pub fn supports(&self, channel: ChannelType) -> bool {
        self.factories.contains_key(&channel)
    }

    /// Opens the reader registered for `channel` on `path`.
    pub fn create(&self, channel: ChannelType, path: &str) -> AppResult<Box<dyn DeviceReader>> {
        let factory = self
            .factories
            .get(&channel)
            .ok_or(DaqError::UnsupportedDevice(channel))?;
        factory(path)
    }
}
