//! Application settings.
//!
//! Settings are layered with the `config` crate:
//!
//! 1. Built-in defaults (every field carries a serde default)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `SERIAL_DAQ_`, using `__` between
//!    nested keys (e.g. `SERIAL_DAQ_APPLICATION__EMISSION_INTERVAL_MS=250`)
//!
//! Channel keys in `discovery.rules` and `devices` are channel names
//! (`vac`, `lac`), matched case-insensitively.

use crate::channel::ChannelType;
use crate::error::{AppResult, DaqError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Top-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Acquisition timing and session policy
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Device discovery
    #[serde(default)]
    pub discovery: DiscoverySettings,
    /// Per-channel device configuration, keyed by channel name
    #[serde(default = "default_devices")]
    pub devices: BTreeMap<String, DeviceSettings>,
    /// Session persistence
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Acquisition timing and session policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationSettings {
    /// Minimum time between two batch emissions of one worker
    #[serde(default = "default_emission_interval_ms")]
    pub emission_interval_ms: u64,

    /// Sleep increment of a paused worker loop
    #[serde(default = "default_pause_sleep_ms")]
    pub pause_sleep_ms: u64,

    /// Start a worker as soon as its device is bound
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,

    /// Buffer length after which a worker logs a single memory warning
    #[serde(default = "default_buffer_warning_samples")]
    pub buffer_warning_samples: usize,

    /// Number of entries kept by the event log
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

/// Which enumeration source discovery polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumerationKind {
    /// List the entries of `lookup_dir`
    Directory,
    /// Ask the `serialport` crate for attached ports
    Serialport,
}

/// Device discovery settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverySettings {
    /// Directory whose entries are device identities
    #[serde(default = "default_lookup_dir")]
    pub lookup_dir: PathBuf,

    /// Interval between two enumeration rounds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Enumeration source
    #[serde(default = "default_enumeration_kind")]
    pub source: EnumerationKind,

    /// Identity substring per channel; channels without a rule are never discovered
    #[serde(default = "default_rules")]
    pub rules: BTreeMap<String, String>,
}

/// Device family implemented for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// Fixed-baud serial board terminating frames with a token
    Arduino,
    /// Synthetic generator, no hardware required
    Simulated,
}

/// Device settings for one channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceSettings {
    /// Device family used to read this channel
    pub family: DeviceFamily,

    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Frame terminator token
    #[serde(default = "default_terminator")]
    pub terminator: String,

    /// Upper bound of a single blocking read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Sample period of the simulated family
    #[serde(default = "default_sample_period_ms")]
    pub sample_period_ms: u64,
}

/// Session persistence settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    /// Directory where session files are written
    #[serde(default = "default_storage_path")]
    pub default_path: PathBuf,
}

impl Settings {
    /// Loads settings from defaults, an optional TOML file and the environment.
    ///
    /// A given `path` must exist; without one only defaults and environment apply.
    pub fn new(path: Option<&str>) -> AppResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!("Loading configuration from: {}", path);
            builder = builder.add_source(File::with_name(path).required(true));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("SERIAL_DAQ")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", settings);
        Ok(settings)
    }

    /// Validates semantic constraints that deserialization cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.application.emission_interval_ms == 0 {
            return Err(invalid("application.emission_interval_ms must be greater than 0"));
        }
        if self.application.pause_sleep_ms == 0 {
            return Err(invalid("application.pause_sleep_ms must be greater than 0"));
        }
        if self.discovery.poll_interval_ms == 0 {
            return Err(invalid("discovery.poll_interval_ms must be greater than 0"));
        }
        for (key, needle) in &self.discovery.rules {
            concrete_channel(key, "discovery.rules")?;
            if needle.is_empty() {
                return Err(invalid(format!("discovery rule for '{}' is empty", key)));
            }
        }
        for (key, device) in &self.devices {
            concrete_channel(key, "devices")?;
            if device.baud_rate == 0 {
                return Err(invalid(format!("devices.{}.baud_rate must be greater than 0", key)));
            }
            if device.terminator.is_empty() {
                return Err(invalid(format!("devices.{}.terminator must not be empty", key)));
            }
            if device.read_timeout_ms == 0 {
                return Err(invalid(format!(
                    "devices.{}.read_timeout_ms must be greater than 0",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Identification rules keyed by channel.
    pub fn identification_rules(&self) -> AppResult<Vec<(ChannelType, String)>> {
        self.discovery
            .rules
            .iter()
            .map(|(key, needle)| Ok((concrete_channel(key, "discovery.rules")?, needle.clone())))
            .collect()
    }

    /// Device settings keyed by channel.
    pub fn device_settings(&self) -> AppResult<Vec<(ChannelType, DeviceSettings)>> {
        self.devices
            .iter()
            .map(|(key, device)| Ok((concrete_channel(key, "devices")?, device.clone())))
            .collect()
    }

    /// Renders the settings as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DaqError::Configuration(e.to_string()))
    }
}

impl ApplicationSettings {
    /// Emission throttle as a duration.
    pub fn emission_interval(&self) -> Duration {
        Duration::from_millis(self.emission_interval_ms)
    }

    /// Pause sleep increment as a duration.
    pub fn pause_sleep(&self) -> Duration {
        Duration::from_millis(self.pause_sleep_ms)
    }
}

impl DiscoverySettings {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl DeviceSettings {
    /// Settings for `family` with every other field at its default.
    pub fn for_family(family: DeviceFamily) -> Self {
        Self {
            family,
            baud_rate: default_baud_rate(),
            terminator: default_terminator(),
            read_timeout_ms: default_read_timeout_ms(),
            sample_period_ms: default_sample_period_ms(),
        }
    }

    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Simulated sample period as a duration.
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings::default(),
            discovery: DiscoverySettings::default(),
            devices: default_devices(),
            storage: StorageSettings::default(),
        }
    }
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            emission_interval_ms: default_emission_interval_ms(),
            pause_sleep_ms: default_pause_sleep_ms(),
            auto_start: default_auto_start(),
            buffer_warning_samples: default_buffer_warning_samples(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            lookup_dir: default_lookup_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            source: default_enumeration_kind(),
            rules: default_rules(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            default_path: default_storage_path(),
        }
    }
}

fn invalid(message: impl Into<String>) -> DaqError {
    DaqError::Configuration(message.into())
}

fn concrete_channel(key: &str, section: &str) -> AppResult<ChannelType> {
    let channel: ChannelType = key
        .parse()
        .map_err(|e| invalid(format!("{}: {}", section, e)))?;
    if channel.is_all() {
        return Err(invalid(format!("{}: '{}' is not a concrete channel", section, key)));
    }
    Ok(channel)
}

// Default value functions
fn default_emission_interval_ms() -> u64 {
    500
}
fn default_pause_sleep_ms() -> u64 {
    500
}
fn default_auto_start() -> bool {
    true
}
fn default_buffer_warning_samples() -> usize {
    1_000_000
}
fn default_log_capacity() -> usize {
    1000
}
fn default_lookup_dir() -> PathBuf {
    PathBuf::from("/dev/serial/by-id")
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_enumeration_kind() -> EnumerationKind {
    EnumerationKind::Directory
}
fn default_rules() -> BTreeMap<String, String> {
    BTreeMap::from([("lac".to_string(), "Arduino".to_string())])
}
fn default_devices() -> BTreeMap<String, DeviceSettings> {
    BTreeMap::from([(
        "lac".to_string(),
        DeviceSettings::for_family(DeviceFamily::Arduino),
    )])
}
fn default_baud_rate() -> u32 {
    38400
}
fn default_terminator() -> String {
    "txend".to_string()
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_sample_period_ms() -> u64 {
    100
}
fn default_storage_path() -> PathBuf {
    PathBuf::from(".")
}
