//! Background device discovery.
//!
//! Discovery resolves, for each channel with an identification rule, the path
//! of an attached device whose identity contains the rule's substring. It
//! polls an [`EnumerationSource`] at a fixed interval on its own thread and
//! emits events toward the coordinator:
//!
//! - `Bound { channel, path }` immediately when a channel is first matched
//! - `AllFound` once, after every configured channel has been bound
//!
//! Bindings are monotonic: a found channel is never reported again and never
//! returns to not-found within one run. A missing lookup directory simply
//! means nothing is attached yet.

use crate::channel::ChannelType;
use crate::config::{DiscoverySettings, EnumerationKind};
use crate::core::DeviceBinding;
use crate::error::{AppResult, DaqError};
use crate::log_capture::LogSink;
use crate::messages::{AcquisitionEvent, DiscoveryEvent, EventSender};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

const LOG_SOURCE: &str = "discovery";

/// One attached device as seen by an enumeration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Identity string matched against rules
    pub identity: String,
    /// Path used to open the device
    pub path: String,
}

/// Lists currently attached devices.
pub trait EnumerationSource: Send + Sync {
    /// Current devices; empty when the platform reports none.
    fn enumerate(&self) -> Vec<DeviceIdentity>;
}

/// Treats every entry of a directory (normally `/dev/serial/by-id`) as a device.
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    /// Creates a source listing `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl EnumerationSource for DirectorySource {
    fn enumerate(&self) -> Vec<DeviceIdentity> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                // The kernel only creates the directory once a device is attached.
                trace!("No devices under {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };
        let mut devices: Vec<DeviceIdentity> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| DeviceIdentity {
                identity: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().to_string_lossy().into_owned(),
            })
            .collect();
        devices.sort_by(|a, b| a.identity.cmp(&b.identity));
        devices
    }
}

/// Fixed identity list under a path prefix; identities can be attached later.
#[derive(Clone, Default)]
pub struct StaticSource {
    prefix: String,
    identities: Arc<RwLock<Vec<String>>>,
}

impl StaticSource {
    /// Creates a source reporting `identities` under `prefix`.
    pub fn new(prefix: &str, identities: &[&str]) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            identities: Arc::new(RwLock::new(identities.iter().map(|s| s.to_string()).collect())),
        }
    }

    /// Makes another device visible on the next round.
    pub fn attach(&self, identity: &str) {
        self.identities.write().push(identity.to_string());
    }
}

impl EnumerationSource for StaticSource {
    fn enumerate(&self) -> Vec<DeviceIdentity> {
        self.identities
            .read()
            .iter()
            .map(|identity| DeviceIdentity {
                identity: identity.clone(),
                path: format!("{}/{}", self.prefix, identity),
            })
            .collect()
    }
}

/// Ports reported by the `serialport` crate; USB ports are identified by
/// manufacturer, product and serial number.
#[cfg(feature = "instrument_serial")]
pub struct SerialPortSource;

#[cfg(feature = "instrument_serial")]
impl EnumerationSource for SerialPortSource {
    fn enumerate(&self) -> Vec<DeviceIdentity> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                trace!("Serial port enumeration failed: {}", e);
                return Vec::new();
            }
        };
        ports
            .into_iter()
            .map(|port| {
                let identity = match &port.port_type {
                    serialport::SerialPortType::UsbPort(usb) => [
                        usb.manufacturer.as_deref(),
                        usb.product.as_deref(),
                        usb.serial_number.as_deref(),
                    ]
                    .iter()
                    .flatten()
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" "),
                    _ => port.port_name.clone(),
                };
                DeviceIdentity {
                    identity,
                    path: port.port_name,
                }
            })
            .collect()
    }
}

/// Builds the enumeration source selected in the settings.
pub fn source_from_settings(settings: &DiscoverySettings) -> AppResult<Arc<dyn EnumerationSource>> {
    match settings.source {
        EnumerationKind::Directory => {
            Ok(Arc::new(DirectorySource::new(settings.lookup_dir.clone())))
        }
        #[cfg(feature = "instrument_serial")]
        EnumerationKind::Serialport => Ok(Arc::new(SerialPortSource)),
        #[cfg(not(feature = "instrument_serial"))]
        EnumerationKind::Serialport => Err(DaqError::SerialFeatureDisabled),
    }
}

/// Substring predicate selecting the device of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentificationRule {
    /// Channel this rule resolves
    pub channel: ChannelType,
    /// Substring the device identity must contain
    pub needle: String,
}

impl IdentificationRule {
    /// Creates a `contains(needle)` rule for `channel`.
    pub fn contains(channel: ChannelType, needle: impl Into<String>) -> Self {
        Self {
            channel,
            needle: needle.into(),
        }
    }

    /// Whether `identity` satisfies the rule.
    pub fn matches(&self, identity: &str) -> bool {
        identity.contains(self.needle.as_str())
    }
}

/// State of one discovery run, independent of threads and timing.
#[derive(Debug, Clone)]
pub struct DiscoveryRun {
    rules: Vec<IdentificationRule>,
    bindings: BTreeMap<ChannelType, DeviceBinding>,
    complete: bool,
}

impl DiscoveryRun {
    /// Starts a run with a pending binding for every ruled channel.
    ///
    /// Rules for `ALL` are ignored; it is never an acquisition source.
    pub fn new(rules: Vec<IdentificationRule>) -> Self {
        let rules: Vec<_> = rules.into_iter().filter(|r| !r.channel.is_all()).collect();
        let bindings = rules
            .iter()
            .map(|r| (r.channel, DeviceBinding::pending(r.channel)))
            .collect();
        Self {
            rules,
            bindings,
            complete: false,
        }
    }

    /// Scans one enumeration round and returns the events it produces.
    pub fn poll(&mut self, devices: &[DeviceIdentity]) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        if self.complete {
            return events;
        }

        for rule in &self.rules {
            let Some(binding) = self.bindings.get_mut(&rule.channel) else {
                continue;
            };
            if binding.found {
                continue;
            }
            if let Some(device) = devices.iter().find(|d| rule.matches(&d.identity)) {
                binding.resolve(device.path.clone());
                events.push(DiscoveryEvent::Bound {
                    channel: rule.channel,
                    path: device.path.clone(),
                });
            }
        }

        if self.bindings.values().all(|b| b.found) {
            self.complete = true;
            events.push(DiscoveryEvent::AllFound);
        }
        events
    }

    /// Whether the run reached `AllFound`.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Current bindings, one per ruled channel.
    pub fn bindings(&self) -> impl Iterator<Item = &DeviceBinding> {
        self.bindings.values()
    }
}

/// Handle to a discovery thread.
pub struct DeviceDiscovery {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceDiscovery {
    /// Starts polling `source` every `poll_interval` on a new thread.
    pub fn spawn(
        rules: Vec<IdentificationRule>,
        source: Arc<dyn EnumerationSource>,
        poll_interval: Duration,
        events: EventSender,
        log: Arc<dyn LogSink>,
    ) -> AppResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let mut run = DiscoveryRun::new(rules);

        log.log(LOG_SOURCE, "Starting to look for serial devices".to_string());
        let handle = thread::Builder::new()
            .name("daq-discovery".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    let devices = source.enumerate();
                    for event in run.poll(&devices) {
                        if let DiscoveryEvent::Bound { channel, path } = &event {
                            log.log(LOG_SOURCE, format!("Found {} device at {}", channel, path));
                        }
                        if events.send(AcquisitionEvent::Discovery(event)).is_err() {
                            debug!("Coordinator gone, stopping discovery");
                            return;
                        }
                    }
                    if run.is_complete() {
                        log.log(LOG_SOURCE, "All serial devices found".to_string());
                        return;
                    }
                    thread::sleep(poll_interval);
                }
                debug!("Discovery stopped before all devices were found");
            })
            .map_err(DaqError::Io)?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Whether the polling thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Requests the thread to exit and waits for it (at most one poll interval).
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Discovery thread panicked");
            }
        }
    }
}

impl Drop for DeviceDiscovery {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
