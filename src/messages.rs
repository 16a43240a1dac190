//! Event types flowing from acquisition threads to the coordinator.
//!
//! Communication is strictly one-directional: discovery and workers only ever
//! emit [`AcquisitionEvent`]s; the coordinator drains them on its own thread.
//! The channel is a `tokio::sync::mpsc` unbounded channel because its `send`
//! never blocks and works from plain OS threads.

use crate::channel::ChannelType;
use crate::core::SeriesBatch;
use tokio::sync::mpsc;

/// Sending half used by discovery and workers.
pub type EventSender = mpsc::UnboundedSender<AcquisitionEvent>;

/// Receiving half owned by the coordinator.
pub type EventReceiver = mpsc::UnboundedReceiver<AcquisitionEvent>;

/// Creates a fresh event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Result of one discovery step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// `channel` was found at `path`
    Bound {
        /// Resolved channel, never `All`
        channel: ChannelType,
        /// Device path
        path: String,
    },
    /// Every configured channel has been found; the `(ALL, "")` event
    AllFound,
}

impl DiscoveryEvent {
    /// The `(channel, path)` pair of this event; `AllFound` maps to `(ALL, "")`.
    pub fn as_pair(&self) -> (ChannelType, &str) {
        match self {
            DiscoveryEvent::Bound { channel, path } => (*channel, path.as_str()),
            DiscoveryEvent::AllFound => (ChannelType::All, ""),
        }
    }
}

/// Everything the coordinator can receive.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// Discovery progress
    Discovery(DiscoveryEvent),
    /// Throttled full-buffer emission of a worker
    Batch(SeriesBatch),
    /// A worker loop ended on a hard read error
    WorkerFailed {
        /// Failing channel
        channel: ChannelType,
        /// Error description
        error: String,
    },
    /// A worker loop exited and released its reader
    WorkerStopped {
        /// Stopped channel
        channel: ChannelType,
        /// Samples held when the loop exited
        samples: usize,
    },
}
