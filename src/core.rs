//! Core data types for the acquisition pipeline.
//!
//! # Data Flow
//!
//! ```text
//! DeviceReader --[Sample]--> AcquisitionWorker (SeriesBuffer)
//!     --[SeriesBatch snapshot]--> AcquisitionCoordinator --> ChannelSeriesStore
//! ```
//!
//! # Ownership
//!
//! A [`SeriesBuffer`] is owned by exactly one worker while it reads. Everything
//! that leaves the worker is a [`SeriesBatch`], an owned copy taken at emission
//! time, so the coordinator never observes a buffer that is still being mutated.

use crate::channel::ChannelType;
use serde::{Deserialize, Serialize};

// =============================================================================
// Samples
// =============================================================================

/// A single decoded device frame.
///
/// # Fields
///
/// * `x` - Abscissa value (first field of the frame)
/// * `y` - Ordinate value (second field of the frame)
/// * `aux` - Remaining auxiliary values, in frame order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Abscissa value
    pub x: f64,
    /// Ordinate value
    pub y: f64,
    /// Auxiliary values
    pub aux: Vec<f64>,
}

impl Sample {
    /// Creates a sample from its parts.
    pub fn new(x: f64, y: f64, aux: Vec<f64>) -> Self {
        Self { x, y, aux }
    }
}

// =============================================================================
// Series buffers
// =============================================================================

/// Per-channel accumulated series.
///
/// Append-only while a session is active. `x_data` and `y_data` always have the
/// same length; `aux_data` holds the auxiliary values of every sample flattened
/// in arrival order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesBuffer {
    x_data: Vec<f64>,
    y_data: Vec<f64>,
    aux_data: Vec<f64>,
}

impl SeriesBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a buffer from persisted series.
    ///
    /// Returns `None` when the two series differ in length.
    pub fn from_series(x_data: Vec<f64>, y_data: Vec<f64>) -> Option<Self> {
        if x_data.len() != y_data.len() {
            return None;
        }
        Some(Self {
            x_data,
            y_data,
            aux_data: Vec::new(),
        })
    }

    /// Appends one sample.
    pub fn push(&mut self, sample: Sample) {
        self.x_data.push(sample.x);
        self.y_data.push(sample.y);
        self.aux_data.extend(sample.aux);
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.x_data.len()
    }

    /// Returns `true` when no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.x_data.is_empty()
    }

    /// Abscissa series.
    pub fn x_data(&self) -> &[f64] {
        &self.x_data
    }

    /// Ordinate series.
    pub fn y_data(&self) -> &[f64] {
        &self.y_data
    }

    /// Flattened auxiliary series.
    pub fn aux_data(&self) -> &[f64] {
        &self.aux_data
    }

    /// Copies the whole buffer into an emission for `channel`.
    pub fn snapshot(&self, channel: ChannelType) -> SeriesBatch {
        SeriesBatch {
            channel,
            x_data: self.x_data.clone(),
            y_data: self.y_data.clone(),
            aux_data: self.aux_data.clone(),
        }
    }
}

/// A throttled emission from a worker.
///
/// Always carries the entire buffer accumulated since the session started, so
/// receivers must treat it as an authoritative full replace rather than a delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesBatch {
    /// Emitting channel
    pub channel: ChannelType,
    /// Full abscissa series
    pub x_data: Vec<f64>,
    /// Full ordinate series
    pub y_data: Vec<f64>,
    /// Full flattened auxiliary series
    pub aux_data: Vec<f64>,
}

impl SeriesBatch {
    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.x_data.len()
    }

    /// Returns `true` when the batch carries no samples.
    pub fn is_empty(&self) -> bool {
        self.x_data.is_empty()
    }
}

// =============================================================================
// Device bindings
// =============================================================================

/// Association between a channel and a discovered device path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    /// Bound channel
    pub channel: ChannelType,
    /// Device path, once found
    pub path: Option<String>,
    /// Whether discovery has resolved this channel
    pub found: bool,
}

impl DeviceBinding {
    /// A not-yet-found binding for `channel`.
    pub fn pending(channel: ChannelType) -> Self {
        Self {
            channel,
            path: None,
            found: false,
        }
    }

    /// Marks the binding as found at `path`.
    ///
    /// Returns `false` and leaves the binding untouched if it was already found.
    pub fn resolve(&mut self, path: impl Into<String>) -> bool {
        if self.found {
            return false;
        }
        self.path = Some(path.into());
        self.found = true;
        true
    }
}
