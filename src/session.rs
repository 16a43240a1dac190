//! Persisted session data.
//!
//! A session file is a JSON document holding, per channel, the full `x_data`
//! and `y_data` series recorded so far:
//!
//! ```json
//! {
//!   "saved_at": "2024-05-02T14:03:11.512+02:00",
//!   "channels": {
//!     "lac": { "x_data": [0.1, 0.2], "y_data": [1.0, 1.1] }
//!   }
//! }
//! ```
//!
//! Channels without samples are not written. Auxiliary values are not
//! persisted.

use crate::channel::ChannelType;
use crate::core::{SeriesBatch, SeriesBuffer};
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Series of one channel as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSeries {
    /// Abscissa series
    pub x_data: Vec<f64>,
    /// Ordinate series
    pub y_data: Vec<f64>,
}

/// Everything a session file holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Time the snapshot was taken
    pub saved_at: DateTime<Local>,
    /// Recorded series per concrete channel
    pub channels: BTreeMap<ChannelType, ChannelSeries>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSnapshot {
    /// An empty snapshot stamped with the current time.
    pub fn new() -> Self {
        Self {
            saved_at: Local::now(),
            channels: BTreeMap::new(),
        }
    }

    /// Collects the latest full batch of each channel.
    pub fn from_batches<'a>(batches: impl IntoIterator<Item = &'a SeriesBatch>) -> Self {
        let mut snapshot = Self::new();
        for batch in batches {
            snapshot.insert(batch.channel, &batch.x_data, &batch.y_data);
        }
        snapshot
    }

    /// Adds the series of `channel`; empty series and `ALL` are ignored.
    pub fn insert(&mut self, channel: ChannelType, x_data: &[f64], y_data: &[f64]) {
        if channel.is_all() || x_data.is_empty() || y_data.is_empty() {
            return;
        }
        self.channels.insert(
            channel,
            ChannelSeries {
                x_data: x_data.to_vec(),
                y_data: y_data.to_vec(),
            },
        );
    }

    /// Whether no channel holds data.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Writes the snapshot to `path`.
    pub fn save_to(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("Saved session with {} channel(s) to {}", self.channels.len(), path.display());
        Ok(())
    }

    /// Writes the snapshot into `dir` as `session-<timestamp>.json`.
    ///
    /// The timestamp has millisecond resolution. An existing file is never
    /// overwritten; a `-<n>` suffix is appended instead.
    pub fn save_in(&self, dir: impl AsRef<Path>) -> AppResult<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let stem = format!("session-{}", self.saved_at.format("%Y-%m-%d_%H-%M-%S-%3f"));
        let mut path = dir.join(format!("{}.json", stem));
        let mut suffix = 1;
        while path.exists() {
            path = dir.join(format!("{}-{}.json", stem, suffix));
            suffix += 1;
        }
        self.save_to(&path)?;
        Ok(path)
    }

    /// Reads and validates a session file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let snapshot: SessionSnapshot = serde_json::from_str(&raw)?;
        snapshot.validate()?;
        info!("Loaded session from {}", path.display());
        Ok(snapshot)
    }

    /// Checks that every channel is concrete with aligned series.
    pub fn validate(&self) -> AppResult<()> {
        for (channel, series) in &self.channels {
            if channel.is_all() {
                return Err(DaqError::Session(
                    "ALL is not a recordable channel".to_string(),
                ));
            }
            if series.x_data.len() != series.y_data.len() {
                return Err(DaqError::Session(format!(
                    "{} series length mismatch: {} x values, {} y values",
                    channel,
                    series.x_data.len(),
                    series.y_data.len()
                )));
            }
        }
        Ok(())
    }

    /// Buffers to preload into the workers, one per stored channel.
    pub fn buffers(&self) -> AppResult<Vec<(ChannelType, SeriesBuffer)>> {
        self.channels
            .iter()
            .map(|(channel, series)| {
                SeriesBuffer::from_series(series.x_data.clone(), series.y_data.clone())
                    .map(|buffer| (*channel, buffer))
                    .ok_or_else(|| DaqError::Session(format!("{} series length mismatch", channel)))
            })
            .collect()
    }
}
