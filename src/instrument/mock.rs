//! Readers that need no hardware.
//!
//! - [`SimulatedReader`] generates a deterministic synthetic signal at a fixed
//!   sample period, for running the pipeline on a bench without devices.
//! - [`ScriptedReader`] replays a fixed list of read outcomes and counts how
//!   often its handle was actually released. Tests use it to observe the
//!   worker lifecycle.

use super::DeviceReader;
use crate::core::Sample;
use crate::error::{AppResult, DaqError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Synthetic sine source.
pub struct SimulatedReader {
    path: String,
    period: Duration,
    phase: f64,
    open: bool,
}

impl SimulatedReader {
    /// Creates a generator that yields one sample per `period`.
    pub fn new(path: &str, period: Duration) -> Self {
        info!("Opening simulated reader on {}", path);
        Self {
            path: path.to_string(),
            period,
            phase: 0.0,
            open: true,
        }
    }
}

impl DeviceReader for SimulatedReader {
    fn read_next(&mut self) -> AppResult<Option<Sample>> {
        if !self.open {
            return Err(DaqError::SerialPortNotConnected);
        }
        thread::sleep(self.period);
        self.phase += 0.1;

        // Deterministic noise instead of a RNG
        let noise = (self.phase * 37.0).sin() * 0.05;
        Ok(Some(Sample::new(
            self.phase,
            self.phase.sin() + noise,
            vec![self.phase.cos() + noise * 0.8, noise],
        )))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            info!("Closed simulated reader {}", self.path);
        }
    }

    fn path(&self) -> &str {
        &self.path
    }
}

/// One scripted outcome of `read_next`.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// A decoded sample
    Sample(Sample),
    /// A rejected frame
    Reject,
    /// A hard I/O failure
    Fail(String),
}

/// Replays scripted read outcomes.
///
/// Each read sleeps `latency` first. Once the script is exhausted the reader
/// behaves like an idle line and keeps returning `Ok(None)`.
pub struct ScriptedReader {
    path: String,
    steps: VecDeque<ScriptStep>,
    latency: Duration,
    closes: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    open: bool,
}

impl ScriptedReader {
    /// Creates a reader replaying `steps`.
    pub fn new(path: &str, steps: Vec<ScriptStep>, latency: Duration) -> Self {
        Self {
            path: path.to_string(),
            steps: steps.into(),
            latency,
            closes: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
            open: true,
        }
    }

    /// A reader that yields `count` samples with `x = 0, 1, 2, ...`.
    pub fn counting(path: &str, count: usize, latency: Duration) -> Self {
        let steps = (0..count)
            .map(|i| ScriptStep::Sample(Sample::new(i as f64, (i * 2) as f64, vec![0.0, 0.0])))
            .collect();
        Self::new(path, steps, latency)
    }

    /// Counts closes into `closes` instead of a private counter.
    pub fn with_close_counter(mut self, closes: Arc<AtomicUsize>) -> Self {
        self.closes = closes;
        self
    }

    /// Counts reads into `reads` instead of a private counter.
    pub fn with_read_counter(mut self, reads: Arc<AtomicUsize>) -> Self {
        self.reads = reads;
        self
    }

    /// Counter of effective closes, shared with the reader.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }

    /// Counter of completed reads, shared with the reader.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl DeviceReader for ScriptedReader {
    fn read_next(&mut self) -> AppResult<Option<Sample>> {
        if !self.open {
            return Err(DaqError::SerialPortNotConnected);
        }
        thread::sleep(self.latency);
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(ScriptStep::Sample(sample)) => Ok(Some(sample)),
            Some(ScriptStep::Reject) | None => Ok(None),
            Some(ScriptStep::Fail(message)) => Err(DaqError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                message,
            ))),
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for ScriptedReader {
    fn drop(&mut self) {
        self.close();
    }
}
