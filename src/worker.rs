//! Per-channel acquisition worker.
//!
//! A worker owns one [`DeviceReader`] and one [`SeriesBuffer`]. Once started,
//! its run loop lives on a dedicated thread and talks to the rest of the
//! system only by emitting [`AcquisitionEvent`]s. The lifecycle operations
//! below run on the coordinator thread and never touch the buffer: they
//! construct the reader or flip atomic flags that the loop reads at the top of
//! every iteration.
//!
//! ```text
//! Unbound --bind--> Bound --start--> Reading <--pause/resume--> Paused
//!    \________________\__________________\_______________________\--terminate--> Terminated
//! ```
//!
//! Termination latency is bounded by one blocking read plus one pause
//! increment.

use crate::channel::ChannelType;
use crate::config::ApplicationSettings;
use crate::core::SeriesBuffer;
use crate::error::{AppResult, DaqError};
use crate::instrument::{DeviceReader, ReaderRegistry};
use crate::log_capture::LogSink;
use crate::messages::{AcquisitionEvent, EventSender};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// No device handle yet
    Unbound,
    /// Reader open, loop not started
    Bound,
    /// Loop running and reading
    Reading,
    /// Loop running, reads suspended
    Paused,
    /// Loop exited or never will run; the reader is released
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Unbound => "Unbound",
            WorkerState::Bound => "Bound",
            WorkerState::Reading => "Reading",
            WorkerState::Paused => "Paused",
            WorkerState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Timing knobs of the run loop.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Minimum time between two emissions
    pub emission_interval: Duration,
    /// Sleep increment while paused
    pub pause_sleep: Duration,
    /// Buffer length that triggers the one-time memory warning
    pub buffer_warning_samples: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&ApplicationSettings::default())
    }
}

impl From<&ApplicationSettings> for WorkerSettings {
    fn from(settings: &ApplicationSettings) -> Self {
        Self {
            emission_interval: settings.emission_interval(),
            pause_sleep: settings.pause_sleep(),
            buffer_warning_samples: settings.buffer_warning_samples,
        }
    }
}

/// Flags shared between the worker handle and its loop thread.
#[derive(Default)]
struct WorkerControl {
    paused: AtomicBool,
    terminated: AtomicBool,
    finished: AtomicBool,
}

/// Acquisition worker for one channel.
pub struct AcquisitionWorker {
    channel: ChannelType,
    registry: Arc<ReaderRegistry>,
    settings: WorkerSettings,
    events: EventSender,
    log: Arc<dyn LogSink>,
    reader: Option<Box<dyn DeviceReader>>,
    path: Option<String>,
    buffer: SeriesBuffer,
    started: bool,
    control: Arc<WorkerControl>,
    handle: Option<JoinHandle<()>>,
}

impl AcquisitionWorker {
    /// Creates an unbound worker for a concrete `channel`.
    pub fn new(
        channel: ChannelType,
        registry: Arc<ReaderRegistry>,
        settings: WorkerSettings,
        events: EventSender,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            channel,
            registry,
            settings,
            events,
            log,
            reader: None,
            path: None,
            buffer: SeriesBuffer::new(),
            started: false,
            control: Arc::new(WorkerControl::default()),
            handle: None,
        }
    }

    /// Channel served by this worker.
    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    /// Device path, once bound.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        if self.control.terminated.load(Ordering::Acquire)
            || self.control.finished.load(Ordering::Acquire)
        {
            WorkerState::Terminated
        } else if self.started {
            if self.control.paused.load(Ordering::Acquire) {
                WorkerState::Paused
            } else {
                WorkerState::Reading
            }
        } else if self.reader.is_some() {
            WorkerState::Bound
        } else {
            WorkerState::Unbound
        }
    }

    /// Whether the run loop was ever started.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Opens the device at `path` with the family registered for the channel.
    ///
    /// On failure the worker stays `Unbound` and the error is also reported
    /// to the log sink.
    pub fn bind(&mut self, path: &str) -> AppResult<()> {
        self.expect_state(&[WorkerState::Unbound], "bind")?;
        match self.registry.create(self.channel, path) {
            Ok(reader) => {
                self.log.log(
                    &self.source(),
                    format!("{} reader bound to {}", self.channel, path),
                );
                self.reader = Some(reader);
                self.path = Some(path.to_string());
                Ok(())
            }
            Err(e) => {
                self.log
                    .warn(&self.source(), format!("Could not bind {}: {}", self.channel, e));
                Err(e)
            }
        }
    }

    /// Seeds the buffer with previously recorded series.
    pub fn preload(&mut self, buffer: SeriesBuffer) -> AppResult<()> {
        self.expect_state(&[WorkerState::Unbound, WorkerState::Bound], "preload")?;
        debug!("Preloading {} samples into {} worker", buffer.len(), self.channel);
        self.buffer = buffer;
        Ok(())
    }

    /// Launches the run loop on a thread named `acq-<CH>`.
    pub fn start(&mut self) -> AppResult<()> {
        self.expect_state(&[WorkerState::Bound], "start")?;
        let Some(reader) = self.reader.take() else {
            return Err(self.invalid("start"));
        };

        let run = RunLoop {
            channel: self.channel,
            reader,
            buffer: std::mem::take(&mut self.buffer),
            settings: self.settings.clone(),
            control: Arc::clone(&self.control),
            events: self.events.clone(),
            log: Arc::clone(&self.log),
            source: self.source(),
        };
        let handle = thread::Builder::new()
            .name(format!("acq-{}", self.channel))
            .spawn(move || run.run())?;

        self.handle = Some(handle);
        self.started = true;
        self.log
            .log(&self.source(), format!("{} reading started", self.channel));
        Ok(())
    }

    /// Suspends reads; the loop keeps observing termination.
    pub fn pause(&mut self) -> AppResult<()> {
        self.expect_state(&[WorkerState::Reading], "pause")?;
        self.control.paused.store(true, Ordering::Release);
        Ok(())
    }

    /// Resumes reads after [`pause`](Self::pause).
    pub fn resume(&mut self) -> AppResult<()> {
        self.expect_state(&[WorkerState::Paused], "resume")?;
        self.control.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Requests termination. A no-op on an already terminated worker.
    ///
    /// A started loop closes its reader on its next iteration; a bound worker
    /// that never started closes the reader here.
    pub fn terminate(&mut self) {
        if self.state() == WorkerState::Terminated {
            return;
        }
        self.control.terminated.store(true, Ordering::Release);
        if let Some(mut reader) = self.reader.take() {
            reader.close();
            debug!("Closed unstarted {} reader", self.channel);
        }
    }

    /// Waits for the loop thread to exit. Returns immediately if none runs.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("{} worker thread panicked", self.channel);
            }
        }
    }

    fn expect_state(&self, allowed: &[WorkerState], operation: &'static str) -> AppResult<()> {
        if allowed.contains(&self.state()) {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> DaqError {
        DaqError::InvalidTransition {
            channel: self.channel,
            state: self.state(),
            operation,
        }
    }

    fn source(&self) -> String {
        format!("worker:{}", self.channel)
    }
}

impl Drop for AcquisitionWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// State moved onto the worker thread.
struct RunLoop {
    channel: ChannelType,
    reader: Box<dyn DeviceReader>,
    buffer: SeriesBuffer,
    settings: WorkerSettings,
    control: Arc<WorkerControl>,
    events: EventSender,
    log: Arc<dyn LogSink>,
    source: String,
}

impl RunLoop {
    fn run(mut self) {
        let mut last_emission = Instant::now();
        let mut emitted = 0;
        let mut warned = false;

        loop {
            if self.control.terminated.load(Ordering::Acquire) {
                debug!("{} worker terminating", self.channel);
                break;
            }
            if self.control.paused.load(Ordering::Acquire) {
                thread::sleep(self.settings.pause_sleep);
                continue;
            }

            let sample = match self.reader.read_next() {
                Ok(Some(sample)) => sample,
                Ok(None) => continue,
                Err(e) => {
                    self.log
                        .warn(&self.source, format!("{} reader failed: {}", self.channel, e));
                    let _ = self.events.send(AcquisitionEvent::WorkerFailed {
                        channel: self.channel,
                        error: e.to_string(),
                    });
                    break;
                }
            };

            self.buffer.push(sample);
            if !warned && self.buffer.len() > self.settings.buffer_warning_samples {
                warned = true;
                self.log.warn(
                    &self.source,
                    format!(
                        "{} buffer holds {} samples; memory use keeps growing until the session is closed",
                        self.channel,
                        self.buffer.len()
                    ),
                );
            }

            if last_emission.elapsed() >= self.settings.emission_interval {
                trace!("{} emitting {} samples", self.channel, self.buffer.len());
                let batch = self.buffer.snapshot(self.channel);
                if self.events.send(AcquisitionEvent::Batch(batch)).is_err() {
                    debug!("{} worker has no receiver, exiting", self.channel);
                    break;
                }
                last_emission = Instant::now();
                emitted = self.buffer.len();
            }
        }

        self.reader.close();
        // Samples read since the last throttled emission still go out.
        if self.buffer.len() != emitted && !self.buffer.is_empty() {
            let _ = self
                .events
                .send(AcquisitionEvent::Batch(self.buffer.snapshot(self.channel)));
        }
        self.control.finished.store(true, Ordering::Release);
        let _ = self.events.send(AcquisitionEvent::WorkerStopped {
            channel: self.channel,
            samples: self.buffer.len(),
        });
    }
}
