//! Session coordinator.
//!
//! The coordinator is the only component that ties the pipeline together. It
//! owns one worker per concrete channel, the discovery thread of the current
//! session and the [`ChannelSeriesStore`]. It runs on the caller's thread and
//! reacts to events drained from the shared channel:
//!
//! | Event                 | Reaction                                              |
//! |-----------------------|-------------------------------------------------------|
//! | `Bound(channel, path)`| bind the worker; start it when `auto_start` is set    |
//! | `AllFound`            | start every bound worker that has not started yet     |
//! | `Batch`               | `try_plot` the full series for the batch's channel   |
//! | `WorkerFailed`        | report to the log sink                                |
//!
//! Bind failures are reported to the log sink and never propagate out of
//! [`process_events`](AcquisitionCoordinator::process_events).

use crate::channel::ChannelType;
use crate::config::Settings;
use crate::core::{DeviceBinding, SeriesBatch};
use crate::discovery::{DeviceDiscovery, EnumerationSource, IdentificationRule};
use crate::error::{AppResult, DaqError};
use crate::instrument::ReaderRegistry;
use crate::log_capture::LogSink;
use crate::messages::{event_channel, AcquisitionEvent, EventReceiver, EventSender};
use crate::session::SessionSnapshot;
use crate::store::{ChannelSeriesStore, PlotSurface};
use crate::worker::{AcquisitionWorker, WorkerSettings, WorkerState};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

const LOG_SOURCE: &str = "coordinator";
const PUMP_TICK: Duration = Duration::from_millis(10);

/// Owns the workers, discovery and plot store of one acquisition session.
pub struct AcquisitionCoordinator<S: PlotSurface> {
    settings: Settings,
    registry: Arc<ReaderRegistry>,
    source: Arc<dyn EnumerationSource>,
    rules: Vec<IdentificationRule>,
    log: Arc<dyn LogSink>,
    store: ChannelSeriesStore<S>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    workers: BTreeMap<ChannelType, AcquisitionWorker>,
    discovery: Option<DeviceDiscovery>,
    bindings: BTreeMap<ChannelType, DeviceBinding>,
    latest: BTreeMap<ChannelType, SeriesBatch>,
    all_found: bool,
}

impl<S: PlotSurface> AcquisitionCoordinator<S> {
    /// Creates an armed coordinator: fresh workers, no discovery running yet.
    pub fn new(
        settings: Settings,
        registry: Arc<ReaderRegistry>,
        source: Arc<dyn EnumerationSource>,
        surface: S,
        log: Arc<dyn LogSink>,
    ) -> AppResult<Self> {
        settings.validate()?;
        let rules = settings
            .identification_rules()?
            .into_iter()
            .map(|(channel, needle)| IdentificationRule::contains(channel, needle))
            .collect();
        let (events_tx, events_rx) = event_channel();

        let mut coordinator = Self {
            settings,
            registry,
            source,
            rules,
            log,
            store: ChannelSeriesStore::new(surface),
            events_tx,
            events_rx,
            workers: BTreeMap::new(),
            discovery: None,
            bindings: BTreeMap::new(),
            latest: BTreeMap::new(),
            all_found: false,
        };
        coordinator.arm();
        Ok(coordinator)
    }

    /// Builds fresh workers and pending bindings on a new event channel.
    fn arm(&mut self) {
        let (events_tx, events_rx) = event_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;

        let worker_settings = WorkerSettings::from(&self.settings.application);
        self.workers = ChannelType::concrete()
            .map(|channel| {
                let worker = AcquisitionWorker::new(
                    channel,
                    Arc::clone(&self.registry),
                    worker_settings.clone(),
                    self.events_tx.clone(),
                    Arc::clone(&self.log),
                );
                (channel, worker)
            })
            .collect();
        self.bindings = self
            .rules
            .iter()
            .map(|rule| (rule.channel, DeviceBinding::pending(rule.channel)))
            .collect();
        self.latest.clear();
        self.all_found = false;
    }

    // =========================================================================
    // Session control
    // =========================================================================

    /// Starts discovery if needed, starts bound workers and resumes paused ones.
    pub fn start_reading(&mut self) -> AppResult<()> {
        if self.discovery.is_none() && !self.all_found {
            self.discovery = Some(DeviceDiscovery::spawn(
                self.rules.clone(),
                Arc::clone(&self.source),
                self.settings.discovery.poll_interval(),
                self.events_tx.clone(),
                Arc::clone(&self.log),
            )?);
        }
        for worker in self.workers.values_mut() {
            let result = match worker.state() {
                WorkerState::Bound => worker.start(),
                WorkerState::Paused => worker.resume(),
                _ => Ok(()),
            };
            if let Err(e) = result {
                self.log.warn(LOG_SOURCE, e.to_string());
            }
        }
        Ok(())
    }

    /// Pauses every reading worker.
    pub fn pause_reading(&mut self) {
        self.pause_all();
        self.log.log(LOG_SOURCE, "Reading paused".to_string());
    }

    /// Resumes every paused worker.
    pub fn resume_reading(&mut self) {
        self.resume_all();
        self.log.log(LOG_SOURCE, "Reading resumed".to_string());
    }

    /// Terminates every worker and stops discovery.
    pub fn stop_reading(&mut self) {
        self.stop_all();
        if let Some(mut discovery) = self.discovery.take() {
            discovery.stop();
        }
        self.log.log(LOG_SOURCE, "Reading stopped".to_string());
    }

    /// Waits for every worker loop to exit, then handles their last events.
    ///
    /// After [`stop_reading`](Self::stop_reading) this leaves the complete
    /// recorded series in [`latest_batch`](Self::latest_batch).
    pub fn join_workers(&mut self) -> usize {
        for worker in self.workers.values_mut() {
            worker.join();
        }
        self.process_events()
    }

    /// Stops everything, clears all plots and re-arms fresh workers.
    pub fn close_session(&mut self) {
        self.stop_reading();
        for worker in self.workers.values_mut() {
            worker.join();
        }
        self.store.clear(ChannelType::All);
        self.arm();
        self.log.log(LOG_SOURCE, "Session closed".to_string());
    }

    /// Pauses every worker that is reading.
    pub fn pause_all(&mut self) {
        for worker in self.workers.values_mut() {
            if worker.state() == WorkerState::Reading {
                // State was just checked; a concurrent loop exit is not an error here.
                let _ = worker.pause();
            }
        }
    }

    /// Resumes every paused worker.
    pub fn resume_all(&mut self) {
        for worker in self.workers.values_mut() {
            if worker.state() == WorkerState::Paused {
                let _ = worker.resume();
            }
        }
    }

    /// Terminates every worker.
    pub fn stop_all(&mut self) {
        for worker in self.workers.values_mut() {
            worker.terminate();
        }
    }

    // =========================================================================
    // Event pump
    // =========================================================================

    /// Handles every pending event and returns how many there were.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Pumps events until `duration` has elapsed.
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut handled = self.process_events();
        while Instant::now() < deadline {
            thread::sleep(PUMP_TICK.min(deadline.saturating_duration_since(Instant::now())));
            handled += self.process_events();
        }
        handled
    }

    fn handle_event(&mut self, event: AcquisitionEvent) {
        match event {
            AcquisitionEvent::Discovery(event) => {
                let (channel, path) = event.as_pair();
                trace!("Discovery event for {} at {:?}", channel, path);
                if channel.is_all() {
                    self.on_all_found();
                } else {
                    self.on_bound(channel, path);
                }
            }
            AcquisitionEvent::Batch(batch) => {
                self.store
                    .try_plot(&batch.x_data, &batch.y_data, batch.channel);
                self.latest.insert(batch.channel, batch);
            }
            AcquisitionEvent::WorkerFailed { channel, error } => {
                self.log
                    .warn(LOG_SOURCE, format!("{} acquisition stopped: {}", channel, error));
            }
            AcquisitionEvent::WorkerStopped { channel, samples } => {
                debug!("{} worker stopped with {} samples", channel, samples);
            }
        }
    }

    fn on_bound(&mut self, channel: ChannelType, path: &str) {
        self.bindings
            .entry(channel)
            .or_insert_with(|| DeviceBinding::pending(channel))
            .resolve(path);

        let auto_start = self.settings.application.auto_start;
        let Some(worker) = self.workers.get_mut(&channel) else {
            return;
        };
        // Bind failures are already reported by the worker.
        if worker.bind(path).is_err() {
            return;
        }
        if auto_start {
            if let Err(e) = worker.start() {
                self.log.warn(LOG_SOURCE, e.to_string());
            }
        }
    }

    fn on_all_found(&mut self) {
        self.all_found = true;
        if let Some(mut discovery) = self.discovery.take() {
            discovery.stop();
        }
        info!("All configured devices found");
        for worker in self.workers.values_mut() {
            if worker.state() == WorkerState::Bound {
                if let Err(e) = worker.start() {
                    self.log.warn(LOG_SOURCE, e.to_string());
                }
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Binding of every channel with an identification rule.
    pub fn bindings(&self) -> Vec<DeviceBinding> {
        self.bindings.values().cloned().collect()
    }

    /// One `"<CH> reader: available | not available"` line per ruled channel.
    pub fn availability_report(&self) -> Vec<String> {
        self.bindings
            .values()
            .map(|binding| {
                let status = if binding.found { "available" } else { "not available" };
                format!("{} reader: {}", binding.channel, status)
            })
            .collect()
    }

    /// Whether discovery has bound every ruled channel this session.
    pub fn all_found(&self) -> bool {
        self.all_found
    }

    /// Last full series received for `channel`.
    pub fn latest_batch(&self, channel: ChannelType) -> Option<&SeriesBatch> {
        self.latest.get(&channel)
    }

    /// Lifecycle state of the worker serving `channel`.
    pub fn worker_state(&self, channel: ChannelType) -> Option<WorkerState> {
        self.workers.get(&channel).map(AcquisitionWorker::state)
    }

    /// Whether any worker is reading or paused.
    pub fn is_active(&self) -> bool {
        self.workers
            .values()
            .any(|w| matches!(w.state(), WorkerState::Reading | WorkerState::Paused))
    }

    /// The plot store.
    pub fn store(&self) -> &ChannelSeriesStore<S> {
        &self.store
    }

    /// Event sender of the current session, for injecting events.
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Writes the latest series of every channel into `dir`.
    pub fn save_session(&self, dir: impl AsRef<Path>) -> AppResult<PathBuf> {
        let snapshot = SessionSnapshot::from_batches(self.latest.values());
        if snapshot.is_empty() {
            self.log
                .warn(LOG_SOURCE, "Saving a session without recorded series".to_string());
        }
        let path = snapshot.save_in(dir)?;
        self.log
            .log(LOG_SOURCE, format!("Session saved to {}", path.display()));
        Ok(path)
    }

    /// Loads a session file into the workers and the plot store.
    ///
    /// Refused while any worker is reading or paused. Every channel of the
    /// file is checked before anything is touched, so a refused load leaves
    /// workers, plots and latest series as they were.
    pub fn load_session(&mut self, path: impl AsRef<Path>) -> AppResult<()> {
        if self.is_active() {
            return Err(DaqError::SessionActive);
        }
        let path = path.as_ref();
        let snapshot = SessionSnapshot::load(path)?;
        let buffers = snapshot.buffers()?;
        for (channel, _) in &buffers {
            let Some(worker) = self.workers.get(channel) else {
                continue;
            };
            let state = worker.state();
            if !matches!(state, WorkerState::Unbound | WorkerState::Bound) {
                return Err(DaqError::InvalidTransition {
                    channel: *channel,
                    state,
                    operation: "preload",
                });
            }
        }

        for (channel, buffer) in buffers {
            let Some(worker) = self.workers.get_mut(&channel) else {
                continue;
            };
            let batch = buffer.snapshot(channel);
            worker.preload(buffer)?;
            self.store.try_plot(&batch.x_data, &batch.y_data, channel);
            self.latest.insert(channel, batch);
        }
        self.log
            .log(LOG_SOURCE, format!("Session loaded from {}", path.display()));
        Ok(())
    }
}

impl<S: PlotSurface> Drop for AcquisitionCoordinator<S> {
    fn drop(&mut self) {
        self.stop_all();
        if let Some(mut discovery) = self.discovery.take() {
            discovery.stop();
        }
        for worker in self.workers.values_mut() {
            worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Sample;
    use crate::discovery::StaticSource;
    use crate::instrument::{DeviceReader, ScriptStep, ScriptedReader};
    use crate::log_capture::LogBuffer;
    use crate::messages::DiscoveryEvent;
    use crate::store::RecordingSurface;

    fn settings(rules: &[(&str, &str)]) -> Settings {
        let mut settings = Settings::default();
        settings.application.emission_interval_ms = 5;
        settings.application.pause_sleep_ms = 5;
        settings.discovery.poll_interval_ms = 5;
        settings.discovery.rules = rules
            .iter()
            .map(|(ch, needle)| (ch.to_string(), needle.to_string()))
            .collect();
        settings
    }

    fn counting_registry(channels: &[ChannelType]) -> Arc<ReaderRegistry> {
        let mut registry = ReaderRegistry::new();
        for &channel in channels {
            registry.register(channel, |path| {
                let steps = (0..1000)
                    .map(|i| ScriptStep::Sample(Sample::new(i as f64, 1.0, vec![0.0, 0.0])))
                    .collect();
                Ok(Box::new(ScriptedReader::new(path, steps, Duration::from_millis(1)))
                    as Box<dyn DeviceReader>)
            });
        }
        Arc::new(registry)
    }

    fn coordinator(
        settings: Settings,
        registry: Arc<ReaderRegistry>,
        source: StaticSource,
    ) -> (AcquisitionCoordinator<RecordingSurface>, LogBuffer) {
        let log = LogBuffer::new(256);
        let coordinator = AcquisitionCoordinator::new(
            settings,
            registry,
            Arc::new(source),
            RecordingSurface::new(),
            Arc::new(log.clone()),
        )
        .unwrap();
        (coordinator, log)
    }

    #[test]
    fn bound_event_binds_and_starts_worker() {
        let (mut coordinator, _log) = coordinator(
            settings(&[("lac", "Arduino")]),
            counting_registry(&[ChannelType::Lac]),
            StaticSource::new("/dev", &[]),
        );
        coordinator
            .event_sender()
            .send(AcquisitionEvent::Discovery(DiscoveryEvent::Bound {
                channel: ChannelType::Lac,
                path: "/dev/Arduino".to_string(),
            }))
            .unwrap();
        assert_eq!(coordinator.process_events(), 1);
        assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Reading));
        assert_eq!(coordinator.availability_report(), vec!["LAC reader: available"]);
        coordinator.stop_reading();
    }

    #[test]
    fn without_auto_start_workers_wait_for_all_found() {
        let mut settings = settings(&[("lac", "Arduino")]);
        settings.application.auto_start = false;
        let (mut coordinator, _log) = coordinator(
            settings,
            counting_registry(&[ChannelType::Lac]),
            StaticSource::new("/dev", &[]),
        );
        let tx = coordinator.event_sender();
        tx.send(AcquisitionEvent::Discovery(DiscoveryEvent::Bound {
            channel: ChannelType::Lac,
            path: "/dev/Arduino".to_string(),
        }))
        .unwrap();
        coordinator.process_events();
        assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Bound));

        tx.send(AcquisitionEvent::Discovery(DiscoveryEvent::AllFound))
            .unwrap();
        coordinator.process_events();
        assert!(coordinator.all_found());
        assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Reading));
        coordinator.stop_reading();
    }

    #[test]
    fn unsupported_channel_is_logged_not_raised() {
        let (mut coordinator, log) = coordinator(
            settings(&[("vac", "STMicroelectronics")]),
            counting_registry(&[]),
            StaticSource::new("/dev", &[]),
        );
        coordinator
            .event_sender()
            .send(AcquisitionEvent::Discovery(DiscoveryEvent::Bound {
                channel: ChannelType::Vac,
                path: "/dev/STMicroelectronics".to_string(),
            }))
            .unwrap();
        coordinator.process_events();

        assert_eq!(coordinator.worker_state(ChannelType::Vac), Some(WorkerState::Unbound));
        assert!(log.contains(
            tracing::Level::WARN,
            "No device family configured for channel VAC"
        ));
    }

    #[test]
    fn batches_are_plotted_once_per_channel() {
        let (mut coordinator, _log) = coordinator(
            settings(&[]),
            counting_registry(&[]),
            StaticSource::new("/dev", &[]),
        );
        let tx = coordinator.event_sender();
        for n in 1..=3 {
            let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
            tx.send(AcquisitionEvent::Batch(SeriesBatch {
                channel: ChannelType::Lac,
                x_data: x.clone(),
                y_data: x,
                aux_data: Vec::new(),
            }))
            .unwrap();
        }
        coordinator.process_events();

        assert_eq!(coordinator.store().handle_count(ChannelType::Lac), 1);
        assert_eq!(coordinator.store().handle_count(ChannelType::Vac), 0);
        assert_eq!(coordinator.latest_batch(ChannelType::Lac).unwrap().len(), 3);
    }

    #[test]
    fn discovery_drives_acquisition() {
        let (mut coordinator, _log) = coordinator(
            settings(&[("lac", "Arduino")]),
            counting_registry(&[ChannelType::Lac]),
            StaticSource::new("/dev/serial/by-id", &["USB-ABC123", "Arduino-XYZ"]),
        );
        coordinator.start_reading().unwrap();
        coordinator.run_for(Duration::from_millis(150));

        assert!(coordinator.all_found());
        assert_eq!(
            coordinator.bindings()[0].path.as_deref(),
            Some("/dev/serial/by-id/Arduino-XYZ")
        );
        assert_eq!(coordinator.store().handle_count(ChannelType::Lac), 1);
        assert!(coordinator.latest_batch(ChannelType::Lac).is_some());
        coordinator.stop_reading();
    }

    #[test]
    fn load_is_refused_while_reading() {
        let (mut coordinator, _log) = coordinator(
            settings(&[("lac", "Arduino")]),
            counting_registry(&[ChannelType::Lac]),
            StaticSource::new("/dev", &["Arduino"]),
        );
        coordinator.start_reading().unwrap();
        coordinator.run_for(Duration::from_millis(50));
        assert!(coordinator.is_active());

        let dir = tempfile::tempdir().unwrap();
        let path = SessionSnapshot::new().save_in(dir.path()).unwrap();
        assert!(matches!(
            coordinator.load_session(&path),
            Err(DaqError::SessionActive)
        ));
        coordinator.close_session();
    }

    #[test]
    fn refused_load_leaves_state_untouched() {
        let mut registry = ReaderRegistry::new();
        registry.register(ChannelType::Lac, |path| {
            let steps = vec![ScriptStep::Fail("cable pulled".to_string())];
            Ok(Box::new(ScriptedReader::new(path, steps, Duration::ZERO)) as Box<dyn DeviceReader>)
        });
        let (mut coordinator, _log) = coordinator(
            settings(&[("vac", "STM"), ("lac", "Arduino")]),
            Arc::new(registry),
            StaticSource::new("/dev", &[]),
        );
        coordinator
            .event_sender()
            .send(AcquisitionEvent::Discovery(DiscoveryEvent::Bound {
                channel: ChannelType::Lac,
                path: "/dev/Arduino".to_string(),
            }))
            .unwrap();
        coordinator.process_events();
        coordinator.join_workers();
        assert_eq!(coordinator.worker_state(ChannelType::Vac), Some(WorkerState::Unbound));
        assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Terminated));
        assert!(!coordinator.is_active());

        let mut snapshot = SessionSnapshot::new();
        snapshot.insert(ChannelType::Vac, &[0.0, 1.0], &[3.0, 4.0]);
        snapshot.insert(ChannelType::Lac, &[0.0, 1.0], &[5.0, 6.0]);
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot.save_in(dir.path()).unwrap();

        assert!(matches!(
            coordinator.load_session(&path),
            Err(DaqError::InvalidTransition {
                channel: ChannelType::Lac,
                state: WorkerState::Terminated,
                ..
            })
        ));
        assert_eq!(coordinator.store().handle_count(ChannelType::All), 0);
        assert!(coordinator.latest_batch(ChannelType::Vac).is_none());
        assert!(coordinator.latest_batch(ChannelType::Lac).is_none());

        coordinator.close_session();
        coordinator.load_session(&path).unwrap();
        assert_eq!(coordinator.store().handle_count(ChannelType::All), 2);
        assert_eq!(coordinator.latest_batch(ChannelType::Vac).unwrap().len(), 2);
    }

    #[test]
    fn saving_without_series_warns() {
        let (coordinator, log) = coordinator(
            settings(&[]),
            counting_registry(&[]),
            StaticSource::new("/dev", &[]),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = coordinator.save_session(dir.path()).unwrap();
        assert!(path.exists());
        assert!(log.contains(tracing::Level::WARN, "without recorded series"));
    }
}
