//! End-to-end tests of discovery, workers and the plot store.

use serial_daq::{
    channel::ChannelType,
    config::Settings,
    core::Sample,
    discovery::StaticSource,
    instrument::{DeviceReader, ReaderRegistry, ScriptStep, ScriptedReader},
    log_capture::LogBuffer,
    messages::{AcquisitionEvent, DiscoveryEvent},
    session::SessionSnapshot,
    store::RecordingSurface,
    AcquisitionCoordinator, DaqError, WorkerState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Settings with fast timings and a rule for each requested channel.
fn fast_settings(rules: &[(&str, &str)]) -> Settings {
    let mut settings = Settings::new(None).expect("Failed to create settings");
    settings.application.emission_interval_ms = 10;
    settings.application.pause_sleep_ms = 5;
    settings.discovery.poll_interval_ms = 5;
    settings.discovery.rules = rules
        .iter()
        .map(|(ch, needle)| (ch.to_string(), needle.to_string()))
        .collect();
    settings
}

/// Registry whose readers count samples upward and share one close counter.
fn scripted_registry(channels: &[ChannelType], closes: Arc<AtomicUsize>) -> Arc<ReaderRegistry> {
    let mut registry = ReaderRegistry::new();
    for &channel in channels {
        let closes = Arc::clone(&closes);
        registry.register(channel, move |path| {
            let steps = (0..10_000)
                .map(|i| ScriptStep::Sample(Sample::new(i as f64, (i % 7) as f64, vec![0.0, 0.0])))
                .collect();
            Ok(Box::new(
                ScriptedReader::new(path, steps, Duration::from_millis(1))
                    .with_close_counter(Arc::clone(&closes)),
            ) as Box<dyn DeviceReader>)
        });
    }
    Arc::new(registry)
}

fn create_coordinator(
    settings: Settings,
    registry: Arc<ReaderRegistry>,
    source: StaticSource,
) -> (AcquisitionCoordinator<RecordingSurface>, LogBuffer) {
    let log = LogBuffer::new(512);
    let coordinator = AcquisitionCoordinator::new(
        settings,
        registry,
        Arc::new(source),
        RecordingSurface::new(),
        Arc::new(log.clone()),
    )
    .expect("Failed to create coordinator");
    (coordinator, log)
}

#[test]
fn test_two_channels_one_artifact_each() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (mut coordinator, _log) = create_coordinator(
        fast_settings(&[("vac", "STMicroelectronics"), ("lac", "Arduino")]),
        scripted_registry(&[ChannelType::Vac, ChannelType::Lac], Arc::clone(&closes)),
        StaticSource::new(
            "/dev/serial/by-id",
            &["usb-STMicroelectronics_STM32-if00", "usb-Arduino_Uno-if00"],
        ),
    );

    coordinator.start_reading().unwrap();
    coordinator.run_for(Duration::from_millis(200));

    assert!(coordinator.all_found());
    assert_eq!(
        coordinator.availability_report(),
        vec!["VAC reader: available", "LAC reader: available"]
    );
    for channel in ChannelType::concrete() {
        assert_eq!(coordinator.store().handle_count(channel), 1);
        let batch = coordinator.latest_batch(channel).unwrap();
        assert_eq!(batch.channel, channel);
        assert_eq!(batch.x_data.len(), batch.y_data.len());
    }
    assert_eq!(coordinator.store().surface().artifact_count(), 2);

    coordinator.close_session();
    assert_eq!(closes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_missing_device_yields_no_all_event() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (mut coordinator, _log) = create_coordinator(
        fast_settings(&[("vac", "STMicroelectronics"), ("lac", "Arduino")]),
        scripted_registry(&[ChannelType::Vac, ChannelType::Lac], closes),
        StaticSource::new("/dev/serial/by-id", &["usb-Arduino_Uno-if00"]),
    );

    coordinator.start_reading().unwrap();
    coordinator.run_for(Duration::from_millis(100));

    assert!(!coordinator.all_found());
    assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Reading));
    assert_eq!(coordinator.worker_state(ChannelType::Vac), Some(WorkerState::Unbound));
    assert_eq!(
        coordinator.availability_report(),
        vec!["VAC reader: not available", "LAC reader: available"]
    );
    assert_eq!(coordinator.store().handle_count(ChannelType::Vac), 0);
    coordinator.stop_reading();
}

#[test]
fn test_pause_freezes_series() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (mut coordinator, _log) = create_coordinator(
        fast_settings(&[("lac", "Arduino")]),
        scripted_registry(&[ChannelType::Lac], closes),
        StaticSource::new("/dev/serial/by-id", &["Arduino"]),
    );
    coordinator.start_reading().unwrap();
    coordinator.run_for(Duration::from_millis(80));

    coordinator.pause_reading();
    coordinator.run_for(Duration::from_millis(50));
    assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Paused));
    let frozen = coordinator.latest_batch(ChannelType::Lac).unwrap().len();
    coordinator.run_for(Duration::from_millis(80));
    assert_eq!(coordinator.latest_batch(ChannelType::Lac).unwrap().len(), frozen);

    coordinator.resume_reading();
    coordinator.run_for(Duration::from_millis(80));
    assert!(coordinator.latest_batch(ChannelType::Lac).unwrap().len() > frozen);
    coordinator.stop_reading();
}

#[test]
fn test_close_session_rearms_fresh_workers() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (mut coordinator, _log) = create_coordinator(
        fast_settings(&[("lac", "Arduino")]),
        scripted_registry(&[ChannelType::Lac], Arc::clone(&closes)),
        StaticSource::new("/dev/serial/by-id", &["Arduino"]),
    );
    coordinator.start_reading().unwrap();
    coordinator.run_for(Duration::from_millis(80));
    coordinator.stop_reading();
    assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Terminated));

    coordinator.close_session();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Unbound));
    assert_eq!(coordinator.store().handle_count(ChannelType::All), 0);
    assert!(coordinator.latest_batch(ChannelType::Lac).is_none());
    assert!(!coordinator.all_found());
    assert_eq!(coordinator.availability_report(), vec!["LAC reader: not available"]);

    // A second session runs on the re-armed workers.
    coordinator.start_reading().unwrap();
    coordinator.run_for(Duration::from_millis(80));
    assert_eq!(coordinator.store().handle_count(ChannelType::Lac), 1);
    coordinator.close_session();
    assert_eq!(closes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_session_round_trip_through_coordinator() {
    let dir = tempfile::tempdir().unwrap();
    let closes = Arc::new(AtomicUsize::new(0));
    let (mut coordinator, _log) = create_coordinator(
        fast_settings(&[("lac", "Arduino")]),
        scripted_registry(&[ChannelType::Lac], Arc::clone(&closes)),
        StaticSource::new("/dev/serial/by-id", &["Arduino"]),
    );
    coordinator.start_reading().unwrap();
    coordinator.run_for(Duration::from_millis(80));
    coordinator.stop_reading();
    coordinator.run_for(Duration::from_millis(20));

    let recorded = coordinator.latest_batch(ChannelType::Lac).unwrap().clone();
    let path = coordinator.save_session(dir.path()).unwrap();
    let snapshot = SessionSnapshot::load(&path).unwrap();
    assert_eq!(snapshot.channels[&ChannelType::Lac].x_data, recorded.x_data);
    assert!(!snapshot.channels.contains_key(&ChannelType::Vac));

    coordinator.close_session();
    coordinator.load_session(&path).unwrap();
    assert_eq!(coordinator.store().handle_count(ChannelType::Lac), 1);
    assert_eq!(
        coordinator.latest_batch(ChannelType::Lac).unwrap().y_data,
        recorded.y_data
    );

    // Acquisition continues after the loaded series.
    coordinator.start_reading().unwrap();
    coordinator.run_for(Duration::from_millis(80));
    let continued = coordinator.latest_batch(ChannelType::Lac).unwrap();
    assert!(continued.len() > recorded.len());
    assert_eq!(&continued.x_data[..recorded.len()], recorded.x_data.as_slice());
    coordinator.close_session();
}

#[test]
fn test_saved_session_holds_every_read_sample() {
    let dir = tempfile::tempdir().unwrap();
    let reads = Arc::new(AtomicUsize::new(0));
    let mut registry = ReaderRegistry::new();
    let counter = Arc::clone(&reads);
    registry.register(ChannelType::Lac, move |path| {
        Ok(Box::new(
            ScriptedReader::counting(path, 10_000, Duration::from_millis(1))
                .with_read_counter(Arc::clone(&counter)),
        ) as Box<dyn DeviceReader>)
    });
    let mut settings = fast_settings(&[("lac", "Arduino")]);
    settings.application.emission_interval_ms = 100;
    let (mut coordinator, _log) = create_coordinator(
        settings,
        Arc::new(registry),
        StaticSource::new("/dev/serial/by-id", &["Arduino"]),
    );

    coordinator.start_reading().unwrap();
    coordinator.run_for(Duration::from_millis(250));
    coordinator.stop_reading();
    coordinator.join_workers();

    let read = reads.load(Ordering::SeqCst);
    assert!(read > 0);
    assert_eq!(coordinator.latest_batch(ChannelType::Lac).unwrap().len(), read);
    let path = coordinator.save_session(dir.path()).unwrap();
    let snapshot = SessionSnapshot::load(&path).unwrap();
    assert_eq!(snapshot.channels[&ChannelType::Lac].x_data.len(), read);
    assert_eq!(snapshot.channels[&ChannelType::Lac].y_data.len(), read);
    coordinator.close_session();
}

#[test]
fn test_failed_worker_does_not_stop_others() {
    let closes = Arc::new(AtomicUsize::new(0));
    let mut registry = ReaderRegistry::new();
    registry.register(ChannelType::Vac, |path| {
        let steps = vec![ScriptStep::Fail("cable pulled".to_string())];
        Ok(Box::new(ScriptedReader::new(path, steps, Duration::from_millis(1)))
            as Box<dyn DeviceReader>)
    });
    let lac_closes = Arc::clone(&closes);
    registry.register(ChannelType::Lac, move |path| {
        Ok(Box::new(
            ScriptedReader::counting(path, 5_000, Duration::from_millis(1))
                .with_close_counter(Arc::clone(&lac_closes)),
        ) as Box<dyn DeviceReader>)
    });

    let (mut coordinator, log) = create_coordinator(
        fast_settings(&[("vac", "STM"), ("lac", "Arduino")]),
        Arc::new(registry),
        StaticSource::new("/dev/serial/by-id", &["STM", "Arduino"]),
    );
    coordinator.start_reading().unwrap();
    coordinator.run_for(Duration::from_millis(120));

    assert_eq!(coordinator.worker_state(ChannelType::Vac), Some(WorkerState::Terminated));
    assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Reading));
    assert!(log.contains(tracing::Level::WARN, "cable pulled"));
    assert_eq!(coordinator.store().handle_count(ChannelType::Lac), 1);
    coordinator.close_session();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_injected_events_follow_wiring() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (mut coordinator, _log) = create_coordinator(
        fast_settings(&[("lac", "Arduino")]),
        scripted_registry(&[ChannelType::Lac], closes),
        StaticSource::new("/dev/serial/by-id", &[]),
    );
    let tx = coordinator.event_sender();
    tx.send(AcquisitionEvent::Discovery(DiscoveryEvent::Bound {
        channel: ChannelType::Lac,
        path: "/dev/serial/by-id/Arduino".to_string(),
    }))
    .unwrap();
    tx.send(AcquisitionEvent::Discovery(DiscoveryEvent::AllFound))
        .unwrap();
    assert_eq!(coordinator.process_events(), 2);
    assert!(coordinator.all_found());
    assert_eq!(coordinator.worker_state(ChannelType::Lac), Some(WorkerState::Reading));

    let dir = tempfile::tempdir().unwrap();
    let path = SessionSnapshot::new().save_in(dir.path()).unwrap();
    assert!(matches!(
        coordinator.load_session(&path),
        Err(DaqError::SessionActive)
    ));
    coordinator.close_session();
}
