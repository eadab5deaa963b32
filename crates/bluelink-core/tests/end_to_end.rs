//! End-to-end tests against the scripted adapter.
//!
//! All tests run on a paused tokio clock, so scan windows, settle delays and
//! bond timeouts elapse instantly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bluelink_core::uuids::{BODY_SENSOR_LOCATION, HEART_RATE_SERVICE};
use bluelink_core::{
    Error, FailureKind, LogSink, MockAdapter, MockAdapterBuilder, SessionController,
    SessionEvent, SessionState, TestRunner,
};
use bluelink_types::{
    BondState, CharacteristicDescriptor, CharacteristicProperties, CharacteristicRef,
    DiscoveredDevice, ServiceDescriptor, TestOutcome, split_log_line,
};
use proptest::prelude::*;
use tokio::time::Instant;

fn single_service_dut() -> MockAdapter {
    MockAdapterBuilder::new()
        .device_at(
            Duration::from_millis(250),
            DiscoveredDevice::new("00:11:22:33:44:55", Some("DUT-1"), -65),
        )
        .service(
            ServiceDescriptor::primary(HEART_RATE_SERVICE).with_characteristic(
                CharacteristicDescriptor::new(BODY_SENSOR_LOCATION, CharacteristicProperties::READ),
            ),
        )
        .value(
            CharacteristicRef::new(HEART_RATE_SERVICE, BODY_SENSOR_LOCATION),
            vec![42],
        )
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_read_case_passes_with_value() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(single_service_dut());
    let mut runner = TestRunner::new(Arc::clone(&adapter), LogSink::to_dir(dir.path()));

    let run = runner.run(&["TC03"], "DUT-1").await.unwrap();
    let outcome = run.outcome("TC03").unwrap();
    assert!(outcome.is_pass(), "{outcome}");
    assert!(outcome.message().contains("42"));
    assert_eq!(adapter.connect_count(), 1);
    assert_eq!(adapter.read_count(), 1);

    let contents = std::fs::read_to_string(dir.path().join("TC03_GATT_Read_log.txt")).unwrap();
    let messages: Vec<&str> = contents
        .lines()
        .map(|line| split_log_line(line).expect("timestamped line").1)
        .collect();
    assert!(messages.contains(&"Target device found: DUT-1"));
    assert!(messages.contains(&"Connected to 00:11:22:33:44:55"));
    assert!(messages.contains(&"Read success: Value = 42"));
    assert!(messages.last().unwrap().starts_with("PASS:"));
}

#[tokio::test(start_paused = true)]
async fn test_discovered_tree_for_single_service_dut() {
    let adapter = Arc::new(single_service_dut());
    let mut session = SessionController::new(adapter, LogSink::in_memory());

    let device = session
        .begin_scan(Some("DUT-1"), Duration::from_millis(10_000))
        .await
        .unwrap();
    assert_eq!(device.rssi, -65);

    let before = Instant::now();
    session.connect(&device).await.unwrap();
    assert!(before.elapsed() >= Duration::from_secs(2));

    let services = session.discover().await.unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].uuid, HEART_RATE_SERVICE);
    assert_eq!(services[0].characteristics.len(), 1);
    assert!(services[0].characteristics[0].properties.is_readable());

    let value = session
        .read(CharacteristicRef::new(HEART_RATE_SERVICE, BODY_SENSOR_LOCATION))
        .await
        .unwrap();
    assert_eq!(value, vec![42]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_fails_without_connect() {
    let adapter = Arc::new(
        MockAdapterBuilder::new()
            .device(DiscoveredDevice::new("AA:AA:AA:AA:AA:AA", Some("Other"), -70))
            .build(),
    );
    let mut runner = TestRunner::new(Arc::clone(&adapter), LogSink::in_memory());

    let started = Instant::now();
    let run = runner.run(&["TC02"], "DUT-1").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(10_000));

    match run.outcome("TC02").unwrap() {
        TestOutcome::Failed { message } => assert!(message.contains("Scan timeout"), "{message}"),
        other => panic!("expected failure, got {other}"),
    }
    assert_eq!(adapter.connect_count(), 0);
    assert_eq!(adapter.stop_scan_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_is_reported_once() {
    let adapter = Arc::new(MockAdapter::new());
    let mut session = SessionController::new(Arc::clone(&adapter), LogSink::in_memory());
    let mut events = session.subscribe();

    let err = session
        .begin_scan(Some("DUT-1"), Duration::from_millis(10_000))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ScanTimeout { .. }));

    let mut timeouts = 0;
    let mut found = 0;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StateChanged { to, .. } = event {
            match to {
                SessionState::Failed(FailureKind::ScanTimeout) => timeouts += 1,
                SessionState::Found => found += 1,
                _ => {}
            }
        }
    }
    assert_eq!((timeouts, found), (1, 0));
    assert_eq!(adapter.stop_scan_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_after_match_are_not_processed() {
    let adapter = Arc::new(
        MockAdapterBuilder::new()
            .device_at(
                Duration::from_millis(100),
                DiscoveredDevice::new("00:11:22:33:44:55", Some("dut-1"), -65),
            )
            .device_at(
                Duration::from_millis(200),
                DiscoveredDevice::new("00:11:22:33:44:55", Some("DUT-1"), -30),
            )
            .device_at(
                Duration::from_millis(300),
                DiscoveredDevice::new("BB:BB:BB:BB:BB:BB", Some("Late"), -50),
            )
            .build(),
    );
    let mut session = SessionController::new(Arc::clone(&adapter), LogSink::in_memory());

    let device = session
        .begin_scan(Some("DUT-1"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(device.rssi, -65);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(adapter.stop_scan_count(), 1);
    assert_eq!(session.devices().len(), 1);
    assert_eq!(session.state(), SessionState::Found);
}

#[tokio::test(start_paused = true)]
async fn test_spurious_bond_event_after_bonded_is_ignored() {
    let adapter = Arc::new(
        MockAdapterBuilder::heart_rate_dut("DUT-1")
            .bond_events(vec![
                (Duration::from_millis(100), BondState::Bonding),
                (Duration::from_millis(200), BondState::Bonded),
                (Duration::from_millis(300), BondState::None),
            ])
            .build(),
    );
    let mut runner = TestRunner::new(Arc::clone(&adapter), LogSink::in_memory());

    let run = runner.run(&["TC04"], "DUT-1").await.unwrap();
    assert!(run.outcome("TC04").unwrap().is_pass());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(adapter.bond_events_dropped(), 1);

    let lines = runner.session().log_sink().read("TC04_Bonding").unwrap();
    let failures = lines.iter().filter(|l| l.ends_with("Bonding failed")).count();
    assert_eq!(failures, 0);
}

#[tokio::test]
async fn test_validation_errors_touch_no_adapter() {
    let adapter = Arc::new(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
    let mut runner = TestRunner::new(Arc::clone(&adapter), LogSink::in_memory());

    let none: Vec<String> = Vec::new();
    assert!(matches!(
        runner.run(&none, "anyName").await,
        Err(Error::NoSelection)
    ));
    assert!(matches!(
        runner.run(&["TC01"], "").await,
        Err(Error::MissingDutName)
    ));
    assert_eq!(adapter.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_read_before_discovery_is_rejected_locally() {
    let adapter = Arc::new(MockAdapterBuilder::heart_rate_dut("DUT-1").build());
    let mut session = SessionController::new(Arc::clone(&adapter), LogSink::in_memory());
    let device = session
        .begin_scan(Some("DUT-1"), Duration::from_secs(10))
        .await
        .unwrap();
    session.connect(&device).await.unwrap();

    let err = session
        .read(CharacteristicRef::new(HEART_RATE_SERVICE, BODY_SENSOR_LOCATION))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotDiscovered));
    assert_eq!(adapter.read_count(), 0);
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn test_log_round_trip_in_append_order() {
    let dir = tempfile::tempdir().unwrap();
    let sink = LogSink::to_dir(dir.path());
    for i in 0..25 {
        sink.append("TC01_Scan", &format!("line {i}"));
    }

    let lines = sink.read("TC01_Scan").unwrap();
    assert_eq!(lines.len(), 25);
    for (i, line) in lines.iter().enumerate() {
        let (_, message) = split_log_line(line).expect("timestamp - message");
        assert_eq!(message, format!("line {i}"));
    }

    // A new process-wide sink starts the tag afresh.
    let next = LogSink::to_dir(dir.path());
    next.append("TC01_Scan", "fresh");
    assert_eq!(next.read("TC01_Scan").unwrap().len(), 1);
}

fn sightings() -> impl Strategy<Value = Vec<(usize, Option<String>, i16)>> {
    prop::collection::vec(
        (
            0usize..6,
            prop::option::of("[A-Z]{1,4}-[0-9]"),
            -100i16..-20,
        ),
        0..40,
    )
}

proptest! {
    #[test]
    fn prop_scan_keeps_one_entry_per_address(sightings in sightings()) {
        let mut builder = MockAdapterBuilder::new();
        for (i, (slot, name, rssi)) in sightings.iter().enumerate() {
            builder = builder.device_at(
                Duration::from_millis(10 * (i as u64 + 1)),
                DiscoveredDevice::new(format!("00:00:00:00:00:{slot:02X}"), name.as_deref(), *rssi),
            );
        }
        let adapter = Arc::new(builder.build());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let devices = runtime.block_on(async {
            let mut session = SessionController::new(adapter, LogSink::in_memory());
            session.scan_devices(Duration::from_secs(5)).await.unwrap()
        });

        let mut expected: HashMap<String, (Option<String>, i16)> = HashMap::new();
        for (slot, name, rssi) in &sightings {
            let entry = expected
                .entry(format!("00:00:00:00:00:{slot:02X}"))
                .or_insert((None, *rssi));
            if name.is_some() {
                entry.0 = name.clone();
            }
            entry.1 = *rssi;
        }

        prop_assert_eq!(devices.len(), expected.len());
        for device in &devices {
            let (name, rssi) = &expected[&device.address];
            prop_assert_eq!(&device.name, name);
            prop_assert_eq!(device.rssi, *rssi);
        }
    }
}
