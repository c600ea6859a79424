use crate::control::{ControlCommand, ControllerSettings};
use crate::series::{SeriesKind, SeriesPoint};
use crate::store::{
    DataSource, FetchPayload, PushState, SensorStore, SharedStore, SyncState, UpdateOrigin,
};
use crate::telemetry::TelemetrySnapshot;
use chrono::{TimeZone, Utc};

fn snapshot(voltage: f64) -> TelemetrySnapshot {
    TelemetrySnapshot {
        battery_voltage: Some(voltage),
        ..TelemetrySnapshot::default()
    }
}

fn point(hour: u32, value: f64) -> SeriesPoint {
    SeriesPoint {
        timestamp: Utc
            .with_ymd_and_hms(2024, 5, 1, hour, 0, 0)
            .single()
            .expect("valid date"),
        value,
    }
}

#[test]
fn fresh_store_is_idle_and_empty() {
    // Arrange
    let store = SensorStore::new();

    // Assert
    assert!(store.latest().is_none());
    assert!(store.received().is_none());
    assert_eq!(store.sync_state(DataSource::Latest), SyncState::Idle);
    assert!(store.series(SeriesKind::BatteryVoltage).is_empty());
    assert_eq!(store.push_state(), PushState::Disconnected);
    assert_eq!(store.controller_settings(), &ControllerSettings::default());
}

#[test]
fn successful_fetch_moves_loading_to_succeeded() {
    // Arrange
    let mut store = SensorStore::new();

    // Act
    store.begin_fetch(DataSource::Latest);
    let during = store.sync_state(DataSource::Latest);
    store.apply_fetch_result(DataSource::Latest, Ok(FetchPayload::Snapshot(snapshot(13.1))));

    // Assert
    assert_eq!(during, SyncState::Loading);
    assert_eq!(store.sync_state(DataSource::Latest), SyncState::Succeeded);
    assert_eq!(store.latest(), Some(&snapshot(13.1)));
    assert_eq!(store.received().map(|r| r.origin), Some(UpdateOrigin::Pull));
}

#[test]
fn failed_fetch_keeps_previous_snapshot() {
    // Arrange
    let mut store = SensorStore::new();
    store.begin_fetch(DataSource::Latest);
    store.apply_fetch_result(DataSource::Latest, Ok(FetchPayload::Snapshot(snapshot(12.8))));

    // Act
    store.begin_fetch(DataSource::Latest);
    store.apply_fetch_result(DataSource::Latest, Err("connection refused".to_string()));

    // Assert
    assert_eq!(
        store.sync_state(DataSource::Latest),
        SyncState::Failed("connection refused".to_string())
    );
    assert_eq!(store.latest(), Some(&snapshot(12.8)));
}

#[test]
fn failed_source_can_load_again() {
    // Arrange
    let mut store = SensorStore::new();
    let source = DataSource::History(SeriesKind::ChargingPower);
    store.begin_fetch(source);
    store.apply_fetch_result(source, Err("timeout".to_string()));

    // Act
    store.begin_fetch(source);

    // Assert
    assert_eq!(store.sync_state(source), SyncState::Loading);
}

#[test]
fn sync_states_are_tracked_per_source() {
    // Arrange
    let mut store = SensorStore::new();
    let voltage = DataSource::History(SeriesKind::BatteryVoltage);

    // Act
    store.begin_fetch(voltage);
    store.apply_fetch_result(voltage, Err("boom".to_string()));
    store.begin_fetch(DataSource::Latest);

    // Assert
    assert_eq!(store.sync_state(voltage), SyncState::Failed("boom".to_string()));
    assert_eq!(store.sync_state(DataSource::Latest), SyncState::Loading);
    assert_eq!(
        store.sync_state(DataSource::History(SeriesKind::ChargingPower)),
        SyncState::Idle
    );
}

#[test]
fn push_update_replaces_latest_without_touching_sync_state() {
    // Arrange
    let mut store = SensorStore::new();
    store.begin_fetch(DataSource::Latest);

    // Act
    store.apply_push_update(snapshot(13.4));

    // Assert
    assert_eq!(store.latest(), Some(&snapshot(13.4)));
    assert_eq!(store.received().map(|r| r.origin), Some(UpdateOrigin::Push));
    assert_eq!(store.sync_state(DataSource::Latest), SyncState::Loading);
}

#[test]
fn last_write_wins_between_pull_and_push() {
    // Arrange
    let mut store = SensorStore::new();
    store.apply_push_update(snapshot(13.4));

    // Act
    store.begin_fetch(DataSource::Latest);
    store.apply_fetch_result(DataSource::Latest, Ok(FetchPayload::Snapshot(snapshot(12.0))));

    // Assert
    assert_eq!(store.latest(), Some(&snapshot(12.0)));

    // Act
    store.apply_push_update(snapshot(13.0));

    // Assert
    assert_eq!(store.latest(), Some(&snapshot(13.0)));
}

#[test]
fn series_fetch_replaces_whole_series() {
    // Arrange
    let mut store = SensorStore::new();
    let source = DataSource::History(SeriesKind::BatteryVoltage);
    store.apply_fetch_result(
        source,
        Ok(FetchPayload::Series(vec![point(1, 12.0), point(2, 12.5)])),
    );

    // Act
    store.apply_fetch_result(source, Ok(FetchPayload::Series(vec![point(3, 13.0)])));

    // Assert
    assert_eq!(store.series(SeriesKind::BatteryVoltage), &[point(3, 13.0)]);
    assert!(store.series(SeriesKind::ChargingPower).is_empty());
}

#[test]
fn mismatched_payload_marks_source_failed() {
    // Arrange
    let mut store = SensorStore::new();

    // Act
    store.apply_fetch_result(DataSource::Latest, Ok(FetchPayload::Series(vec![point(1, 1.0)])));

    // Assert
    assert!(matches!(
        store.sync_state(DataSource::Latest),
        SyncState::Failed(_)
    ));
    assert!(store.latest().is_none());
}

#[test]
fn shared_store_clones_see_the_same_state() {
    // Arrange
    let store = SharedStore::new();
    let reader = store.clone();

    // Act
    store.update(|s| {
        s.apply_push_update(snapshot(12.6));
        s.set_push_state(PushState::Reconnecting { attempt: 2 });
        let next = ControlCommand::SetChargerEnabled(false).apply_to(s.controller_settings());
        s.set_controller_settings(next);
    });

    // Assert
    assert_eq!(reader.latest(), Some(snapshot(12.6)));
    assert_eq!(reader.push_state(), PushState::Reconnecting { attempt: 2 });
    assert!(!reader.read(|s| s.controller_settings().charger_enabled));
}
