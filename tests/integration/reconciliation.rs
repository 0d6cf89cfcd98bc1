use crate::support::*;
use chrono::Duration;
use petra_alarms::config::WatchConfig;
use petra_alarms::{AlarmRecord, AlarmState, Config, Engine, MemoryProvider, Provider, SignalBus};
use std::sync::Arc;
use uuid::Uuid;

const TREE: &str = r#"
classes:
  - name: Plant
    handle: 1
    algorithms:
      - name: Pumps
        handle: 2
        type: Boolean Algorithm
        severity: Fault
        watches:
          - name: P1
            handle: 3
            source_path: /pumps/1/trip
"#;

fn stored(id: Uuid, minutes_ago: i64) -> AlarmRecord {
    AlarmRecord::new(
        id,
        "Plant",
        Some(3),
        "/pumps/1/trip",
        AlarmState::Fault,
        "Value: true",
        start_time() - Duration::minutes(minutes_ago),
    )
}

async fn engine_with(watch: WatchConfig, records: &[AlarmRecord]) -> Engine {
    let provider = Arc::new(MemoryProvider::new());
    for record in records {
        provider.add_alarm(record).await.unwrap();
    }
    let mut config = Config::from_yaml(TREE).unwrap();
    config.classes[0].algorithms[0].watches = vec![watch];
    Engine::from_config(&config, provider, Arc::new(SignalBus::new()))
        .await
        .unwrap()
}

fn p1() -> WatchConfig {
    WatchConfig {
        handle: Some(3),
        ..WatchConfig::new("P1", "/pumps/1/trip")
    }
}

#[tokio::test]
async fn test_watch_adopts_unlinked_open_record() {
    let id = Uuid::new_v4();
    let engine = engine_with(p1(), &[stored(id, 5)]).await;
    engine.start().await.unwrap();

    let watch = engine.watch(3).unwrap();
    assert_eq!(watch.last_alarm(), Some(id));
    assert_eq!(watch.alarm_state(), AlarmState::Fault);
    engine.stop().await;
}

#[tokio::test]
async fn test_older_of_two_open_records_is_deleted() {
    let older = Uuid::new_v4();
    let newer = Uuid::new_v4();
    let watch = WatchConfig {
        alarm_state: AlarmState::Fault,
        last_alarm: Some(older),
        ..p1()
    };
    let engine = engine_with(watch, &[stored(older, 30), stored(newer, 5)]).await;
    engine.start().await.unwrap();

    assert_eq!(engine.watch(3).unwrap().last_alarm(), Some(newer));
    assert!(engine.provider().get_alarm(older).await.unwrap().is_none());
    let open = open_records(&engine).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, newer);
    engine.stop().await;
}

#[tokio::test]
async fn test_newer_linked_record_wins() {
    let older = Uuid::new_v4();
    let newer = Uuid::new_v4();
    let watch = WatchConfig {
        alarm_state: AlarmState::Fault,
        last_alarm: Some(newer),
        ..p1()
    };
    let engine = engine_with(watch, &[stored(older, 30), stored(newer, 5)]).await;
    engine.start().await.unwrap();

    assert_eq!(engine.watch(3).unwrap().last_alarm(), Some(newer));
    assert!(engine.provider().get_alarm(older).await.unwrap().is_none());
    engine.stop().await;
}

#[tokio::test]
async fn test_watch_without_open_record_goes_normal() {
    let watch = WatchConfig {
        alarm_state: AlarmState::Fault,
        ..p1()
    };
    let engine = engine_with(watch, &[]).await;
    assert_eq!(engine.watch(3).unwrap().alarm_state(), AlarmState::Fault);
    engine.start().await.unwrap();
    assert_eq!(engine.watch(3).unwrap().alarm_state(), AlarmState::Normal);
    engine.stop().await;
}

#[tokio::test]
async fn test_returned_record_does_not_hold_alarm_state() {
    let id = Uuid::new_v4();
    let mut record = stored(id, 10);
    record.return_to_normal(start_time() - Duration::minutes(2));
    let watch = WatchConfig {
        alarm_state: AlarmState::Fault,
        last_alarm: Some(id),
        ..p1()
    };
    let engine = engine_with(watch, &[record]).await;
    engine.start().await.unwrap();

    // Still open for acknowledgement, but the watch is back to normal
    assert_eq!(open_records(&engine).await.len(), 1);
    assert_eq!(engine.watch(3).unwrap().alarm_state(), AlarmState::Normal);
    engine.stop().await;
}
