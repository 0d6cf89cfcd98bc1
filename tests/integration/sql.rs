use crate::support::*;
use petra_alarms::provider::collect;
use petra_alarms::{AlarmState, AlgorithmSettings, ConditionConfig, Engine, SignalBus, SqlProvider, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("alarms.db").display())
}

#[tokio::test]
async fn test_alarm_flow_on_sql_provider() {
    let provider = SqlProvider::connect("sqlite::memory:", 1).await.unwrap();
    let f = fixture_with(Arc::new(provider));
    let settings = AlgorithmSettings {
        severity: AlarmState::Fault,
        ..AlgorithmSettings::default()
    };
    let (_, watch) = single_watch(&f.engine, settings, ConditionConfig::default(), "/door").await;
    f.engine.start().await.unwrap();

    f.bus.set("/door", Value::Bool(true));
    let open = wait_for_open(&f.engine, 1).await;
    f.bus.set("/door", Value::Bool(false));
    eventually("normal", || watch.alarm_state() == AlarmState::Normal).await;

    let id = open[0].id.to_string();
    f.engine.add_note(&id, "alice", "reset the sensor").await.unwrap();
    f.engine.acknowledge(&id, "alice").await.unwrap();
    let row = f.engine.get_alarm(&id).await.unwrap();
    assert!(row.is_normal && row.is_acknowledged && row.has_notes);
    wait_for_open(&f.engine, 0).await;
    f.engine.stop().await;
}

#[tokio::test]
async fn test_watch_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = database_url(&dir);

    let bus = SignalBus::new();
    let first = Engine::new(Arc::new(SqlProvider::connect(&url, 2).await.unwrap()), Arc::new(bus.clone()));
    let (_, watch) = single_watch(&first, AlgorithmSettings::default(), ConditionConfig::default(), "/door").await;
    first.start().await.unwrap();
    bus.set("/door", Value::Bool(true));
    let open = wait_for_open(&first, 1).await;
    eventually("link", || watch.last_alarm() == Some(open[0].id)).await;
    let snapshot = first.snapshot_config();
    first.stop().await;

    let second = Engine::from_config(
        &snapshot,
        Arc::new(SqlProvider::connect(&url, 2).await.unwrap()),
        Arc::new(SignalBus::new()),
    )
    .await
    .unwrap();
    second.start().await.unwrap();
    let restored = second.watch(watch.handle()).unwrap();
    assert_eq!(restored.alarm_state(), AlarmState::Alert);
    assert_eq!(restored.last_alarm(), Some(open[0].id));
    let stored = collect(second.provider().query_open_alarms(Some("Plant")).await.unwrap())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    second.stop().await;
}
