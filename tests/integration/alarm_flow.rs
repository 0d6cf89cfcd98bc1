use crate::support::*;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use petra_alarms::algorithm::out_of_range::OutOfRangeAlgorithm;
use petra_alarms::algorithm::string::{StringAlgorithm, StringMode};
use petra_alarms::provider::{AlarmCursor, NoteCursor};
use petra_alarms::{
    AlarmQuery, AlarmRecord, AlarmState, AlgorithmSettings, ConditionConfig, MemoryProvider, Provider, Result, Value,
};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_boolean_watch_raises_and_clears() {
    let f = fixture();
    let (_, watch) = single_watch(&f.engine, AlgorithmSettings::default(), ConditionConfig::default(), "/door").await;
    f.engine.start().await.unwrap();

    f.bus.set("/door", Value::Bool(true));
    let open = wait_for_open(&f.engine, 1).await;
    let record = &open[0];
    assert_eq!(record.alarm_type, AlarmState::Alert);
    assert_eq!(record.message, "Value: true");
    assert_eq!(record.alarm_class, "Plant");
    assert_eq!(record.watch, Some(watch.handle()));
    eventually("link", || watch.last_alarm() == Some(record.id)).await;

    f.bus.set("/door", Value::Bool(false));
    eventually("normal", || watch.alarm_state() == AlarmState::Normal).await;
    // Alerts close without an acknowledgement
    wait_for_open(&f.engine, 0).await;
    let row = f.engine.get_alarm(&record.id.to_string()).await.unwrap();
    assert!(row.is_normal);
    assert_eq!(row.watch_path.as_deref(), Some("Plant/Checks/Point"));
    f.engine.stop().await;
}

#[tokio::test]
async fn test_unchanged_alarm_condition_raises_once() {
    let f = fixture();
    let (_, watch) = single_watch(&f.engine, AlgorithmSettings::default(), ConditionConfig::default(), "/door").await;
    f.engine.start().await.unwrap();

    f.bus.set("/door", Value::Bool(true));
    wait_for_open(&f.engine, 1).await;
    f.bus.set("/door", Value::Int(1));
    f.bus.set("/door", Value::from("on"));
    settle(&watch).await;
    f.engine.update_all(watch.algorithm()).await.unwrap();

    let all = f.engine.get_alarms(None, None, None).await.unwrap();
    assert_eq!(all.len(), 1);
    f.engine.stop().await;
}

#[tokio::test]
async fn test_to_alarm_inhibit_defers_until_elapsed() {
    let f = fixture();
    let settings = AlgorithmSettings {
        to_alarm_inhibit_secs: 30,
        ..AlgorithmSettings::default()
    };
    let (_, watch) = single_watch(&f.engine, settings, ConditionConfig::default(), "/door").await;
    f.engine.start().await.unwrap();

    f.bus.set("/door", Value::Bool(true));
    settle(&watch).await;
    assert_eq!(watch.alarm_state(), AlarmState::Normal);
    assert!(watch.has_deferred_transition());

    f.clock.advance(Duration::seconds(10));
    f.engine.execute_tick().await;
    assert_eq!(watch.alarm_state(), AlarmState::Normal);

    // The tick commits the held transition once the inhibit has run out
    f.clock.advance(Duration::seconds(25));
    f.engine.execute_tick().await;
    assert_eq!(watch.alarm_state(), AlarmState::Alert);
    assert_eq!(open_records(&f.engine).await.len(), 1);
    f.engine.stop().await;
}

#[tokio::test]
async fn test_flapping_source_is_suppressed() {
    let f = fixture();
    let settings = AlgorithmSettings {
        to_alarm_inhibit_secs: 30,
        ..AlgorithmSettings::default()
    };
    let (_, watch) = single_watch(&f.engine, settings, ConditionConfig::default(), "/door").await;
    f.engine.start().await.unwrap();

    for _ in 0..3 {
        f.bus.set("/door", Value::Bool(true));
        settle(&watch).await;
        f.clock.advance(Duration::seconds(20));
        f.bus.set("/door", Value::Bool(false));
        settle(&watch).await;
        f.clock.advance(Duration::seconds(20));
    }
    f.engine.execute_tick().await;
    assert_eq!(watch.alarm_state(), AlarmState::Normal);
    assert!(f.engine.get_alarms(None, None, None).await.unwrap().is_empty());
    f.engine.stop().await;
}

#[tokio::test]
async fn test_disabled_service_keeps_state() {
    let f = fixture();
    let (_, watch) = single_watch(&f.engine, AlgorithmSettings::default(), ConditionConfig::default(), "/door").await;
    f.engine.start().await.unwrap();
    f.engine.service().set_enabled(false);

    f.bus.set("/door", Value::Bool(true));
    settle(&watch).await;
    assert_eq!(watch.alarm_state(), AlarmState::Normal);
    assert!(open_records(&f.engine).await.is_empty());

    f.engine.service().set_enabled(true);
    f.engine.update_all(watch.algorithm()).await.unwrap();
    assert_eq!(watch.alarm_state(), AlarmState::Alert);
    f.engine.stop().await;
}

#[tokio::test]
async fn test_out_of_range_deadband_and_acknowledgement() {
    let f = fixture();
    let settings = AlgorithmSettings {
        severity: AlarmState::Fault,
        ..AlgorithmSettings::default()
    };
    let condition = ConditionConfig::OutOfRange(OutOfRangeAlgorithm {
        min: 0.0,
        max: 100.0,
        deadband: 5.0,
    });
    let (_, watch) = single_watch(&f.engine, settings, condition, "/tank/level").await;
    f.engine.start().await.unwrap();

    f.bus.set("/tank/level", Value::Float(103.0));
    settle(&watch).await;
    assert_eq!(watch.alarm_state(), AlarmState::Normal);

    f.bus.set("/tank/level", Value::Float(106.0));
    eventually("fault", || watch.alarm_state() == AlarmState::Fault).await;

    // Inside the range but not past the deadband
    f.bus.set("/tank/level", Value::Float(98.0));
    settle(&watch).await;
    assert_eq!(watch.alarm_state(), AlarmState::Fault);

    f.bus.set("/tank/level", Value::Int(90));
    eventually("normal", || watch.alarm_state() == AlarmState::Normal).await;

    // Faults stay open until acknowledged
    let open = wait_for_open(&f.engine, 1).await;
    assert_eq!(open[0].message, "Value out of range: 106");
    f.engine.acknowledge(&open[0].id.to_string(), "operator").await.unwrap();
    wait_for_open(&f.engine, 0).await;
    f.engine.stop().await;
}

#[tokio::test]
async fn test_disabled_watch_is_not_evaluated() {
    let f = fixture();
    let (_, watch) = single_watch(&f.engine, AlgorithmSettings::default(), ConditionConfig::default(), "/door").await;
    watch.set_enabled(false);
    f.engine.start().await.unwrap();

    f.bus.set("/door", Value::Bool(true));
    settle(&watch).await;
    assert_eq!(watch.alarm_state(), AlarmState::Normal);
    f.engine.stop().await;
}

/// Memory store whose inserts take a while, widening the window between a
/// watch committing an alarm state and its record being linked
struct SlowInserts {
    inner: MemoryProvider,
    delay: std::time::Duration,
}

#[async_trait]
impl Provider for SlowInserts {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn add_alarm(&self, record: &AlarmRecord) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.add_alarm(record).await
    }

    async fn get_alarm(&self, id: Uuid) -> Result<Option<AlarmRecord>> {
        self.inner.get_alarm(id).await
    }

    async fn acknowledge(&self, id: Uuid, user: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.acknowledge(id, user, at).await
    }

    async fn return_to_normal(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.inner.return_to_normal(id, at).await
    }

    async fn add_note(&self, id: Uuid, user: &str, text: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.add_note(id, user, text, at).await
    }

    async fn delete_record(&self, id: Uuid) -> Result<()> {
        self.inner.delete_record(id).await
    }

    async fn delete_all_records(&self) -> Result<()> {
        self.inner.delete_all_records().await
    }

    async fn query_alarms(&self, query: &AlarmQuery) -> Result<AlarmCursor> {
        self.inner.query_alarms(query).await
    }

    async fn get_notes(&self, id: Uuid) -> Result<NoteCursor> {
        self.inner.get_notes(id).await
    }
}

#[tokio::test]
async fn test_clear_during_slow_insert_closes_record() {
    let f = fixture_with(Arc::new(SlowInserts {
        inner: MemoryProvider::new(),
        delay: std::time::Duration::from_millis(100),
    }));
    let settings = AlgorithmSettings {
        severity: AlarmState::Fault,
        ..AlgorithmSettings::default()
    };
    let (_, watch) = single_watch(&f.engine, settings, ConditionConfig::default(), "/door").await;
    f.engine.start().await.unwrap();

    f.bus.set("/door", Value::Bool(true));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    f.bus.set("/door", Value::Bool(false));

    eventually("record linked", || watch.last_alarm().is_some()).await;
    settle(&watch).await;
    eventually("normal", || watch.alarm_state() == AlarmState::Normal).await;

    let all = f.engine.get_alarms(None, None, None).await.unwrap();
    assert_eq!(all.len(), 1);
    // Fault records stay open until acknowledged, but must be back to normal
    assert!(all[0].is_normal);
    assert!(!all[0].is_acknowledged);
    f.engine.stop().await;
}

#[tokio::test]
async fn test_string_list_watch_raises_and_clears() {
    let f = fixture();
    let settings = AlgorithmSettings {
        severity: AlarmState::Offnormal,
        ..AlgorithmSettings::default()
    };
    let condition = ConditionConfig::String(StringAlgorithm::new("fault, tripped", StringMode::InList));
    let (_, watch) = single_watch(&f.engine, settings, condition, "/breaker").await;
    f.engine.start().await.unwrap();

    f.bus.set("/breaker", Value::from("running"));
    settle(&watch).await;
    assert!(open_records(&f.engine).await.is_empty());

    f.bus.set("/breaker", Value::from("tripped"));
    let open = wait_for_open(&f.engine, 1).await;
    assert_eq!(open[0].alarm_type, AlarmState::Offnormal);
    assert_eq!(open[0].message, "Value = tripped");

    // Case sensitive, so "Tripped" is not in the list
    f.bus.set("/breaker", Value::from("Tripped"));
    eventually("normal", || watch.alarm_state() == AlarmState::Normal).await;
    settle(&watch).await;
    // Offnormal stays open until acknowledged
    let open = wait_for_open(&f.engine, 1).await;
    assert!(open[0].is_normal());
    f.engine.stop().await;
}
