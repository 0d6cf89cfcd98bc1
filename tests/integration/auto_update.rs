use crate::support::*;
use chrono::Duration;
use petra_alarms::algorithm::stale::StaleAlgorithm;
use petra_alarms::{AlgorithmSettings, ConditionConfig, Value};
use std::time::Duration as StdDuration;

fn stale_after_ten_minutes() -> ConditionConfig {
    ConditionConfig::Stale(StaleAlgorithm { days: 0, hours: 0, minutes: 10 })
}

#[tokio::test(start_paused = true)]
async fn test_auto_update_raises_stale_alarm_after_initial_delay() {
    let f = fixture();
    let settings = AlgorithmSettings {
        auto_update_secs: 3600,
        ..AlgorithmSettings::default()
    };
    let (_, watch) = single_watch(&f.engine, settings, stale_after_ten_minutes(), "/feed").await;
    f.engine.start().await.unwrap();
    let algorithm = f.engine.algorithm(watch.algorithm()).unwrap();
    assert!(algorithm.has_auto_update().await);

    f.bus.set("/feed", Value::Int(7));
    settle(&watch).await;
    assert!(open_records(&f.engine).await.is_empty());

    // Source silent for 11 minutes; only the timer can notice
    f.clock.advance(Duration::minutes(11));
    tokio::time::sleep(StdDuration::from_secs(4)).await;
    assert!(open_records(&f.engine).await.is_empty());

    // First fire is capped at five seconds even with an hourly interval
    tokio::time::sleep(StdDuration::from_secs(2)).await;
    let open = wait_for_open(&f.engine, 1).await;
    assert_eq!(open[0].message, "Stale value: 7");

    f.engine.stop().await;
    assert!(!algorithm.has_auto_update().await);
}

#[tokio::test(start_paused = true)]
async fn test_changing_interval_reschedules_timer() {
    let f = fixture();
    let (_, watch) = single_watch(
        &f.engine,
        AlgorithmSettings::default(),
        stale_after_ten_minutes(),
        "/feed",
    )
    .await;
    f.engine.start().await.unwrap();
    let algorithm = f.engine.algorithm(watch.algorithm()).unwrap();
    assert!(!algorithm.has_auto_update().await);

    f.bus.set("/feed", Value::Int(1));
    settle(&watch).await;
    f.clock.advance(Duration::minutes(11));
    tokio::time::sleep(StdDuration::from_secs(30)).await;
    assert!(open_records(&f.engine).await.is_empty());

    algorithm.set_auto_update_interval(&f.engine, 2).await;
    assert!(algorithm.has_auto_update().await);
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert!(open_records(&f.engine).await.is_empty());
    tokio::time::sleep(StdDuration::from_secs(2)).await;
    wait_for_open(&f.engine, 1).await;

    algorithm.set_auto_update_interval(&f.engine, 0).await;
    assert!(!algorithm.has_auto_update().await);
    f.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_auto_update() {
    let f = fixture();
    let settings = AlgorithmSettings {
        auto_update_secs: 10,
        ..AlgorithmSettings::default()
    };
    let (_, watch) = single_watch(&f.engine, settings, stale_after_ten_minutes(), "/feed").await;
    f.engine.start().await.unwrap();
    f.bus.set("/feed", Value::Int(1));
    settle(&watch).await;
    let algorithm = f.engine.algorithm(watch.algorithm()).unwrap();

    f.engine.stop().await;
    assert!(!algorithm.has_auto_update().await);
    f.clock.advance(Duration::minutes(11));
    tokio::time::sleep(StdDuration::from_secs(60)).await;
    assert!(open_records(&f.engine).await.is_empty());
}
