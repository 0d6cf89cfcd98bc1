use crate::support::*;
use petra_alarms::{AlarmError, AlarmState, AlgorithmSettings, ConditionConfig, Lifecycle, Value};

#[tokio::test]
async fn test_start_brings_tree_steady_and_stop_is_terminal() {
    let f = fixture();
    let (class, watch) = single_watch(&f.engine, AlgorithmSettings::default(), ConditionConfig::default(), "/door").await;
    assert_eq!(f.engine.lifecycle(), Lifecycle::Created);
    assert!(!watch.is_steady());
    assert!(!f.bus.is_subscribed("/door"));

    f.engine.start().await.unwrap();
    assert!(f.engine.is_steady());
    assert!(class.is_steady());
    assert!(watch.is_steady());
    assert!(f.bus.is_subscribed("/door"));

    f.engine.stop().await;
    assert_eq!(f.engine.lifecycle(), Lifecycle::Stopped);
    assert_eq!(watch.lifecycle().get(), Lifecycle::Stopped);
    assert!(!f.bus.is_subscribed("/door"));
    assert!(f.engine.watch(watch.handle()).is_err());
    assert!(f.engine.classes().is_empty());
    assert!(matches!(f.engine.start().await, Err(AlarmError::Config(_))));
}

#[tokio::test]
async fn test_nodes_added_while_running_are_started() {
    let f = fixture();
    f.engine.start().await.unwrap();
    f.bus.set("/late", Value::Bool(true));

    let (_, watch) = single_watch(&f.engine, AlgorithmSettings::default(), ConditionConfig::default(), "/late").await;
    assert!(watch.is_steady());
    assert!(f.bus.is_subscribed("/late"));
    // The current value is delivered on subscription
    eventually("alarm", || watch.alarm_state() == AlarmState::Alert).await;
    f.engine.stop().await;
}

#[tokio::test]
async fn test_host_subscription_follows_last_watch() {
    let f = fixture();
    let (_, first) = single_watch(&f.engine, AlgorithmSettings::default(), ConditionConfig::default(), "/shared").await;
    let second = f
        .engine
        .add_watch(first.algorithm(), "Other", "/shared")
        .await
        .unwrap();
    f.engine.start().await.unwrap();
    assert_eq!(f.engine.subscriptions().subscribers("/shared").len(), 2);

    f.engine.delete_node(first.handle()).await.unwrap();
    assert!(f.bus.is_subscribed("/shared"));
    f.engine.delete_node(second.handle()).await.unwrap();
    assert!(!f.bus.is_subscribed("/shared"));
    assert!(f.engine.delete_node(second.handle()).await.unwrap_err().is_not_found());
    f.engine.stop().await;
}

#[tokio::test]
async fn test_records_need_a_steady_engine() {
    let f = fixture();
    let class = f.engine.create_alarm_class("Manual").await.unwrap();
    let err = f
        .engine
        .raise_alarm(class.handle(), "/host/check", "Fault", "check failed")
        .await
        .unwrap_err();
    assert!(matches!(err.root(), AlarmError::NotSteady));

    f.engine.start().await.unwrap();
    f.engine
        .raise_alarm(class.handle(), "/host/check", "Fault", "check failed")
        .await
        .unwrap();
    f.engine.stop().await;
}

#[tokio::test]
async fn test_moving_a_watch_resubscribes() {
    let f = fixture();
    let (_, watch) = single_watch(&f.engine, AlgorithmSettings::default(), ConditionConfig::default(), "/old").await;
    f.engine.start().await.unwrap();
    f.engine.set_watch_source_path(watch.handle(), "/new").unwrap();
    assert!(!f.bus.is_subscribed("/old"));
    assert!(f.bus.is_subscribed("/new"));

    f.bus.set("/new", Value::Bool(true));
    eventually("alarm", || watch.alarm_state() == AlarmState::Alert).await;
    assert_eq!(open_records(&f.engine).await[0].source_path, "/new");
    f.engine.stop().await;
}
