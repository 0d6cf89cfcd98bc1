use crate::support::*;
use chrono::Duration;
use petra_alarms::record::OpenFilter;
use petra_alarms::{AlarmError, AlarmQuery, AlarmState, Clock, SortColumn};

#[tokio::test]
async fn test_acknowledge_list_is_all_or_nothing() {
    let f = fixture();
    let class = f.engine.create_alarm_class("Plant").await.unwrap();
    f.engine.start().await.unwrap();
    let a = f.engine.raise_alarm(class.handle(), "/a", "Fault", "a").await.unwrap();
    let b = f.engine.raise_alarm(class.handle(), "/b", "Fault", "b").await.unwrap();

    let bad = format!("{}, not-a-uuid", a.id);
    let err = f.engine.acknowledge(&bad, "operator").await.unwrap_err();
    assert!(matches!(err.root(), AlarmError::InvalidParameter(_)));
    assert!(!f.engine.get_alarm(&a.id.to_string()).await.unwrap().is_acknowledged);

    let both = format!("{},{}", a.id, b.id);
    assert_eq!(f.engine.acknowledge(&both, "operator").await.unwrap(), 2);
    let row = f.engine.get_alarm(&b.id.to_string()).await.unwrap();
    assert!(row.is_acknowledged);
    assert_eq!(row.ack_user.as_deref(), Some("operator"));
    f.engine.stop().await;
}

#[tokio::test]
async fn test_blank_user_is_rejected() {
    let f = fixture();
    let class = f.engine.create_alarm_class("Plant").await.unwrap();
    f.engine.start().await.unwrap();
    let record = f.engine.raise_alarm(class.handle(), "/a", "Fault", "a").await.unwrap();
    let id = record.id.to_string();

    let err = f.engine.acknowledge(&id, " ").await.unwrap_err();
    assert!(matches!(err.root(), AlarmError::InvalidParameter(_)));
    assert!(f.engine.acknowledge_all("").await.is_err());
    assert!(f.engine.acknowledge_all_open(class.handle(), "").await.is_err());
    let err = f.engine.add_note(&id, "", "checked").await.unwrap_err();
    assert!(matches!(err.root(), AlarmError::InvalidParameter(_)));

    let row = f.engine.get_alarm(&id).await.unwrap();
    assert!(!row.is_acknowledged);
    assert!(!row.has_notes);
    f.engine.stop().await;
}

#[tokio::test]
async fn test_acknowledge_all_per_class_and_globally() {
    let f = fixture();
    let plant = f.engine.create_alarm_class("Plant").await.unwrap();
    let office = f.engine.create_alarm_class("Office").await.unwrap();
    f.engine.start().await.unwrap();
    f.engine.raise_alarm(plant.handle(), "/a", "Fault", "a").await.unwrap();
    f.engine.raise_alarm(plant.handle(), "/b", "Alert", "b").await.unwrap();
    f.engine.raise_alarm(office.handle(), "/c", "Offnormal", "c").await.unwrap();

    // Alerts do not wait for an acknowledgement
    assert_eq!(f.engine.acknowledge_all_open(plant.handle(), "op").await.unwrap(), 1);
    assert_eq!(f.engine.acknowledge_all("op").await.unwrap(), 1);
    assert_eq!(f.engine.acknowledge_all("op").await.unwrap(), 0);
    f.engine.stop().await;
}

#[tokio::test]
async fn test_notes_and_unknown_records() {
    let f = fixture();
    let class = f.engine.create_alarm_class("Plant").await.unwrap();
    f.engine.start().await.unwrap();
    let record = f.engine.raise_alarm(class.handle(), "/a", "Fault", "a").await.unwrap();
    let id = record.id.to_string();

    f.engine.add_note(&id, "alice", "checking").await.unwrap();
    f.clock.advance(Duration::seconds(5));
    f.engine.add_note(&id, "bob", "fixed").await.unwrap();
    let notes = f.engine.get_notes(&id).await.unwrap();
    let texts: Vec<_> = notes.iter().map(|n| n.text.as_str()).collect();
    assert_eq!(texts, vec!["checking", "fixed"]);
    assert!(f.engine.get_alarm(&id).await.unwrap().has_notes);

    let unknown = uuid::Uuid::new_v4().to_string();
    assert!(f.engine.add_note(&unknown, "alice", "x").await.unwrap_err().is_not_found());
    assert!(f.engine.get_alarm(&unknown).await.unwrap_err().is_not_found());
    assert!(f.engine.add_note(&id, "alice", "  ").await.is_err());
    f.engine.stop().await;
}

#[tokio::test]
async fn test_manual_alarm_rejects_normal_and_unknown_class() {
    let f = fixture();
    let class = f.engine.create_alarm_class("Plant").await.unwrap();
    f.engine.start().await.unwrap();
    let err = f.engine.raise_alarm(class.handle(), "/a", "Normal", "x").await.unwrap_err();
    assert!(matches!(err.root(), AlarmError::InvalidParameter(_)));
    assert!(f.engine.raise_alarm(999, "/a", "Fault", "x").await.unwrap_err().is_not_found());
    f.engine.stop().await;
}

#[tokio::test]
async fn test_paging() {
    let f = fixture();
    let class = f.engine.create_alarm_class("Plant").await.unwrap();
    f.engine.start().await.unwrap();
    for i in 0..7 {
        f.engine
            .raise_alarm(class.handle(), &format!("/p/{}", i), "Fault", "x")
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(1));
    }

    let query = AlarmQuery::all();
    assert_eq!(f.engine.get_alarm_page_count(&query, Some(3)).await.unwrap(), 3);
    assert_eq!(f.engine.get_alarm_page_count(&query, None).await.unwrap(), 1);
    assert!(f.engine.get_alarm_page_count(&query, Some(0)).await.is_err());

    let last = f.engine.get_alarm_page(&query, 2, Some(3)).await.unwrap();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].source_path, "/p/6");

    let newest_first = AlarmQuery::all().sorted_by(SortColumn::CreatedTime, false);
    let first = f.engine.get_alarm_page(&newest_first, 0, Some(3)).await.unwrap();
    let paths: Vec<_> = first.iter().map(|r| r.source_path.as_str()).collect();
    assert_eq!(paths, vec!["/p/6", "/p/5", "/p/4"]);
    assert!(f.engine.get_alarm_page(&query, 9, Some(3)).await.unwrap().is_empty());
    f.engine.stop().await;
}

#[tokio::test]
async fn test_filtered_queries() {
    let f = fixture();
    let plant = f.engine.create_alarm_class("Plant").await.unwrap();
    let office = f.engine.create_alarm_class("Office").await.unwrap();
    f.engine.start().await.unwrap();
    let a = f.engine.raise_alarm(plant.handle(), "/a", "Fault", "a").await.unwrap();
    f.engine.raise_alarm(plant.handle(), "/b", "Alert", "b").await.unwrap();
    f.engine.raise_alarm(office.handle(), "/c", "Fault", "c").await.unwrap();
    f.engine.return_to_normal(&a.id.to_string()).await.unwrap();
    f.engine.acknowledge(&a.id.to_string(), "op").await.unwrap();

    let closed = AlarmQuery {
        open: OpenFilter::Closed,
        ..AlarmQuery::all()
    };
    let rows = f.engine.get_alarm_page(&closed, 0, None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, a.id);

    let faults = AlarmQuery {
        severity: Some(AlarmState::Fault),
        ..AlarmQuery::all().for_class("Plant")
    };
    assert_eq!(f.engine.get_alarm_page(&faults, 0, None).await.unwrap().len(), 1);

    // Class ranges default to today
    assert_eq!(f.engine.get_class_alarms(plant.handle(), None, None).await.unwrap().len(), 2);
    let before = f.clock.now() - Duration::days(3);
    assert!(f
        .engine
        .get_class_alarms(plant.handle(), Some(before), Some(before + Duration::hours(1)))
        .await
        .unwrap()
        .is_empty());
    f.engine.stop().await;
}

#[tokio::test]
async fn test_counts_and_deletion() {
    let f = fixture();
    let class = f.engine.create_alarm_class("Plant").await.unwrap();
    f.engine.start().await.unwrap();
    let a = f.engine.raise_alarm(class.handle(), "/a", "Fault", "a").await.unwrap();
    f.engine.raise_alarm(class.handle(), "/b", "Alert", "b").await.unwrap();
    f.engine.return_to_normal(&a.id.to_string()).await.unwrap();

    assert!(f.engine.update_counts(true).await.unwrap());
    let counts = f.engine.counts();
    assert_eq!(counts.total, 2);
    assert_eq!(counts.in_alarm, 1);
    assert_eq!(counts.open, 2);
    assert_eq!(counts.unacked, 1);
    assert_eq!(class.counts(), counts);

    f.engine.delete_record(&a.id.to_string()).await.unwrap();
    assert!(f.engine.delete_record(&a.id.to_string()).await.unwrap_err().is_not_found());
    f.engine.update_counts(true).await.unwrap();
    assert_eq!(f.engine.counts().total, 1);

    f.engine.delete_all_records().await.unwrap();
    f.engine.update_counts(true).await.unwrap();
    assert_eq!(f.engine.counts().total, 0);
    f.engine.stop().await;
}

#[tokio::test]
async fn test_catalog_and_tree_actions() {
    let f = fixture();
    assert_eq!(
        f.engine.algorithm_catalog(),
        vec!["Boolean Algorithm", "Out of Range Algorithm", "Stale Algorithm", "String Algorithm"]
    );
    let class = f.engine.create_alarm_class("Plant").await.unwrap();
    assert!(f.engine.create_alarm_class("Plant").await.is_err());
    assert!(f.engine.create_algorithm(class.handle(), "X", "Magic Algorithm").await.is_err());

    let stale = f
        .engine
        .create_algorithm(class.handle(), "Heartbeat", "Stale Algorithm")
        .await
        .unwrap();
    assert_eq!(stale.config_schema().len(), 3);
    let watch = f.engine.create_watch(stale.handle(), "Pump", "/pump/heartbeat").await.unwrap();
    assert_eq!(f.engine.watch_path(watch.handle()).as_deref(), Some("Plant/Heartbeat/Pump"));

    f.engine.delete_node(class.handle()).await.unwrap();
    assert!(f.engine.watch(watch.handle()).is_err());
    assert!(f.engine.class_by_name("Plant").is_none());
}
