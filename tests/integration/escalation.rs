use crate::support::*;
use chrono::Duration;
use petra_alarms::{ClassSettings, EscalationBasis, EscalationTier};

fn escalating(basis: EscalationBasis) -> ClassSettings {
    ClassSettings {
        escalation1: EscalationTier::new(0, 0, 10),
        escalation2: EscalationTier::new(0, 0, 15),
        escalation_basis: basis,
        ..ClassSettings::default()
    }
}

#[tokio::test]
async fn test_tiers_fire_once_in_order() {
    let f = fixture();
    let class = f.engine.add_class("Plant", escalating(EscalationBasis::FromTier1)).await.unwrap();
    f.engine.start().await.unwrap();
    let mut tier1 = f.engine.stream_escalations(class.handle(), 1).unwrap();
    let mut tier2 = f.engine.stream_escalations(class.handle(), 2).unwrap();

    let record = f
        .engine
        .raise_alarm(class.handle(), "/boiler/pressure", "Fault", "pressure high")
        .await
        .unwrap();

    f.clock.advance(Duration::minutes(11));
    f.engine.execute_tick().await;
    let escalated = next_update(&mut tier1).await.expect("tier 1");
    assert_eq!(escalated[0].id, record.id);
    assert!(next_update(&mut tier2).await.is_none());

    // Tier 2 counts from tier 1, so it is due at 25 minutes
    f.clock.advance(Duration::minutes(10));
    f.engine.execute_tick().await;
    assert!(next_update(&mut tier2).await.is_none());
    f.clock.advance(Duration::minutes(5));
    f.engine.execute_tick().await;
    assert_eq!(next_update(&mut tier2).await.expect("tier 2")[0].id, record.id);
    assert!(next_update(&mut tier1).await.is_none());

    tier1.close().await;
    tier2.close().await;
    f.engine.stop().await;
}

#[tokio::test]
async fn test_tier2_from_creation() {
    let f = fixture();
    let class = f.engine.add_class("Plant", escalating(EscalationBasis::FromCreation)).await.unwrap();
    f.engine.start().await.unwrap();
    let mut tier2 = f.engine.stream_escalations(class.handle(), 2).unwrap();
    f.engine
        .raise_alarm(class.handle(), "/boiler/pressure", "Offnormal", "pressure high")
        .await
        .unwrap();

    f.clock.advance(Duration::minutes(16));
    f.engine.execute_tick().await;
    assert!(next_update(&mut tier2).await.is_some());
    f.engine.stop().await;
}

#[tokio::test]
async fn test_acknowledged_and_informational_records_do_not_escalate() {
    let f = fixture();
    let class = f.engine.add_class("Plant", escalating(EscalationBasis::FromTier1)).await.unwrap();
    f.engine.start().await.unwrap();
    let mut tier1 = f.engine.stream_escalations(class.handle(), 1).unwrap();

    let fault = f
        .engine
        .raise_alarm(class.handle(), "/a", "Fault", "acked")
        .await
        .unwrap();
    f.engine
        .raise_alarm(class.handle(), "/b", "Alert", "informational")
        .await
        .unwrap();
    f.engine.acknowledge(&fault.id.to_string(), "operator").await.unwrap();

    f.clock.advance(Duration::minutes(11));
    f.engine.execute_tick().await;
    assert!(next_update(&mut tier1).await.is_none());
    f.engine.stop().await;
}

#[tokio::test]
async fn test_bad_tier_is_rejected() {
    let f = fixture();
    let class = f.engine.add_class("Plant", ClassSettings::default()).await.unwrap();
    assert!(f.engine.stream_escalations(class.handle(), 3).is_err());
}

#[tokio::test]
async fn test_auto_purge_runs_hourly_after_first_tick() {
    let f = fixture();
    let settings = ClassSettings {
        purge_closed_days: 1,
        ..ClassSettings::default()
    };
    let class = f.engine.add_class("Plant", settings).await.unwrap();
    f.engine.start().await.unwrap();

    let closed = f
        .engine
        .raise_alarm(class.handle(), "/a", "Alert", "closes")
        .await
        .unwrap();
    f.engine.return_to_normal(&closed.id.to_string()).await.unwrap();
    let open = f
        .engine
        .raise_alarm(class.handle(), "/b", "Fault", "stays open")
        .await
        .unwrap();

    f.clock.advance(Duration::days(2));
    // The first tick only starts the schedule
    f.engine.execute_tick().await;
    assert!(f.engine.provider().get_alarm(closed.id).await.unwrap().is_some());

    f.clock.advance(Duration::minutes(61));
    f.engine.execute_tick().await;
    assert!(f.engine.provider().get_alarm(closed.id).await.unwrap().is_none());
    assert!(f.engine.provider().get_alarm(open.id).await.unwrap().is_some());
    f.engine.stop().await;
}

#[tokio::test]
async fn test_purge_open_records() {
    let f = fixture();
    let settings = ClassSettings {
        purge_open_days: 7,
        ..ClassSettings::default()
    };
    let class = f.engine.add_class("Plant", settings).await.unwrap();
    f.engine.start().await.unwrap();
    for i in 0..3 {
        f.engine
            .raise_alarm(class.handle(), &format!("/p/{}", i), "Fault", "old")
            .await
            .unwrap();
    }
    f.clock.advance(Duration::days(8));
    f.engine
        .raise_alarm(class.handle(), "/p/new", "Fault", "new")
        .await
        .unwrap();

    assert_eq!(class.purge(&f.engine, f.engine.now()).await, 3);
    assert_eq!(open_records(&f.engine).await.len(), 1);
    f.engine.stop().await;
}
