use chrono::{Duration, TimeZone, Utc};
use petra_alarms::{AlarmRecord, AlarmState};
use proptest::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Acknowledge(String),
    ReturnToNormal,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(Op::Acknowledge),
        Just(Op::ReturnToNormal),
    ]
}

fn severity() -> impl Strategy<Value = AlarmState> {
    prop_oneof![Just(AlarmState::Alert), Just(AlarmState::Fault), Just(AlarmState::Offnormal)]
}

proptest! {
    #[test]
    fn test_record_lifecycle_invariants(
        alarm_type in severity(),
        ops in prop::collection::vec(op(), 0..8)
    ) {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut record = AlarmRecord::new(Uuid::new_v4(), "Plant", None, "/p", alarm_type, "m", created);
        let mut first_ack: Option<(String, i64)> = None;
        let mut first_normal: Option<i64> = None;

        for (step, op) in ops.iter().enumerate() {
            let at = created + Duration::seconds(step as i64 + 1);
            match op {
                Op::Acknowledge(user) => {
                    let changed = record.acknowledge(user, at);
                    prop_assert_eq!(changed, first_ack.is_none());
                    if first_ack.is_none() {
                        first_ack = Some((user.clone(), step as i64 + 1));
                    }
                }
                Op::ReturnToNormal => {
                    let changed = record.return_to_normal(at);
                    prop_assert_eq!(changed, first_normal.is_none());
                    if first_normal.is_none() {
                        first_normal = Some(step as i64 + 1);
                    }
                }
            }

            // Timestamps are set once and never move
            if let Some((user, secs)) = &first_ack {
                prop_assert_eq!(record.ack_user.as_deref(), Some(user.as_str()));
                prop_assert_eq!(record.ack_time, Some(created + Duration::seconds(*secs)));
            }
            if let Some(secs) = first_normal {
                prop_assert_eq!(record.normal_time, Some(created + Duration::seconds(secs)));
            }

            let expected_closed =
                record.is_normal() && (!alarm_type.requires_ack() || record.is_acknowledged());
            prop_assert_eq!(record.is_closed(), expected_closed);
            prop_assert_eq!(record.is_open(), !expected_closed);
            prop_assert!(record.created_time <= record.normal_time.unwrap_or(record.created_time));
        }
    }

    #[test]
    fn test_severity_parsing_never_yields_normal(text in "[A-Za-z]{0,10}") {
        if let Ok(state) = AlarmState::alarm_severity(&text) {
            prop_assert!(state.is_alarm());
        }
    }
}
