use chrono::{DateTime, Duration, TimeZone, Utc};
use petra_alarms::provider::{collect, Cursor};
use petra_alarms::{AlarmQuery, AlarmRecord, AlarmState, MemoryProvider, Provider, SortColumn};
use proptest::prelude::*;
use tokio::runtime::Runtime;
use uuid::Uuid;

const CLASSES: [&str; 3] = ["Plant", "Office", "Yard"];

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

#[derive(Debug, Clone)]
struct Spec {
    class: usize,
    minute: i64,
    path: u8,
    closed: bool,
}

fn spec() -> impl Strategy<Value = Spec> {
    (0..CLASSES.len(), 0..120i64, any::<u8>(), any::<bool>()).prop_map(|(class, minute, path, closed)| Spec {
        class,
        minute,
        path,
        closed,
    })
}

fn build(specs: &[Spec]) -> Vec<AlarmRecord> {
    specs
        .iter()
        .map(|s| {
            let created = base() + Duration::minutes(s.minute);
            let mut record = AlarmRecord::new(
                Uuid::new_v4(),
                CLASSES[s.class],
                None,
                format!("/points/{:03}", s.path),
                AlarmState::Alert,
                "m",
                created,
            );
            if s.closed {
                record.return_to_normal(created + Duration::seconds(1));
            }
            record
        })
        .collect()
}

async fn load(records: &[AlarmRecord]) -> MemoryProvider {
    let provider = MemoryProvider::new();
    for record in records {
        provider.add_alarm(record).await.unwrap();
    }
    provider
}

proptest! {
    #[test]
    fn test_range_and_class_filters(
        specs in prop::collection::vec(spec(), 0..40),
        class in prop::option::of(0..CLASSES.len()),
        from in prop::option::of(0..120i64),
        span in 0..120i64,
    ) {
        let rt = Runtime::new().unwrap();
        let records = build(&specs);
        let from = from.map(|m| base() + Duration::minutes(m));
        let to = from.map(|f| f + Duration::minutes(span));
        let mut query = AlarmQuery::all().between(from, to);
        query.class = class.map(|c| CLASSES[c].to_string());

        let found = rt.block_on(async {
            let provider = load(&records).await;
            collect(provider.query_alarms(&query).await.unwrap()).await.unwrap()
        });

        let mut expected: Vec<_> = records
            .iter()
            .filter(|r| query.class.as_deref().map_or(true, |c| r.alarm_class == c))
            .filter(|r| from.map_or(true, |f| r.created_time >= f))
            .filter(|r| to.map_or(true, |t| r.created_time < t))
            .map(|r| r.id)
            .collect();
        expected.sort();
        let mut ids: Vec<_> = found.iter().map(|r| r.id).collect();
        ids.sort();
        prop_assert_eq!(ids, expected);

        // Natural order is created time ascending
        prop_assert!(found.windows(2).all(|w| w[0].created_time <= w[1].created_time));
    }

    #[test]
    fn test_sorted_queries_are_ordered(
        specs in prop::collection::vec(spec(), 0..40),
        ascending in any::<bool>(),
    ) {
        let rt = Runtime::new().unwrap();
        let records = build(&specs);
        let query = AlarmQuery::all().sorted_by(SortColumn::SourcePath, ascending);
        let found = rt.block_on(async {
            let provider = load(&records).await;
            collect(provider.query_alarms(&query).await.unwrap()).await.unwrap()
        });

        prop_assert_eq!(found.len(), records.len());
        for pair in found.windows(2) {
            if ascending {
                prop_assert!(pair[0].source_path <= pair[1].source_path);
            } else {
                prop_assert!(pair[0].source_path >= pair[1].source_path);
            }
        }
    }

    #[test]
    fn test_pages_partition_the_result(
        specs in prop::collection::vec(spec(), 0..40),
        page_size in 1..10usize,
    ) {
        let rt = Runtime::new().unwrap();
        let records = build(&specs);
        let query = AlarmQuery::open(None);
        let (all, pages) = rt.block_on(async {
            let provider = load(&records).await;
            let all = collect(provider.query_alarms(&query).await.unwrap()).await.unwrap();
            let mut pages = Vec::new();
            let count = petra_alarms::provider::page_count(all.len(), page_size);
            for page in 0..count + 1 {
                let mut cursor = provider.query_alarms(&query).await.unwrap();
                cursor.set_paging(page, page_size).unwrap();
                pages.push(collect(cursor).await.unwrap());
            }
            (all, pages)
        });

        prop_assert!(all.iter().all(|r| r.is_open()));
        prop_assert_eq!(all.len(), records.iter().filter(|r| r.is_open()).count());
        // Every page but the extra one past the end is non-empty and bounded
        let (last, full) = pages.split_last().unwrap();
        prop_assert!(last.is_empty());
        prop_assert!(full.iter().all(|p| !p.is_empty() && p.len() <= page_size));
        let joined: Vec<_> = full.iter().flatten().map(|r| r.id).collect();
        let expected: Vec<_> = all.iter().map(|r| r.id).collect();
        prop_assert_eq!(joined, expected);
    }
}
