use chrono::Utc;
use quarry_core::models::{Bucket, Record, RunMetadata, RunMode, ScrapeResult};
use quarry_core::traits::RecordStore;
use quarry_db::RecordRepository;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::integration::common::setup_test_db;

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("fields must be an object"),
    }
}

fn result(events: Vec<Record>, markets: Vec<Record>) -> ScrapeResult {
    let now = Utc::now();
    ScrapeResult {
        run_id: Uuid::new_v4(),
        scraper: "odds".into(),
        metadata: RunMetadata {
            started_at: now,
            finished_at: now,
            duration_ms: 12,
            total_events: events.len(),
            total_markets: markets.len(),
            total_selections: 0,
            total_other: 0,
            error_count: 1,
            missing_required: 0,
            initial_fetch_bytes: 2048,
            mode: RunMode::SingleShot,
        },
        events,
        markets,
        selections: vec![],
        other: vec![],
        errors: vec!["collect `prices`: bad selector".into()],
    }
}

fn event(name: &str, price: f64) -> Record {
    Record::new(
        "events",
        fields(json!({"name": name, "price": price})),
        &["name".to_string()],
    )
}

#[tokio::test]
async fn submit_persists_every_record() {
    let (pool, _container) = setup_test_db().await;
    let repo = RecordRepository::new(pool);

    let market = Record::new("markets", fields(json!({"market": "1X2"})), &[]);
    let run = result(vec![event("A v B", 2.1), event("C v D", 3.4)], vec![market]);

    let report = repo.submit(&run).await.unwrap();
    assert_eq!(report.persisted, 3);
    assert!(report.errors.is_empty());
    assert_eq!(repo.count_records("odds").await.unwrap(), 3);
    assert_eq!(repo.count_runs("odds").await.unwrap(), 1);

    let markets = repo
        .get_records("odds", Some(Bucket::Markets), 10)
        .await
        .unwrap();
    assert_eq!(markets.len(), 1);
    assert_eq!(markets[0].fields, json!({"market": "1X2"}));
    assert_eq!(markets[0].last_run_id, run.run_id);
}

#[tokio::test]
async fn resubmitting_updates_by_natural_key() {
    let (pool, _container) = setup_test_db().await;
    let repo = RecordRepository::new(pool);

    let first = result(vec![event("A v B", 2.1)], vec![]);
    repo.submit(&first).await.unwrap();

    // Same identity (name), new price, new run.
    let second = result(vec![event("A v B", 1.9)], vec![]);
    let report = repo.submit(&second).await.unwrap();
    assert_eq!(report.persisted, 1);

    let stored = repo.get_records("odds", None, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].bucket, Bucket::Events);
    assert_eq!(stored[0].fields["price"], json!(1.9));
    assert_eq!(stored[0].first_run_id, first.run_id);
    assert_eq!(stored[0].last_run_id, second.run_id);
    assert_eq!(repo.count_runs("odds").await.unwrap(), 2);
}

#[tokio::test]
async fn submitting_same_result_twice_is_idempotent() {
    let (pool, _container) = setup_test_db().await;
    let repo = RecordRepository::new(pool);

    let run = result(vec![event("A v B", 2.1), event("C v D", 3.4)], vec![]);
    repo.submit(&run).await.unwrap();
    repo.submit(&run).await.unwrap();

    assert_eq!(repo.count_records("odds").await.unwrap(), 2);
    assert_eq!(repo.count_runs("odds").await.unwrap(), 1);
}
