use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Result bucket a collection is sorted into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Events,
    Markets,
    Selections,
    #[default]
    Other,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Events,
        Bucket::Markets,
        Bucket::Selections,
        Bucket::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Events => "events",
            Bucket::Markets => "markets",
            Bucket::Selections => "selections",
            Bucket::Other => "other",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the run obtained its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    SingleShot,
    Session,
    Structured,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::SingleShot => "single_shot",
            RunMode::Session => "session",
            RunMode::Structured => "structured",
        }
    }
}

/// One extracted item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Name of the collect instruction that produced this record.
    pub collection: String,
    /// SHA-256 natural identity, stable across runs for the same item.
    pub key: String,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(collection: &str, fields: Map<String, Value>, key_fields: &[String]) -> Self {
        Self {
            collection: collection.to_string(),
            key: natural_key(collection, &fields, key_fields),
            fields,
        }
    }
}

/// Timing and count summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_events: usize,
    pub total_markets: usize,
    pub total_selections: usize,
    pub total_other: usize,
    pub error_count: usize,
    /// Required fields that fell back to their default.
    pub missing_required: usize,
    /// Size in bytes of the document behind the initial fetch.
    pub initial_fetch_bytes: usize,
    pub mode: RunMode,
}

/// Finalized output of one run. Immutable once returned by the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub run_id: Uuid,
    pub scraper: String,
    pub events: Vec<Record>,
    pub markets: Vec<Record>,
    pub selections: Vec<Record>,
    pub other: Vec<Record>,
    pub errors: Vec<String>,
    pub metadata: RunMetadata,
}

impl ScrapeResult {
    pub fn bucket(&self, bucket: Bucket) -> &[Record] {
        match bucket {
            Bucket::Events => &self.events,
            Bucket::Markets => &self.markets,
            Bucket::Selections => &self.selections,
            Bucket::Other => &self.other,
        }
    }

    /// All records paired with their bucket, in bucket order.
    pub fn records(&self) -> impl Iterator<Item = (Bucket, &Record)> {
        Bucket::ALL
            .into_iter()
            .flat_map(move |b| self.bucket(b).iter().map(move |r| (b, r)))
    }

    pub fn total_records(&self) -> usize {
        self.events.len() + self.markets.len() + self.selections.len() + self.other.len()
    }
}

/// Accumulates a run's output until it is finalized.
#[derive(Debug)]
pub(crate) struct PendingResult {
    run_id: Uuid,
    scraper: String,
    mode: RunMode,
    started_at: DateTime<Utc>,
    buckets: BTreeMap<Bucket, Vec<Record>>,
    errors: Vec<String>,
    missing_required: usize,
    initial_fetch_bytes: usize,
}

impl PendingResult {
    pub(crate) fn start(run_id: Uuid, scraper: &str, mode: RunMode) -> Self {
        Self {
            run_id,
            scraper: scraper.to_string(),
            mode,
            started_at: Utc::now(),
            buckets: BTreeMap::new(),
            errors: Vec::new(),
            missing_required: 0,
            initial_fetch_bytes: 0,
        }
    }

    pub(crate) fn set_initial_fetch_bytes(&mut self, bytes: usize) {
        self.initial_fetch_bytes = bytes;
    }

    pub(crate) fn add_records(&mut self, bucket: Bucket, records: Vec<Record>) {
        self.buckets.entry(bucket).or_default().extend(records);
    }

    pub(crate) fn add_errors(&mut self, errors: impl IntoIterator<Item = String>) {
        self.errors.extend(errors);
    }

    pub(crate) fn add_missing_required(&mut self, n: usize) {
        self.missing_required += n;
    }

    pub(crate) fn finalize(mut self) -> ScrapeResult {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        let mut take = |b: Bucket| self.buckets.remove(&b).unwrap_or_default();
        let events = take(Bucket::Events);
        let markets = take(Bucket::Markets);
        let selections = take(Bucket::Selections);
        let other = take(Bucket::Other);

        let metadata = RunMetadata {
            started_at: self.started_at,
            finished_at,
            duration_ms,
            total_events: events.len(),
            total_markets: markets.len(),
            total_selections: selections.len(),
            total_other: other.len(),
            error_count: self.errors.len(),
            missing_required: self.missing_required,
            initial_fetch_bytes: self.initial_fetch_bytes,
            mode: self.mode,
        };

        ScrapeResult {
            run_id: self.run_id,
            scraper: self.scraper,
            events,
            markets,
            selections,
            other,
            errors: self.errors,
            metadata,
        }
    }
}

/// A record the store could not persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub bucket: Bucket,
    pub collection: String,
    pub key: String,
    pub message: String,
}

/// Outcome of handing a result to a [`RecordStore`](crate::traits::RecordStore).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitReport {
    pub persisted: usize,
    pub errors: Vec<RecordError>,
}

/// A finalized result together with what happened when it was persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub result: ScrapeResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<SubmitReport>,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Natural identity of a record: the collection name plus the key fields
/// (or every field when none are configured), hashed.
pub fn natural_key(collection: &str, fields: &Map<String, Value>, key_fields: &[String]) -> String {
    let mut identity = Map::new();
    if key_fields.is_empty() {
        identity.clone_from(fields);
    } else {
        for name in key_fields {
            identity.insert(
                name.clone(),
                fields.get(name).cloned().unwrap_or(Value::Null),
            );
        }
    }
    compute_hash(&format!("{collection}\u{1f}{}", Value::Object(identity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_compute_hash_different_inputs() {
        assert_ne!(compute_hash("hello"), compute_hash("world"));
    }

    #[test]
    fn test_natural_key_uses_key_fields_only() {
        let a = fields(json!({"id": "7", "price": "1.5"}));
        let b = fields(json!({"id": "7", "price": "2.0"}));
        let keys = vec!["id".to_string()];
        assert_eq!(natural_key("odds", &a, &keys), natural_key("odds", &b, &keys));
        assert_ne!(natural_key("odds", &a, &[]), natural_key("odds", &b, &[]));
    }

    #[test]
    fn test_natural_key_depends_on_collection() {
        let a = fields(json!({"id": "7"}));
        assert_ne!(natural_key("events", &a, &[]), natural_key("markets", &a, &[]));
    }

    #[test]
    fn test_finalize_counts_buckets() {
        let mut pending = PendingResult::start(Uuid::new_v4(), "demo", RunMode::SingleShot);
        pending.add_records(
            Bucket::Events,
            vec![Record::new("events", fields(json!({"n": 1})), &[])],
        );
        pending.add_records(
            Bucket::Events,
            vec![Record::new("events", fields(json!({"n": 2})), &[])],
        );
        pending.add_records(
            Bucket::Other,
            vec![Record::new("misc", fields(json!({"n": 3})), &[])],
        );
        pending.add_errors(vec!["boom".to_string()]);
        pending.add_missing_required(2);

        let result = pending.finalize();
        assert_eq!(result.metadata.total_events, 2);
        assert_eq!(result.metadata.total_markets, 0);
        assert_eq!(result.metadata.total_other, 1);
        assert_eq!(result.metadata.error_count, 1);
        assert_eq!(result.metadata.missing_required, 2);
        assert_eq!(result.total_records(), 3);
        assert!(result.metadata.finished_at >= result.metadata.started_at);

        let buckets: Vec<Bucket> = result.records().map(|(b, _)| b).collect();
        assert_eq!(buckets, vec![Bucket::Events, Bucket::Events, Bucket::Other]);
    }

    #[test]
    fn test_bucket_serde_names() {
        assert_eq!(serde_json::to_string(&Bucket::Selections).unwrap(), "\"selections\"");
        let b: Bucket = serde_json::from_str("\"markets\"").unwrap();
        assert_eq!(b, Bucket::Markets);
        assert_eq!(Bucket::default(), Bucket::Other);
    }
}
