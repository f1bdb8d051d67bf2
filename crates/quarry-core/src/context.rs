//! Mutable state of a single run.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::error;

use crate::extract::ExtractedItems;
use crate::instruction::CollectInstruction;
use crate::models::{Bucket, Record};
use crate::processor::ProcessorContext;

/// Collections, variables, loop counters and errors of one run.
///
/// Owned by exactly one run; never shared between tasks.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    base_url: String,
    variables: BTreeMap<String, Value>,
    collections: BTreeMap<String, Vec<Record>>,
    buckets: BTreeMap<String, Bucket>,
    loop_counters: HashMap<String, u32>,
    errors: Vec<String>,
    missing_required: usize,
    path: Vec<usize>,
}

impl ExecutionContext {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_var(&mut self, name: &str, value: impl Into<Value>) {
        self.variables.insert(name.to_string(), value.into());
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Processor context for the page at `page_url` (or the start URL).
    pub fn processor_context(&self, page_url: Option<&str>) -> ProcessorContext {
        ProcessorContext {
            base_url: Some(page_url.unwrap_or(&self.base_url).to_string()),
            variables: self.variables.clone(),
        }
    }

    /// Appends extracted rows to the named collection. Never overwrites.
    pub fn append(&mut self, collect: &CollectInstruction, items: ExtractedItems) -> usize {
        let added = items.rows.len();
        self.missing_required += items.missing_required;
        self.buckets
            .entry(collect.name.clone())
            .or_insert(collect.bucket);
        self.collections
            .entry(collect.name.clone())
            .or_default()
            .extend(
                items
                    .rows
                    .into_iter()
                    .map(|fields| Record::new(&collect.name, fields, &collect.key_fields)),
            );
        added
    }

    pub fn collection(&self, name: &str) -> &[Record] {
        self.collections.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(error = %message, "Run error recorded");
        self.errors.push(message);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn missing_required(&self) -> usize {
        self.missing_required
    }

    pub(crate) fn enter(&mut self, index: usize) {
        self.path.push(index);
    }

    pub(crate) fn leave(&mut self) {
        self.path.pop();
    }

    /// Counter key of the instruction currently executing, e.g. `loop[0.2]`.
    pub(crate) fn loop_key(&self) -> String {
        let joined: Vec<String> = self.path.iter().map(|i| i.to_string()).collect();
        format!("loop[{}]", joined.join("."))
    }

    pub(crate) fn reset_loop(&mut self, key: &str) {
        self.loop_counters.insert(key.to_string(), 0);
    }

    pub(crate) fn loop_count(&self, key: &str) -> u32 {
        self.loop_counters.get(key).copied().unwrap_or(0)
    }

    /// Increments and returns the counter for `key`.
    pub(crate) fn tick_loop(&mut self, key: &str) -> u32 {
        let counter = self.loop_counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Collections grouped by bucket, plus the recorded errors.
    pub(crate) fn into_parts(self) -> (Vec<(Bucket, Vec<Record>)>, Vec<String>, usize) {
        let buckets = self.buckets;
        let grouped = self
            .collections
            .into_iter()
            .map(|(name, records)| {
                let bucket = buckets.get(&name).copied().unwrap_or_default();
                (bucket, records)
            })
            .collect();
        (grouped, self.errors, self.missing_required)
    }
}
