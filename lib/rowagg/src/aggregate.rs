use serde::Serialize;
use std::collections::hash_map::{self, HashMap};
use tracing::debug;

/// Running statistics for one key. Values are in tenths; `sum` is widened
/// to `i128` so any number of `i64` values folds without overflow.
///
/// The empty state has `count == 0`, `sum == 0` and inverted sentinels for
/// `min`/`max`; it never appears in a published result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub sum: i128,
    pub count: u64,
    pub min: i64,
    pub max: i64,
}

impl Default for Stats {
    fn default() -> Self {
        Self { sum: 0, count: 0, min: i64::MAX, max: i64::MIN }
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(value: i64) -> Self {
        Self { sum: i128::from(value), count: 1, min: value, max: value }
    }

    pub fn add(&mut self, value: i64) {
        self.sum += i128::from(value);
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn merge(&mut self, other: &Stats) {
        self.sum += other.sum;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Average in tenths.
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 { None } else { Some(self.sum as f64 / self.count as f64) }
    }
}

/// Mapping from key to [`Stats`]. Used both as a worker's local aggregator and
/// as the merged result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Aggregate {
    entries: HashMap<String, Stats>,
}

/// The merged result handed back to the caller.
pub type FinalAggregate = Aggregate;

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one value in. Allocates only the first time a key is seen.
    pub fn add(&mut self, key: &str, value: i64) {
        match self.entries.get_mut(key) {
            Some(stats) => stats.add(value),
            None => {
                self.entries.insert(key.to_owned(), Stats::of(value));
            }
        }
    }

    /// Combines `other` into `self`. Commutative and associative.
    pub fn merge(&mut self, other: Aggregate) {
        for (key, stats) in other.entries {
            match self.entries.entry(key) {
                hash_map::Entry::Occupied(mut e) => e.get_mut().merge(&stats),
                hash_map::Entry::Vacant(e) => {
                    e.insert(stats);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Stats> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Stats)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn into_sorted(self) -> Vec<(String, Stats)> {
        let mut out: Vec<(String, Stats)> = self.entries.into_iter().collect();
        out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// One worker's aggregate, published exactly once after its input is drained.
#[derive(Debug)]
pub struct PartialAggregate {
    pub worker: usize,
    pub aggregate: Aggregate,
}

/// Folds published partials into the final result as they arrive.
#[derive(Debug, Default)]
pub struct MergeReducer {
    merged: Aggregate,
    received: usize,
}

impl MergeReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, partial: PartialAggregate) {
        debug!(worker = partial.worker, keys = partial.aggregate.len(), "merging partial aggregate");
        self.received += 1;
        if self.merged.is_empty() {
            self.merged = partial.aggregate;
        } else {
            self.merged.merge(partial.aggregate);
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn finish(self) -> FinalAggregate {
        self.merged
    }
}
