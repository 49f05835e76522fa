use std::{
    cmp::{max, min},
    collections::HashMap,
};

use super::bucket::bucket_10_2_sigfigs;

/// A straightforward histogram with buckets and counts, plus the exact
/// count/sum/min/max of what went into it.
///
/// Buckets are tenths-of-powers-of-ten: each value lands in the bucket holding its
/// 2 significant figures, rounded away from 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    pub(crate) histogram: HashMap<i64, u64>,
    /// Number of observations
    pub count: u64,
    /// Sum of all observations
    pub sum: i64,
    /// Smallest observation
    pub min: i64,
    /// Largest observation
    pub max: i64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            histogram: HashMap::new(),
            count: 0,
            sum: 0,
            min: i64::MAX,
            max: i64::MIN,
        }
    }
}

impl Histogram {
    /// Add 1 to the value's bucket
    pub fn accumulate<T: Into<i64>>(&mut self, value: T) {
        let v = value.into();
        let bucket = bucket_10_2_sigfigs(v);
        self.histogram
            .entry(bucket)
            .and_modify(|b| *b += 1)
            .or_insert(1);
        self.count += 1;
        self.sum = self.sum.saturating_add(v);
        self.min = min(self.min, v);
        self.max = max(self.max, v);
    }

    /// A view of threshold -> count
    pub fn buckets(&self) -> &HashMap<i64, u64> {
        &self.histogram
    }

    /// Consume this histogram into a map of threshold -> count
    pub fn into_map(self) -> HashMap<i64, u64> {
        self.histogram
    }
}
