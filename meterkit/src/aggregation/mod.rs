//! Types for working with in-memory local aggregations

mod bucket;
mod histogram;
mod sum;

pub(crate) use bucket::bucket_10_below_2_sigfigs;
pub use histogram::Histogram;
pub use sum::Sum;

/// What an instrument keeps per attribute set between collections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    /// Counter increments summed over the collection window
    Sum(Sum),
    /// Histogram observations bucketed over the collection window
    Histogram(Histogram),
    /// The most recent value an observable gauge reported
    LastValue(i64),
}
