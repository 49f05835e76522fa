//! Types for handing collected aggregations to downstream collectors

use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use crate::{
    aggregation::Aggregation,
    instrument::InstrumentDescriptor,
    types::{DimensionPosition, Name},
};

/// Every series recorded on one instrument, keyed by attribute set
pub type SeriesMap = HashMap<DimensionPosition, Aggregation>;

/// One instrument's worth of collected data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedInstrument {
    /// The instrument that recorded the series
    pub descriptor: InstrumentDescriptor,
    /// Everything recorded since the previous collection
    pub series: SeriesMap,
}

/// The output of one collection, keyed by instrument name. Instruments with nothing
/// recorded are left out.
pub type AggregatedMetricsMap = HashMap<Name, CollectedInstrument>;

/// Turns a collection into whatever a downstream sends.
pub trait AggregationBatcher {
    /// The batch handed to the downstream
    type TBatch;

    /// Drain `aggregations` into a batch. `covered_time` is the window the data
    /// was recorded over, ending at `now`.
    fn batch_aggregations(
        &mut self,
        now: SystemTime,
        covered_time: Duration,
        aggregations: &mut AggregatedMetricsMap,
    ) -> Self::TBatch;
}
