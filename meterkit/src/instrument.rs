//! Instrument handles vended by a [`Provider`](crate::Provider).
//!
//! Handles are cheap to clone and safe to share between any number of concurrent
//! requests. Handles from a no-op provider carry no storage; recording through them
//! returns immediately.

use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    aggregation::{self, Aggregation, Sum},
    types::{DimensionPosition, Name},
};

static NO_ATTRIBUTES: DimensionPosition = BTreeMap::new();

/// What an instrument measures and how it is aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    /// Monotonically increasing, summed per collection window.
    Counter,
    /// A distribution of values, bucketed per collection window.
    Histogram,
    /// A point-in-time value, set by a sampling callback.
    ObservableGauge,
}

/// The identity of an instrument: unique name, description, unit and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentDescriptor {
    name: Name,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
    kind: InstrumentKind,
}

impl InstrumentDescriptor {
    /// Describe an instrument. The unit defaults to `1`.
    pub fn new(
        kind: InstrumentKind,
        name: impl Into<Name>,
        description: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            unit: Cow::Borrowed("1"),
            kind,
        }
    }

    /// Describe an observable gauge.
    pub fn gauge(name: impl Into<Name>, description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(InstrumentKind::ObservableGauge, name, description)
    }

    /// Set the unit, in UCUM notation like `ns` or `By`.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    pub(crate) fn into_kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = kind;
        self
    }

    /// The instrument's name, unique within its provider
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Unit of the recorded values
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// How the instrument aggregates
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }
}

/// Registered instrument storage: one aggregation per attribute set.
#[derive(Debug)]
pub(crate) struct Instrument {
    descriptor: InstrumentDescriptor,
    series: Mutex<HashMap<DimensionPosition, Aggregation>>,
}

impl Instrument {
    pub(crate) fn new(descriptor: InstrumentDescriptor) -> Self {
        Self {
            descriptor,
            series: Default::default(),
        }
    }

    pub(crate) fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    fn update(
        &self,
        attributes: &DimensionPosition,
        new: fn() -> Aggregation,
        update: impl FnOnce(&mut Aggregation),
    ) {
        let mut series = self
            .series
            .lock()
            .expect("local mutex should not be poisoned");
        match series.get_mut(attributes) {
            Some(existing) => update(existing),
            None => {
                let mut aggregation = new();
                update(&mut aggregation);
                series.insert(attributes.clone(), aggregation);
            }
        }
    }

    /// Hand back everything recorded since the last take, leaving the instrument empty.
    pub(crate) fn take_series(&self) -> HashMap<DimensionPosition, Aggregation> {
        std::mem::take(
            &mut *self
                .series
                .lock()
                .expect("local mutex should not be poisoned"),
        )
    }
}

/// A monotonically increasing count.
#[derive(Debug, Clone)]
pub struct Counter {
    instrument: Option<Arc<Instrument>>,
}

impl Counter {
    pub(crate) fn new(instrument: Option<Arc<Instrument>>) -> Self {
        Self { instrument }
    }

    /// Add `value` to the series for `attributes`.
    #[inline]
    pub fn add(&self, value: u64, attributes: &DimensionPosition) {
        if let Some(instrument) = &self.instrument {
            let value = i64::try_from(value).unwrap_or(i64::MAX);
            instrument.update(
                attributes,
                || Aggregation::Sum(Sum::default()),
                |aggregation| {
                    if let Aggregation::Sum(sum) = aggregation {
                        sum.accumulate(value)
                    }
                },
            );
        }
    }
}

/// A distribution of values.
#[derive(Debug, Clone)]
pub struct Histogram {
    instrument: Option<Arc<Instrument>>,
}

impl Histogram {
    pub(crate) fn new(instrument: Option<Arc<Instrument>>) -> Self {
        Self { instrument }
    }

    /// Record one observation in the series for `attributes`.
    #[inline]
    pub fn record(&self, value: impl Into<i64>, attributes: &DimensionPosition) {
        if let Some(instrument) = &self.instrument {
            let value = value.into();
            instrument.update(
                attributes,
                || Aggregation::Histogram(aggregation::Histogram::default()),
                |aggregation| {
                    if let Aggregation::Histogram(histogram) = aggregation {
                        histogram.accumulate(value)
                    }
                },
            );
        }
    }

    /// Record a duration in nanoseconds. Durations past ~292 years saturate.
    #[inline]
    pub fn record_duration(&self, duration: Duration, attributes: &DimensionPosition) {
        self.record(
            i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX),
            attributes,
        )
    }
}

/// A point-in-time value. Only an [`Observer`] inside a registered callback can set it.
#[derive(Debug, Clone)]
pub struct ObservableGauge {
    name: Name,
    instrument: Option<Arc<Instrument>>,
}

impl ObservableGauge {
    pub(crate) fn new(name: Name, instrument: Option<Arc<Instrument>>) -> Self {
        Self { name, instrument }
    }

    /// The gauge's registered name
    pub fn name(&self) -> &Name {
        &self.name
    }
}

/// Handed to sampling callbacks by the provider's collection task.
#[derive(Debug, Default)]
pub struct Observer {
    observed: usize,
}

impl Observer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Report the current value of a gauge. The last value observed in a collection wins.
    #[inline]
    pub fn observe(&mut self, gauge: &ObservableGauge, value: impl Into<i64>) {
        self.observed += 1;
        if let Some(instrument) = &gauge.instrument {
            let value = value.into();
            instrument.update(
                &NO_ATTRIBUTES,
                || Aggregation::LastValue(0),
                |aggregation| *aggregation = Aggregation::LastValue(value),
            );
        }
    }

    pub(crate) fn observed(&self) -> usize {
        self.observed
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use crate::{
        aggregation::{Aggregation, Sum},
        types::{attributes, DimensionPosition},
    };

    use super::{
        Counter, Histogram, Instrument, InstrumentDescriptor, InstrumentKind, ObservableGauge,
        Observer,
    };

    fn instrument(kind: InstrumentKind) -> Arc<Instrument> {
        Arc::new(Instrument::new(InstrumentDescriptor::new(
            kind, "test", "a test",
        )))
    }

    #[test_log::test]
    fn counter_sums_per_attribute_set() {
        let storage = instrument(InstrumentKind::Counter);
        let counter = Counter::new(Some(storage.clone()));
        let get = attributes([("method", "GET")]);
        let post = attributes([("method", "POST")]);

        counter.add(1, &get);
        counter.add(2, &get);
        counter.add(5, &post);

        let series = storage.take_series();
        assert_eq!(Some(&Aggregation::Sum(Sum { sum: 3 })), series.get(&get));
        assert_eq!(Some(&Aggregation::Sum(Sum { sum: 5 })), series.get(&post));
        assert!(storage.take_series().is_empty(), "take should reset");
    }

    #[test_log::test]
    fn histogram_records_nanoseconds() {
        let storage = instrument(InstrumentKind::Histogram);
        let histogram = Histogram::new(Some(storage.clone()));

        histogram.record_duration(Duration::from_millis(3), &DimensionPosition::new());

        match storage.take_series().remove(&DimensionPosition::new()) {
            Some(Aggregation::Histogram(h)) => {
                assert_eq!(1, h.count);
                assert_eq!(3_000_000, h.sum);
            }
            other => panic!("expected a histogram, got {other:?}"),
        }
    }

    #[test_log::test]
    fn gauges_keep_the_last_observation() {
        let storage = instrument(InstrumentKind::ObservableGauge);
        let gauge = ObservableGauge::new("test".into(), Some(storage.clone()));
        let mut observer = Observer::new();

        observer.observe(&gauge, 10);
        observer.observe(&gauge, 7);

        assert_eq!(2, observer.observed());
        assert_eq!(
            Some(&Aggregation::LastValue(7)),
            storage.take_series().get(&DimensionPosition::new())
        );
    }

    #[test_log::test]
    fn detached_handles_do_nothing() {
        let counter = Counter::new(None);
        counter.add(1, &DimensionPosition::new());
        Histogram::new(None).record(1, &DimensionPosition::new());
        Observer::new().observe(&ObservableGauge::new("nothing".into(), None), 3);
    }
}
