use std::{
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

use crate::{
    error::Error,
    instrument::{Instrument, InstrumentDescriptor, Observer},
    pipeline::{AggregatedMetricsMap, CollectedInstrument},
    types::Name,
};

pub(crate) type Callback = Arc<dyn Fn(&mut Observer) + Send + Sync>;

/// Instruments and sampling callbacks owned by one provider.
///
/// A non-recording registry still reserves names so duplicates are rejected the same
/// way whether or not export is enabled. It hands out detached instruments and drops
/// callbacks on the floor.
pub(crate) struct Registry {
    recording: bool,
    instruments: Mutex<BTreeMap<Name, Arc<Instrument>>>,
    callbacks: Mutex<HashMap<u64, Callback>>,
    next_callback_id: AtomicU64,
    collection: Mutex<()>,
}

impl Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("recording", &self.recording)
            .field(
                "instruments",
                &self
                    .instruments
                    .lock()
                    .expect("local mutex should not be poisoned")
                    .keys()
                    .collect::<Vec<_>>(),
            )
            .field(
                "callbacks",
                &self
                    .callbacks
                    .lock()
                    .expect("local mutex should not be poisoned")
                    .len(),
            )
            .finish()
    }
}

impl Registry {
    pub(crate) fn new(recording: bool) -> Self {
        Self {
            recording,
            instruments: Default::default(),
            callbacks: Default::default(),
            next_callback_id: AtomicU64::new(1),
            collection: Mutex::new(()),
        }
    }

    /// Register all of `descriptors` or none of them. The returned instruments are in the
    /// same order as the descriptors, and are `None` when this registry does not record.
    pub(crate) fn register(
        &self,
        descriptors: Vec<InstrumentDescriptor>,
    ) -> Result<Vec<Option<Arc<Instrument>>>, Error> {
        let mut instruments = self
            .instruments
            .lock()
            .expect("local mutex should not be poisoned");

        let mut claimed: Vec<&Name> = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let name = descriptor.name();
            if name.as_str().is_empty() {
                return Err(Error::unnamed_instrument(name.clone()));
            }
            if instruments.contains_key(name) || claimed.contains(&name) {
                log::error!("refusing to register duplicate instrument {name}");
                return Err(Error::duplicate_instrument(name.clone()));
            }
            claimed.push(name);
        }

        Ok(descriptors
            .into_iter()
            .map(|descriptor| {
                let name = descriptor.name().clone();
                let instrument = Arc::new(Instrument::new(descriptor));
                instruments.insert(name, instrument.clone());
                self.recording.then_some(instrument)
            })
            .collect())
    }

    pub(crate) fn register_callback(self: &Arc<Self>, callback: Callback) -> CallbackRegistration {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        if self.recording {
            self.callbacks
                .lock()
                .expect("local mutex should not be poisoned")
                .insert(id, callback);
        }
        CallbackRegistration {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn unregister_callback(&self, id: u64) -> bool {
        self.callbacks
            .lock()
            .expect("local mutex should not be poisoned")
            .remove(&id)
            .is_some()
    }

    /// Drop every sampling callback, returning how many there were.
    pub(crate) fn clear_callbacks(&self) -> usize {
        let mut callbacks = self
            .callbacks
            .lock()
            .expect("local mutex should not be poisoned");
        let count = callbacks.len();
        callbacks.clear();
        count
    }

    /// Run every sampling callback, then drain every instrument.
    ///
    /// Collections are serialized. Callbacks run without the callback lock held, so a
    /// callback may register or unregister other callbacks.
    pub(crate) fn collect(&self) -> AggregatedMetricsMap {
        let _collecting = self
            .collection
            .lock()
            .expect("local mutex should not be poisoned");

        let callbacks: Vec<(u64, Callback)> = self
            .callbacks
            .lock()
            .expect("local mutex should not be poisoned")
            .iter()
            .map(|(id, callback)| (*id, callback.clone()))
            .collect();
        let mut observer = Observer::new();
        for (id, callback) in callbacks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&mut observer))).is_err() {
                log::error!("gauge callback {id} panicked; its observations may be partial");
            }
        }
        log::trace!("observed {} gauge values", observer.observed());

        self.instruments
            .lock()
            .expect("local mutex should not be poisoned")
            .iter()
            .filter_map(|(name, instrument)| {
                let series = instrument.take_series();
                (!series.is_empty()).then(|| {
                    (
                        name.clone(),
                        CollectedInstrument {
                            descriptor: instrument.descriptor().clone(),
                            series,
                        },
                    )
                })
            })
            .collect()
    }
}

/// Proof that a sampling callback was registered.
///
/// Dropping this does not unregister the callback: callbacks live until
/// [`unregister`](CallbackRegistration::unregister) or provider shutdown.
#[derive(Debug)]
pub struct CallbackRegistration {
    id: u64,
    registry: Weak<Registry>,
}

impl CallbackRegistration {
    /// Stop invoking the callback. Returns false if it was already gone.
    pub fn unregister(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.unregister_callback(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use crate::{
        aggregation::Aggregation,
        error::Error,
        instrument::{Counter, InstrumentDescriptor, InstrumentKind, ObservableGauge, Observer},
        types::{DimensionPosition, Name},
    };

    use super::Registry;

    fn counter(name: &'static str) -> InstrumentDescriptor {
        InstrumentDescriptor::new(InstrumentKind::Counter, name, "")
    }

    #[test_log::test]
    fn duplicate_names_are_rejected() {
        let registry = Registry::new(true);
        registry
            .register(vec![counter("requests")])
            .expect("first registration works");

        let result = registry.register(vec![counter("requests")]);
        assert!(
            matches!(result, Err(Error::InstrumentCreation { ref name, .. }) if name.as_str() == "requests"),
            "{result:?}"
        );
    }

    #[test_log::test]
    fn batches_are_all_or_nothing() {
        let registry = Registry::new(true);
        registry
            .register(vec![counter("taken")])
            .expect("first registration works");

        assert!(registry
            .register(vec![counter("fresh"), counter("taken")])
            .is_err());
        assert!(registry
            .register(vec![counter("again"), counter("again")])
            .is_err());
        assert!(registry.register(vec![counter("")]).is_err());

        registry
            .register(vec![counter("fresh"), counter("again")])
            .expect("nothing from the failed batches was kept");
    }

    #[test_log::test]
    fn non_recording_registry_reserves_names() {
        let registry = Arc::new(Registry::new(false));
        let instruments = registry
            .register(vec![counter("requests")])
            .expect("registration works");
        assert!(instruments[0].is_none());
        assert!(registry.register(vec![counter("requests")]).is_err());

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        registry.register_callback(Arc::new(move |_observer: &mut Observer| {
            counted.fetch_add(1, Ordering::Relaxed);
        }));
        assert!(registry.collect().is_empty());
        assert_eq!(0, calls.load(Ordering::Relaxed));
    }

    #[test_log::test]
    fn collect_runs_callbacks_and_drains() {
        let registry = Arc::new(Registry::new(true));
        let mut instruments = registry
            .register(vec![
                counter("requests"),
                InstrumentDescriptor::gauge("temperature", ""),
            ])
            .expect("registration works");
        let gauge = ObservableGauge::new(Name::from("temperature"), instruments.pop().flatten());
        let counter = Counter::new(instruments.pop().flatten());

        registry.register_callback(Arc::new(move |observer: &mut Observer| observer.observe(&gauge, 21)));
        counter.add(2, &DimensionPosition::new());

        let collected = registry.collect();
        assert_eq!(2, collected.len());
        assert_eq!(
            Some(&Aggregation::LastValue(21)),
            collected[&Name::from("temperature")]
                .series
                .get(&DimensionPosition::new())
        );

        let collected = registry.collect();
        assert_eq!(
            vec![&Name::from("temperature")],
            collected.keys().collect::<Vec<_>>(),
            "the counter was drained; the gauge was observed again"
        );
    }

    #[test_log::test]
    fn unregistered_callbacks_stop_running() {
        let registry = Arc::new(Registry::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let registration = registry.register_callback(Arc::new(move |_observer: &mut Observer| {
            counted.fetch_add(1, Ordering::Relaxed);
        }));

        registry.collect();
        assert!(registration.unregister());
        registry.collect();

        assert_eq!(1, calls.load(Ordering::Relaxed));
    }

    #[test_log::test]
    fn panicking_callbacks_do_not_stop_collection() {
        let registry = Arc::new(Registry::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        registry.register_callback(Arc::new(|_observer: &mut Observer| panic!("sampling failed")));
        registry.register_callback(Arc::new(move |_observer: &mut Observer| {
            counted.fetch_add(1, Ordering::Relaxed);
        }));

        registry.collect();
        registry.collect();

        assert_eq!(2, calls.load(Ordering::Relaxed));
        assert_eq!(2, registry.clear_callbacks());
    }
}
