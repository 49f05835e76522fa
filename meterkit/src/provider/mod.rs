//! The handle everything records through.
//!
//! A [`Provider`] is either exporting, pushing collections to an OTLP collector on a
//! timer, or a no-op that keeps instrument names but discards every measurement. Build
//! one with [`install`] and pass it, or clones of it, to whatever needs to record.

use std::{borrow::Cow, sync::Arc};

mod exporting;
mod noop;
mod registry;
mod selector;

pub use exporting::ExportingProvider;
pub use noop::NoopProvider;
pub use registry::CallbackRegistration;
pub use selector::install;

use registry::Registry;

use crate::{
    error::Error,
    instrument::{
        Counter, Histogram, Instrument, InstrumentDescriptor, InstrumentKind, ObservableGauge,
        Observer,
    },
    pipeline::AggregatedMetricsMap,
    types::Name,
};

/// A metrics provider. Clones share one instrument registry and one export pipeline.
#[derive(Debug, Clone)]
pub enum Provider {
    /// Discards everything
    Noop(NoopProvider),
    /// Periodically collects and exports
    Exporting(ExportingProvider),
}

impl Default for Provider {
    fn default() -> Self {
        Self::noop()
    }
}

impl Provider {
    /// A provider that records nothing
    pub fn noop() -> Self {
        Self::Noop(NoopProvider::new())
    }

    fn registry(&self) -> &Arc<Registry> {
        match self {
            Provider::Noop(provider) => provider.registry(),
            Provider::Exporting(provider) => provider.registry(),
        }
    }

    /// Whether measurements leave the process
    pub fn is_exporting(&self) -> bool {
        matches!(self, Provider::Exporting(_))
    }

    /// Create a monotonic counter with unit `1`.
    pub fn counter(
        &self,
        name: impl Into<Name>,
        description: impl Into<Cow<'static, str>>,
    ) -> Result<Counter, Error> {
        let instrument = self.register_one(InstrumentDescriptor::new(
            InstrumentKind::Counter,
            name,
            description,
        ))?;
        Ok(Counter::new(instrument))
    }

    /// Create a histogram.
    pub fn histogram(
        &self,
        name: impl Into<Name>,
        description: impl Into<Cow<'static, str>>,
        unit: impl Into<Cow<'static, str>>,
    ) -> Result<Histogram, Error> {
        let instrument = self.register_one(
            InstrumentDescriptor::new(InstrumentKind::Histogram, name, description)
                .with_unit(unit),
        )?;
        Ok(Histogram::new(instrument))
    }

    /// Create a batch of observable gauges. Either every gauge is created or, if any name
    /// is taken, none are. Gauges come back in the order they were described.
    pub fn observable_gauges(
        &self,
        descriptors: impl IntoIterator<Item = InstrumentDescriptor>,
    ) -> Result<Vec<ObservableGauge>, Error> {
        let descriptors: Vec<InstrumentDescriptor> = descriptors
            .into_iter()
            .map(|descriptor| descriptor.into_kind(InstrumentKind::ObservableGauge))
            .collect();
        let names: Vec<Name> = descriptors.iter().map(|d| d.name().clone()).collect();
        let instruments = self.registry().register(descriptors)?;
        Ok(names
            .into_iter()
            .zip(instruments)
            .map(|(name, instrument)| ObservableGauge::new(name, instrument))
            .collect())
    }

    /// Register a sampling callback. The provider's collection task invokes it once per
    /// collection, before the instruments are drained.
    pub fn register_callback(
        &self,
        callback: impl Fn(&mut Observer) + Send + Sync + 'static,
    ) -> CallbackRegistration {
        let registration = self.registry().register_callback(Arc::new(callback));
        log::debug!("registered gauge callback");
        registration
    }

    /// Run the sampling callbacks and drain everything recorded since the last collection.
    ///
    /// The exporting provider's timer calls this for you. Calling it yourself takes
    /// those measurements away from the next export.
    pub fn collect(&self) -> AggregatedMetricsMap {
        self.registry().collect()
    }

    /// Stop collecting, flush a final collection and remove every callback.
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        match self {
            Provider::Noop(provider) => provider.shutdown(),
            Provider::Exporting(provider) => provider.shutdown().await,
        }
    }

    fn register_one(
        &self,
        descriptor: InstrumentDescriptor,
    ) -> Result<Option<Arc<Instrument>>, Error> {
        Ok(self
            .registry()
            .register(vec![descriptor])?
            .into_iter()
            .next()
            .flatten())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use crate::{
        downstream::{Connection, ConnectionFactory},
        error::Error,
        types::DimensionPosition,
        MetricsConfig,
    };

    use super::{install, Provider};

    /// An exporting provider whose timer will not fire during a test, pointed at a
    /// collector nobody runs. Tests drive collection with [`Provider::collect`].
    pub(crate) async fn exporting_provider() -> Provider {
        let mut config = MetricsConfig::exporting_to("http://127.0.0.1:9");
        config.export_interval(Duration::from_secs(3600));
        config.shutdown_timeout(Duration::from_millis(100));
        config.connection(Connection::lazy("http://127.0.0.1:9", || None).expect("valid endpoint"));
        install(&mut config, &Unused, &DimensionPosition::new())
            .await
            .expect("a cached connection cannot fail to connect")
    }

    struct Unused;
    impl ConnectionFactory for Unused {
        async fn connect(&self, _endpoint: &str) -> Result<Connection, Error> {
            unreachable!("the connection is cached")
        }
    }
}
