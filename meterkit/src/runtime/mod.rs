//! Runtime gauges sampled on the provider's collection timer.
//!
//! A [`GaugeCollector`] owns a set of observable gauges and knows how to fill all of
//! them from one snapshot. Registering it with [`GaugeCollector::collect`] installs a
//! single callback that takes the snapshot once per collection and observes every gauge
//! from it, so values from one collector never mix two different moments.

use crate::{
    error::Error,
    instrument::Observer,
    provider::{CallbackRegistration, Provider},
};

mod counting_allocator;
#[cfg(feature = "jemalloc")]
mod jemalloc;
mod memory;
mod system;

pub use counting_allocator::CountingAllocator;
#[cfg(feature = "jemalloc")]
pub use jemalloc::JemallocStats;
pub use memory::{MemoryCollector, MemoryStats, MemoryStatsSource};
pub use system::{
    count_foreign_call, SystemCollector, SystemStats, SystemStatsSource, TokioRuntimeStats,
};

/// Maps one runtime snapshot onto the gauges this collector created.
pub trait GaugeCollector: Send + Sync + 'static {
    /// Everything the gauges report, read together
    type Snapshot;

    /// Read the runtime once.
    fn snapshot(&self) -> Self::Snapshot;

    /// Report every gauge from `snapshot`.
    fn observe(&self, snapshot: &Self::Snapshot, observer: &mut Observer);

    /// Hand this collector to `provider`'s collection timer. It is sampled once per
    /// collection until the registration is removed or the provider shuts down.
    fn collect(self, provider: &Provider) -> CallbackRegistration
    where
        Self: Sized,
    {
        provider.register_callback(move |observer: &mut Observer| {
            let snapshot = self.snapshot();
            self.observe(&snapshot, observer);
        })
    }
}

/// Register the memory and system collectors on `provider`, with `memory_source`
/// supplying allocator statistics and the current tokio runtime supplying task counts.
///
/// ```
/// use meterkit::runtime::CountingAllocator;
///
/// #[global_allocator]
/// static ALLOCATOR: CountingAllocator = CountingAllocator::system();
///
/// fn main() {
///     let provider = meterkit::Provider::noop();
///     let registrations = meterkit::runtime::collect_runtime_metrics(&provider, &ALLOCATOR)
///         .expect("nothing else registered these names");
///     assert_eq!(2, registrations.len());
/// }
/// ```
pub fn collect_runtime_metrics<TSource>(
    provider: &Provider,
    memory_source: TSource,
) -> Result<Vec<CallbackRegistration>, Error>
where
    TSource: MemoryStatsSource,
{
    // Each collector reports as soon as it exists, whatever happens to the next one.
    let memory = MemoryCollector::new(provider, memory_source)?.collect(provider);
    let system = SystemCollector::new(provider, TokioRuntimeStats::current())?.collect(provider);
    Ok(vec![memory, system])
}

/// Gauges are signed; counters past `i64::MAX` saturate.
pub(crate) fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
