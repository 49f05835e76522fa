use crate::{
    error::Error,
    instrument::{InstrumentDescriptor, ObservableGauge, Observer},
    provider::Provider,
};

use super::{gauge_value, GaugeCollector};

/// One reading of the process allocator.
///
/// Sources fill what they can measure and leave the rest at 0. Rust has no garbage
/// collector, so the collection-cycle fields stay 0 unless a source has its own notion
/// of a collection, like an arena purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes obtained from the system
    pub sys_bytes: u64,
    /// Bytes allocated over the life of the process, even if freed
    pub alloc_bytes_total: u64,
    /// Heap bytes allocated and still in use
    pub heap_alloc_bytes: u64,
    /// Frees over the life of the process
    pub frees_total: u64,
    /// Bytes of allocator metadata
    pub gc_sys_bytes: u64,
    /// Heap bytes waiting to be used
    pub heap_idle_bytes: u64,
    /// Heap bytes in use
    pub heap_inuse_bytes: u64,
    /// Live allocations
    pub heap_objects: u64,
    /// Heap bytes released to the system
    pub heap_released_bytes: u64,
    /// Heap bytes obtained from the system
    pub heap_sys_bytes: u64,
    /// Unix time of the last collection, in seconds
    pub last_gc_time_seconds: u64,
    /// Pointer lookups over the life of the process
    pub lookups_total: u64,
    /// Allocations over the life of the process
    pub mallocs_total: u64,
    /// Bytes in use by per-thread caches
    pub cache_inuse_bytes: u64,
    /// Bytes obtained from the system for per-thread caches
    pub cache_sys_bytes: u64,
    /// Bytes in use by span structures
    pub span_inuse_bytes: u64,
    /// Bytes obtained from the system for span structures
    pub span_sys_bytes: u64,
    /// Heap size that triggers the next collection
    pub next_gc_bytes: u64,
    /// Bytes used for other system allocations
    pub other_sys_bytes: u64,
    /// Bytes in use by stacks
    pub stack_inuse_bytes: u64,
    /// Completed collection cycles
    pub gc_completed_cycle: u64,
    /// Time spent paused for collection, in nanoseconds
    pub gc_pause_total: u64,
}

/// (name, description, unit), in the order of [`MemoryStats::values`]
const MEMORY_GAUGES: [(&str, &str, &str); 22] = [
    ("memstats_sys_bytes", "Number of bytes obtained from system.", "By"),
    ("memstats_alloc_bytes_total", "Total number of bytes allocated, even if freed.", "By"),
    ("memstats_heap_alloc_bytes", "Number of heap bytes allocated and still in use.", "By"),
    ("memstats_frees_total", "Total number of frees.", "1"),
    ("memstats_gc_sys_bytes", "Number of bytes used for allocator metadata.", "By"),
    ("memstats_heap_idle_bytes", "Number of heap bytes waiting to be used.", "By"),
    ("memstats_heap_inuse_bytes", "Number of heap bytes that are in use.", "By"),
    ("memstats_heap_objects", "Number of allocated objects.", "1"),
    ("memstats_heap_released_bytes", "Number of heap bytes released to OS.", "By"),
    ("memstats_heap_sys_bytes", "Number of heap bytes obtained from system.", "By"),
    ("memstats_last_gc_time_seconds", "Number of seconds since 1970 of last collection.", "s"),
    ("memstats_lookups_total", "Total number of pointer lookups.", "1"),
    ("memstats_mallocs_total", "Total number of mallocs.", "1"),
    ("memstats_cache_inuse_bytes", "Number of bytes in use by cache structures.", "By"),
    ("memstats_cache_sys_bytes", "Number of bytes used for cache structures obtained from system.", "By"),
    ("memstats_span_inuse_bytes", "Number of bytes in use by span structures.", "By"),
    ("memstats_span_sys_bytes", "Number of bytes used for span structures obtained from system.", "By"),
    ("memstats_next_gc_bytes", "Number of heap bytes when next collection will take place.", "By"),
    ("memstats_other_sys_bytes", "Number of bytes used for other system allocations.", "By"),
    ("memstats_stack_inuse_bytes", "Number of bytes in use by the stack allocator.", "By"),
    ("memstats_gc_completed_cycle", "Number of collection cycles completed.", "1"),
    ("memstats_gc_pause_total", "Time spent paused for collection.", "ns"),
];

impl MemoryStats {
    /// Reads of different counters are not simultaneous, so a busy process can report
    /// more bytes in use than it obtained. Raise the obtained totals to cover what is
    /// in use.
    pub fn normalized(mut self) -> Self {
        self.heap_sys_bytes = self.heap_sys_bytes.max(self.heap_inuse_bytes);
        self.sys_bytes = self.sys_bytes.max(self.heap_sys_bytes);
        self
    }

    fn values(&self) -> [u64; 22] {
        [
            self.sys_bytes,
            self.alloc_bytes_total,
            self.heap_alloc_bytes,
            self.frees_total,
            self.gc_sys_bytes,
            self.heap_idle_bytes,
            self.heap_inuse_bytes,
            self.heap_objects,
            self.heap_released_bytes,
            self.heap_sys_bytes,
            self.last_gc_time_seconds,
            self.lookups_total,
            self.mallocs_total,
            self.cache_inuse_bytes,
            self.cache_sys_bytes,
            self.span_inuse_bytes,
            self.span_sys_bytes,
            self.next_gc_bytes,
            self.other_sys_bytes,
            self.stack_inuse_bytes,
            self.gc_completed_cycle,
            self.gc_pause_total,
        ]
    }
}

/// Where memory statistics come from.
pub trait MemoryStatsSource: Send + Sync + 'static {
    /// Read the allocator. Called once per collection from the provider's timer task.
    fn memory_stats(&self) -> MemoryStats;
}

/// The `memstats_*` gauges.
pub struct MemoryCollector<TSource> {
    source: TSource,
    gauges: Vec<ObservableGauge>,
}

impl<TSource> MemoryCollector<TSource>
where
    TSource: MemoryStatsSource,
{
    /// Create the 22 memory gauges on `provider`. Nothing is created if any name is taken.
    pub fn new(provider: &Provider, source: TSource) -> Result<Self, Error> {
        let gauges = provider.observable_gauges(MEMORY_GAUGES.iter().map(
            |(name, description, unit)| {
                InstrumentDescriptor::gauge(*name, *description).with_unit(*unit)
            },
        ))?;
        Ok(Self { source, gauges })
    }
}

impl<TSource> GaugeCollector for MemoryCollector<TSource>
where
    TSource: MemoryStatsSource,
{
    type Snapshot = MemoryStats;

    fn snapshot(&self) -> MemoryStats {
        self.source.memory_stats().normalized()
    }

    fn observe(&self, snapshot: &MemoryStats, observer: &mut Observer) {
        for (gauge, value) in self.gauges.iter().zip(snapshot.values()) {
            observer.observe(gauge, gauge_value(value));
        }
    }
}
