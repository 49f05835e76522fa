use std::{
    sync::atomic::{AtomicU64, Ordering},
    thread::available_parallelism,
};

use tokio::runtime::Handle;

use crate::{
    error::Error,
    instrument::{InstrumentDescriptor, ObservableGauge, Observer},
    provider::Provider,
};

use super::{gauge_value, GaugeCollector};

static FOREIGN_CALLS: AtomicU64 = AtomicU64::new(0);

/// Count one call across a foreign function boundary. FFI wrappers call this so
/// `runtime_foreign_calls` can report it.
pub fn count_foreign_call() {
    FOREIGN_CALLS.fetch_add(1, Ordering::Relaxed);
}

/// One reading of the process runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemStats {
    /// Logical processors available to the process
    pub threads: u64,
    /// Foreign calls over the life of the process
    pub foreign_calls: u64,
    /// Tasks currently alive
    pub tasks: u64,
}

/// Where system statistics come from.
pub trait SystemStatsSource: Send + Sync + 'static {
    /// Read the runtime. Called once per collection.
    fn system_stats(&self) -> SystemStats;
}

/// Reads task counts from a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioRuntimeStats {
    handle: Option<Handle>,
}

impl TokioRuntimeStats {
    /// Read tasks from `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Read tasks from the runtime this is called on. Outside of a runtime the task
    /// count reads 0.
    pub fn current() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }
}

impl SystemStatsSource for TokioRuntimeStats {
    fn system_stats(&self) -> SystemStats {
        SystemStats {
            threads: available_parallelism()
                .map(|threads| threads.get() as u64)
                .unwrap_or(1),
            foreign_calls: FOREIGN_CALLS.load(Ordering::Relaxed),
            tasks: self
                .handle
                .as_ref()
                .map(|handle| handle.metrics().num_alive_tasks() as u64)
                .unwrap_or_default(),
        }
    }
}

/// The `runtime_*` gauges.
pub struct SystemCollector<TSource> {
    source: TSource,
    threads: ObservableGauge,
    foreign_calls: ObservableGauge,
    tasks: ObservableGauge,
}

impl<TSource> SystemCollector<TSource>
where
    TSource: SystemStatsSource,
{
    /// Create the 3 runtime gauges on `provider`.
    pub fn new(provider: &Provider, source: TSource) -> Result<Self, Error> {
        let [threads, foreign_calls, tasks]: [ObservableGauge; 3] = provider
            .observable_gauges([
                InstrumentDescriptor::gauge("runtime_threads", "Number of logical processors."),
                InstrumentDescriptor::gauge(
                    "runtime_foreign_calls",
                    "Number of calls across a foreign function boundary.",
                ),
                InstrumentDescriptor::gauge("runtime_tasks", "Number of tasks that currently exist."),
            ])?
            .try_into()
            .map_err(|_: Vec<ObservableGauge>| Error::InstrumentCreation {
                name: "runtime_threads".into(),
                reason: "runtime gauges were not all created",
            })?;
        Ok(Self {
            source,
            threads,
            foreign_calls,
            tasks,
        })
    }
}

impl<TSource> GaugeCollector for SystemCollector<TSource>
where
    TSource: SystemStatsSource,
{
    type Snapshot = SystemStats;

    fn snapshot(&self) -> SystemStats {
        self.source.system_stats()
    }

    fn observe(&self, snapshot: &SystemStats, observer: &mut Observer) {
        observer.observe(&self.threads, gauge_value(snapshot.threads));
        observer.observe(&self.foreign_calls, gauge_value(snapshot.foreign_calls));
        observer.observe(&self.tasks, gauge_value(snapshot.tasks));
    }
}
