use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    downstream::{ChannelType, OpenTelemetryDownstream, OpentelemetryBatcher},
    error::Error,
    pipeline::AggregationBatcher,
};

use super::registry::Registry;

/// How many collections may wait for the downstream before new ones are dropped
const BATCH_CHANNEL_CAPACITY: usize = 16;

/// Collects on a timer and pushes each collection to an OTLP collector.
#[derive(Debug, Clone)]
pub struct ExportingProvider {
    registry: Arc<Registry>,
    pipeline: Arc<Mutex<Option<Pipeline>>>,
    shutdown_timeout: Duration,
}

#[derive(Debug)]
struct Pipeline {
    stop: oneshot::Sender<()>,
    collector: JoinHandle<()>,
    downstream: JoinHandle<()>,
}

impl ExportingProvider {
    /// Spawn the collection and export tasks on the current tokio runtime.
    pub(crate) fn start(
        downstream: OpenTelemetryDownstream<ChannelType>,
        export_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Result<Self, Error> {
        if export_interval.is_zero() {
            return Err(Error::Configuration(
                "export interval must be greater than zero".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::ExporterSetup(format!("metrics export needs a tokio runtime: {e}"))
        })?;

        let registry = Arc::new(Registry::new(true));
        let (batch_sender, batch_receiver) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let (stop, stopped) = oneshot::channel();
        let downstream = runtime.spawn(downstream.send_batches_forever(batch_receiver));
        let collector = runtime.spawn(collect_forever(
            registry.clone(),
            export_interval,
            batch_sender,
            OpentelemetryBatcher,
            stopped,
        ));
        log::debug!("exporting metrics every {export_interval:?}");

        Ok(Self {
            registry,
            pipeline: Arc::new(Mutex::new(Some(Pipeline {
                stop,
                collector,
                downstream,
            }))),
            shutdown_timeout,
        })
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Stop the timer, push one last collection and wait up to the shutdown timeout for
    /// the downstream to send it. Whatever is still unsent after that is dropped.
    pub(crate) async fn shutdown(&self) {
        let pipeline = self
            .pipeline
            .lock()
            .expect("local mutex should not be poisoned")
            .take();
        let Some(Pipeline {
            stop,
            collector,
            downstream,
        }) = pipeline
        else {
            log::debug!("metrics export is already shut down");
            return;
        };

        if stop.send(()).is_err() {
            log::warn!("metrics collection ended before shutdown");
        }
        let collector_abort = collector.abort_handle();
        let downstream_abort = downstream.abort_handle();
        let flush = async {
            if let Err(e) = collector.await {
                log::error!("metrics collection task failed: {e}");
            }
            if let Err(e) = downstream.await {
                log::error!("metrics export task failed: {e}");
            }
        };
        if tokio::time::timeout(self.shutdown_timeout, flush)
            .await
            .is_err()
        {
            log::warn!(
                "metrics did not flush within {:?}; dropping what is left",
                self.shutdown_timeout
            );
            collector_abort.abort();
            downstream_abort.abort();
        }

        let removed = self.registry.clear_callbacks();
        log::debug!("metrics export shut down, removed {removed} gauge callbacks");
    }
}

/// Collect every `period` until `stop` fires or its sender is dropped, then collect once
/// more. Missed ticks are skipped rather than bursted.
async fn collect_forever<TAggregationBatcher>(
    registry: Arc<Registry>,
    period: Duration,
    sender: mpsc::Sender<TAggregationBatcher::TBatch>,
    mut batcher: TAggregationBatcher,
    mut stop: oneshot::Receiver<()>,
) where
    TAggregationBatcher: AggregationBatcher,
    TAggregationBatcher::TBatch: Send,
{
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut window_start = Instant::now();
    loop {
        let stopping = tokio::select! {
            _ = interval.tick() => false,
            _ = &mut stop => true,
        };
        let covered_time = window_start.elapsed();
        window_start = Instant::now();

        let mut collected = registry.collect();
        if !collected.is_empty() {
            let batch = batcher.batch_aggregations(SystemTime::now(), covered_time, &mut collected);
            if stopping {
                if sender.send(batch).await.is_err() {
                    log::error!("metrics export ended before the final batch");
                }
            } else {
                match sender.try_send(batch) {
                    Ok(_) => log::debug!("reported batch"),
                    Err(e) => log::error!("could not report metrics: {e}"),
                }
            }
        }

        if stopping {
            break;
        }
    }
    log::debug!("metrics collection stopped");
}
