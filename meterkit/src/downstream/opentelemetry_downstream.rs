use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    time::{Duration, SystemTime},
};

use futures::{Stream, StreamExt};
use opentelemetry_proto::tonic::{
    collector::metrics::v1::{
        metrics_service_client::MetricsServiceClient, ExportMetricsServiceRequest,
    },
    common::v1::{any_value::Value, AnyValue, InstrumentationScope, KeyValue},
    metrics::v1::{
        metric::Data, number_data_point, AggregationTemporality, Gauge, Histogram,
        HistogramDataPoint, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
    },
    resource::v1::Resource,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    metadata::{AsciiMetadataKey, AsciiMetadataValue},
    Code,
};

use crate::{
    aggregation::{self, bucket_10_below_2_sigfigs, Aggregation},
    error::{Error, StdError},
    instrument::InstrumentDescriptor,
    pipeline::{AggregatedMetricsMap, AggregationBatcher, CollectedInstrument},
    types::{Dimension, DimensionPosition},
};

use super::EpochTime;

/// Every collection drains what was recorded since the previous one, which is what
/// opentelemetry calls "delta" data.
const THE_ACTUAL_TEMPORALITY: i32 = AggregationTemporality::Delta as i32;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

/// Sends batches of OTLP metrics to a collector. No dependency on opentelemetry code,
/// only their protos.
pub struct OpenTelemetryDownstream<TChannel> {
    client: MetricsServiceClient<TChannel>,
    header: Option<(AsciiMetadataKey, AsciiMetadataValue)>,
    resource: Resource,
}

impl<TChannel> OpenTelemetryDownstream<TChannel>
where
    TChannel: tonic::client::GrpcService<tonic::body::BoxBody>,
    TChannel::Error: Into<StdError>,
    TChannel::ResponseBody: http_body::Body<Data = bytes::Bytes> + Send + 'static,
    <TChannel::ResponseBody as http_body::Body>::Error: Into<StdError> + Send,
{
    /// Create a new opentelemetry metrics sender. Every export carries `resource`
    /// and, when present, the `header` metadata.
    pub fn new(
        client: MetricsServiceClient<TChannel>,
        header: Option<(&str, &str)>,
        resource: DimensionPosition,
    ) -> Result<Self, Error> {
        let header = header
            .map(|(name, value)| -> Result<_, Error> {
                let name: AsciiMetadataKey = name.parse().map_err(|e| {
                    Error::ExporterSetup(format!("invalid header name `{name}`: {e}"))
                })?;
                let value: AsciiMetadataValue = value.parse().map_err(|e| {
                    Error::ExporterSetup(format!("invalid value for header `{name}`: {e}"))
                })?;
                Ok((name, value))
            })
            .transpose()?;
        Ok(Self {
            client,
            header,
            resource: Resource {
                attributes: as_otel_attributes(resource),
                ..Default::default()
            },
        })
    }

    /// Spawn this on a tokio runtime to send your metrics to your downstream receiver.
    /// It returns once every sender is dropped and the channel is drained.
    pub async fn send_batches_forever(self, receiver: mpsc::Receiver<Vec<Metric>>) {
        self.send_metrics_stream_forever(ReceiverStream::new(receiver))
            .await;
    }

    /// Spawn this on a tokio runtime to send your metrics to your downstream receiver
    pub async fn send_metrics_stream_forever(
        mut self,
        mut receiver: impl Stream<Item = Vec<Metric>> + Unpin,
    ) {
        while let Some(batch) = receiver.next().await {
            self.export_with_retries(batch).await;
        }
        log::debug!("metrics batch stream ended");
    }

    async fn export_with_retries(&mut self, batch: Vec<Metric>) {
        let metric_count = batch.len();
        let request = self.export_request(batch);
        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.export(self.request(request.clone())).await {
                Ok(success) => {
                    log::debug!("sent {metric_count} metrics: {success:?}");
                    return;
                }
                Err(err) => {
                    if !err.metadata().is_empty() {
                        log::error!(
                            "failed to send metrics: {err}. Metadata: {:?}",
                            err.metadata()
                        );
                    }
                    log::error!("failed to send metrics (attempt {attempt}/{MAX_ATTEMPTS}): {err:?}");
                    if !is_retryable(err.code()) {
                        break;
                    }
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
        }
        log::error!("dropping a batch of {metric_count} metrics");
    }

    fn export_request(&self, metrics: Vec<Metric>) -> ExportMetricsServiceRequest {
        ExportMetricsServiceRequest {
            resource_metrics: vec![ResourceMetrics {
                resource: Some(self.resource.clone()),
                scope_metrics: vec![ScopeMetrics {
                    scope: Some(InstrumentationScope {
                        name: "meterkit".to_string(),
                        version: VERSION.unwrap_or("unknown").to_string(),
                        ..Default::default()
                    }),
                    metrics,
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn request<T>(&self, request: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(request);
        if let Some((header, value)) = self.header.as_ref() {
            request.metadata_mut().insert(header.clone(), value.clone());
        }
        request
    }
}

/// The codes a collector uses to say "try again later"
fn is_retryable(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable
            | Code::DeadlineExceeded
            | Code::ResourceExhausted
            | Code::Aborted
            | Code::Cancelled
            | Code::Unknown
    )
}

/// The default mapping from in-memory representation to opentelemetry metrics wire representation
#[derive(Debug, Clone, Copy, Default)]
pub struct OpentelemetryBatcher;

impl AggregationBatcher for OpentelemetryBatcher {
    type TBatch = Vec<Metric>;

    fn batch_aggregations(
        &mut self,
        now: SystemTime,
        covered_time: Duration,
        aggregations: &mut AggregatedMetricsMap,
    ) -> Self::TBatch {
        aggregations
            .drain()
            .map(|(_name, instrument)| as_metric(instrument, now, covered_time))
            .collect()
    }
}

struct Window {
    start_nanos: u64,
    end_nanos: u64,
}

fn as_metric(instrument: CollectedInstrument, timestamp: SystemTime, duration: Duration) -> Metric {
    let end_nanos = timestamp.nanos_since_epoch();
    let window = Window {
        start_nanos: end_nanos.saturating_sub(duration.as_nanos() as u64),
        end_nanos,
    };
    let CollectedInstrument { descriptor, series } = instrument;

    let mut sums = Vec::new();
    let mut histograms = Vec::new();
    let mut gauges = Vec::new();
    for (position, aggregation) in series {
        let attributes = as_otel_attributes(position);
        match aggregation {
            Aggregation::Sum(sum) => {
                sums.push(number_data_point(&window, attributes, as_int(sum.sum)))
            }
            Aggregation::Histogram(histogram) => {
                histograms.push(as_otel_histogram(histogram, &window, attributes))
            }
            Aggregation::LastValue(value) => {
                gauges.push(number_data_point(&window, attributes, as_int(value)))
            }
        }
    }

    let data = if !histograms.is_empty() {
        Data::Histogram(Histogram {
            data_points: histograms,
            aggregation_temporality: THE_ACTUAL_TEMPORALITY,
        })
    } else if !gauges.is_empty() {
        Data::Gauge(Gauge {
            data_points: gauges,
        })
    } else {
        Data::Sum(Sum {
            data_points: sums,
            aggregation_temporality: THE_ACTUAL_TEMPORALITY,
            // This resets every collection. It is monotonic within the window.
            is_monotonic: true,
        })
    };

    as_otel_metric(&descriptor, data)
}

fn as_otel_metric(descriptor: &InstrumentDescriptor, data: Data) -> Metric {
    Metric {
        name: descriptor.name().to_string(),
        description: descriptor.description().to_string(),
        unit: descriptor.unit().to_string(),
        data: Some(data),
        ..Default::default()
    }
}

fn as_otel_attributes(dimension_position: DimensionPosition) -> Vec<KeyValue> {
    dimension_position
        .into_iter()
        .map(|(name, value)| KeyValue {
            key: name.into(),
            value: Some(value.into()),
        })
        .collect()
}

impl From<Dimension> for AnyValue {
    fn from(dimension: Dimension) -> Self {
        AnyValue {
            value: Some(match dimension {
                Dimension::Str(s) => Value::StringValue(s.into()),
                Dimension::String(s) => Value::StringValue(s),
                Dimension::Shared(s) => Value::StringValue(
                    // Let's try to avoid cloning if this is the last place the string is shared
                    std::sync::Arc::<String>::try_unwrap(s).unwrap_or_else(|this| this.to_string()),
                ),
                Dimension::Number(n) => Value::IntValue(n as i64),
                Dimension::Boolean(b) => Value::BoolValue(b),
            }),
        }
    }
}

fn as_int(value: i64) -> number_data_point::Value {
    number_data_point::Value::AsInt(value)
}

fn number_data_point(
    window: &Window,
    attributes: Vec<KeyValue>,
    value: number_data_point::Value,
) -> NumberDataPoint {
    NumberDataPoint {
        attributes,
        start_time_unix_nano: window.start_nanos,
        time_unix_nano: window.end_nanos,
        value: Some(value),
        ..Default::default()
    }
}

fn as_otel_histogram(
    histogram: aggregation::Histogram,
    window: &Window,
    attributes: Vec<KeyValue>,
) -> HistogramDataPoint {
    let count = histogram.count;
    let sum = histogram.sum as f64;
    let min = histogram.min as f64;
    let max = histogram.max as f64;
    // We want this in min heap order, sorted by bucket
    let mut buckets: BinaryHeap<Reverse<(i64, u64)>> =
        histogram.into_map().into_iter().map(Reverse).collect();
    let mut sorted_bounds: Vec<f64> = Vec::with_capacity(buckets.len() * 2);
    let mut sorted_counts: Vec<u64> = Vec::with_capacity(buckets.len() * 2 + 1);
    while let Some(Reverse((bucket, bucket_count))) = buckets.pop() {
        let below = bucket_10_below_2_sigfigs(bucket) as f64;
        // Histograms here are sparse. Explicit bounds are not, so each bucket gets a
        // zero-count lower edge unless the previous bucket already ends there.
        if sorted_bounds.last().map_or(true, |last| *last < below) {
            sorted_bounds.push(below);
            sorted_counts.push(0);
        }
        sorted_bounds.push(bucket as f64);
        sorted_counts.push(bucket_count);
    }
    // The implicit +inf bucket. The last explicit bound is already the maximum bucket.
    sorted_counts.push(0);

    HistogramDataPoint {
        attributes,
        start_time_unix_nano: window.start_nanos,
        time_unix_nano: window.end_nanos,
        count,
        sum: Some(sum),
        bucket_counts: sorted_counts,
        explicit_bounds: sorted_bounds,
        min: Some(min),
        max: Some(max),
        ..Default::default()
    }
}
