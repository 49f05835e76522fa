//! Request metrics for HTTP servers.
//!
//! Every request produces one increment of `http.requests` and one observation of
//! `http.request.duration` in nanoseconds, both with the attributes `method`, `uri` and
//! `status_code`.
//!
//! **Cardinality:** `uri` is the raw request URI, query string included. Every distinct
//! path becomes its own series. If your routes carry ids, rewrite the URI to a template
//! (`/users/{id}`) before it reaches this middleware, or use [`HttpMetrics::start`] with
//! a request whose URI you have already normalized.

use std::{
    panic::AssertUnwindSafe,
    task::{Context, Poll},
    time::Instant,
};

use futures::{future::BoxFuture, FutureExt};
use hyper::{Method, Request, Response, StatusCode};

use crate::{
    error::Error,
    instrument::{Counter, Histogram},
    provider::Provider,
    types::{Dimension, DimensionPosition, Name},
};

/// Recorded when the response future is dropped before the handler finished.
const CLIENT_CLOSED_REQUEST: u16 = 499;

const STANDARD_METHODS: [&str; 9] = [
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "CONNECT", "PATCH", "TRACE",
];

/// The request counter and duration histogram.
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    requests: Counter,
    duration: Histogram,
}

impl HttpMetrics {
    /// Create `http.requests` and `http.request.duration` on `provider`.
    /// Fails if either name is already registered.
    pub fn new(provider: &Provider) -> Result<Self, Error> {
        Ok(Self {
            requests: provider.counter("http.requests", "HTTP Requests Counter")?,
            duration: provider.histogram(
                "http.request.duration",
                "HTTP Request Duration",
                "ns",
            )?,
        })
    }

    /// A `tower::Layer` that records every request passing through it.
    pub fn layer(&self) -> HttpMetricsLayer {
        HttpMetricsLayer {
            metrics: self.clone(),
        }
    }

    /// Start timing a request by hand, for servers that are not built on tower.
    ///
    /// The request is recorded once: when you call [`RequestContext::finish`], or when
    /// the context is dropped without finishing.
    pub fn start<B>(&self, request: &Request<B>) -> RequestContext {
        RequestContext {
            metrics: self.clone(),
            method: request.method().clone(),
            uri: request.uri().to_string(),
            start: Instant::now(),
            status: None,
            recorded: false,
        }
    }
}

/// One in-flight request.
///
/// Dropping a context that was never finished still records it: with status 500 while
/// unwinding from a panic, otherwise 499 because the caller gave up on the request.
#[derive(Debug)]
pub struct RequestContext {
    metrics: HttpMetrics,
    method: Method,
    uri: String,
    start: Instant,
    status: Option<StatusCode>,
    recorded: bool,
}

impl RequestContext {
    /// Set the response status. Only the first capture counts.
    pub fn capture_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    /// The captured status, 200 when nothing was captured
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Record the request with its captured status.
    pub fn finish(mut self) {
        let status_code = self.status().as_u16();
        self.record(status_code);
    }

    fn record(&mut self, status_code: u16) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        let elapsed = self.start.elapsed();

        let mut attributes = DimensionPosition::new();
        attributes.insert(Name::Str("method"), method_dimension(&self.method));
        attributes.insert(
            Name::Str("uri"),
            Dimension::String(std::mem::take(&mut self.uri)),
        );
        attributes.insert(Name::Str("status_code"), Dimension::from(status_code));

        self.metrics.requests.add(1, &attributes);
        self.metrics.duration.record_duration(elapsed, &attributes);
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if !self.recorded {
            let status_code = if std::thread::panicking() {
                StatusCode::INTERNAL_SERVER_ERROR.as_u16()
            } else {
                CLIENT_CLOSED_REQUEST
            };
            self.record(status_code);
        }
    }
}

fn method_dimension(method: &Method) -> Dimension {
    STANDARD_METHODS
        .iter()
        .find(|standard| **standard == method.as_str())
        .copied()
        .map(Dimension::Str)
        .unwrap_or_else(|| Dimension::String(method.as_str().to_string()))
}

/// Applies [`HttpMetricsService`] to a service.
#[derive(Debug, Clone)]
pub struct HttpMetricsLayer {
    metrics: HttpMetrics,
}

impl<S> tower::Layer<S> for HttpMetricsLayer {
    type Service = HttpMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

/// Records each request's status and duration around the inner service.
/// An error from the inner service is recorded as a 500.
#[derive(Debug, Clone)]
pub struct HttpMetricsService<S> {
    inner: S,
    metrics: HttpMetrics,
}

impl<S, ReqBody, ResBody> tower::Service<Request<ReqBody>> for HttpMetricsService<S>
where
    S: tower::Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: 'static,
    ResBody: 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let mut context = self.metrics.start(&request);
        let response = self.inner.call(request);
        Box::pin(async move {
            // The executor drops a panicked future after unwinding, too late for the
            // context to see the panic.
            let result = match AssertUnwindSafe(response).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    context.capture_status(StatusCode::INTERNAL_SERVER_ERROR);
                    context.finish();
                    std::panic::resume_unwind(panic);
                }
            };
            match &result {
                Ok(response) => context.capture_status(response.status()),
                Err(_) => context.capture_status(StatusCode::INTERNAL_SERVER_ERROR),
            }
            context.finish();
            result
        })
    }
}

#[cfg(test)]
mod test {
    use std::{convert::Infallible, time::Duration};

    use hyper::{Request, Response, StatusCode};
    use tower::{service_fn, Layer, Service, ServiceExt};

    use crate::{
        aggregation::{Aggregation, Histogram, Sum},
        error::Error,
        provider::{testing::exporting_provider, Provider},
        types::{attributes, Dimension, DimensionPosition, Name},
    };

    use super::HttpMetrics;

    fn request(method: &str, uri: &str) -> Request<()> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .expect("valid request")
    }

    fn position(method: &'static str, uri: &'static str, status_code: u16) -> DimensionPosition {
        attributes([
            ("method", Dimension::from(method)),
            ("uri", Dimension::from(uri)),
            ("status_code", Dimension::from(status_code)),
        ])
    }

    /// (count per attribute set, duration histogram per attribute set)
    fn collect(
        provider: &Provider,
    ) -> (
        Vec<(DimensionPosition, i64)>,
        Vec<(DimensionPosition, Histogram)>,
    ) {
        let mut collected = provider.collect();
        let counts = collected
            .remove(&Name::from("http.requests"))
            .map(|instrument| {
                instrument
                    .series
                    .into_iter()
                    .filter_map(|(position, aggregation)| match aggregation {
                        Aggregation::Sum(Sum { sum }) => Some((position, sum)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let durations = collected
            .remove(&Name::from("http.request.duration"))
            .map(|instrument| {
                instrument
                    .series
                    .into_iter()
                    .filter_map(|(position, aggregation)| match aggregation {
                        Aggregation::Histogram(histogram) => Some((position, histogram)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        (counts, durations)
    }

    #[test_log::test(tokio::test)]
    async fn every_request_is_counted_with_its_attributes() {
        let provider = exporting_provider().await;
        let metrics = HttpMetrics::new(&provider).expect("new names");
        let mut service = metrics.layer().layer(service_fn(|request: Request<()>| async move {
            let status = if request.uri().path() == "/missing" {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::OK
            };
            Ok::<_, Infallible>(
                Response::builder()
                    .status(status)
                    .body(())
                    .expect("valid response"),
            )
        }));

        for _ in 0..3 {
            let response = service
                .ready()
                .await
                .expect("ready")
                .call(request("GET", "/a"))
                .await
                .expect("infallible");
            assert_eq!(StatusCode::OK, response.status());
        }
        for _ in 0..2 {
            service
                .ready()
                .await
                .expect("ready")
                .call(request("POST", "/missing"))
                .await
                .expect("infallible");
        }

        let (mut counts, durations) = collect(&provider);
        counts.sort();
        assert_eq!(
            vec![
                (position("GET", "/a", 200), 3),
                (position("POST", "/missing", 404), 2)
            ],
            counts
        );
        assert_eq!(2, durations.len());
        for (position, histogram) in durations {
            let expected = if position == self::position("GET", "/a", 200) {
                3
            } else {
                2
            };
            assert_eq!(expected, histogram.count, "{position:?}");
        }

        provider.shutdown().await;
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn concurrent_requests_are_all_counted() {
        let provider = exporting_provider().await;
        let metrics = HttpMetrics::new(&provider).expect("new names");
        let service = metrics.layer().layer(service_fn(|request: Request<()>| async move {
            tokio::task::yield_now().await;
            let status = match request.uri().path() {
                "/missing" => StatusCode::NOT_FOUND,
                "/created" => StatusCode::CREATED,
                _ => StatusCode::OK,
            };
            Ok::<_, Infallible>(
                Response::builder()
                    .status(status)
                    .body(())
                    .expect("valid response"),
            )
        }));

        let routes = [
            ("GET", "/a", 200, 300),
            ("GET", "/missing", 404, 150),
            ("POST", "/created", 201, 200),
            ("DELETE", "/a", 200, 50),
        ];
        let mut requests = tokio::task::JoinSet::new();
        for round in 0..300 {
            for (method, uri, _, count) in routes {
                if round < count {
                    requests.spawn(service.clone().oneshot(request(method, uri)));
                }
            }
        }
        while let Some(served) = requests.join_next().await {
            served.expect("no panics").expect("infallible");
        }

        let (mut counts, durations) = collect(&provider);
        counts.sort();
        let mut expected: Vec<(DimensionPosition, i64)> = routes
            .iter()
            .map(|(method, uri, status, count)| (position(*method, *uri, *status), *count as i64))
            .collect();
        expected.sort();
        assert_eq!(expected, counts);

        assert_eq!(routes.len(), durations.len());
        for (position, histogram) in durations {
            let (_, count) = expected
                .iter()
                .find(|(expected_position, _)| *expected_position == position)
                .expect("every duration matches a counted request");
            assert_eq!(*count as u64, histogram.count, "{position:?}");
        }

        provider.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn durations_cover_the_handler() {
        let provider = exporting_provider().await;
        let metrics = HttpMetrics::new(&provider).expect("new names");
        let service = metrics.layer().layer(service_fn(|_request: Request<()>| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, Infallible>(Response::new(()))
        }));

        service.oneshot(request("GET", "/slow")).await.expect("infallible");

        let (_, durations) = collect(&provider);
        let (position, histogram) = &durations[0];
        assert_eq!(&self::position("GET", "/slow", 200), position);
        assert!(
            histogram.min >= 50_000_000,
            "recorded {}ns",
            histogram.min
        );

        provider.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn inner_errors_are_recorded_as_500() {
        let provider = exporting_provider().await;
        let metrics = HttpMetrics::new(&provider).expect("new names");
        let service = metrics.layer().layer(service_fn(|_request: Request<()>| async {
            Err::<Response<()>, _>(std::io::Error::other("handler failed"))
        }));

        assert!(service.oneshot(request("PUT", "/a")).await.is_err());

        let (counts, _) = collect(&provider);
        assert_eq!(vec![(position("PUT", "/a", 500), 1)], counts);

        provider.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn panicking_handlers_are_recorded_as_500() {
        let provider = exporting_provider().await;
        let metrics = HttpMetrics::new(&provider).expect("new names");
        let service = metrics.layer().layer(service_fn(|_request: Request<()>| async {
            if true {
                panic!("handler failed");
            }
            Ok::<_, Infallible>(Response::new(()))
        }));

        let served = tokio::spawn(service.oneshot(request("GET", "/panic"))).await;
        assert!(served.is_err_and(|e| e.is_panic()));

        let (counts, _) = collect(&provider);
        assert_eq!(vec![(position("GET", "/panic", 500), 1)], counts);

        provider.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn abandoned_requests_are_recorded_as_499() {
        let provider = exporting_provider().await;
        let metrics = HttpMetrics::new(&provider).expect("new names");
        let mut service = metrics.layer().layer(service_fn(|_request: Request<()>| async {
            std::future::pending::<()>().await;
            Ok::<_, Infallible>(Response::new(()))
        }));

        let response = service
            .ready()
            .await
            .expect("ready")
            .call(request("GET", "/hang"));
        let timed_out = tokio::time::timeout(Duration::from_millis(10), response).await;
        assert!(timed_out.is_err());

        let (counts, durations) = collect(&provider);
        assert_eq!(vec![(position("GET", "/hang", 499), 1)], counts);
        assert_eq!(1, durations.len());

        provider.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn manual_contexts_keep_the_first_status() {
        let provider = exporting_provider().await;
        let metrics = HttpMetrics::new(&provider).expect("new names");

        metrics.start(&request("GET", "/default")).finish();

        let mut context = metrics.start(&request("DELETE", "/first"));
        context.capture_status(StatusCode::NOT_FOUND);
        context.capture_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(StatusCode::NOT_FOUND, context.status());
        context.finish();

        let panicking = metrics.clone();
        let handler = std::thread::spawn(move || {
            let _context = panicking.start(&request("POST", "/panic"));
            panic!("handler failed");
        });
        assert!(handler.join().is_err());

        let (mut counts, _) = collect(&provider);
        counts.sort();
        assert_eq!(
            vec![
                (position("DELETE", "/first", 404), 1),
                (position("GET", "/default", 200), 1),
                (position("POST", "/panic", 500), 1),
            ],
            counts
        );

        provider.shutdown().await;
    }

    #[test_log::test]
    fn extension_methods_are_kept() {
        let provider = Provider::noop();
        let metrics = HttpMetrics::new(&provider).expect("new names");
        assert!(matches!(
            HttpMetrics::new(&provider),
            Err(Error::InstrumentCreation { .. })
        ));

        let context = metrics.start(&request("PURGE", "/cache"));
        assert_eq!(
            Dimension::from("PURGE"),
            super::method_dimension(&context.method)
        );
        context.finish();
    }
}
