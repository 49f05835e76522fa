use crate::{
    config::MetricsConfig,
    downstream::{parse_endpoint, ConnectionFactory, OpenTelemetryDownstream},
    error::Error,
    resource::ResourceBuilder,
};

use super::{ExportingProvider, NoopProvider, Provider};

/// Build the provider `config` asks for.
///
/// With export disabled this is a [`NoopProvider`] and `connection_factory` is never
/// called. With export enabled the connection cached in `config` is reused; when there
/// is none the factory is called once and its connection is cached for next time.
/// Nothing is cached when the factory fails.
///
/// Exporting needs a tokio runtime: the collection and export tasks are spawned on the
/// current one.
///
/// ```no_run
/// # async fn run() -> Result<(), meterkit::Error> {
/// let mut config = meterkit::MetricsConfig::exporting_to("http://collector:4317");
/// let provider = meterkit::install(
///     &mut config,
///     &meterkit::GrpcConnectionFactory::default(),
///     &meterkit::ServiceIdentity::new("checkout", "shop", "prod"),
/// )
/// .await?;
/// let requests = provider.counter("checkout.requests", "Checkouts attempted")?;
/// requests.add(1, &Default::default());
/// provider.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub async fn install<TConnectionFactory, TResource>(
    config: &mut MetricsConfig,
    connection_factory: &TConnectionFactory,
    resource: &TResource,
) -> Result<Provider, Error>
where
    TConnectionFactory: ConnectionFactory,
    TResource: ResourceBuilder + ?Sized,
{
    if !config.is_enabled() {
        log::debug!("metrics export is disabled");
        return Ok(Provider::Noop(NoopProvider::new()));
    }

    let connection = match config.get_connection() {
        Some(connection) => connection.clone(),
        None => {
            parse_endpoint(config.get_endpoint())?;
            let connection = connection_factory
                .connect(config.get_endpoint())
                .await
                .inspect_err(|e| log::error!("could not create metrics connection: {e}"))?;
            config.connection(connection.clone());
            connection
        }
    };

    let downstream = OpenTelemetryDownstream::new(
        connection.metrics_client(),
        config.get_header(),
        resource.resource_attributes(),
    )?;
    let provider = ExportingProvider::start(
        downstream,
        config.get_export_interval(),
        config.get_shutdown_timeout(),
    )
    .inspect_err(|e| log::error!("could not start metrics export: {e}"))?;
    log::info!("exporting metrics to {}", connection.origin());
    Ok(Provider::Exporting(provider))
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use crate::{
        config::MetricsConfig,
        downstream::{Connection, ConnectionFactory, GrpcConnectionFactory},
        error::Error,
        resource::ServiceIdentity,
        types::DimensionPosition,
    };

    use super::install;

    #[derive(Default)]
    struct CountingFactory {
        calls: AtomicUsize,
    }

    impl ConnectionFactory for CountingFactory {
        async fn connect(&self, endpoint: &str) -> Result<Connection, Error> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Connection::lazy(endpoint, || None)
        }
    }

    struct RefusingFactory;

    impl ConnectionFactory for RefusingFactory {
        async fn connect(&self, endpoint: &str) -> Result<Connection, Error> {
            Err(Error::connection(endpoint, "connection refused"))
        }
    }

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("test", "meterkit", "test")
    }

    #[test_log::test(tokio::test)]
    async fn disabled_export_never_connects() {
        let factory = CountingFactory::default();
        let mut config = MetricsConfig::default();

        for _ in 0..3 {
            let provider = install(&mut config, &factory, &identity())
                .await
                .expect("noop cannot fail");
            assert!(!provider.is_exporting());
            if let Ok(counter) = provider.counter("requests", "") {
                for _ in 0..1000 {
                    counter.add(1, &DimensionPosition::new());
                }
            }
            assert!(provider.collect().is_empty());
        }

        assert_eq!(0, factory.calls.load(Ordering::Relaxed));
        assert!(config.get_connection().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn connections_are_created_once_and_cached() {
        let factory = CountingFactory::default();
        let mut config = MetricsConfig::exporting_to("http://127.0.0.1:9");
        config.shutdown_timeout(Duration::from_millis(100));

        let first = install(&mut config, &factory, &identity())
            .await
            .expect("factory succeeds");
        let second = install(&mut config, &factory, &identity())
            .await
            .expect("cached connection is reused");

        assert!(first.is_exporting());
        assert!(second.is_exporting());
        assert_eq!(1, factory.calls.load(Ordering::Relaxed));
        assert!(config.get_connection().is_some());

        first.shutdown().await;
        second.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn unreachable_endpoints_fail_every_time() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("can bind");
        let port = listener.local_addr().expect("bound").port();
        drop(listener);

        let mut factory = GrpcConnectionFactory::default();
        factory.connect_timeout(Duration::from_secs(1));
        let mut config = MetricsConfig::exporting_to(format!("http://127.0.0.1:{port}"));

        for _ in 0..3 {
            let result = install(&mut config, &factory, &identity()).await;
            assert!(matches!(result, Err(Error::Connection { .. })), "{result:?}");
            assert!(config.get_connection().is_none());
        }

        for _ in 0..3 {
            let result = install(&mut config, &RefusingFactory, &identity()).await;
            assert!(matches!(result, Err(Error::Connection { .. })), "{result:?}");
            assert!(config.get_connection().is_none());
        }
    }

    #[test_log::test(tokio::test)]
    async fn malformed_endpoints_are_configuration_errors() {
        let factory = CountingFactory::default();
        let mut config = MetricsConfig::exporting_to("collector:4317");

        let result = install(&mut config, &factory, &identity()).await;

        assert!(matches!(result, Err(Error::Configuration(_))), "{result:?}");
        assert_eq!(0, factory.calls.load(Ordering::Relaxed));
    }

    #[test_log::test(tokio::test)]
    async fn bad_headers_and_intervals_are_rejected() {
        let factory = CountingFactory::default();
        let mut config = MetricsConfig::exporting_to("http://127.0.0.1:9");
        config.header("not a header", "value");
        let result = install(&mut config, &factory, &identity()).await;
        assert!(matches!(result, Err(Error::ExporterSetup(_))), "{result:?}");

        config.header("x-api-key", "secret");
        config.export_interval(Duration::ZERO);
        let result = install(&mut config, &factory, &identity()).await;
        assert!(matches!(result, Err(Error::Configuration(_))), "{result:?}");
    }

    #[test_log::test]
    fn exporting_needs_a_runtime() {
        let factory = CountingFactory::default();
        let mut config = MetricsConfig::exporting_to("http://127.0.0.1:9");

        let result = futures::executor::block_on(install(&mut config, &factory, &identity()));

        assert!(matches!(result, Err(Error::ExporterSetup(_))), "{result:?}");
    }
}
