use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};

use hyper::Uri;
use hyper_util::{client::legacy::connect::HttpConnector, rt::TokioExecutor};
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use tokio_rustls::rustls::{crypto::aws_lc_rs, ClientConfig, RootCertStore};

use crate::error::{Error, StdError};

/// Type alias for internal channel type
pub type ChannelType = hyper_util::client::legacy::Client<
    hyper_rustls::HttpsConnector<HttpConnector>,
    tonic::body::BoxBody,
>;

/// A transport handle to an OTLP/gRPC collector. Cloning shares the underlying
/// HTTP/2 connection pool.
#[derive(Clone)]
pub struct Connection {
    client: ChannelType,
    origin: Uri,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Build a connection without dialing. The first export opens the socket.
    ///
    /// `tls_trust` supplies the roots for `https` endpoints. Returning `None` uses the
    /// bundled webpki roots. If you run a private CA you can add it, for example:
    /// ```rust
    /// # let my_ca_roots = Vec::new();
    /// let connection = meterkit::Connection::lazy("https://collector.internal:4317", || {
    ///     Some(tokio_rustls::rustls::RootCertStore { roots: my_ca_roots })
    /// });
    /// assert!(connection.is_ok());
    /// ```
    pub fn lazy<TrustFunction>(endpoint: &str, tls_trust: TrustFunction) -> Result<Self, Error>
    where
        TrustFunction: FnOnce() -> Option<RootCertStore>,
    {
        let origin = parse_endpoint(endpoint)?;
        let tls = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::connection(endpoint, e))?
            .with_root_certificates(tls_trust().unwrap_or_else(default_trust))
            .with_no_client_auth();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        let https_connector = tower::ServiceBuilder::new()
            .layer_fn(move |http_connector| {
                let tls = tls.clone();

                hyper_rustls::HttpsConnectorBuilder::new()
                    .with_tls_config(tls)
                    .https_or_http()
                    .enable_http2()
                    .wrap_connector(http_connector)
            })
            .service(http_connector);

        let client = hyper_util::client::legacy::Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(https_connector);

        Ok(Self { client, origin })
    }

    /// The collector this connection talks to
    pub fn origin(&self) -> &Uri {
        &self.origin
    }

    /// The generated client sets `scheme` and `authority` from the origin on each request.
    pub(crate) fn metrics_client(&self) -> MetricsServiceClient<ChannelType> {
        MetricsServiceClient::with_origin(self.client.clone(), self.origin.clone())
    }
}

fn default_trust() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Endpoints must be absolute `http` or `https` URIs with a host.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Uri, Error> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|e| Error::Configuration(format!("endpoint `{endpoint}` is not a uri: {e}")))?;
    match (uri.scheme_str(), uri.host()) {
        (Some("http" | "https"), Some(host)) if !host.is_empty() => Ok(uri),
        (Some("http" | "https"), _) => Err(Error::Configuration(format!(
            "endpoint `{endpoint}` has no host"
        ))),
        _ => Err(Error::Configuration(format!(
            "endpoint `{endpoint}` must start with http:// or https://"
        ))),
    }
}

/// Builds the transport for an exporting provider. Called at most once per
/// [`MetricsConfig`](crate::MetricsConfig); the result is cached there.
pub trait ConnectionFactory {
    /// Create a connection to `endpoint`, or explain why that is not possible right now.
    fn connect(&self, endpoint: &str) -> impl Future<Output = Result<Connection, Error>> + Send;
}

/// The default [`ConnectionFactory`]: an HTTP/2 client trusting the webpki roots.
///
/// Since the client itself connects lazily, the factory dials the collector once up
/// front so an unreachable endpoint fails install instead of every export.
#[derive(Debug, Clone)]
pub struct GrpcConnectionFactory {
    connect_timeout: Duration,
    check_reachability: bool,
}

impl Default for GrpcConnectionFactory {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            check_reachability: true,
        }
    }
}

impl GrpcConnectionFactory {
    /// Set the bound on the reachability dial (default 5s)
    pub fn connect_timeout(&mut self, connect_timeout: Duration) {
        self.connect_timeout = connect_timeout
    }

    /// Turn the reachability dial on or off (default on)
    pub fn reachability_check(&mut self, check_reachability: bool) {
        self.check_reachability = check_reachability
    }
}

impl ConnectionFactory for GrpcConnectionFactory {
    async fn connect(&self, endpoint: &str) -> Result<Connection, Error> {
        let origin = parse_endpoint(endpoint)?;
        if self.check_reachability {
            dial(&origin, self.connect_timeout)
                .await
                .map_err(|e| Error::connection(endpoint, e))?;
            log::debug!("metrics endpoint {origin} is reachable");
        }
        Connection::lazy(endpoint, || None)
    }
}

async fn dial(origin: &Uri, connect_timeout: Duration) -> Result<(), StdError> {
    let host = origin
        .host()
        .ok_or("endpoint has no host")?
        .trim_start_matches('[')
        .trim_end_matches(']');
    let port = origin
        .port_u16()
        .unwrap_or(if origin.scheme_str() == Some("https") {
            443
        } else {
            80
        });
    tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect((host, port))).await??;
    Ok(())
}
