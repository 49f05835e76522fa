use std::time::Duration;

use crate::downstream::Connection;

/// Settings for [`install`](crate::install).
///
/// Export is off by default. The transport connection is created on the first enabled
/// install and cached here, so installing again with the same configuration reuses it.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    enabled: bool,
    endpoint: String,
    connection: Option<Connection>,
    export_interval: Duration,
    shutdown_timeout: Duration,
    header: Option<(String, String)>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:4317".to_string(),
            connection: None,
            export_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            header: None,
        }
    }
}

impl MetricsConfig {
    /// Export to an OTLP/gRPC collector at `endpoint`, like `http://collector:4317`.
    pub fn exporting_to(endpoint: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.enabled(true);
        config.endpoint(endpoint);
        config
    }

    /// Choose between exporting (true) and discarding (false, the default)
    pub fn enabled(&mut self, enabled: bool) {
        self.enabled = enabled
    }

    /// Set the OTLP/gRPC target (default `http://localhost:4317`).
    /// A cached connection is dropped when the endpoint changes.
    pub fn endpoint(&mut self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        if endpoint != self.endpoint {
            self.connection = None;
        }
        self.endpoint = endpoint
    }

    /// Supply a connection up front instead of letting install create one.
    pub fn connection(&mut self, connection: Connection) {
        self.connection = Some(connection)
    }

    /// Set the push cadence (default 60s)
    pub fn export_interval(&mut self, export_interval: Duration) {
        self.export_interval = export_interval
    }

    /// Set the bound on the final flush at shutdown (default 5s)
    pub fn shutdown_timeout(&mut self, shutdown_timeout: Duration) {
        self.shutdown_timeout = shutdown_timeout
    }

    /// Attach a gRPC metadata header, like an API key, to every export request.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.header = Some((name.into(), value.into()))
    }

    /// Whether install will build an exporting provider
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The OTLP/gRPC target
    pub fn get_endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The cached transport connection, if one was created
    pub fn get_connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// The push cadence
    pub fn get_export_interval(&self) -> Duration {
        self.export_interval
    }

    /// The bound on the final flush
    pub fn get_shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// The extra export header
    pub fn get_header(&self) -> Option<(&str, &str)> {
        self.header
            .as_ref()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}
