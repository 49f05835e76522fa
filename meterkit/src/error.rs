//! Errors raised while installing a provider or creating instruments.
//!
//! Nothing here is raised from recording. Once a provider is live, counters, histograms
//! and gauge callbacks are best-effort and export failures stay inside the pipeline.

use crate::types::Name;

pub(crate) type StdError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can go wrong while setting up metrics.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The export target is missing or malformed.
    #[error("invalid metrics configuration: {0}")]
    Configuration(String),

    /// The transport connection could not be established.
    #[error("could not connect to metrics endpoint {endpoint}: {source}")]
    Connection {
        /// The endpoint that was dialed
        endpoint: String,
        /// What the transport reported
        #[source]
        source: StdError,
    },

    /// The export pipeline could not be built around an otherwise good connection.
    #[error("could not set up metrics exporter: {0}")]
    ExporterSetup(String),

    /// An instrument could not be registered, usually because the name is taken.
    #[error("could not create instrument `{name}`: {reason}")]
    InstrumentCreation {
        /// The instrument that was rejected
        name: Name,
        /// Why it was rejected
        reason: &'static str,
    },
}

impl Error {
    pub(crate) fn connection(endpoint: impl Into<String>, source: impl Into<StdError>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            source: source.into(),
        }
    }

    pub(crate) fn duplicate_instrument(name: Name) -> Self {
        Self::InstrumentCreation {
            name,
            reason: "an instrument with this name is already registered",
        }
    }

    pub(crate) fn unnamed_instrument(name: Name) -> Self {
        Self::InstrumentCreation {
            name,
            reason: "instrument names must not be empty",
        }
    }
}
